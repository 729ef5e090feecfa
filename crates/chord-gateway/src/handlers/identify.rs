//! Identify (op 2)

use crate::protocol::{GatewayMessage, IdentifyPayload, IdentifyProperties};
use chord_common::GatewayConfig;
use chord_core::Presence;

/// Builds the Identify frame for a fresh session
pub struct IdentifyHandler;

impl IdentifyHandler {
    /// Identify payload from the client configuration and presence seed
    pub fn payload(
        config: &GatewayConfig,
        properties: &IdentifyProperties,
        presence: Option<Presence>,
    ) -> IdentifyPayload {
        IdentifyPayload {
            token: config.token.clone(),
            properties: properties.clone(),
            compress: false,
            large_threshold: config.large_threshold,
            shard: config.shard.as_ref().map(chord_common::ShardConfig::as_pair),
            presence,
            intents: Some(config.intents),
        }
    }

    pub fn message(
        config: &GatewayConfig,
        properties: &IdentifyProperties,
        presence: Option<Presence>,
    ) -> Result<GatewayMessage, serde_json::Error> {
        let payload = Self::payload(config, properties, presence);
        tracing::debug!(
            shard = ?payload.shard,
            intents = %config.intents,
            large_threshold = payload.large_threshold,
            "Sending Identify"
        );
        GatewayMessage::identify(&payload)
    }
}
