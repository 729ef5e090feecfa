//! Gateway client entry point
//!
//! Run with:
//! ```bash
//! CHORD_TOKEN=... cargo run -p chord-gateway
//! ```
//!
//! Connects, logs every event, and exits on Ctrl-C.

use chord_common::{try_init_tracing_with_config, GatewayConfig, TracingConfig};
use chord_gateway::{Gateway, GatewayEvent};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "Gateway client failed");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env()?;

    if let Err(e) = try_init_tracing_with_config(TracingConfig::for_environment(config.env)) {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    info!(
        env = ?config.env,
        url = %config.connect_url(),
        shard = ?config.shard,
        "Configuration loaded"
    );

    let gateway = Gateway::new(config);
    let mut events = gateway.subscribe();
    let supervisor = gateway.spawn();

    let logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(GatewayEvent::Dispatch { name, sequence, .. }) => {
                    info!(event = %name, seq = ?sequence, "Dispatch");
                }
                Ok(event) => {
                    let terminal = event.is_terminal();
                    info!(event = ?event, "Lifecycle event");
                    if terminal {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event logger fell behind");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let shutdown = gateway.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            shutdown.shutdown();
        }
    });

    let result = supervisor.await?;
    logger.abort();
    result?;
    info!("Gateway client stopped");
    Ok(())
}
