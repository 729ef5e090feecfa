//! # chord-core
//!
//! Value objects shared between the gateway client and the object-model layer
//! that feeds it: snowflake ids, gateway intents, and presence descriptions.

pub mod presence;
pub mod value_objects;

// Re-export commonly used types at crate root
pub use presence::{Activity, ActivityType, Presence, Status};
pub use value_objects::{Intents, Snowflake, SnowflakeParseError};
