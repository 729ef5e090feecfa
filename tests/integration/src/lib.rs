//! Integration test utilities for the gateway client
//!
//! This crate provides scripted mock gateway and voice servers and the
//! frames they send, for end-to-end tests against `chord-gateway`.

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
