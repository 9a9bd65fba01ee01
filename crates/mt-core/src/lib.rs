//! mt-core: Configuration and error types for mqterm
//!
//! This crate provides the agent configuration, broker address parsing and
//! the error enums shared by the bridge and the messaging client.

pub mod broker;
pub mod config;
pub mod error;

pub use broker::{BrokerAddress, BrokerScheme};
pub use error::{ConfigError, SpawnError};
