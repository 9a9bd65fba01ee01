//! mt-protocol: Session message model for mqterm
//!
//! This crate defines the messages exchanged between the terminal bridge
//! and the MQTT topics, and the JSON payload they travel in.

pub mod error;
pub mod message;
pub mod topic;
pub mod transcode;
pub mod wire;

pub use error::ProtocolError;
pub use message::{SessionMessage, TerminalSize};
pub use topic::Topics;
pub use transcode::Utf8Transcoder;
pub use wire::WirePayload;
