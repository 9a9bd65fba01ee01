//! mt-agent: exposes a local shell over MQTT
//!
//! The agent runs a shell on a pseudo-terminal, feeds it from
//! `/shell/{name}/input` and publishes what it prints on
//! `/shell/{name}/output`. The connection to the broker may come and go;
//! the shell and the subscriptions outlive it.

pub mod backoff;
pub mod pty;
pub mod relay;
pub mod tunnel;

pub use pty::{Bridge, BridgeOptions};
pub use tunnel::{ClientOptions, MessagingClient, SubscriptionTable};
