//! Broker connection with subscriptions that survive reconnects

mod client;
mod subscriptions;

pub use client::{ClientOptions, ConnectionError, MessagingClient, Publisher};
pub use subscriptions::{
    ConnectionHooks, IncomingMessage, MessageHandler, Registration, SubscriptionTable, Subscriber,
};
