//! MQTT client with durable subscriptions
//!
//! Owns the broker connection. The rumqttc event loop runs in its own task;
//! every ConnAck it sees re-applies the whole [`SubscriptionTable`], so a
//! subscription registered once survives any number of reconnects.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    Transport,
};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use mt_core::config::{AgentConfig, BackoffConfig};
use mt_core::{BrokerAddress, BrokerScheme, ConfigError};

use super::subscriptions::{ConnectionHooks, IncomingMessage, SubscriptionTable};
use crate::backoff::RetryDelay;

/// Requests (publish, subscribe) that may queue up ahead of the event loop
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// How long `disconnect` lets the event loop flush the DISCONNECT packet
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Errors that prevent the client from starting
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Broker settings are unusable
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The first connection attempt was refused or failed
    #[error("Failed to connect to {broker}: {reason}")]
    ConnectFailed { broker: String, reason: String },

    /// No answer from the broker in time
    #[error("Timed out after {0:?} waiting for the broker")]
    Timeout(Duration),

    /// The event loop ended before reporting a result
    #[error("MQTT event loop stopped before connecting")]
    Closed,
}

/// Everything needed to reach the broker
#[derive(Clone)]
pub struct ClientOptions {
    pub broker: BrokerAddress,
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub backoff: BackoffConfig,
}

impl ClientOptions {
    pub fn from_config(config: &AgentConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            broker: config.broker_address()?,
            client_id: config.client_id(),
            username: config.username.clone(),
            password: config.password.clone(),
            keep_alive: config.keep_alive,
            connect_timeout: config.connect_timeout,
            backoff: config.backoff.clone(),
        })
    }

    fn mqtt_options(&self) -> MqttOptions {
        // Websocket transports connect to the full URL, path included.
        let host = if self.broker.scheme.is_websocket() {
            self.broker.url.clone()
        } else {
            self.broker.host.clone()
        };

        let mut options = MqttOptions::new(&self.client_id, host, self.broker.port);
        options
            .set_credentials(&self.username, &self.password)
            .set_keep_alive(self.keep_alive);

        options.set_transport(match self.broker.scheme {
            BrokerScheme::Tcp => Transport::Tcp,
            BrokerScheme::Tls => Transport::tls_with_default_config(),
            BrokerScheme::Ws => Transport::Ws,
            BrokerScheme::Wss => Transport::wss_with_default_config(),
        });
        options
    }
}

/// Sends payloads to a topic
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Send `payload`; failures are logged, not returned
    async fn publish(&self, topic: &str, qos: QoS, payload: Vec<u8>);
}

/// Handle to the broker connection. Cheap to clone.
#[derive(Clone)]
pub struct MessagingClient {
    client: AsyncClient,
    hooks: ConnectionHooks<AsyncClient>,
    shutdown: CancellationToken,
    event_loop: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl MessagingClient {
    /// Start the connection and wait for the first attempt to finish.
    ///
    /// Registrations already in `table` are subscribed as soon as the broker
    /// accepts the connection. A first attempt that fails is fatal; later
    /// connection losses are retried with backoff.
    pub async fn connect(
        options: ClientOptions,
        table: SubscriptionTable,
    ) -> Result<Self, ConnectionError> {
        tracing::info!(
            "Connecting to broker at {} as {}",
            options.broker,
            options.client_id
        );

        let (client, event_loop) =
            AsyncClient::new(options.mqtt_options(), REQUEST_CHANNEL_CAPACITY);
        let hooks = ConnectionHooks::new(client.clone(), table);
        let shutdown = CancellationToken::new();
        let (first_tx, first_rx) = oneshot::channel();

        let task = tokio::spawn(run_event_loop(
            event_loop,
            hooks.clone(),
            RetryDelay::from_config(&options.backoff),
            shutdown.clone(),
            first_tx,
        ));

        let outcome = match tokio::time::timeout(options.connect_timeout, first_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(reason))) => Err(ConnectionError::ConnectFailed {
                broker: options.broker.to_string(),
                reason,
            }),
            Ok(Err(_)) => Err(ConnectionError::Closed),
            Err(_) => Err(ConnectionError::Timeout(options.connect_timeout)),
        };
        if let Err(e) = outcome {
            shutdown.cancel();
            task.abort();
            return Err(e);
        }

        Ok(Self {
            client,
            hooks,
            shutdown,
            event_loop: Arc::new(Mutex::new(Some(task))),
        })
    }

    /// Register a handler for `topic`.
    ///
    /// The registration is permanent and re-applied on every reconnect.
    pub fn subscribe<F, Fut>(&self, topic: impl Into<String>, qos: QoS, handler: F)
    where
        F: Fn(IncomingMessage) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let registration = self.hooks.table().register(topic, qos, handler);
        self.hooks.add(registration);
    }

    /// Whether the broker connection is currently up
    pub fn is_connected(&self) -> bool {
        self.hooks.is_connected()
    }

    /// Send DISCONNECT and stop the event loop
    pub async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            tracing::debug!("Disconnect request failed: {}", e);
        }

        let task = self
            .event_loop
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            if tokio::time::timeout(DISCONNECT_GRACE, task).await.is_err() {
                tracing::debug!("Event loop did not stop in {:?}", DISCONNECT_GRACE);
            }
        }
        self.shutdown.cancel();
    }
}

#[async_trait]
impl Publisher for MessagingClient {
    async fn publish(&self, topic: &str, qos: QoS, payload: Vec<u8>) {
        if let Err(e) = self.client.publish(topic, qos, false, payload).await {
            tracing::error!("Publish to {} failed: {}", topic, e);
        }
    }
}

/// Poll the connection until shutdown, running the hooks on each event
async fn run_event_loop(
    mut event_loop: EventLoop,
    hooks: ConnectionHooks<AsyncClient>,
    mut backoff: RetryDelay,
    shutdown: CancellationToken,
    first: oneshot::Sender<Result<(), String>>,
) {
    let mut first = Some(first);

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = event_loop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if !matches!(ack.code, ConnectReturnCode::Success) {
                    tracing::warn!("Broker answered connect with {:?}", ack.code);
                    continue;
                }
                backoff.reset();
                if let Some(tx) = first.take() {
                    let _ = tx.send(Ok(()));
                }
                // Fire-and-forget; each subscribe needs this loop to progress.
                drop(hooks.on_connect());
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                hooks.on_message(publish.into());
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                tracing::info!("Disconnected from broker");
                break;
            }
            Ok(event) => tracing::trace!("MQTT event: {:?}", event),
            Err(e) => {
                if let Some(tx) = first.take() {
                    let _ = tx.send(Err(e.to_string()));
                    break;
                }
                hooks.on_connection_lost(&e);

                let delay = backoff.next_delay();
                tracing::info!(
                    "Reconnecting in {:?} (attempt {})",
                    delay,
                    backoff.attempts()
                );
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
    tracing::debug!("MQTT event loop exiting");
}
