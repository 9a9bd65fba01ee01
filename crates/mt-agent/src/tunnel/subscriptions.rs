//! Subscription registrations and the connection hooks that apply them
//!
//! The [`SubscriptionTable`] is the only record of what the agent is
//! subscribed to. It is owned alongside the MQTT client rather than by it:
//! the event loop gets a [`ConnectionHooks`] holding a clone of the table and
//! re-subscribes every registration each time a connection comes up.
//!
//! Each registration delivers to its handler from its own task, fed by a
//! queue. The event loop only enqueues, so a slow handler never stops it from
//! polling the connection.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use rumqttc::{AsyncClient, ClientError, Publish, QoS};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A message delivered on a subscribed topic
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub topic: String,
    pub qos: QoS,
    pub payload: Bytes,
}

impl From<Publish> for IncomingMessage {
    fn from(publish: Publish) -> Self {
        Self {
            topic: publish.topic,
            qos: publish.qos,
            payload: publish.payload,
        }
    }
}

/// Callback run for each message on a registered topic
pub type MessageHandler = Arc<dyn Fn(IncomingMessage) -> BoxFuture<'static, ()> + Send + Sync>;

/// A topic filter, its QoS and the handler its messages go to
#[derive(Clone)]
pub struct Registration {
    pub topic: String,
    pub qos: QoS,
    handler: MessageHandler,
    queue: mpsc::UnboundedSender<IncomingMessage>,
}

impl Registration {
    /// Create the registration and start its delivery task.
    ///
    /// Must be called within a tokio runtime. The task ends once every clone
    /// of the registration is gone.
    fn start(topic: String, qos: QoS, handler: MessageHandler) -> Self {
        let (queue, mut pending) = mpsc::unbounded_channel::<IncomingMessage>();
        let delivering = Arc::clone(&handler);
        let filter = topic.clone();
        tokio::spawn(async move {
            while let Some(message) = pending.recv().await {
                delivering(message).await;
            }
            tracing::trace!("Delivery for {} stopped", filter);
        });
        Self {
            topic,
            qos,
            handler,
            queue,
        }
    }

    /// Run the handler for one message and wait for it
    pub async fn deliver(&self, message: IncomingMessage) {
        (self.handler)(message).await
    }

    /// Queue a message for the delivery task without waiting on the handler
    pub fn dispatch(&self, message: IncomingMessage) -> bool {
        self.queue.send(message).is_ok()
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("topic", &self.topic)
            .field("qos", &self.qos)
            .finish_non_exhaustive()
    }
}

/// Every subscription the agent wants, connected or not
#[derive(Clone, Default)]
pub struct SubscriptionTable {
    entries: Arc<RwLock<Vec<Registration>>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record interest in `topic`. Registrations are never removed.
    ///
    /// Must be called within a tokio runtime.
    pub fn register<F, Fut>(&self, topic: impl Into<String>, qos: QoS, handler: F) -> Registration
    where
        F: Fn(IncomingMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: MessageHandler =
            Arc::new(move |message: IncomingMessage| handler(message).boxed());
        let registration = Registration::start(topic.into(), qos, handler);
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(registration.clone());
        registration
    }

    /// Copy of all registrations
    pub fn snapshot(&self) -> Vec<Registration> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Registrations whose filter matches `topic`
    pub fn matching(&self, topic: &str) -> Vec<Registration> {
        self.snapshot()
            .into_iter()
            .filter(|r| rumqttc::matches(topic, &r.topic))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Something that can place a subscription with the broker
#[async_trait]
pub trait Subscriber: Clone + Send + Sync + 'static {
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), ClientError>;
}

#[async_trait]
impl Subscriber for AsyncClient {
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), ClientError> {
        AsyncClient::subscribe(self, topic, qos).await
    }
}

/// Callbacks the event loop runs on connection events
#[derive(Clone)]
pub struct ConnectionHooks<S> {
    subscriber: S,
    table: SubscriptionTable,
    connected: Arc<AtomicBool>,
}

impl<S: Subscriber> ConnectionHooks<S> {
    pub fn new(subscriber: S, table: SubscriptionTable) -> Self {
        Self {
            subscriber,
            table,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn table(&self) -> &SubscriptionTable {
        &self.table
    }

    /// Whether the last connection event was a successful connect
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// A connection (or reconnection) is up: subscribe to every registration.
    ///
    /// Each subscribe runs in its own task; the handles are returned so
    /// callers may wait on them, but the event loop does not, since a
    /// subscribe may itself need the event loop to make progress.
    pub fn on_connect(&self) -> Vec<JoinHandle<()>> {
        self.connected.store(true, Ordering::SeqCst);
        let registrations = self.table.snapshot();
        tracing::info!(
            "Connected, applying {} subscription(s)",
            registrations.len()
        );
        registrations
            .into_iter()
            .map(|registration| self.spawn_subscribe(registration))
            .collect()
    }

    /// The connection dropped. Registrations stay; the next connect
    /// re-applies them.
    pub fn on_connection_lost(&self, reason: &dyn fmt::Display) {
        self.connected.store(false, Ordering::SeqCst);
        tracing::warn!("Connection lost: {}", reason);
    }

    /// Queue an incoming message for every matching registration. Never
    /// waits on a handler. Returns how many registrations took it.
    pub fn on_message(&self, message: IncomingMessage) -> usize {
        let targets = self.table.matching(&message.topic);
        if targets.is_empty() {
            tracing::debug!(
                "Received message: {} from topic: {}",
                String::from_utf8_lossy(&message.payload),
                message.topic
            );
            return 0;
        }
        targets
            .iter()
            .filter(|registration| registration.dispatch(message.clone()))
            .count()
    }

    /// Subscribe to a newly registered entry right away if a connection is
    /// already up; otherwise the next connect picks it up.
    pub fn add(&self, registration: Registration) -> Option<JoinHandle<()>> {
        self.is_connected()
            .then(|| self.spawn_subscribe(registration))
    }

    fn spawn_subscribe(&self, registration: Registration) -> JoinHandle<()> {
        let subscriber = self.subscriber.clone();
        tokio::spawn(async move {
            match subscriber.subscribe(&registration.topic, registration.qos).await {
                Ok(()) => tracing::info!("Subscribed to topic: {}", registration.topic),
                Err(e) => tracing::error!(
                    "Failed to subscribe to topic {}: {}",
                    registration.topic,
                    e
                ),
            }
        })
    }
}
