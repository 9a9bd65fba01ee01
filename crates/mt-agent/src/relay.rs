//! Glue between the MQTT topics and the terminal bridge
//!
//! Input topic payloads are decoded into [`SessionMessage`]s and pushed into
//! the bridge's inbound queue. Everything the bridge emits is encoded and
//! published on the output topic.

use rumqttc::QoS;
use tokio::sync::mpsc;

use mt_protocol::{SessionMessage, Utf8Transcoder, WirePayload};

use crate::tunnel::{IncomingMessage, Publisher, Registration, SubscriptionTable};

/// Delivery level for keystrokes and resizes
pub const INPUT_QOS: QoS = QoS::AtLeastOnce;

/// Delivery level for terminal output
pub const OUTPUT_QOS: QoS = QoS::AtMostOnce;

/// Register the input topic handler that feeds the bridge.
///
/// Malformed payloads are logged and dropped. The handler waits for room in
/// the inbound queue, so a stalled shell slows down message delivery.
pub fn register_input(
    table: &SubscriptionTable,
    topic: &str,
    input: mpsc::Sender<SessionMessage>,
) -> Registration {
    table.register(topic, INPUT_QOS, move |message: IncomingMessage| {
        let input = input.clone();
        async move {
            match WirePayload::decode(&message.payload) {
                Ok(Some(decoded)) => {
                    if input.send(decoded).await.is_err() {
                        tracing::debug!("Terminal bridge is closed, dropping input");
                    }
                }
                Ok(None) => tracing::trace!("Ignoring input without a type"),
                Err(e) => tracing::warn!("message err: {}", e),
            }
        }
    })
}

/// Publish everything from the bridge's outbound queue until it closes.
///
/// Returns the number of messages published.
pub async fn forward_output<P: Publisher>(
    mut output: mpsc::Receiver<SessionMessage>,
    publisher: P,
    topic: String,
) -> usize {
    let mut transcoder = Utf8Transcoder::new();
    let mut published = 0;

    while let Some(message) = output.recv().await {
        match &message {
            SessionMessage::Data(bytes) => {
                let text = transcoder.push(bytes);
                if !text.is_empty() {
                    published += send(&publisher, &topic, &WirePayload::output(text)).await;
                }
            }
            SessionMessage::Fault { .. } => {
                // Bytes held back belong to the session that just failed.
                let tail = transcoder.finish();
                if !tail.is_empty() {
                    published += send(&publisher, &topic, &WirePayload::output(tail)).await;
                }
                published += send(&publisher, &topic, &WirePayload::from_message(&message)).await;
            }
            SessionMessage::Resize(_) => {
                published += send(&publisher, &topic, &WirePayload::from_message(&message)).await;
            }
        }
    }

    let tail = transcoder.finish();
    if !tail.is_empty() {
        published += send(&publisher, &topic, &WirePayload::output(tail)).await;
    }
    tracing::debug!("Output forwarder stopping after {} messages", published);
    published
}

async fn send<P: Publisher>(publisher: &P, topic: &str, record: &WirePayload) -> usize {
    match record.encode() {
        Ok(payload) => {
            publisher.publish(topic, OUTPUT_QOS, payload).await;
            1
        }
        Err(e) => {
            tracing::error!("Failed to encode output: {}", e);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct FakePublisher {
        sent: Arc<Mutex<Vec<(String, QoS, WirePayload)>>>,
    }

    #[async_trait]
    impl Publisher for FakePublisher {
        async fn publish(&self, topic: &str, qos: QoS, payload: Vec<u8>) {
            let record = serde_json::from_slice(&payload).unwrap();
            self.sent
                .lock()
                .unwrap()
                .push((topic.to_string(), qos, record));
        }
    }

    fn incoming(payload: &'static [u8]) -> IncomingMessage {
        IncomingMessage {
            topic: "/shell/dev/input".to_string(),
            qos: QoS::AtLeastOnce,
            payload: Bytes::from_static(payload),
        }
    }

    #[tokio::test]
    async fn test_input_is_decoded_in_order() {
        let table = SubscriptionTable::new();
        let (tx, mut rx) = mpsc::channel(8);
        let registration = register_input(&table, "/shell/dev/input", tx);
        assert_eq!(registration.qos, QoS::AtLeastOnce);

        registration
            .deliver(incoming(br#"{"type":"data","data":"ls\n"}"#))
            .await;
        registration
            .deliver(incoming(br#"{"type":"resize","rows":40,"cols":120}"#))
            .await;

        assert_eq!(rx.recv().await, Some(SessionMessage::data(&b"ls\n"[..])));
        assert_eq!(rx.recv().await, Some(SessionMessage::resize(40, 120)));
    }

    #[tokio::test]
    async fn test_bad_input_is_dropped() {
        let table = SubscriptionTable::new();
        let (tx, mut rx) = mpsc::channel(8);
        let registration = register_input(&table, "/shell/dev/input", tx);

        registration.deliver(incoming(b"not json")).await;
        registration.deliver(incoming(br#"{"type":"beep"}"#)).await;
        registration.deliver(incoming(br#"{"data":"x"}"#)).await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_output_joins_split_characters() {
        let publisher = FakePublisher::default();
        let (tx, rx) = mpsc::channel(8);
        // "终" is E7 BB 88
        tx.send(SessionMessage::data(vec![b'a', 0xE7, 0xBB]))
            .await
            .unwrap();
        tx.send(SessionMessage::data(vec![0x88])).await.unwrap();
        drop(tx);

        let count = forward_output(rx, publisher.clone(), "/shell/dev/output".to_string()).await;
        assert_eq!(count, 2);

        let sent = publisher.sent.lock().unwrap();
        assert_eq!(sent[0].0, "/shell/dev/output");
        assert_eq!(sent[0].1, QoS::AtMostOnce);
        assert_eq!(sent[0].2, WirePayload::output("a"));
        assert_eq!(sent[1].2, WirePayload::output("终"));
    }

    #[tokio::test]
    async fn test_fault_flushes_pending_bytes_first() {
        let publisher = FakePublisher::default();
        let (tx, rx) = mpsc::channel(8);
        tx.send(SessionMessage::data(vec![0xE7])).await.unwrap();
        tx.send(SessionMessage::fault("read /dev/ptmx: input/output error", "reset tty"))
            .await
            .unwrap();
        drop(tx);

        forward_output(rx, publisher.clone(), "out".to_string()).await;

        let sent = publisher.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].2.data.as_deref(), Some("\u{FFFD}"));
        assert_eq!(sent[1].2.kind, None);
        assert_eq!(sent[1].2.data.as_deref(), Some("reset tty"));
        assert_eq!(
            sent[1].2.error.as_deref(),
            Some("read /dev/ptmx: input/output error")
        );
    }
}
