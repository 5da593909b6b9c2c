//! The bus transport seam.
//!
//! The bridge never speaks a wire protocol itself.  It talks to a
//! [`BusTransport`], and the transport owns connection setup, network I/O,
//! and reconnection.  [`LocalBus`][crate::bus::LocalBus] is the in-process
//! implementation; an MQTT client plugs in behind the same trait.

use bytes::Bytes;
use gpiobridge_types::BridgeError;
use tokio::sync::mpsc;

use crate::topic::TopicFilter;

/// One message as seen on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Bytes,
    pub retain: bool,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain,
        }
    }

    /// Payload as text; invalid UTF-8 yields `None`.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// A live bus connection.
///
/// # Contract
///
/// * Calls must not block indefinitely; any retry or reconnect happens inside
///   the transport.
/// * `subscribe` hands back a [`Subscription`] that yields every inbound
///   message matching the filter until the filter is unsubscribed or the
///   connection is closed.
pub trait BusTransport: Send + Sync {
    /// Publish `payload` on `topic`, optionally retained by the broker.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Transport`] when the message cannot be handed
    /// to the bus (e.g. the connection is closed).
    fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<(), BridgeError>;

    /// Start receiving messages matching `filter`.
    fn subscribe(&self, filter: &str) -> Result<Subscription, BridgeError>;

    /// Stop receiving messages for `filter`.  Ends its subscriptions.
    fn unsubscribe(&self, filter: &str) -> Result<(), BridgeError>;

    /// Close the connection.  Ends every subscription.
    fn disconnect(&self) -> Result<(), BridgeError>;
}

/// Inbound message stream for one filter.
pub struct Subscription {
    filter: TopicFilter,
    receiver: mpsc::Receiver<BusMessage>,
}

impl Subscription {
    /// Build a subscription from a transport-side queue.
    pub fn new(filter: TopicFilter, receiver: mpsc::Receiver<BusMessage>) -> Self {
        Self { filter, receiver }
    }

    /// Wait for the next message.
    ///
    /// Returns `None` once the transport has dropped the subscription
    /// (unsubscribe or disconnect) and the queue is drained.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.receiver.recv().await
    }

    /// Take the next queued message without waiting.
    pub fn try_recv(&mut self) -> Option<BusMessage> {
        self.receiver.try_recv().ok()
    }

    /// Drain every queued message.
    pub fn drain(&mut self) -> Vec<BusMessage> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    pub fn filter(&self) -> &TopicFilter {
        &self.filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_str_rejects_invalid_utf8() {
        let ok = BusMessage::new("gpio/write/x", "enabled", false);
        assert_eq!(ok.payload_str(), Some("enabled"));

        let bad = BusMessage::new("gpio/write/x", vec![0xff, 0xfe], false);
        assert_eq!(bad.payload_str(), None);
    }

    #[tokio::test]
    async fn subscription_ends_when_sender_drops() {
        let (tx, rx) = mpsc::channel(4);
        let mut sub = Subscription::new(TopicFilter::new("a/#").unwrap(), rx);
        tx.send(BusMessage::new("a/b", "1", false)).await.unwrap();
        drop(tx);

        assert_eq!(sub.recv().await.map(|m| m.topic), Some("a/b".to_string()));
        assert!(sub.recv().await.is_none());
        assert_eq!(sub.filter().as_str(), "a/#");
    }
}
