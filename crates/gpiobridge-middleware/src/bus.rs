//! In-process, broker-style publish/subscribe bus.
//!
//! [`LocalBus`] implements [`BusTransport`] with the broker semantics the
//! bridge relies on:
//!
//! * messages are routed to every subscription whose [`TopicFilter`] matches;
//! * retained messages are stored per topic and replayed to new
//!   subscriptions (an empty retained payload clears the slot);
//! * `unsubscribe` and `disconnect` end the affected [`Subscription`]s.
//!
//! Each subscription is backed by a bounded [`tokio::sync::mpsc`] queue and
//! publishing uses `try_send`, so a slow subscriber never blocks the
//! publisher: when its queue is full the message is dropped for that
//! subscriber and a warning is logged.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use gpiobridge_types::BridgeError;
use tracing::debug;

use crate::fanout::{Subscribers, lock};
use crate::topic::TopicFilter;
use crate::transport::{BusMessage, BusTransport, Subscription};

/// Default per-subscription queue capacity.
pub(crate) const DEFAULT_CAPACITY: usize = 256;

struct Inner {
    client_id: String,
    connected: AtomicBool,
    subscribers: Subscribers,
    retained: Mutex<BTreeMap<String, BusMessage>>,
}

/// Shared in-process bus. Clone it cheaply – all clones share the same
/// connection, subscriptions, and retained store.
#[derive(Clone)]
pub struct LocalBus {
    inner: Arc<Inner>,
}

impl LocalBus {
    /// Open a connected bus with the given queue capacity per subscription.
    pub fn new(client_id: impl Into<String>, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                client_id: client_id.into(),
                connected: AtomicBool::new(true),
                subscribers: Subscribers::new(capacity),
                retained: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    /// Open a connected bus with the default capacity.
    pub fn connect(client_id: impl Into<String>) -> Self {
        Self::new(client_id, DEFAULT_CAPACITY)
    }

    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// The retained message currently stored for `topic`.
    pub fn retained(&self, topic: &str) -> Option<BusMessage> {
        lock(&self.inner.retained).get(topic).cloned()
    }

    /// Retained payloads as text, keyed by topic.
    pub fn retained_snapshot(&self) -> BTreeMap<String, String> {
        lock(&self.inner.retained)
            .iter()
            .map(|(topic, msg)| {
                (
                    topic.clone(),
                    String::from_utf8_lossy(&msg.payload).into_owned(),
                )
            })
            .collect()
    }

    /// Filters with at least one live subscription.
    pub fn subscribed_filters(&self) -> Vec<String> {
        self.inner.subscribers.filters()
    }

    fn ensure_connected(&self) -> Result<(), BridgeError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(BridgeError::Transport(format!(
                "client '{}' is not connected",
                self.inner.client_id
            )))
        }
    }
}

/// Topics carry no wildcards and are never empty.
pub(crate) fn check_publish_topic(topic: &str) -> Result<(), BridgeError> {
    if topic.is_empty() || topic.contains(['+', '#']) {
        return Err(BridgeError::Transport(format!(
            "cannot publish to topic '{topic}'"
        )));
    }
    Ok(())
}

impl BusTransport for LocalBus {
    fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<(), BridgeError> {
        self.ensure_connected()?;
        check_publish_topic(topic)?;

        let message = BusMessage::new(topic, Bytes::copy_from_slice(payload), retain);
        if retain {
            let mut retained = lock(&self.inner.retained);
            if payload.is_empty() {
                retained.remove(topic);
            } else {
                retained.insert(topic.to_string(), message.clone());
            }
        }

        self.inner.subscribers.deliver(&message);
        Ok(())
    }

    fn subscribe(&self, filter: &str) -> Result<Subscription, BridgeError> {
        self.ensure_connected()?;
        let filter = TopicFilter::new(filter)?;
        debug!(client = %self.inner.client_id, %filter, "subscribed");
        let retained = lock(&self.inner.retained);
        Ok(self.inner.subscribers.add(filter, retained.values()))
    }

    fn unsubscribe(&self, filter: &str) -> Result<(), BridgeError> {
        self.ensure_connected()?;
        let filter = TopicFilter::new(filter)?;
        self.inner.subscribers.remove(&filter);
        debug!(client = %self.inner.client_id, %filter, "unsubscribed");
        Ok(())
    }

    fn disconnect(&self) -> Result<(), BridgeError> {
        if !self.inner.connected.swap(false, Ordering::SeqCst) {
            return Err(BridgeError::Transport(format!(
                "client '{}' already disconnected",
                self.inner.client_id
            )));
        }
        self.inner.subscribers.clear();
        debug!(client = %self.inner.client_id, "disconnected");
        Ok(())
    }
}
