//! Subscription fan-out shared by the bus implementations.

use std::sync::{Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::warn;

use crate::topic::TopicFilter;
use crate::transport::{BusMessage, Subscription};

struct Subscriber {
    filter: TopicFilter,
    sender: mpsc::Sender<BusMessage>,
}

/// Live subscriptions, each a bounded queue fed with `try_send`.
pub(crate) struct Subscribers {
    capacity: usize,
    entries: Mutex<Vec<Subscriber>>,
}

impl Subscribers {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Register `filter`.  `backlog` is queued before any live message.
    pub(crate) fn add<'a>(
        &self,
        filter: TopicFilter,
        backlog: impl IntoIterator<Item = &'a BusMessage>,
    ) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.capacity);
        for message in backlog {
            if filter.matches(&message.topic) && sender.try_send(message.clone()).is_err() {
                warn!(%filter, topic = %message.topic, "retained replay dropped");
            }
        }
        lock(&self.entries).push(Subscriber {
            filter: filter.clone(),
            sender,
        });
        Subscription::new(filter, receiver)
    }

    /// Hand `message` to every matching subscriber.  Returns how many took it.
    ///
    /// A full queue drops the message for that subscriber only; a closed one
    /// is forgotten.
    pub(crate) fn deliver(&self, message: &BusMessage) -> usize {
        let mut delivered = 0;
        lock(&self.entries).retain(|sub| {
            if !sub.filter.matches(&message.topic) {
                return true;
            }
            match sub.sender.try_send(message.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(filter = %sub.filter, topic = %message.topic, "subscriber queue full; message dropped");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
        delivered
    }

    /// End every subscription registered under exactly `filter`.
    pub(crate) fn remove(&self, filter: &TopicFilter) {
        lock(&self.entries).retain(|sub| sub.filter != *filter);
    }

    /// End every subscription.
    pub(crate) fn clear(&self) {
        lock(&self.entries).clear();
    }

    /// Distinct filters with at least one live subscription, sorted.
    pub(crate) fn filters(&self) -> Vec<String> {
        let mut filters: Vec<String> = lock(&self.entries)
            .iter()
            .map(|s| s.filter.as_str().to_string())
            .collect();
        filters.sort();
        filters.dedup();
        filters
    }
}

// Bus state stays consistent across a panicking holder, so recover the guard.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
