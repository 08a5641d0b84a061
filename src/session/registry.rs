//! Subscription registry.
//!
//! Maps batch ids to the tag list, poll interval and callback of each
//! registration. Batch ids are assigned sequentially starting from 1; 0 is
//! reserved and skipped when the counter wraps. Entries stay registered
//! across disconnects so they can be replayed. An entry is confirmed once
//! the server has acknowledged it, either on the first registration or on
//! a replay.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::codec::TagValues;
use crate::error::{ClientError, Result};

/// Callback invoked on a worker with each pushed tag map.
pub type Callback = Arc<dyn Fn(TagValues) + Send + Sync + 'static>;

/// A stored registration.
#[derive(Clone)]
pub struct Subscription {
    pub batch_id: u16,
    pub tags: Vec<String>,
    pub interval_ms: u16,
    pub callback: Callback,
    /// Acknowledged by the server at least once.
    pub confirmed: bool,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("batch_id", &self.batch_id)
            .field("tags", &self.tags)
            .field("interval_ms", &self.interval_ms)
            .field("confirmed", &self.confirmed)
            .finish_non_exhaustive()
    }
}

struct Inner {
    next_batch_id: u16,
    entries: BTreeMap<u16, Subscription>,
}

/// Thread-safe batch id → subscription map.
pub struct SubscriptionRegistry {
    inner: Mutex<Inner>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_batch_id: 1,
                entries: BTreeMap::new(),
            }),
        }
    }

    /// Store a new registration under a fresh batch id.
    pub fn insert(&self, tags: Vec<String>, interval_ms: u16, callback: Callback) -> Result<u16> {
        let mut inner = self.inner.lock();
        if inner.entries.len() >= usize::from(u16::MAX) {
            return Err(ClientError::InvalidInput(
                "every batch id is in use".to_string(),
            ));
        }
        let batch_id = loop {
            let candidate = inner.next_batch_id;
            inner.next_batch_id = candidate.wrapping_add(1);
            if candidate != 0 && !inner.entries.contains_key(&candidate) {
                break candidate;
            }
        };
        inner.entries.insert(
            batch_id,
            Subscription {
                batch_id,
                tags,
                interval_ms,
                callback,
                confirmed: false,
            },
        );
        Ok(batch_id)
    }

    pub fn remove(&self, batch_id: u16) -> bool {
        self.inner.lock().entries.remove(&batch_id).is_some()
    }

    /// Mark a registration as acknowledged by the server.
    pub fn confirm(&self, batch_id: u16) {
        if let Some(sub) = self.inner.lock().entries.get_mut(&batch_id) {
            sub.confirmed = true;
        }
    }

    /// Remove a registration the server never acknowledged.
    ///
    /// Returns false, keeping the entry, if a replay confirmed it in the
    /// meantime.
    pub fn remove_unconfirmed(&self, batch_id: u16) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.get(&batch_id) {
            Some(sub) if sub.confirmed => false,
            Some(_) => inner.entries.remove(&batch_id).is_some(),
            None => false,
        }
    }

    /// Callback for a batch id, cloned out so no lock is held while it runs.
    pub fn callback(&self, batch_id: u16) -> Option<Callback> {
        self.inner
            .lock()
            .entries
            .get(&batch_id)
            .map(|sub| sub.callback.clone())
    }

    /// Every registration in batch id order.
    pub fn snapshot(&self) -> Vec<Subscription> {
        self.inner.lock().entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn set_next_batch_id(&self, batch_id: u16) {
        self.inner.lock().next_batch_id = batch_id;
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
