//! Pending-request correlation table.
//!
//! Every correlated request registers a one-shot slot keyed by its
//! sequence number before it is sent. The receive loop resolves the slot
//! with the reply frame; a caller that times out removes it instead.
//! Whichever acts first wins and the other becomes a no-op, so a reply
//! resolves at most one request exactly once.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::protocol::{Frame, RequestType};

/// An in-flight request awaiting its reply.
#[derive(Debug)]
pub struct PendingRequest {
    tx: oneshot::Sender<Frame>,
    request: RequestType,
    created_at: Instant,
}

/// Sequence allocator and pending table.
#[derive(Debug, Default)]
pub struct PendingTable {
    next_seq: AtomicU32,
    entries: Mutex<HashMap<u32, PendingRequest>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a sequence number and register its slot.
    ///
    /// Sequence numbers wrap; a number still in flight is skipped.
    pub fn register(&self, request: RequestType) -> (u32, oneshot::Receiver<Frame>) {
        let (tx, rx) = oneshot::channel();
        let mut entries = self.entries.lock();
        loop {
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            if let Entry::Vacant(slot) = entries.entry(seq) {
                slot.insert(PendingRequest {
                    tx,
                    request,
                    created_at: Instant::now(),
                });
                return (seq, rx);
            }
        }
    }

    /// Deliver a reply to the request with the same sequence number.
    ///
    /// Returns the frame back if nothing is waiting for it.
    pub fn resolve(&self, frame: Frame) -> Result<RequestType, Frame> {
        let entry = self.entries.lock().remove(&frame.seq());
        match entry {
            Some(pending) => {
                let request = pending.request;
                // the waiter may have given up between removal and send
                pending.tx.send(frame)?;
                Ok(request)
            }
            None => Err(frame),
        }
    }

    /// Forget a request. Returns false if it was already gone.
    pub fn remove(&self, seq: u32) -> bool {
        self.entries.lock().remove(&seq).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sequence numbers pending for longer than `max_age`, oldest first.
    pub fn stale(&self, max_age: Duration) -> Vec<u32> {
        let now = Instant::now();
        let mut stale: Vec<(Instant, u32)> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, pending)| now.duration_since(pending.created_at) > max_age)
            .map(|(seq, pending)| (pending.created_at, *seq))
            .collect();
        stale.sort_unstable();
        stale.into_iter().map(|(_, seq)| seq).collect()
    }

    /// Drop every slot; waiters observe a closed channel.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Guard that removes `seq` when dropped.
    pub fn guard(&self, seq: u32) -> PendingGuard<'_> {
        PendingGuard { table: self, seq }
    }

    #[cfg(test)]
    pub(crate) fn set_next_seq(&self, seq: u32) {
        self.next_seq.store(seq, Ordering::Relaxed);
    }
}

/// Removes its entry on drop, so a timed-out or abandoned call never
/// leaves a slot behind.
pub struct PendingGuard<'a> {
    table: &'a PendingTable,
    seq: u32,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.remove(self.seq);
    }
}
