//! Outbound backpressure accounting.
//!
//! The writer task drains frames in batches; callers enqueue them through a
//! [`WriterHandle`](crate::writer::WriterHandle). A shared
//! [`BackpressureController`] counts frames accepted but not yet written so
//! a stalled socket cannot grow an unbounded backlog. When the limit is
//! reached, senders wait up to the configured send timeout and then fail
//! with [`ClientError::BackpressureTimeout`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{ClientError, Result};

/// Poll interval while waiting for room.
const CHECK_INTERVAL: Duration = Duration::from_micros(200);

/// Lock-free in-flight frame counter shared by the handle and the writer.
#[derive(Debug, Clone)]
pub struct BackpressureController {
    pending: Arc<AtomicUsize>,
    max_pending: usize,
    timeout: Duration,
}

impl BackpressureController {
    /// Create a controller allowing `max_pending` frames in flight.
    pub fn new(max_pending: usize, timeout: Duration) -> Self {
        Self {
            pending: Arc::new(AtomicUsize::new(0)),
            max_pending: max_pending.max(1),
            timeout,
        }
    }

    /// True while the limit is reached.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.pending_count() >= self.max_pending
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Reserve a slot without waiting.
    pub fn try_reserve(&self) -> Result<()> {
        self.pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < self.max_pending).then_some(current + 1)
            })
            .map(|_| ())
            .map_err(|_| ClientError::BackpressureTimeout)
    }

    /// Reserve a slot, waiting up to the configured timeout.
    pub async fn reserve(&self) -> Result<()> {
        if self.try_reserve().is_ok() {
            return Ok(());
        }

        let start = Instant::now();
        loop {
            tokio::time::sleep(CHECK_INTERVAL).await;
            if self.try_reserve().is_ok() {
                return Ok(());
            }
            if start.elapsed() > self.timeout {
                return Err(ClientError::BackpressureTimeout);
            }
        }
    }

    /// Release one slot.
    #[inline]
    pub fn release(&self) {
        self.release_many(1);
    }

    /// Release `count` slots after a batch write.
    #[inline]
    pub fn release_many(&self, count: usize) {
        let _ = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(count))
            });
    }
}

/// Releases a reserved slot on drop unless disarmed.
///
/// Held across the channel send so a cancelled or failed send gives its
/// slot back.
pub struct BackpressureGuard<'a> {
    controller: &'a BackpressureController,
    armed: bool,
}

impl<'a> BackpressureGuard<'a> {
    pub fn new(controller: &'a BackpressureController) -> Self {
        Self {
            controller,
            armed: true,
        }
    }

    /// The frame reached the writer; it releases the slot after writing.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for BackpressureGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.controller.release();
        }
    }
}
