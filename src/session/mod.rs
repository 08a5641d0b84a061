//! Session module - request correlation, subscriptions and push routing.
//!
//! The [`Session`] sits between callers and the [`Transport`]:
//!
//! ```text
//! caller ── call() ──► PendingTable ──► Transport ──► data service
//!    ▲                     │                              │
//!    └──── oneshot ◄── receive loop ◄──── TransportEvent ◄┘
//!                          │
//!                          └── REG_TAG_DATA ──► Executor ──► callback
//! ```
//!
//! A single receive loop consumes transport events. Correlated replies
//! resolve their pending request by `seq`; pushes are routed by batch id
//! and their callbacks run on the [`Executor`], never on the loop itself.
//! When the transport reports a new socket the session replays every
//! stored subscription before acknowledging, so no other request precedes
//! the replay.

mod pending;
mod registry;

pub use pending::{PendingGuard, PendingTable};
pub use registry::{Callback, Subscription, SubscriptionRegistry};

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::codec::{DelimitedCodec, DIVIDE_MARK};
use crate::error::{ClientError, Result};
use crate::executor::Executor;
use crate::protocol::{checked_len, Frame, Header, RequestType};
use crate::transport::{ConnectionState, Transport, TransportEvent};
use crate::writer::OutboundFrame;

/// Which transport path a request may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendPath {
    /// Only once the transport reports `Connected`.
    Connected,
    /// As soon as a socket is up; used for replay during the handshake.
    Handshake,
}

/// Session settings.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Timeout for replayed registrations.
    pub request_timeout: Duration,
    /// Outbound payloads above this are rejected before sending.
    pub max_payload_size: usize,
}

/// Correlates requests with replies and dispatches pushes. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Transport,
    pending: PendingTable,
    registry: SubscriptionRegistry,
    executor: Arc<Executor>,
    options: SessionOptions,
    receive_task: Mutex<Option<JoinHandle<()>>>,
    replay_task: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Start the receive loop over `events`, the consumer side of the
    /// channel given to [`Transport::start`].
    pub fn start(
        transport: Transport,
        executor: Arc<Executor>,
        events: mpsc::Receiver<TransportEvent>,
        options: SessionOptions,
    ) -> Self {
        let inner = Arc::new(Inner {
            transport,
            pending: PendingTable::new(),
            registry: SubscriptionRegistry::new(),
            executor,
            options,
            receive_task: Mutex::new(None),
            replay_task: Mutex::new(None),
        });
        let task = tokio::spawn(receive_loop(inner.clone(), events));
        *inner.receive_task.lock() = Some(task);
        Self { inner }
    }

    /// Send a correlated request and wait up to `timeout` for its reply.
    ///
    /// Returns the whole reply frame. A reply with a non-zero flag is a
    /// [`ClientError::Server`]; no reply in time is a
    /// [`ClientError::Timeout`] and a later reply is dropped.
    pub async fn call(
        &self,
        request: RequestType,
        payload: impl Into<Bytes>,
        timeout: Duration,
    ) -> Result<Frame> {
        self.inner
            .exchange(request, payload.into(), (0, 0), timeout, SendPath::Connected)
            .await
    }

    /// Register a subscription and wait for the server to acknowledge it.
    ///
    /// The registration is stored before sending and removed again if the
    /// first registration fails, so only acknowledged subscriptions are
    /// replayed after a reconnect. If the connection dropped meanwhile and
    /// a replay got the registration acknowledged, the subscription is live
    /// and its batch id is returned.
    pub async fn subscribe(
        &self,
        tags: Vec<String>,
        interval_ms: u16,
        callback: Callback,
        timeout: Duration,
    ) -> Result<u16> {
        validate_tags(&tags)?;
        self.inner.check_payload(tag_list_len(&tags))?;

        let batch_id = self.inner.registry.insert(tags.clone(), interval_ms, callback)?;
        match self
            .inner
            .register_batch(batch_id, &tags, interval_ms, timeout, SendPath::Connected)
            .await
        {
            Ok(()) => {
                self.inner.registry.confirm(batch_id);
                info!(batch_id, tags = tags.len(), interval_ms, "subscribed");
                Ok(batch_id)
            }
            Err(e) if self.inner.registry.remove_unconfirmed(batch_id) => Err(e),
            Err(e) => {
                info!(batch_id, error = %e, "subscription confirmed by replay");
                Ok(batch_id)
            }
        }
    }

    /// Requests currently waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    /// Sequence numbers waiting longer than `max_age`, oldest first.
    pub fn stale_requests(&self, max_age: Duration) -> Vec<u32> {
        self.inner.pending.stale(max_age)
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Stored subscriptions in batch id order.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.inner.registry.snapshot()
    }

    pub fn transport(&self) -> &Transport {
        &self.inner.transport
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.transport.state()
    }

    /// Stop the transport, fail outstanding calls and drain the callback
    /// pool.
    pub async fn shutdown(&self) {
        self.inner.transport.shutdown().await;
        self.inner.pending.clear();

        // the transport held the only producer; stop consuming what is left
        let task = self.inner.receive_task.lock().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
        let replay = self.inner.replay_task.lock().take();
        if let Some(replay) = replay {
            replay.abort();
        }

        let executor = self.inner.executor.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || executor.shutdown()).await {
            warn!(error = %e, "executor shutdown failed");
        }
        debug!("session stopped");
    }
}

impl Inner {
    fn check_payload(&self, len: usize) -> Result<u16> {
        if len > self.options.max_payload_size {
            return Err(ClientError::InvalidInput(format!(
                "payload of {} bytes exceeds the configured limit of {}",
                len, self.options.max_payload_size
            )));
        }
        checked_len(len)
    }

    async fn exchange(
        &self,
        request: RequestType,
        payload: Bytes,
        reserve: (u16, u16),
        timeout: Duration,
        path: SendPath,
    ) -> Result<Frame> {
        if request.is_push() {
            return Err(ClientError::InvalidInput(format!(
                "{:?} is only sent by the server",
                request
            )));
        }
        let len = self.check_payload(payload.len())?;

        let (seq, reply) = self.pending.register(request);
        let _guard = self.pending.guard(seq);
        let header = Header::new(request, seq, len).with_reserve(reserve.0, reserve.1);
        let frame = OutboundFrame::new(&header, payload);
        match path {
            SendPath::Connected => self.transport.send(frame).await?,
            SendPath::Handshake => self.transport.send_handshake(frame).await?,
        }
        debug!(seq, ?request, len, "request sent");

        let reply = match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(_)) => return Err(ClientError::Shutdown),
            Err(_) => {
                warn!(seq, ?request, ?timeout, "request timed out");
                return Err(ClientError::Timeout { seq, timeout });
            }
        };

        if !reply.is_ok() {
            warn!(seq, ?request, flag = reply.flag(), "request rejected by server");
            return Err(ClientError::Server {
                request,
                flag: reply.flag(),
            });
        }
        trace!(seq, ?request, len = reply.payload_len(), "reply received");
        Ok(reply)
    }

    async fn register_batch(
        &self,
        batch_id: u16,
        tags: &[String],
        interval_ms: u16,
        timeout: Duration,
        path: SendPath,
    ) -> Result<()> {
        let payload = DelimitedCodec::join(tags);
        self.exchange(
            RequestType::RegTag,
            Bytes::from(payload),
            (batch_id, interval_ms),
            timeout,
            path,
        )
        .await
        .map(|_| ())
    }

    /// Re-issue every stored registration with its original batch id.
    async fn replay(&self) {
        let subscriptions = self.registry.snapshot();
        if subscriptions.is_empty() {
            return;
        }
        info!(count = subscriptions.len(), "replaying subscriptions");
        for sub in subscriptions {
            let result = self
                .register_batch(
                    sub.batch_id,
                    &sub.tags,
                    sub.interval_ms,
                    self.options.request_timeout,
                    SendPath::Handshake,
                )
                .await;
            match result {
                Ok(()) => {
                    self.registry.confirm(sub.batch_id);
                    debug!(batch_id = sub.batch_id, "subscription replayed");
                }
                Err(e) => warn!(batch_id = sub.batch_id, error = %e, "subscription replay failed"),
            }
        }
    }

    /// Classify one inbound message.
    fn dispatch(&self, frame: Frame) {
        match frame.request_type() {
            Some(RequestType::RegTagData) => self.deliver_push(frame),
            Some(request) => {
                if let Err(frame) = self.pending.resolve(frame) {
                    let stale = self.pending.stale(self.options.request_timeout).len();
                    warn!(
                        seq = frame.seq(),
                        ?request,
                        pending = self.pending.len(),
                        stale,
                        "reply without pending request dropped"
                    );
                }
            }
            None => warn!(
                kind = frame.kind(),
                seq = frame.seq(),
                "unsupported message type dropped"
            ),
        }
    }

    fn deliver_push(&self, frame: Frame) {
        let batch_id = frame.batch_id();
        if !frame.is_ok() {
            warn!(batch_id, flag = frame.flag(), "push with failure flag dropped");
            return;
        }
        let Some(callback) = self.registry.callback(batch_id) else {
            warn!(batch_id, "push for unknown batch id dropped");
            return;
        };
        let values = match DelimitedCodec::decode_tag_values(frame.payload()) {
            Ok(values) => values,
            Err(e) => {
                warn!(batch_id, error = %e, "malformed push dropped");
                return;
            }
        };
        trace!(batch_id, tags = values.len(), "push received");
        if let Err(e) = self.executor.enqueue(move || callback(values)) {
            warn!(batch_id, error = %e, "push dropped, executor unavailable");
        }
    }
}

async fn receive_loop(inner: Arc<Inner>, mut events: mpsc::Receiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Connected { ack } => {
                let replay = {
                    let inner = inner.clone();
                    tokio::spawn(async move {
                        inner.replay().await;
                        let _ = ack.send(());
                    })
                };
                // a replay still running belongs to a dead socket
                if let Some(previous) = inner.replay_task.lock().replace(replay) {
                    previous.abort();
                }
            }
            TransportEvent::Frame(frame) => inner.dispatch(frame),
        }
    }
    debug!("receive loop finished");
}

/// Reject tag lists that cannot be framed.
pub(crate) fn validate_tags<S: AsRef<str>>(tags: &[S]) -> Result<()> {
    if tags.is_empty() {
        return Err(ClientError::InvalidInput("tag list is empty".to_string()));
    }
    for tag in tags {
        let tag = tag.as_ref();
        if tag.is_empty() || tag.contains(DIVIDE_MARK) {
            return Err(ClientError::InvalidInput(format!(
                "invalid tag name {:?}",
                tag
            )));
        }
    }
    Ok(())
}

fn tag_list_len(tags: &[String]) -> usize {
    tags.iter().map(|t| t.len() + DIVIDE_MARK.len()).sum()
}
