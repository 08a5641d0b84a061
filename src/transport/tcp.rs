//! TCP transport with automatic reconnect.
//!
//! A supervisor task owns the connection lifecycle:
//!
//! ```text
//! Disconnected ─► Connecting ─► (socket up, handshake) ─► Connected
//!                    ▲                                        │
//!                    └──────── error, after reconnect delay ◄─┘
//! ```
//!
//! When a socket comes up the transport installs a writer, then sends
//! [`TransportEvent::Connected`] to the session and keeps reading. Callers
//! only see `Connected` after the session acknowledges that event, which
//! lets the session replay subscriptions before any other request goes
//! out. Retries never stop until [`Transport::shutdown`] is called.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::protocol::{decode_header, Frame, HEADER_SIZE};
use crate::writer::{spawn_writer_task, OutboundFrame, WriterConfig, WriterHandle};

/// Connection lifecycle as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events delivered from the transport to its single consumer.
#[derive(Debug)]
pub enum TransportEvent {
    /// A socket came up. The transport reports `Connected` to callers once
    /// `ack` is sent or dropped.
    Connected { ack: oneshot::Sender<()> },
    /// A complete inbound message.
    Frame(Frame),
}

/// Transport settings.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// `host:port` to connect to.
    pub addr: String,
    /// Fixed delay between connection attempts.
    pub reconnect_delay: Duration,
    /// Inbound headers announcing more than this are a protocol error.
    pub max_payload_size: usize,
    pub writer: WriterConfig,
}

impl From<&ClientConfig> for TransportConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            addr: config.addr(),
            reconnect_delay: config.reconnect_delay(),
            max_payload_size: config.payload_limit(),
            writer: WriterConfig {
                max_pending_frames: config.outbound_queue_depth,
                channel_capacity: config.outbound_queue_depth,
                send_timeout: config.send_timeout(),
            },
        }
    }
}

/// Handle to the connection supervisor. Cheap to clone.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

struct Inner {
    config: TransportConfig,
    state: watch::Sender<ConnectionState>,
    writer: Mutex<Option<WriterHandle>>,
    shutdown: watch::Sender<bool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Transport {
    /// Start connecting in the background. Inbound messages go to `events`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: TransportConfig, events: mpsc::Sender<TransportEvent>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown, _) = watch::channel(false);
        let inner = Arc::new(Inner {
            config,
            state,
            writer: Mutex::new(None),
            shutdown,
            supervisor: Mutex::new(None),
        });
        let task = tokio::spawn(supervise(inner.clone(), events));
        *inner.supervisor.lock() = Some(task);
        Self { inner }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Wait until the transport reports `Connected`.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.watch_state();
        let connected = async {
            rx.wait_for(|state| *state == ConnectionState::Connected)
                .await
                .map(|_| ())
        };
        match tokio::time::timeout(timeout, connected).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ClientError::Shutdown),
            Err(_) => Err(ClientError::NotConnected),
        }
    }

    /// Send a frame on a connected transport.
    ///
    /// Fails immediately with `NotConnected` while disconnected or during
    /// the connect handshake; nothing is queued for later.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        if !self.is_connected() {
            return Err(self.unavailable());
        }
        self.send_handshake(frame).await
    }

    /// Send a frame as soon as a socket is up, before `Connected` is
    /// published. Used for subscription replay.
    pub(crate) async fn send_handshake(&self, frame: OutboundFrame) -> Result<()> {
        let writer = self.inner.writer.lock().clone();
        match writer {
            Some(writer) => writer.send(frame).await,
            None => Err(self.unavailable()),
        }
    }

    /// Frames queued in the writer of the current connection.
    pub fn queued_frames(&self) -> usize {
        self.inner
            .writer
            .lock()
            .as_ref()
            .map_or(0, WriterHandle::pending_count)
    }

    /// Signal the supervisor to stop without waiting for it.
    pub fn close(&self) {
        self.inner.shutdown.send_replace(true);
    }

    /// Stop retrying, drop the connection and wait for the supervisor.
    pub async fn shutdown(&self) {
        self.close();
        let task = self.inner.supervisor.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    fn unavailable(&self) -> ClientError {
        if *self.inner.shutdown.borrow() {
            ClientError::Shutdown
        } else {
            ClientError::NotConnected
        }
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(?previous, ?state, "connection state changed");
        }
    }

    /// Drive one established socket until it fails or shutdown is requested.
    async fn run_connection(
        &self,
        stream: TcpStream,
        events: &mpsc::Sender<TransportEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        let peer = stream.peer_addr().ok();
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "failed to set TCP_NODELAY");
        }
        let (read_half, write_half) = stream.into_split();
        let (writer, mut writer_task) = spawn_writer_task(write_half, self.config.writer.clone());
        *self.writer.lock() = Some(writer);

        let (ack, acked) = oneshot::channel();
        if events.send(TransportEvent::Connected { ack }).await.is_err() {
            self.writer.lock().take();
            writer_task.abort();
            return;
        }
        let publish = async {
            let _ = acked.await;
            self.set_state(ConnectionState::Connected);
            info!(peer = ?peer, "connected to data service");
            std::future::pending::<()>().await
        };

        tokio::select! {
            result = read_pump(read_half, events, self.config.max_payload_size) => match result {
                Ok(()) => debug!("inbound consumer gone, dropping connection"),
                Err(e) => warn!(peer = ?peer, error = %e, "connection lost"),
            },
            result = &mut writer_task => match result {
                Ok(Err(e)) => warn!(peer = ?peer, error = %e, "write failed"),
                _ => warn!(peer = ?peer, "writer stopped"),
            },
            _ = publish => {}
            _ = cancelled(shutdown) => debug!("closing connection for shutdown"),
        }

        self.writer.lock().take();
        writer_task.abort();
    }
}

async fn supervise(inner: Arc<Inner>, events: mpsc::Sender<TransportEvent>) {
    let mut shutdown = inner.shutdown.subscribe();
    let addr = inner.config.addr.clone();

    while !*shutdown.borrow() {
        inner.set_state(ConnectionState::Connecting);
        debug!(%addr, "connecting");

        let connect = tokio::select! {
            result = TcpStream::connect(addr.as_str()) => result,
            _ = cancelled(&mut shutdown) => break,
        };
        match connect {
            Ok(stream) => {
                inner.run_connection(stream, &events, &mut shutdown).await;
                if *shutdown.borrow() {
                    break;
                }
                inner.set_state(ConnectionState::Connecting);
            }
            Err(e) => warn!(%addr, error = %e, "connect failed"),
        }
        if events.is_closed() {
            debug!("inbound consumer gone, stopping transport");
            break;
        }

        let delay = inner.config.reconnect_delay;
        info!(%addr, ?delay, "reconnect scheduled");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancelled(&mut shutdown) => break,
        }
    }

    inner.writer.lock().take();
    inner.set_state(ConnectionState::Disconnected);
    debug!(%addr, "transport stopped");
}

async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await.map(|_| ());
}

/// Read exact header, then exact body, and forward each message.
///
/// Returns `Ok(())` when the consumer is gone and the first read or
/// protocol error otherwise. A full queue blocks the pump; nothing is
/// dropped.
async fn read_pump<R>(
    mut reader: R,
    events: &mpsc::Sender<TransportEvent>,
    max_payload_size: usize,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; HEADER_SIZE];
    loop {
        reader.read_exact(&mut header_buf).await?;
        let header = decode_header(&header_buf, max_payload_size)?;

        let mut payload = BytesMut::zeroed(usize::from(header.len));
        if !payload.is_empty() {
            reader.read_exact(&mut payload).await?;
        }
        let frame = Frame::new(header, payload.freeze());
        trace!(
            kind = frame.kind(),
            seq = frame.seq(),
            len = frame.payload_len(),
            "frame received"
        );

        if events.send(TransportEvent::Frame(frame)).await.is_err() {
            return Ok(());
        }
    }
}
