//! Client builder and typed request API.
//!
//! The [`ClientBuilder`] provides a fluent API for configuring the
//! connection. [`ClientBuilder::start`] wires the pieces together:
//! 1. Spawn the callback worker pool
//! 2. Start the transport supervisor (connect, reconnect)
//! 3. Start the session receive loop
//! 4. Wait briefly for the first connection
//!
//! A server that is down at startup is not an error; the transport keeps
//! retrying and requests fail with `NotConnected` until it is up.
//!
//! # Example
//!
//! ```no_run
//! use dataservice_client::Client;
//!
//! # async fn run() -> dataservice_client::Result<()> {
//! let client = Client::builder()
//!     .host("127.0.0.1")
//!     .port(1234)
//!     .timeout_ms(1000)
//!     .start()
//!     .await?;
//!
//! let batch_id = client
//!     .subscribe(&["t1", "t2"], 100, |values| println!("{values:?}"))
//!     .await?;
//! let values = client.read_data(&["t1"]).await?;
//! println!("batch {batch_id}: {values:?}");
//!
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::codec::{AttrCodec, DelimitedCodec, ObjectAttr, ObjectData, TagValues, DIVIDE_MARK};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::executor::Executor;
use crate::protocol::{Frame, RequestType};
use crate::session::{validate_tags, Session, SessionOptions};
use crate::transport::{ConnectionState, Transport, TransportConfig};

/// Builder for configuring and starting a [`Client`].
#[derive(Debug, Clone, Default)]
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    /// Builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder starting from an existing configuration.
    pub fn from_config(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Server host name or IP. Default: 127.0.0.1
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Server port. Default: 1234
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Request timeout in milliseconds, clamped to [500, 2000].
    /// Default: 1000
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.timeout_ms = timeout_ms;
        self
    }

    /// Number of subscription callback workers. Default: 10
    pub fn worker_threads(mut self, workers: usize) -> Self {
        self.config.worker_threads = workers;
        self
    }

    /// Delay between reconnect attempts. Default: 2 seconds
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Largest payload sent or accepted. Default: 65535
    pub fn max_payload_size(mut self, size: usize) -> Self {
        self.config.max_payload_size = size;
        self
    }

    /// Inbound messages buffered ahead of the session. Default: 1024
    pub fn inbound_queue_depth(mut self, depth: usize) -> Self {
        self.config.inbound_queue_depth = depth;
        self
    }

    /// Outbound frames buffered ahead of the socket. Default: 1024
    pub fn outbound_queue_depth(mut self, depth: usize) -> Self {
        self.config.outbound_queue_depth = depth;
        self
    }

    /// How long a send waits when the outbound queue is full.
    /// Default: 1 second
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.config.send_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// The configuration built so far.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Build and start the client.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(self) -> Result<Client> {
        Client::start(self.config).await
    }
}

/// A running data service client.
///
/// Dropping the client stops reconnecting; call [`shutdown`](Self::shutdown)
/// to also drain queued callbacks.
pub struct Client {
    session: Session,
    config: ClientConfig,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Start a client from `config`.
    pub async fn start(config: ClientConfig) -> Result<Self> {
        let executor = Arc::new(Executor::new(config.workers())?);
        let (events_tx, events_rx) = mpsc::channel(config.inbound_queue_depth.max(1));
        let transport = Transport::start(TransportConfig::from(&config), events_tx);
        let session = Session::start(
            transport,
            executor,
            events_rx,
            SessionOptions {
                request_timeout: config.request_timeout(),
                max_payload_size: config.payload_limit(),
            },
        );

        let client = Client { session, config };
        match client.wait_connected(client.request_timeout()).await {
            Ok(()) => info!(addr = %client.config.addr(), "client started"),
            Err(_) => warn!(
                addr = %client.config.addr(),
                "data service not reachable yet, retrying in background"
            ),
        }
        Ok(client)
    }

    /// Write control values, one per tag.
    pub async fn control_data<N, V>(&self, names: &[N], values: &[V]) -> Result<()>
    where
        N: AsRef<str>,
        V: AsRef<str>,
    {
        let payload = encode_tag_values(names, values)?;
        self.request(RequestType::ControlData, payload).await?;
        Ok(())
    }

    /// Ask the service to persist tag values.
    pub async fn save_data<N, V>(&self, names: &[N], values: &[V]) -> Result<()>
    where
        N: AsRef<str>,
        V: AsRef<str>,
    {
        let payload = encode_tag_values(names, values)?;
        self.request(RequestType::DumpData, payload).await?;
        Ok(())
    }

    /// Read current values, returned in the order of `names`.
    ///
    /// A reply with a different number of values than tags is malformed.
    pub async fn read_data<N: AsRef<str>>(&self, names: &[N]) -> Result<Vec<String>> {
        validate_tags(names)?;
        let payload = DelimitedCodec::join(names);
        let reply = self.request(RequestType::ReadData, payload).await?;

        let values = DelimitedCodec::split_bytes(reply.payload());
        if values.len() != names.len() {
            return Err(ClientError::MalformedPayload(format!(
                "requested {} tags, got {} values",
                names.len(),
                values.len()
            )));
        }
        Ok(values)
    }

    /// Subscribe to periodic pushes of `names` every `interval_ms`.
    ///
    /// `callback` runs on the worker pool, possibly on a different thread
    /// each time. Returns the batch id of the subscription.
    pub async fn subscribe<N, F>(&self, names: &[N], interval_ms: u16, callback: F) -> Result<u16>
    where
        N: AsRef<str>,
        F: Fn(TagValues) + Send + Sync + 'static,
    {
        let tags = names.iter().map(|n| n.as_ref().to_string()).collect();
        self.session
            .subscribe(tags, interval_ms, Arc::new(callback), self.request_timeout())
            .await
    }

    /// Read the attribute descriptors of an object.
    pub async fn read_object_attr(&self, object: &str) -> Result<Vec<ObjectAttr>> {
        validate_object(object)?;
        let reply = self
            .request(RequestType::ReadAttr, object.to_string())
            .await?;
        AttrCodec::decode_attrs(reply.payload())
    }

    /// Read the attribute values of an object.
    pub async fn read_object_data(&self, object: &str) -> Result<Vec<ObjectData>> {
        validate_object(object)?;
        let reply = self
            .request(RequestType::ReadAttrData, object.to_string())
            .await?;
        AttrCodec::decode_data(reply.payload())
    }

    /// Send a raw request and return the reply frame.
    pub async fn call(
        &self,
        request: RequestType,
        payload: impl Into<bytes::Bytes>,
    ) -> Result<Frame> {
        self.session
            .call(request, payload, self.request_timeout())
            .await
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.connection_state()
    }

    /// Wait up to `timeout` for the connection to be up.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<()> {
        self.session.transport().wait_connected(timeout).await
    }

    /// Number of stored subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.session.subscription_count()
    }

    /// Requests currently waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.session.pending_requests()
    }

    /// Requests pending for longer than `max_age`.
    pub fn stale_requests(&self, max_age: Duration) -> Vec<u32> {
        self.session.stale_requests(max_age)
    }

    /// The effective per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        self.config.request_timeout()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Stop reconnecting, fail outstanding requests and drain callbacks.
    pub async fn shutdown(&self) {
        self.session.shutdown().await;
        info!("client shut down");
    }

    async fn request(&self, request: RequestType, payload: String) -> Result<Frame> {
        self.session
            .call(request, payload, self.request_timeout())
            .await
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.session.transport().close();
    }
}

fn encode_tag_values<N, V>(names: &[N], values: &[V]) -> Result<String>
where
    N: AsRef<str>,
    V: AsRef<str>,
{
    validate_tags(names)?;
    for value in values {
        let value = value.as_ref();
        // empty values vanish on the wire and shift every later pair
        if value.is_empty() || value.contains(DIVIDE_MARK) {
            return Err(ClientError::InvalidInput(format!(
                "invalid tag value {:?}",
                value
            )));
        }
    }
    DelimitedCodec::join_pairs(names, values)
}

fn validate_object(object: &str) -> Result<()> {
    if object.is_empty() {
        return Err(ClientError::InvalidInput("object name is empty".to_string()));
    }
    Ok(())
}
