//! Client configuration.
//!
//! [`ClientConfig`] can be built in code through
//! [`ClientBuilder`](crate::client::ClientBuilder), deserialized from a host
//! application's config file (every field has a default), or overlaid from
//! `DATASERVICE_*` environment variables.

use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::protocol::MAX_PAYLOAD_SIZE;

/// Default server address.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default server port.
pub const DEFAULT_PORT: u16 = 1234;
/// Default request timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;
/// Lower bound applied to the request timeout.
pub const MIN_TIMEOUT_MS: u64 = 500;
/// Upper bound applied to the request timeout.
pub const MAX_TIMEOUT_MS: u64 = 2000;
/// Default callback worker count.
pub const DEFAULT_WORKER_THREADS: usize = 10;
/// Default delay between reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 2000;
/// Default depth of the inbound and outbound frame queues.
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;
/// Default wait for room in a full outbound queue.
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 1000;

const ENV_HOST: &str = "DATASERVICE_HOST";
const ENV_PORT: &str = "DATASERVICE_PORT";
const ENV_TIMEOUT_MS: &str = "DATASERVICE_TIMEOUT_MS";
const ENV_WORKERS: &str = "DATASERVICE_WORKERS";

/// Connection and runtime parameters for a [`Client`](crate::client::Client).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server host name or IP.
    pub host: String,
    /// Server TCP port.
    pub port: u16,
    /// Per-request timeout, clamped by `request_timeout`.
    pub timeout_ms: u64,
    /// Subscription callback workers.
    pub worker_threads: usize,
    /// Fixed backoff between connection attempts.
    pub reconnect_delay_ms: u64,
    /// Largest payload accepted in either direction.
    pub max_payload_size: usize,
    /// Frames buffered between the read pump and the session.
    pub inbound_queue_depth: usize,
    /// Frames buffered in front of the writer task.
    pub outbound_queue_depth: usize,
    /// How long a send waits for room in a full outbound queue.
    pub send_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            worker_threads: DEFAULT_WORKER_THREADS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            max_payload_size: MAX_PAYLOAD_SIZE,
            inbound_queue_depth: DEFAULT_QUEUE_DEPTH,
            outbound_queue_depth: DEFAULT_QUEUE_DEPTH,
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
        }
    }
}

impl ClientConfig {
    /// Defaults overlaid with `DATASERVICE_HOST`, `DATASERVICE_PORT`,
    /// `DATASERVICE_TIMEOUT_MS` and `DATASERVICE_WORKERS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    ///
    /// Values that fail to parse are ignored and logged.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(host) = lookup(ENV_HOST).filter(|value| !value.trim().is_empty()) {
            config.host = host.trim().to_string();
        }
        if let Some(port) = parse_var(&lookup, ENV_PORT) {
            config.port = port;
        }
        if let Some(timeout_ms) = parse_var(&lookup, ENV_TIMEOUT_MS) {
            config.timeout_ms = timeout_ms;
        }
        if let Some(workers) = parse_var::<usize, _>(&lookup, ENV_WORKERS).filter(|n| *n > 0) {
            config.worker_threads = workers;
        }
        config
    }

    /// `host:port` for the TCP connect.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Request timeout, clamped to [500 ms, 2000 ms].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS))
    }

    /// Delay before the next connection attempt.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Wait for room in a full outbound queue.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Payload ceiling, never above what the 16-bit length field allows.
    pub fn payload_limit(&self) -> usize {
        self.max_payload_size.min(MAX_PAYLOAD_SIZE)
    }

    /// Worker count, at least one.
    pub fn workers(&self) -> usize {
        self.worker_threads.max(1)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparseable environment value");
            None
        }
    }
}
