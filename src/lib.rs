//! # dataservice-client
//!
//! Async Rust client for the real-time data service.
//!
//! The data service holds the current values of named tags. This crate
//! speaks its binary TCP protocol and offers:
//!
//! - control, save and synchronous read of tag values
//! - periodic subscriptions delivered to callbacks on a worker pool
//! - object attribute and attribute value queries
//!
//! ## Architecture
//!
//! - **Transport**: one TCP connection, a writer task and a read pump,
//!   reconnecting forever with a fixed delay
//! - **Session**: correlates replies with requests by sequence number,
//!   routes pushes by batch id and replays subscriptions after a reconnect
//! - **Executor**: fixed pool of threads running subscription callbacks
//!
//! ## Example
//!
//! ```no_run
//! use dataservice_client::ClientBuilder;
//!
//! #[tokio::main]
//! async fn main() -> dataservice_client::Result<()> {
//!     let client = ClientBuilder::new().host("127.0.0.1").port(1234).start().await?;
//!
//!     client.control_data(&["pump.speed"], &["42"]).await?;
//!     let values = client.read_data(&["pump.speed"]).await?;
//!     println!("{values:?}");
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod executor;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod writer;

mod backpressure;
mod client;

pub use client::{Client, ClientBuilder};
pub use codec::{ObjectAttr, ObjectData, TagValues};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use protocol::RequestType;
pub use transport::ConnectionState;
