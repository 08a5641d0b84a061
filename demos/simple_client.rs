//! Simple client - subscribe, read and write tags.
//!
//! This example demonstrates:
//! - Loading connection settings from `DATASERVICE_*` variables
//! - Subscribing to periodic tag pushes
//! - Synchronous reads and control writes
//! - Querying object attributes
//!
//! # Running
//!
//! ```sh
//! DATASERVICE_HOST=10.0.0.5 DATASERVICE_PORT=1234 RUST_LOG=debug \
//!     cargo run --example simple_client -- pump1.speed pump1.state
//! ```

use std::time::Duration;

use dataservice_client::{ClientBuilder, ClientConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut tags: Vec<String> = std::env::args().skip(1).collect();
    if tags.is_empty() {
        tags = vec!["demo.counter".to_string(), "demo.state".to_string()];
    }

    let client = ClientBuilder::from_config(ClientConfig::from_env())
        .start()
        .await?;
    client.wait_connected(Duration::from_secs(5)).await?;

    let batch_id = client
        .subscribe(&tags, 500, |values| {
            for (tag, value) in values {
                println!("push {tag} = {value}");
            }
        })
        .await?;
    println!("subscribed as batch {batch_id}");

    for _ in 0..5 {
        match client.read_data(&tags).await {
            Ok(values) => {
                for (tag, value) in tags.iter().zip(&values) {
                    println!("read {tag} = {value}");
                }
            }
            Err(e) => eprintln!("read failed ({}): {e}", e.code()),
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    if let Err(e) = client.control_data(&[&tags[0]], &["1"]).await {
        eprintln!("control failed ({}): {e}", e.code());
    }

    let object = tags[0].split('.').next().unwrap_or("demo");
    match client.read_object_attr(object).await {
        Ok(attrs) => println!("{}", serde_json::to_string_pretty(&attrs)?),
        Err(e) => eprintln!("attribute query failed ({}): {e}", e.code()),
    }

    client.shutdown().await;
    Ok(())
}
