//! Keeps a connection to a controller and prints route updates.
//!
//! Run with:
//!   cargo run --example sync-client -- 127.0.0.1 7001
//!
//! Stop the controller and start it again to watch the client reconnect.

use std::sync::mpsc;
use std::time::Duration;

use ctrlwire::client::{Client, ClientConfig, StateChange};
use ctrlwire::frame::{MessageType, SyncRequest};
use ctrlwire::transport::Endpoint;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port: u16 = args.next().as_deref().unwrap_or("7001").parse()?;

    let mut config = ClientConfig::new(Endpoint::new(host, port));
    config.backoff.max_retries = None;

    let (connected_tx, connected) = mpsc::channel();
    let client = Client::builder(config)
        .on_message(MessageType::SyncRouteResponse, |msg| {
            eprintln!(
                "route update seq={} ({} bytes)",
                msg.sequence,
                msg.payload.len()
            );
        })
        .on_state_change(move |change| {
            eprintln!("state: {change:?}");
            if matches!(change, StateChange::Connected { .. }) {
                let _ = connected_tx.send(());
            }
        })
        .build()?;

    // Re-sync after every (re)connect; run for a minute.
    let until = std::time::Instant::now() + Duration::from_secs(60);
    while std::time::Instant::now() < until {
        if connected.recv_timeout(Duration::from_millis(250)).is_ok() {
            // A failed send is retried on the next connect.
            match client.send(SyncRequest::now()) {
                Ok(sequence) => eprintln!("sync requested (seq={sequence})"),
                Err(err) => eprintln!("sync request failed: {err}"),
            }
        }
    }

    client.shutdown();
    Ok(())
}
