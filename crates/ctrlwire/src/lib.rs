//! Persistent, reconnecting client for controller streams.
//!
//! ctrlwire keeps one TCP stream to a controller open for the lifetime of
//! the host application. Messages travel as protobuf envelopes behind a
//! one-byte length prefix. Inbound envelopes are routed to handlers by
//! message type; dropped connections and malformed frames are recovered by
//! reconnecting with bounded backoff.
//!
//! # Crate Structure
//!
//! - [`transport`]: endpoint resolution and the stream factory (TCP)
//! - [`frame`]: envelope schema, message types and the length-prefixed codec
//! - [`client`]: connection state machine, dispatcher and the [`Client`] handle
//!
//! ```no_run
//! use ctrlwire::client::{Client, ClientConfig};
//! use ctrlwire::frame::{MessageType, SyncRequest};
//! use ctrlwire::transport::Endpoint;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::builder(ClientConfig::new(Endpoint::new("10.0.0.7", 7001)))
//!     .on_message(MessageType::SyncRouteResponse, |msg| {
//!         println!("route update: {} bytes", msg.payload.len());
//!     })
//!     .build()?;
//! // Sends fail with a not-connected error until the first open completes.
//! if client.is_connected() {
//!     client.send(SyncRequest::now())?;
//! }
//! # Ok(())
//! # }
//! ```

/// Re-export transport types.
pub mod transport {
    pub use ctrlwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use ctrlwire_frame::*;
}

/// Re-export client types.
pub mod client {
    pub use ctrlwire_client::*;
}

pub use ctrlwire_client::{Client, ClientBuilder, ClientConfig, ConnectionState, StateChange};
