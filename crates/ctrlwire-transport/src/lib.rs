//! Byte-stream transport for the ctrlwire controller protocol.
//!
//! Provides the stream factory the client connects through:
//! - [`Endpoint`] names the controller (`host:port`)
//! - [`Connector`] turns an endpoint into a connected duplex stream
//! - [`TcpConnector`] / [`ControllerStream`] are the TCP implementation
//!
//! This is the lowest layer of ctrlwire. Framing and reconnect logic live
//! in `ctrlwire-frame` and `ctrlwire-client`.

pub mod error;
pub mod tcp;
pub mod traits;

pub use error::{Result, TransportError};
pub use tcp::{ControllerStream, TcpConnector};
pub use traits::{Connector, DuplexStream, Endpoint};
