//! Persistent, reconnecting client for the ctrlwire controller protocol.
//!
//! This is the layer host applications use. Build a [`Client`], register
//! inbound handlers by message type, send [`OutboundMessage`]s, and forward
//! foreground/background signals as [`Client::suspend`] / [`Client::resume`].
//! Transport failures and malformed frames are never surfaced as errors on
//! the read side; the client discards the connection and reconnects with
//! bounded backoff.
//!
//! [`OutboundMessage`]: ctrlwire_frame::OutboundMessage

pub mod backoff;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod state;
pub mod stream;

pub use backoff::{Backoff, BackoffConfig};
pub use client::{Client, ClientBuilder};
pub use config::ClientConfig;
pub use dispatcher::{Dispatcher, FrameSink};
pub use error::{ClientError, Result};
pub use lifecycle::LifecycleSignal;
pub use registry::{Handler, HandlerRegistry, InboundMessage};
pub use state::{Action, ConnectionId, ConnectionState, ConnectionStateMachine, Event, StateChange};
pub use stream::{Connection, StreamTransport};
