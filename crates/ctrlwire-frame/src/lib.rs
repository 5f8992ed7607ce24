//! Length-prefixed protobuf framing for the ctrlwire controller protocol.
//!
//! Every message on the wire is a [`WrapperMessage`] envelope preceded by a
//! single unsigned length byte:
//!
//! ```text
//! ┌──────────────┬──────────────────────────────────────┐
//! │ Length (1B)  │ WrapperMessage (protobuf, Length B)   │
//! └──────────────┴──────────────────────────────────────┘
//! ```
//!
//! Frames are sent back-to-back with no separators. Bodies are capped at
//! [`MAX_FRAME_BODY`] bytes; anything larger is rejected with
//! [`FrameError::FrameTooLarge`] rather than truncated.

pub mod codec;
pub mod error;
pub mod message;
pub mod reader;
#[cfg(feature = "async")]
pub mod tokio_codec;
pub mod writer;

pub use codec::{
    decode_frame, encode_frame, encode_message, FrameConfig, FrameDecoder, LENGTH_PREFIX_SIZE,
    MAX_FRAME_BODY,
};
pub use error::{FrameError, Result};
pub use message::{
    ConnectRequest, MessageType, OutboundMessage, SyncBusRequest, SyncPointRequest, SyncRequest,
    TaggedMessage, WrapperMessage,
};
pub use reader::FrameReader;
#[cfg(feature = "async")]
pub use tokio_codec::WrapperCodec;
pub use writer::FrameWriter;
