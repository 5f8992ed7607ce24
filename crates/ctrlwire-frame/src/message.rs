//! Wire envelope and the concrete controller messages.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use prost::Message;

use crate::error::{FrameError, Result};

/// Message type tags understood by this protocol version.
///
/// Tags are fixed for the lifetime of the protocol version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MessageType {
    ConnectRequest = 0,
    SyncRequest = 1,
    SyncBusRequest = 2,
    SyncPointRequest = 3,
    SyncRouteResponse = 4,
}

impl MessageType {
    /// Wire value of this tag.
    pub fn tag(self) -> i32 {
        self as i32
    }

    /// Look up a wire tag. Returns `None` for tags this version does not know.
    pub fn from_tag(tag: i32) -> Option<Self> {
        Self::try_from(tag).ok()
    }

    /// Human-readable name for logs and CLI output.
    pub fn name(self) -> &'static str {
        match self {
            MessageType::ConnectRequest => "CONNECT_REQUEST",
            MessageType::SyncRequest => "SYNC_REQUEST",
            MessageType::SyncBusRequest => "SYNC_BUS_REQUEST",
            MessageType::SyncPointRequest => "SYNC_POINT_REQUEST",
            MessageType::SyncRouteResponse => "SYNC_ROUTE_RESPONSE",
        }
    }
}

/// The envelope every frame carries.
///
/// `payload` holds the serialized bytes of exactly one message whose kind
/// matches `tag`. The raw tag is kept as an integer so tags from newer
/// peers survive decoding.
#[derive(Clone, PartialEq, Message)]
pub struct WrapperMessage {
    #[prost(int32, tag = "1")]
    pub tag: i32,
    #[prost(bytes = "bytes", tag = "2")]
    pub payload: Bytes,
    #[prost(bool, tag = "3")]
    pub compressed: bool,
    #[prost(uint64, tag = "4")]
    pub sequence: u64,
}

impl WrapperMessage {
    /// Create an uncompressed envelope.
    pub fn new(message_type: MessageType, payload: impl Into<Bytes>, sequence: u64) -> Self {
        Self {
            tag: message_type.tag(),
            payload: payload.into(),
            compressed: false,
            sequence,
        }
    }

    /// The known message type of this envelope, if any.
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_tag(self.tag)
    }
}

/// A concrete message with a compile-time wire tag.
pub trait TaggedMessage: Message + Default + Sized {
    const MESSAGE_TYPE: MessageType;
}

#[derive(Clone, PartialEq, Message)]
pub struct ConnectRequest {
    #[prost(string, tag = "1")]
    pub client_id: String,
}

/// Request for changes since `last_sync_time` (Unix epoch seconds).
#[derive(Clone, PartialEq, Message)]
pub struct SyncRequest {
    #[prost(int64, tag = "1")]
    pub last_sync_time: i64,
}

impl SyncRequest {
    /// A sync request stamped with the current time.
    pub fn now() -> Self {
        Self {
            last_sync_time: unix_now(),
        }
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct SyncBusRequest {
    #[prost(int64, tag = "1")]
    pub last_sync_time: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct SyncPointRequest {
    #[prost(int64, tag = "1")]
    pub last_sync_time: i64,
}

impl TaggedMessage for ConnectRequest {
    const MESSAGE_TYPE: MessageType = MessageType::ConnectRequest;
}

impl TaggedMessage for SyncRequest {
    const MESSAGE_TYPE: MessageType = MessageType::SyncRequest;
}

impl TaggedMessage for SyncBusRequest {
    const MESSAGE_TYPE: MessageType = MessageType::SyncBusRequest;
}

impl TaggedMessage for SyncPointRequest {
    const MESSAGE_TYPE: MessageType = MessageType::SyncPointRequest;
}

/// Every message kind the client may send.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Connect(ConnectRequest),
    Sync(SyncRequest),
    SyncBus(SyncBusRequest),
    SyncPoint(SyncPointRequest),
    /// A payload serialized by an external codec. The tag must still be
    /// one this protocol version defines.
    Raw { tag: i32, payload: Bytes },
}

impl OutboundMessage {
    /// Wire tag for this message.
    ///
    /// Fails with [`FrameError::UnknownMessageType`] for a raw tag outside
    /// [`MessageType`]; there is no fallback tag.
    pub fn message_type(&self) -> Result<MessageType> {
        match self {
            OutboundMessage::Connect(_) => Ok(ConnectRequest::MESSAGE_TYPE),
            OutboundMessage::Sync(_) => Ok(SyncRequest::MESSAGE_TYPE),
            OutboundMessage::SyncBus(_) => Ok(SyncBusRequest::MESSAGE_TYPE),
            OutboundMessage::SyncPoint(_) => Ok(SyncPointRequest::MESSAGE_TYPE),
            OutboundMessage::Raw { tag, .. } => {
                MessageType::from_tag(*tag).ok_or(FrameError::UnknownMessageType(*tag))
            }
        }
    }

    /// Serialize the message body.
    pub fn encode_payload(&self) -> Result<Bytes> {
        let payload = match self {
            OutboundMessage::Connect(msg) => encode_body(msg)?,
            OutboundMessage::Sync(msg) => encode_body(msg)?,
            OutboundMessage::SyncBus(msg) => encode_body(msg)?,
            OutboundMessage::SyncPoint(msg) => encode_body(msg)?,
            OutboundMessage::Raw { payload, .. } => payload.clone(),
        };
        Ok(payload)
    }

    /// Build the envelope for this message.
    pub fn wrap(&self, sequence: u64) -> Result<WrapperMessage> {
        let message_type = self.message_type()?;
        let payload = self.encode_payload()?;
        Ok(WrapperMessage::new(message_type, payload, sequence))
    }
}

fn encode_body<M: Message>(message: &M) -> Result<Bytes> {
    let mut buf = Vec::with_capacity(message.encoded_len());
    message.encode(&mut buf)?;
    Ok(Bytes::from(buf))
}

impl From<ConnectRequest> for OutboundMessage {
    fn from(msg: ConnectRequest) -> Self {
        OutboundMessage::Connect(msg)
    }
}

impl From<SyncRequest> for OutboundMessage {
    fn from(msg: SyncRequest) -> Self {
        OutboundMessage::Sync(msg)
    }
}

impl From<SyncBusRequest> for OutboundMessage {
    fn from(msg: SyncBusRequest) -> Self {
        OutboundMessage::SyncBus(msg)
    }
}

impl From<SyncPointRequest> for OutboundMessage {
    fn from(msg: SyncPointRequest) -> Self {
        OutboundMessage::SyncPoint(msg)
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
