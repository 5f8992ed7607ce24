use bytes::{Buf, BufMut, BytesMut};
use prost::Message;

use crate::error::{FrameError, Result};
use crate::message::{OutboundMessage, WrapperMessage};

/// Frame header: a single length byte.
pub const LENGTH_PREFIX_SIZE: usize = 1;

/// Largest envelope the one-byte prefix can describe.
pub const MAX_FRAME_BODY: usize = u8::MAX as usize;

const INITIAL_BUFFER_CAPACITY: usize = 2 * (LENGTH_PREFIX_SIZE + MAX_FRAME_BODY);

/// Encode an envelope into the wire format.
///
/// Wire format:
/// ```text
/// ┌─────────────┬────────────────────────────┐
/// │ Length (1B) │ WrapperMessage (Length B)  │
/// └─────────────┴────────────────────────────┘
/// ```
pub fn encode_frame(wrapper: &WrapperMessage, dst: &mut BytesMut) -> Result<()> {
    let body_len = wrapper.encoded_len();
    if body_len > MAX_FRAME_BODY {
        return Err(FrameError::FrameTooLarge {
            size: body_len,
            max: MAX_FRAME_BODY,
        });
    }
    dst.reserve(LENGTH_PREFIX_SIZE + body_len);
    dst.put_u8(body_len as u8);
    wrapper.encode(dst)?;
    Ok(())
}

/// Wrap `message` with its tag and `sequence`, then encode the frame.
pub fn encode_message(message: &OutboundMessage, sequence: u64, dst: &mut BytesMut) -> Result<()> {
    let wrapper = message.wrap(sequence)?;
    encode_frame(&wrapper, dst)
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes exactly the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut) -> Result<Option<WrapperMessage>> {
    let Some(&len) = src.first() else {
        return Ok(None);
    };

    let body_len = len as usize;
    if src.len() < LENGTH_PREFIX_SIZE + body_len {
        return Ok(None); // Need more data
    }

    src.advance(LENGTH_PREFIX_SIZE);
    let body = src.split_to(body_len).freeze();
    let wrapper = WrapperMessage::decode(body)?;
    Ok(Some(wrapper))
}

/// Accumulates stream bytes across readable events and yields whole frames.
///
/// Bytes beyond the current frame stay buffered for the next call.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Append newly received bytes.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Decode the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Result<Option<WrapperMessage>> {
        decode_frame(&mut self.buf)
    }

    /// Number of bytes buffered but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Classify end-of-stream given what is still buffered.
    ///
    /// An empty buffer means the peer closed on a frame boundary.
    pub fn eof_error(&self) -> FrameError {
        match self.buf.first() {
            None => FrameError::EndOfStream,
            Some(&len) => FrameError::Truncated {
                expected: LENGTH_PREFIX_SIZE + len as usize,
                received: self.buf.len(),
            },
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for blocking frame I/O.
#[derive(Debug, Clone, Default)]
pub struct FrameConfig {
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}
