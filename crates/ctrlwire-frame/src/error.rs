/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Serializing a message or envelope failed.
    #[error("failed to encode message: {0}")]
    Encode(#[from] prost::EncodeError),

    /// The serialized envelope does not fit the one-byte length prefix.
    #[error("frame body too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The stream ended part way through a frame.
    #[error("truncated frame ({received} of {expected} bytes received)")]
    Truncated { expected: usize, received: usize },

    /// The frame body is not a valid envelope.
    #[error("malformed frame payload: {0}")]
    MalformedPayload(#[from] prost::DecodeError),

    /// The stream ended cleanly on a frame boundary.
    #[error("end of stream")]
    EndOfStream,

    /// The message type tag is not part of the protocol.
    #[error("unknown message type {0}")]
    UnknownMessageType(i32),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Returns true for failures on the read path that leave the stream
    /// position unusable (truncated, malformed or ended).
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            FrameError::Truncated { .. } | FrameError::MalformedPayload(_) | FrameError::EndOfStream
        )
    }

    /// Returns true if this is a read or write timeout. Buffered partial
    /// frame bytes survive a timeout, so the operation can be retried.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            FrameError::Io(err)
                if matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut)
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_error_family() {
        assert!(FrameError::EndOfStream.is_decode_error());
        assert!(FrameError::Truncated {
            expected: 4,
            received: 2
        }
        .is_decode_error());
        assert!(!FrameError::UnknownMessageType(99).is_decode_error());
        assert!(!FrameError::FrameTooLarge { size: 300, max: 255 }.is_decode_error());
    }

    #[test]
    fn timeout_detection() {
        let timed_out = FrameError::Io(std::io::Error::from(std::io::ErrorKind::TimedOut));
        let would_block = FrameError::Io(std::io::Error::from(std::io::ErrorKind::WouldBlock));
        let reset = FrameError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert!(timed_out.is_timeout());
        assert!(would_block.is_timeout());
        assert!(!reset.is_timeout());
        assert!(!FrameError::EndOfStream.is_timeout());
    }
}
