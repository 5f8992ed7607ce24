use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use ctrlwire_transport::{DuplexStream, TransportError};

use crate::codec::{encode_frame, encode_message, FrameConfig, LENGTH_PREFIX_SIZE, MAX_FRAME_BODY};
use crate::error::{FrameError, Result};
use crate::message::{OutboundMessage, WrapperMessage};

/// Writes complete frames to any `Write` stream.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(LENGTH_PREFIX_SIZE + MAX_FRAME_BODY),
            config,
        }
    }

    /// Encode and write one envelope (blocking).
    pub fn send(&mut self, wrapper: &WrapperMessage) -> Result<()> {
        self.buf.clear();
        encode_frame(wrapper, &mut self.buf)?;
        let frame = self.buf.split();
        self.write_encoded(&frame)
    }

    /// Wrap, encode and write an outbound message (blocking).
    pub fn send_message(&mut self, message: &OutboundMessage, sequence: u64) -> Result<()> {
        self.buf.clear();
        encode_message(message, sequence, &mut self.buf)?;
        let frame = self.buf.split();
        self.write_encoded(&frame)
    }

    /// Write already framed bytes, looping over partial writes.
    pub fn write_encoded(&mut self, bytes: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        while offset < bytes.len() {
            match self.inner.write(&bytes[offset..]) {
                Ok(0) => return Err(FrameError::Io(std::io::Error::from(ErrorKind::WriteZero))),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl<S: DuplexStream> FrameWriter<S> {
    /// Create a frame writer for a duplex stream and apply the write
    /// timeout from config.
    pub fn with_config_stream(inner: S, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_frame_error(err: TransportError) -> FrameError {
    match err {
        TransportError::Io(io) => FrameError::Io(io),
        TransportError::Resolve { source, .. } | TransportError::Connect { source, .. } => {
            FrameError::Io(source)
        }
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
