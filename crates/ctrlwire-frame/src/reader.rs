use std::io::{ErrorKind, Read};

use ctrlwire_transport::DuplexStream;
use tracing::trace;

use crate::codec::{FrameConfig, FrameDecoder};
use crate::error::{FrameError, Result};
use crate::message::WrapperMessage;

const READ_CHUNK_SIZE: usize = 1024;

/// Reads complete frames from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete frames.
/// A timeout error leaves buffered bytes in place, so `read_frame` can be
/// called again without losing data.
pub struct FrameReader<T> {
    inner: T,
    decoder: FrameDecoder,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(),
            config,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::EndOfStream)` when EOF is reached between
    /// frames and `Err(FrameError::Truncated { .. })` when it cuts a frame.
    pub fn read_frame(&mut self) -> Result<WrapperMessage> {
        loop {
            if let Some(frame) = self.decoder.next_frame()? {
                return Ok(frame);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(self.decoder.eof_error());
            }

            self.decoder.extend(&chunk[..read]);
            trace!(read, buffered = self.decoder.buffered(), "frame bytes received");
        }
    }

    /// Bytes received but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.decoder.buffered()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl<S: DuplexStream> FrameReader<S> {
    /// Create a frame reader for a duplex stream and apply the read timeout
    /// from config.
    pub fn with_config_stream(inner: S, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(crate::writer::transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}
