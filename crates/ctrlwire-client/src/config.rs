use std::time::Duration;

use ctrlwire_frame::FrameConfig;
use ctrlwire_transport::Endpoint;

use crate::backoff::BackoffConfig;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Controller address.
    pub endpoint: Endpoint,
    /// Limit for a single connect attempt. `None` uses the OS default.
    pub connect_timeout: Option<Duration>,
    /// Read timeout on the live stream. `None` blocks until data or close.
    pub read_timeout: Option<Duration>,
    /// Write timeout for outbound frames.
    pub write_timeout: Option<Duration>,
    pub backoff: BackoffConfig,
    /// Open the connection as soon as the client is built. When false the
    /// client starts disconnected until [`Client::resume`] is called.
    ///
    /// [`Client::resume`]: crate::Client::resume
    pub connect_on_start: bool,
}

impl ClientConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            connect_timeout: Some(Duration::from_secs(5)),
            read_timeout: None,
            write_timeout: Some(Duration::from_secs(5)),
            backoff: BackoffConfig::default(),
            connect_on_start: true,
        }
    }

    /// Stream timeouts as a frame I/O config.
    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
        }
    }
}
