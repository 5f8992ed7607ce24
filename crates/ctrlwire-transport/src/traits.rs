use std::fmt;
use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Address of a controller: a host name or IP literal plus a TCP port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Create a new endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') && !self.host.starts_with('[') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A connected, bidirectional byte stream.
///
/// Besides `Read + Write`, the client needs a second handle to the same
/// socket (one half reads on the I/O thread, the other writes from callers)
/// and a way to force blocked reads to return.
pub trait DuplexStream: Read + Write + Send + Sized + 'static {
    /// Create a second handle to the same underlying stream.
    fn try_clone(&self) -> Result<Self>;

    /// Shut down both directions. Blocked reads and writes on any handle
    /// return promptly afterwards.
    fn shutdown(&self) -> Result<()>;

    /// Set read timeout on the underlying stream.
    fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()>;

    /// Set write timeout on the underlying stream.
    fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()>;
}

/// Factory producing connected streams for an endpoint.
pub trait Connector: Send + Sync + 'static {
    type Stream: DuplexStream;

    /// Connect to `endpoint`, giving up after `timeout` when one is set.
    fn connect(&self, endpoint: &Endpoint, timeout: Option<Duration>) -> Result<Self::Stream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_display_host_port() {
        assert_eq!(Endpoint::new("10.0.0.7", 7001).to_string(), "10.0.0.7:7001");
        assert_eq!(
            Endpoint::new("controller.local", 80).to_string(),
            "controller.local:80"
        );
    }

    #[test]
    fn endpoint_display_brackets_ipv6() {
        assert_eq!(Endpoint::new("::1", 9000).to_string(), "[::1]:9000");
        assert_eq!(Endpoint::new("[::1]", 9000).to_string(), "[::1]:9000");
    }
}
