use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{Connector, DuplexStream, Endpoint};

/// A connected controller stream (Read + Write).
///
/// Wraps a TCP stream with Nagle disabled; frames are small and latency
/// sensitive.
pub struct ControllerStream {
    inner: TcpStream,
}

impl ControllerStream {
    /// Wrap an already connected TCP stream.
    pub fn from_tcp(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        Ok(Self { inner: stream })
    }

    /// Address of the connected controller.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        self.inner.peer_addr().map_err(Into::into)
    }

    /// Local address of this end of the stream.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.local_addr().map_err(Into::into)
    }
}

impl Read for ControllerStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for ControllerStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl DuplexStream for ControllerStream {
    fn try_clone(&self) -> Result<Self> {
        let cloned = self.inner.try_clone()?;
        Ok(Self { inner: cloned })
    }

    fn shutdown(&self) -> Result<()> {
        match self.inner.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // Already torn down by the peer.
            Err(err) if err.kind() == ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.inner.set_read_timeout(timeout).map_err(Into::into)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.inner.set_write_timeout(timeout).map_err(Into::into)
    }
}

impl std::fmt::Debug for ControllerStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut dbg = f.debug_struct("ControllerStream");
        dbg.field("type", &"tcp");
        if let Ok(addr) = self.inner.peer_addr() {
            dbg.field("peer", &addr);
        }
        dbg.finish()
    }
}

/// TCP stream factory.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl TcpConnector {
    /// Resolve an endpoint to its socket addresses.
    pub fn resolve(endpoint: &Endpoint) -> Result<Vec<SocketAddr>> {
        let host = endpoint
            .host
            .trim_start_matches('[')
            .trim_end_matches(']');
        let addrs: Vec<SocketAddr> = (host, endpoint.port)
            .to_socket_addrs()
            .map_err(|e| TransportError::Resolve {
                endpoint: endpoint.to_string(),
                source: e,
            })?
            .collect();

        if addrs.is_empty() {
            return Err(TransportError::Resolve {
                endpoint: endpoint.to_string(),
                source: std::io::Error::new(ErrorKind::NotFound, "no addresses found"),
            });
        }
        Ok(addrs)
    }
}

impl Connector for TcpConnector {
    type Stream = ControllerStream;

    fn connect(&self, endpoint: &Endpoint, timeout: Option<Duration>) -> Result<ControllerStream> {
        let addrs = Self::resolve(endpoint)?;

        let mut last_err = None;
        for addr in addrs {
            let attempt = match timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    debug!(%endpoint, %addr, "connected to controller");
                    return ControllerStream::from_tcp(stream);
                }
                Err(err) => {
                    debug!(%endpoint, %addr, error = %err, "connect attempt failed");
                    last_err = Some(err);
                }
            }
        }

        match (last_err, timeout) {
            (Some(err), Some(timeout)) if err.kind() == ErrorKind::TimedOut => {
                Err(TransportError::ConnectTimeout {
                    endpoint: endpoint.to_string(),
                    timeout,
                })
            }
            (Some(err), _) => Err(TransportError::Connect {
                endpoint: endpoint.to_string(),
                source: err,
            }),
            (None, _) => Err(TransportError::Connect {
                endpoint: endpoint.to_string(),
                source: std::io::Error::new(ErrorKind::NotFound, "no addresses found"),
            }),
        }
    }
}
