use std::time::Duration;

/// Errors that can occur in controller transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The endpoint host could not be resolved to any socket address.
    #[error("failed to resolve {endpoint}: {source}")]
    Resolve {
        endpoint: String,
        source: std::io::Error,
    },

    /// Failed to connect to the endpoint.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        source: std::io::Error,
    },

    /// No address of the endpoint accepted the connection in time.
    #[error("connect to {endpoint} timed out after {timeout:?}")]
    ConnectTimeout { endpoint: String, timeout: Duration },

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A write was attempted while no connection is open.
    #[error("not connected")]
    NotConnected,
}

impl TransportError {
    /// Returns true if the error was caused by a timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            TransportError::ConnectTimeout { .. } => true,
            TransportError::Connect { source, .. } | TransportError::Io(source) => matches!(
                source.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
