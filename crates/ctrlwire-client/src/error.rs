/// Errors that can occur in client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] ctrlwire_transport::TransportError),

    /// Frame-level error (encoding, oversized frame, unknown message type).
    #[error("frame error: {0}")]
    Frame(#[from] ctrlwire_frame::FrameError),

    /// The I/O worker thread could not be started.
    #[error("failed to spawn I/O worker: {0}")]
    Spawn(std::io::Error),

    /// The client has been shut down.
    #[error("client shut down")]
    Shutdown,
}

impl ClientError {
    /// Returns true if the error means there is currently no open connection.
    pub fn is_not_connected(&self) -> bool {
        matches!(
            self,
            ClientError::Transport(ctrlwire_transport::TransportError::NotConnected)
        )
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
