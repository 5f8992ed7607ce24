use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ctrlwire_frame::{FrameConfig, FrameReader, FrameWriter, Result as FrameResult, WrapperMessage};
use ctrlwire_transport::{Connector, DuplexStream, Endpoint, TransportError};
use tracing::{debug, info, warn};

use crate::dispatcher::FrameSink;
use crate::error::Result;
use crate::state::ConnectionId;

/// Called with the id of a connection whose write side just failed.
pub type WriteFailureHook = Box<dyn Fn(ConnectionId) + Send + Sync>;

/// Read half of one live connection.
///
/// Owned by the I/O worker; dropped when the connection is closed. The
/// write half stays inside [`StreamTransport`].
pub struct Connection<S> {
    id: ConnectionId,
    reader: FrameReader<S>,
}

impl<S: DuplexStream> Connection<S> {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Read the next complete frame (blocking).
    pub fn read_frame(&mut self) -> FrameResult<WrapperMessage> {
        self.reader.read_frame()
    }
}

impl<S> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("id", &self.id).finish()
    }
}

struct Control<S> {
    id: ConnectionId,
    stream: S,
}

struct Writer<S> {
    id: ConnectionId,
    writer: FrameWriter<S>,
}

/// Owns at most one stream to the controller.
///
/// `open` and `close` are idempotent. Writes from any thread are
/// serialized by the writer lock. The shutdown handle sits behind its own
/// lock, so `close` never waits for a blocked write; it shuts the socket
/// down, which makes that write fail at once.
///
/// Lock order is `control` then `writer`.
pub struct StreamTransport<C: Connector> {
    connector: C,
    endpoint: Endpoint,
    connect_timeout: Option<Duration>,
    frame_config: FrameConfig,
    control: Mutex<Option<Control<C::Stream>>>,
    writer: Mutex<Option<Writer<C::Stream>>>,
    on_write_failure: Option<WriteFailureHook>,
}

impl<C: Connector> StreamTransport<C> {
    pub fn new(
        connector: C,
        endpoint: Endpoint,
        connect_timeout: Option<Duration>,
        frame_config: FrameConfig,
    ) -> Self {
        Self {
            connector,
            endpoint,
            connect_timeout,
            frame_config,
            control: Mutex::new(None),
            writer: Mutex::new(None),
            on_write_failure: None,
        }
    }

    /// Report connections whose write side failed.
    pub fn on_write_failure<F>(mut self, hook: F) -> Self
    where
        F: Fn(ConnectionId) + Send + Sync + 'static,
    {
        self.on_write_failure = Some(Box::new(hook));
        self
    }

    fn control(&self) -> MutexGuard<'_, Option<Control<C::Stream>>> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn writer(&self) -> MutexGuard<'_, Option<Writer<C::Stream>>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connect and return the read half for connection `id`.
    ///
    /// Returns `Ok(None)` without touching the existing stream when one is
    /// already open.
    pub fn open(&self, id: ConnectionId) -> Result<Option<Connection<C::Stream>>> {
        if let Some(current) = self.control().as_ref() {
            debug!(connection = %current.id, "stream already open");
            return Ok(None);
        }

        // Connect without holding a lock so writers fail fast meanwhile.
        let stream = self.connector.connect(&self.endpoint, self.connect_timeout)?;
        let read_half = stream.try_clone()?;
        let shutdown_handle = stream.try_clone()?;
        let reader = FrameReader::with_config_stream(read_half, self.frame_config.clone())?;
        let writer = FrameWriter::with_config_stream(stream, self.frame_config.clone())?;

        let mut control = self.control();
        if let Some(current) = control.as_ref() {
            debug!(connection = %current.id, "stream opened concurrently; discarding new one");
            let _ = shutdown_handle.shutdown();
            return Ok(None);
        }
        *self.writer() = Some(Writer { id, writer });
        *control = Some(Control {
            id,
            stream: shutdown_handle,
        });
        info!(endpoint = %self.endpoint, connection = %id, "stream opened");

        Ok(Some(Connection { id, reader }))
    }

    /// Shut down and release the current stream. Returns false if nothing
    /// was open.
    pub fn close(&self) -> bool {
        self.close_where(|_| true)
    }

    /// Like [`close`](Self::close), but only when `id` is still the open
    /// connection. A newer connection is left alone.
    pub fn close_connection(&self, id: ConnectionId) -> bool {
        self.close_where(|current| current == id)
    }

    fn close_where(&self, matches: impl FnOnce(ConnectionId) -> bool) -> bool {
        let mut control = self.control();
        let Some(current) = control.as_ref() else {
            return false;
        };
        if !matches(current.id) {
            debug!(connection = %current.id, "close skipped for newer connection");
            return false;
        }
        let Some(current) = control.take() else {
            return false;
        };

        // Shut down before taking the writer: a write blocked on a full
        // socket buffer holds that lock until this makes it fail.
        if let Err(err) = current.stream.shutdown() {
            warn!(connection = %current.id, error = %err, "stream shutdown failed");
        }
        *self.writer() = None;
        info!(endpoint = %self.endpoint, connection = %current.id, "stream closed");
        true
    }

    /// Write framed bytes to the open stream.
    ///
    /// An I/O failure may leave part of a frame on the wire, so the stream
    /// is shut down before the lock is released and the failure hook is
    /// told which connection broke. Later writes fail with not-connected
    /// until the next open.
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        let mut slot = self.writer();
        let Some(active) = slot.as_mut() else {
            return Err(TransportError::NotConnected.into());
        };
        let Err(err) = active.writer.write_encoded(bytes) else {
            return Ok(());
        };

        let id = active.id;
        if let Err(shutdown_err) = active.writer.get_ref().shutdown() {
            debug!(connection = %id, error = %shutdown_err, "shutdown after failed write");
        }
        *slot = None;
        drop(slot);

        warn!(connection = %id, error = %err, "write failed; stream shut down");
        if let Some(hook) = &self.on_write_failure {
            hook(id);
        }
        Err(err.into())
    }

    pub fn is_open(&self) -> bool {
        self.control().is_some()
    }

    /// Id of the open connection, if any.
    pub fn current(&self) -> Option<ConnectionId> {
        self.control().as_ref().map(|control| control.id)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl<C: Connector> FrameSink for StreamTransport<C> {
    fn write_frame(&self, frame: &[u8]) -> Result<()> {
        self.write(frame)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::net::TcpListener;

    use bytes::BytesMut;
    use ctrlwire_frame::{decode_frame, encode_message, FrameError, SyncRequest};
    use ctrlwire_transport::TcpConnector;

    use super::*;
    use crate::error::ClientError;

    fn ids(n: u64) -> Vec<ConnectionId> {
        (1..=n).map(ConnectionId::new).collect()
    }

    fn transport() -> (TcpListener, StreamTransport<TcpConnector>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = Endpoint::new("127.0.0.1", listener.local_addr().unwrap().port());
        let transport = StreamTransport::new(
            TcpConnector,
            endpoint,
            Some(Duration::from_secs(2)),
            FrameConfig::default(),
        );
        (listener, transport)
    }

    #[test]
    fn open_is_idempotent() {
        let (listener, transport) = transport();
        let ids = ids(2);

        let connection = transport.open(ids[0]).unwrap();
        assert!(connection.is_some());
        let _accepted = listener.accept().unwrap();

        assert!(transport.open(ids[1]).unwrap().is_none());
        assert_eq!(transport.current(), Some(ids[0]));
        assert!(transport.is_open());
    }

    #[test]
    fn close_is_idempotent() {
        let (listener, transport) = transport();
        let _connection = transport.open(ids(1)[0]).unwrap();
        let _accepted = listener.accept().unwrap();

        assert!(transport.close());
        assert!(!transport.close());
        assert!(!transport.is_open());
        assert_eq!(transport.current(), None);
    }

    #[test]
    fn write_when_closed_is_not_connected() {
        let (_listener, transport) = transport();
        let err = transport.write(&[0x00]).unwrap_err();
        assert!(err.is_not_connected());
    }

    #[test]
    fn write_reaches_peer() {
        let (listener, transport) = transport();
        let _connection = transport.open(ids(1)[0]).unwrap();
        let (mut server, _) = listener.accept().unwrap();

        let mut frame = BytesMut::new();
        encode_message(&SyncRequest { last_sync_time: 9 }.into(), 3, &mut frame).unwrap();
        transport.write(&frame).unwrap();

        let mut received = vec![0u8; frame.len()];
        server.read_exact(&mut received).unwrap();
        let mut wire = BytesMut::from(received.as_slice());
        let wrapper = decode_frame(&mut wire).unwrap().unwrap();
        assert_eq!(wrapper.sequence, 3);
    }

    #[test]
    fn close_unblocks_reader() {
        let (listener, transport) = transport();
        let mut connection = transport.open(ids(1)[0]).unwrap().unwrap();
        let _accepted = listener.accept().unwrap();

        let reader = std::thread::spawn(move || connection.read_frame());
        std::thread::sleep(Duration::from_millis(50));
        transport.close();

        let result = reader.join().unwrap();
        assert!(matches!(
            result,
            Err(FrameError::EndOfStream) | Err(FrameError::Io(_))
        ));
    }

    fn fill_until_error(transport: &StreamTransport<TcpConnector>) -> ClientError {
        let junk = vec![0u8; 64 * 1024];
        loop {
            if let Err(err) = transport.write(&junk) {
                return err;
            }
        }
    }

    #[test]
    fn close_does_not_wait_for_blocked_write() {
        let (listener, transport) = transport();
        let transport = std::sync::Arc::new(transport);
        let _connection = transport.open(ids(1)[0]).unwrap();
        // Peer never reads, so the writer eventually blocks on a full buffer.
        let _accepted = listener.accept().unwrap();

        let writer = {
            let transport = std::sync::Arc::clone(&transport);
            std::thread::spawn(move || fill_until_error(&transport))
        };
        std::thread::sleep(Duration::from_millis(500));

        let started = std::time::Instant::now();
        assert!(transport.close());
        assert!(started.elapsed() < Duration::from_secs(1));

        // The blocked write returned once the socket was shut down.
        let _err = writer.join().unwrap();
        assert!(transport.write(&[0x00]).unwrap_err().is_not_connected());
    }

    #[test]
    fn failed_write_shuts_stream_and_reports_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = Endpoint::new("127.0.0.1", listener.local_addr().unwrap().port());
        let failed = std::sync::Arc::new(Mutex::new(Vec::new()));
        let transport = {
            let failed = std::sync::Arc::clone(&failed);
            StreamTransport::new(
                TcpConnector,
                endpoint,
                Some(Duration::from_secs(2)),
                FrameConfig {
                    write_timeout: Some(Duration::from_millis(100)),
                    ..FrameConfig::default()
                },
            )
            .on_write_failure(move |id| failed.lock().unwrap().push(id))
        };
        let id = ids(1)[0];
        let _connection = transport.open(id).unwrap();
        let _accepted = listener.accept().unwrap();

        let err = fill_until_error(&transport);
        assert!(!err.is_not_connected());
        assert_eq!(*failed.lock().unwrap(), vec![id]);

        // No bytes may follow the partial frame.
        assert!(transport.write(&[0x00]).unwrap_err().is_not_connected());
        assert_eq!(failed.lock().unwrap().len(), 1);

        // The connection stays registered until the owner closes it.
        assert_eq!(transport.current(), Some(id));
        assert!(transport.close_connection(id));
        assert!(!transport.is_open());
    }

    #[test]
    fn close_connection_ignores_other_ids() {
        let (listener, transport) = transport();
        let ids = ids(2);
        let _connection = transport.open(ids[1]).unwrap();
        let _accepted = listener.accept().unwrap();

        assert!(!transport.close_connection(ids[0]));
        assert_eq!(transport.current(), Some(ids[1]));
        assert!(transport.write(&[0x00]).is_ok());

        assert!(transport.close_connection(ids[1]));
        assert!(!transport.close_connection(ids[1]));
    }

    #[test]
    fn open_fails_when_nothing_listens() {
        let (listener, transport) = transport();
        drop(listener);
        let err = transport.open(ids(1)[0]).unwrap_err();
        assert!(matches!(err, ClientError::Transport(TransportError::Connect { .. })));
        assert!(!transport.is_open());
    }
}
