//! Client handle and its I/O worker.
//!
//! One worker thread per client owns the read half of the live connection
//! and the [`ConnectionStateMachine`]. Callers talk to it through a command
//! channel; writes go straight to the shared [`StreamTransport`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use ctrlwire_frame::OutboundMessage;
use ctrlwire_transport::{Connector, Endpoint, TcpConnector};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{ClientError, Result};
use crate::lifecycle::LifecycleSignal;
use crate::registry::{HandlerRegistry, InboundMessage};
use crate::state::{
    Action, ConnectionId, ConnectionState, ConnectionStateMachine, Event, StateChange,
};
use crate::stream::{Connection, StreamTransport};

const WORKER_THREAD_NAME: &str = "ctrlwire-io";

type StateListener = Arc<dyn Fn(&StateChange) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Suspend,
    Resume,
    Shutdown,
    /// A send on this connection failed and its stream was shut down.
    WriteFailed(ConnectionId),
}

impl From<Command> for Event {
    fn from(command: Command) -> Self {
        match command {
            Command::Suspend => Event::Suspend,
            Command::Resume => Event::Resume,
            Command::Shutdown => Event::Shutdown,
            Command::WriteFailed(id) => Event::ErrorOccurred(id),
        }
    }
}

struct Shared<C: Connector> {
    transport: StreamTransport<C>,
    dispatcher: Dispatcher,
    state: Mutex<ConnectionState>,
    listener: Option<StateListener>,
}

impl<C: Connector> Shared<C> {
    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn notify(&self, change: &StateChange) {
        let endpoint = self.transport.endpoint();
        match change {
            StateChange::Connecting { connection } => {
                debug!(%endpoint, %connection, "connecting")
            }
            StateChange::Connected { connection } => {
                info!(%endpoint, %connection, "connected")
            }
            StateChange::Reconnecting { attempt, delay } => {
                info!(%endpoint, attempt, delay_ms = delay.as_millis() as u64, "reconnecting")
            }
            StateChange::Disconnected => info!(%endpoint, "disconnected"),
            StateChange::GaveUp { attempts } => {
                warn!(%endpoint, attempts, "giving up on reconnecting")
            }
            StateChange::Terminated => info!(%endpoint, "client terminated"),
        }
        if let Some(listener) = &self.listener {
            listener(change);
        }
    }
}

/// Persistent connection to a controller.
///
/// Created connected (or connecting) and kept that way: failures and
/// malformed frames close the stream and reconnect with backoff. Dropping
/// the client shuts it down and joins the worker.
pub struct Client<C: Connector = TcpConnector> {
    shared: Arc<Shared<C>>,
    commands: Sender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl Client<TcpConnector> {
    /// Build a TCP client with no handlers and start connecting.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        ClientBuilder::new(config).build()
    }

    pub fn builder(config: ClientConfig) -> ClientBuilder<TcpConnector> {
        ClientBuilder::new(config)
    }
}

impl<C: Connector> Client<C> {
    /// Frame and send `message` with the next sequence number.
    ///
    /// Returns the sequence number used. Fails with a not-connected
    /// transport error while no connection is open. Encoding and
    /// not-connected failures leave the connection state alone; an I/O
    /// failure on the stream is connection-fatal and starts a reconnect.
    pub fn send(&self, message: impl Into<OutboundMessage>) -> Result<u64> {
        self.send_inner(message.into(), None)
    }

    /// Like [`send`](Self::send) with a caller-chosen sequence number.
    pub fn send_with_sequence(
        &self,
        message: impl Into<OutboundMessage>,
        sequence: u64,
    ) -> Result<u64> {
        self.send_inner(message.into(), Some(sequence))
    }

    fn send_inner(&self, message: OutboundMessage, sequence: Option<u64>) -> Result<u64> {
        if self.shared.state() == ConnectionState::Terminated {
            return Err(ClientError::Shutdown);
        }
        self.shared
            .dispatcher
            .send(&self.shared.transport, &message, sequence)
    }

    /// Register or replace the handler for inbound messages with `tag`.
    ///
    /// Handlers run on the I/O worker thread and should not block.
    pub fn on_message<F>(&self, tag: impl Into<i32>, handler: F)
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.shared.dispatcher.on_message(tag, handler);
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Close the connection and stop reconnecting until [`resume`](Self::resume).
    pub fn suspend(&self) {
        let current = self.shared.transport.current();
        self.command(Command::Suspend);
        // Unblock a pending read so the worker sees the command. Only the
        // connection seen above: the worker may already have opened a
        // newer one that the suspend has not reached yet.
        if let Some(id) = current {
            self.shared.transport.close_connection(id);
        }
    }

    /// Reconnect after [`suspend`](Self::suspend) or after giving up.
    /// No effect while connected or connecting.
    pub fn resume(&self) {
        self.command(Command::Resume);
    }

    pub fn handle_lifecycle(&self, signal: LifecycleSignal) {
        match signal {
            LifecycleSignal::EnteredBackground => self.suspend(),
            LifecycleSignal::BecameActive => self.resume(),
        }
    }

    /// Close the connection for good and wait for the worker to exit.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.shared.transport.endpoint()
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!(?command, "worker already stopped");
        }
    }

    fn shutdown_inner(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.command(Command::Shutdown);
        self.shared.transport.close();

        // Called from a handler: the worker exits on its own after the
        // handler returns.
        if worker.thread().id() == thread::current().id() {
            return;
        }
        if worker.join().is_err() {
            warn!(endpoint = %self.endpoint(), "I/O worker panicked");
        }
        self.shared.set_state(ConnectionState::Terminated);
    }
}

impl<C: Connector> Drop for Client<C> {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

impl<C: Connector> fmt::Debug for Client<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", self.endpoint())
            .field("state", &self.state())
            .finish()
    }
}

/// Configures handlers, a state listener and the connector before the
/// worker starts.
pub struct ClientBuilder<C: Connector = TcpConnector> {
    config: ClientConfig,
    connector: C,
    registry: HandlerRegistry,
    listener: Option<StateListener>,
}

impl ClientBuilder<TcpConnector> {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            connector: TcpConnector,
            registry: HandlerRegistry::new(),
            listener: None,
        }
    }
}

impl<C: Connector> ClientBuilder<C> {
    pub fn on_message<F>(mut self, tag: impl Into<i32>, handler: F) -> Self
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.registry.register(tag, handler);
        self
    }

    /// Observe state transitions. Called on the I/O worker thread.
    pub fn on_state_change<F>(mut self, listener: F) -> Self
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Use a different stream factory.
    pub fn connector<C2: Connector>(self, connector: C2) -> ClientBuilder<C2> {
        ClientBuilder {
            config: self.config,
            connector,
            registry: self.registry,
            listener: self.listener,
        }
    }

    /// Spawn the I/O worker and return the client handle.
    pub fn build(self) -> Result<Client<C>> {
        let config = self.config;
        let (commands, receiver) = mpsc::channel();
        let write_failed = commands.clone();
        let shared = Arc::new(Shared {
            transport: StreamTransport::new(
                self.connector,
                config.endpoint.clone(),
                config.connect_timeout,
                config.frame_config(),
            )
            .on_write_failure(move |id| {
                let _ = write_failed.send(Command::WriteFailed(id));
            }),
            dispatcher: Dispatcher::new(self.registry),
            state: Mutex::new(ConnectionState::Disconnected),
            listener: self.listener,
        });

        let worker = Worker {
            shared: Arc::clone(&shared),
            commands: receiver,
            machine: ConnectionStateMachine::new(config.backoff.clone()),
            connection: None,
            reconnect_at: None,
        };
        let start = config.connect_on_start;
        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || worker.run(start))
            .map_err(ClientError::Spawn)?;

        debug!(endpoint = %config.endpoint, start, "client started");
        Ok(Client {
            shared,
            commands,
            worker: Some(handle),
        })
    }
}

impl<C: Connector> fmt::Debug for ClientBuilder<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config", &self.config)
            .field("handlers", &self.registry.len())
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

/// Owns the state machine and the read half; runs on its own thread.
struct Worker<C: Connector> {
    shared: Arc<Shared<C>>,
    commands: Receiver<Command>,
    machine: ConnectionStateMachine,
    connection: Option<Connection<C::Stream>>,
    reconnect_at: Option<Instant>,
}

impl<C: Connector> Worker<C> {
    fn run(mut self, start: bool) {
        if start {
            self.drive(Event::Start);
        }

        loop {
            self.drain_commands();
            match self.machine.state() {
                ConnectionState::Terminated => break,
                ConnectionState::Disconnected => match self.commands.recv() {
                    Ok(command) => self.drive(command.into()),
                    Err(_) => self.drive(Event::Shutdown),
                },
                ConnectionState::Reconnecting => self.wait_backoff(),
                ConnectionState::Connecting => {
                    // Opens complete inside `drive`; a stalled attempt is a failure.
                    if let Some(id) = self.machine.current() {
                        self.drive(Event::ErrorOccurred(id));
                    }
                }
                ConnectionState::Connected => self.read_once(),
            }
        }

        self.connection = None;
        self.shared.transport.close();
        debug!(endpoint = %self.shared.transport.endpoint(), "I/O worker exited");
    }

    fn drain_commands(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(command) => self.drive(command.into()),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.drive(Event::Shutdown);
                    break;
                }
            }
        }
    }

    fn wait_backoff(&mut self) {
        let now = Instant::now();
        let deadline = self.reconnect_at.unwrap_or(now);
        match self
            .commands
            .recv_timeout(deadline.saturating_duration_since(now))
        {
            Ok(command) => self.drive(command.into()),
            Err(RecvTimeoutError::Timeout) => {
                self.reconnect_at = None;
                self.drive(Event::BackoffElapsed);
            }
            Err(RecvTimeoutError::Disconnected) => self.drive(Event::Shutdown),
        }
    }

    fn read_once(&mut self) {
        let Some(connection) = self.connection.as_mut() else {
            if let Some(id) = self.machine.current() {
                self.drive(Event::ErrorOccurred(id));
            }
            return;
        };
        let id = connection.id();

        match connection.read_frame() {
            Ok(wrapper) => {
                let (tag, sequence) = (wrapper.tag, wrapper.sequence);
                if !self.shared.dispatcher.on_frame(wrapper) {
                    debug!(connection = %id, tag, sequence, "no handler; frame dropped");
                }
            }
            Err(err) if err.is_timeout() => {}
            Err(err) => {
                // A suspend or shutdown closes the stream to wake us; apply
                // it before deciding whether this is a real failure.
                self.drain_commands();
                if self.machine.current() != Some(id) {
                    return;
                }
                if err.is_decode_error() {
                    warn!(connection = %id, error = %err, "stream decode failed");
                    self.drive(Event::DecodeFailed(id));
                } else {
                    warn!(connection = %id, error = %err, "stream error");
                    self.drive(Event::ErrorOccurred(id));
                }
            }
        }
    }

    /// Feed `event` and every event its actions produce through the machine.
    fn drive(&mut self, event: Event) {
        let mut pending = VecDeque::from([event]);
        while let Some(event) = pending.pop_front() {
            let actions = self.machine.handle(event);
            self.shared.set_state(self.machine.state());
            for action in actions {
                if let Some(next) = self.perform(action) {
                    pending.push_back(next);
                }
            }
        }
    }

    fn perform(&mut self, action: Action) -> Option<Event> {
        match action {
            Action::Open(id) => match self.shared.transport.open(id) {
                Ok(Some(connection)) => {
                    self.connection = Some(connection);
                    Some(Event::OpenCompleted(id))
                }
                Ok(None) => {
                    warn!(connection = %id, "stale stream still open; closing it");
                    self.shared.transport.close();
                    Some(Event::ErrorOccurred(id))
                }
                Err(err) => {
                    warn!(
                        endpoint = %self.shared.transport.endpoint(),
                        connection = %id,
                        error = %err,
                        "connect failed"
                    );
                    Some(Event::ErrorOccurred(id))
                }
            },
            Action::Close => {
                self.connection = None;
                self.shared.transport.close();
                self.reconnect_at = None;
                None
            }
            Action::Wait(delay) => {
                self.reconnect_at = Some(Instant::now() + delay);
                None
            }
            Action::Notify(change) => {
                self.shared.notify(&change);
                None
            }
        }
    }
}
