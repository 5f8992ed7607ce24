//! Connection state machine.
//!
//! Pure and I/O free: [`ConnectionStateMachine::handle`] takes an [`Event`]
//! and returns the [`Action`]s the I/O worker must perform, in order.
//!
//! ```text
//! Disconnected ──Start/Resume──▶ Connecting ──OpenCompleted──▶ Connected
//!      ▲                           │    ▲                         │
//!      │ Suspend / GaveUp   Error  │    │ BackoffElapsed    Error │
//!      │                           ▼    │                         │
//!      └──────────────────────── Reconnecting ◀───────────────────┘
//!
//! any ──Shutdown──▶ Terminated
//! ```

use std::fmt;
use std::time::Duration;

use tracing::trace;

use crate::backoff::{Backoff, BackoffConfig};

/// Identifies one Connection. A fresh id is issued for every open attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Terminated,
}

impl ConnectionState {
    pub fn name(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Initial open request.
    Start,
    OpenCompleted(ConnectionId),
    /// Connect failure or I/O error on the given connection.
    ErrorOccurred(ConnectionId),
    /// Truncated, malformed or ended stream on the given connection.
    DecodeFailed(ConnectionId),
    BackoffElapsed,
    Suspend,
    Resume,
    Shutdown,
}

/// Side effects requested by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Open a fresh connection with this id.
    Open(ConnectionId),
    /// Close and discard the current connection.
    Close,
    /// Wait this long, then deliver [`Event::BackoffElapsed`].
    Wait(Duration),
    /// Report a state change to the host application.
    Notify(StateChange),
}

/// State transitions visible to the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    Connecting { connection: ConnectionId },
    Connected { connection: ConnectionId },
    Reconnecting { attempt: u32, delay: Duration },
    Disconnected,
    GaveUp { attempts: u32 },
    Terminated,
}

#[derive(Debug)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    current: Option<ConnectionId>,
    next_id: u64,
    backoff: Backoff,
}

impl ConnectionStateMachine {
    pub fn new(backoff: BackoffConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            current: None,
            next_id: 0,
            backoff: Backoff::new(backoff),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Id of the live connection, if any.
    pub fn current(&self) -> Option<ConnectionId> {
        self.current
    }

    /// Reconnect attempts made since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.backoff.attempt()
    }

    fn is_current(&self, id: ConnectionId) -> bool {
        self.current == Some(id)
    }

    /// Apply an event. Events that do not apply to the current state, or
    /// that name a connection other than the current one, are ignored.
    pub fn handle(&mut self, event: Event) -> Vec<Action> {
        use ConnectionState::*;

        match (self.state, event) {
            (Terminated, _) => Vec::new(),
            (state, Event::Shutdown) => {
                self.state = Terminated;
                self.current = None;
                let mut actions = Vec::with_capacity(2);
                if state != Disconnected {
                    actions.push(Action::Close);
                }
                actions.push(Action::Notify(StateChange::Terminated));
                actions
            }
            (Disconnected, Event::Start | Event::Resume) => {
                self.backoff.reset();
                self.begin_connect()
            }
            (Connecting, Event::OpenCompleted(id)) if self.is_current(id) => {
                self.state = Connected;
                self.backoff.reset();
                vec![Action::Notify(StateChange::Connected { connection: id })]
            }
            (Connecting | Connected, Event::ErrorOccurred(id) | Event::DecodeFailed(id))
                if self.is_current(id) =>
            {
                self.begin_reconnect()
            }
            (Reconnecting, Event::BackoffElapsed) => self.begin_connect(),
            (Connecting | Connected | Reconnecting, Event::Suspend) => {
                self.state = Disconnected;
                self.current = None;
                vec![Action::Close, Action::Notify(StateChange::Disconnected)]
            }
            (state, event) => {
                trace!(%state, ?event, "ignoring event");
                Vec::new()
            }
        }
    }

    fn begin_connect(&mut self) -> Vec<Action> {
        self.next_id += 1;
        let id = ConnectionId::new(self.next_id);
        self.current = Some(id);
        self.state = ConnectionState::Connecting;
        vec![
            Action::Notify(StateChange::Connecting { connection: id }),
            Action::Open(id),
        ]
    }

    fn begin_reconnect(&mut self) -> Vec<Action> {
        self.current = None;
        match self.backoff.next_delay() {
            Some(delay) => {
                self.state = ConnectionState::Reconnecting;
                vec![
                    Action::Close,
                    Action::Notify(StateChange::Reconnecting {
                        attempt: self.backoff.attempt(),
                        delay,
                    }),
                    Action::Wait(delay),
                ]
            }
            None => {
                self.state = ConnectionState::Disconnected;
                vec![
                    Action::Close,
                    Action::Notify(StateChange::GaveUp {
                        attempts: self.backoff.attempt(),
                    }),
                ]
            }
        }
    }
}
