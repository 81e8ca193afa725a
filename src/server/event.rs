//! Structured events published by the server.
//!
//! The engine only publishes; turning events into log lines is left to
//! whoever subscribes.

use std::net::SocketAddr;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::constants::Verb;

use super::state::SessionId;

const EVENT_CAPACITY: usize = 1024;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// Peer closed the connection
    Eof,
    /// Reading from the socket failed
    ReadError,
    /// Client sent the quit token
    Quit,
    /// The socket writer stopped, usually after a write error
    WriterClosed,
    /// Delivery channel stayed full
    SlowConsumer,
    /// Server is shutting down
    Shutdown,
    /// Reclaimed after the shutdown deadline
    Forced,
    /// The router stopped while the session was still reading
    RouterClosed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    Listening {
        addr: SocketAddr,
    },
    Connected {
        session: SessionId,
        slot: usize,
        addr: SocketAddr,
    },
    Rejected {
        addr: SocketAddr,
        reason: String,
    },
    AcceptFailed {
        error: String,
    },
    Registered {
        session: SessionId,
        nickname: String,
    },
    CommandReceived {
        session: SessionId,
        verb: Verb,
    },
    Routed {
        session: SessionId,
        verb: Verb,
        recipients: usize,
    },
    ProtocolError {
        session: SessionId,
        error: String,
    },
    Disconnected {
        session: SessionId,
        addr: SocketAddr,
        nickname: Option<String>,
        reason: DisconnectReason,
    },
    ShutdownStarted,
    ShutdownComplete {
        forced: usize,
    },
}

/// Fan-out point for [`ServerEvent`]s. Publishing never blocks and events are
/// dropped when nobody listens.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ServerEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn emit(&self, event: ServerEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
