//! The chat server engine.
//!
//! A single router task owns the client and room tables. Sessions read lines
//! from their sockets and submit them to the router, which answers by queuing
//! lines on each recipient's delivery channel.

mod acceptor;
mod event;
mod router;
mod session;
mod state;

pub use acceptor::ChatServer;
pub use event::{DisconnectReason, EventBus, ServerEvent};
pub use router::{Router, RouterCommand, RouterHandle, StateSnapshot};
pub use state::{ClientKey, RoomId, SessionId};
