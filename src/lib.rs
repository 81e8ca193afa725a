//! # linechat
//!
//! A line-oriented multi-room chat server.
//!
//! Clients connect over TCP, pick a nickname with `/NICK`, and talk in rooms.
//! Every connection starts in the permanent `lobby` room. The crate exposes
//! the request parser and response renderer alongside the server engine so
//! both can be used and tested on their own.

pub mod config;
pub mod constants;
pub mod error;
pub mod message;
pub mod protocol;
pub mod server;

pub use config::Config;
pub use error::{Error, Result};
pub use protocol::{MessageRead, MessageWrite};
pub use server::ChatServer;
