//! Protocol constants and enumerations.

use crate::{Error, Result};

/// Port the server listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 5100;

/// Address the server binds to unless configured otherwise.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Name of the permanent default room.
pub const LOBBY: &str = "lobby";

/// Nickname length bounds, in bytes.
pub const NICKNAME_MIN_LEN: usize = 6;
pub const NICKNAME_MAX_LEN: usize = 50;

/// User-created room name length bounds, in bytes.
pub const ROOM_NAME_MIN_LEN: usize = 6;
pub const ROOM_NAME_MAX_LEN: usize = 99;

/// Concurrent rooms, lobby included.
pub const DEFAULT_MAX_ROOMS: usize = 5;

/// Concurrent client sessions.
pub const DEFAULT_MAX_CLIENTS: usize = 64;

/// Largest accepted inbound line, terminator excluded.
pub const DEFAULT_MAX_LINE_LEN: usize = 4096;

/// Outbound lines buffered per client before it is considered stuck.
pub const DEFAULT_DELIVERY_CAPACITY: usize = 256;

/// Commands buffered in front of the router.
pub const DEFAULT_ROUTER_CAPACITY: usize = 1024;

/// How long shutdown waits for sessions before reclaiming them.
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 3000;

/// The line a client sends to close its session.
pub const QUIT_TOKEN: &str = "q";

/// Notice sent to a connection refused for lack of a free slot.
pub const SERVER_FULL: &str = "server full";

/// Request verbs understood by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verb {
    Nick,
    Msg,
    Whisper,
    Add,
    Leave,
    Join,
    Rm,
    User,
    List,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Nick => "NICK",
            Verb::Msg => "MSG",
            Verb::Whisper => "WHISPER",
            Verb::Add => "ADD",
            Verb::Leave => "LEAVE",
            Verb::Join => "JOIN",
            Verb::Rm => "RM",
            Verb::User => "USER",
            Verb::List => "LIST",
        }
    }

    /// Verbs are case-sensitive.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "NICK" => Ok(Verb::Nick),
            "MSG" => Ok(Verb::Msg),
            "WHISPER" => Ok(Verb::Whisper),
            "ADD" => Ok(Verb::Add),
            "LEAVE" => Ok(Verb::Leave),
            "JOIN" => Ok(Verb::Join),
            "RM" => Ok(Verb::Rm),
            "USER" => Ok(Verb::User),
            "LIST" => Ok(Verb::List),
            _ => Err(Error::UnknownVerb(s.to_string())),
        }
    }

    /// Whether the verb is refused until the client owns a nickname.
    pub fn requires_nickname(&self) -> bool {
        !matches!(self, Verb::Nick | Verb::User | Verb::List)
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
