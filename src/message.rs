//! Chat message types.
//!
//! Requests are parsed exactly once, at the session boundary, into a
//! [`ClientRequest`]. Everything the router sends back is a [`ServerResponse`].

use std::fmt;

use bytes::BufMut;

use crate::constants::{LOBBY, QUIT_TOKEN, SERVER_FULL, Verb};
use crate::protocol::{
    MessageRead, MessageWrite, split_payload, validate_nickname, validate_room_name,
};
use crate::{Error, Result};

/// Scope of a `USER` listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserScope {
    All,
    Room(String),
}

/// Request sent by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    Quit,
    Nick {
        name: String,
    },
    /// Room broadcast. `claimed` is whatever name the client put in front of
    /// the colon; routing always uses the registered nickname.
    Msg {
        claimed: String,
        text: String,
    },
    Whisper {
        target: String,
        text: String,
    },
    Add {
        room: String,
    },
    Leave,
    Join {
        room: String,
    },
    Remove {
        room: String,
    },
    Users {
        scope: UserScope,
    },
    List,
}

impl ClientRequest {
    pub fn verb(&self) -> Option<Verb> {
        match self {
            ClientRequest::Quit => None,
            ClientRequest::Nick { .. } => Some(Verb::Nick),
            ClientRequest::Msg { .. } => Some(Verb::Msg),
            ClientRequest::Whisper { .. } => Some(Verb::Whisper),
            ClientRequest::Add { .. } => Some(Verb::Add),
            ClientRequest::Leave => Some(Verb::Leave),
            ClientRequest::Join { .. } => Some(Verb::Join),
            ClientRequest::Remove { .. } => Some(Verb::Rm),
            ClientRequest::Users { .. } => Some(Verb::User),
            ClientRequest::List => Some(Verb::List),
        }
    }
}

fn required<'a>(verb: Verb, arg: Option<&'a str>) -> Result<&'a str> {
    match arg.map(str::trim) {
        Some(arg) if !arg.is_empty() => Ok(arg),
        _ => Err(Error::MissingArgument {
            verb: verb.as_str(),
        }),
    }
}

fn single_token(verb: Verb, arg: Option<&str>) -> Result<String> {
    let arg = required(verb, arg)?;
    if arg.chars().any(char::is_whitespace) {
        return Err(Error::InvalidArgument {
            verb: verb.as_str(),
            value: arg.to_string(),
        });
    }
    Ok(arg.to_string())
}

impl MessageRead for ClientRequest {
    fn read_line(line: &str) -> Result<Self> {
        if line == QUIT_TOKEN {
            return Ok(ClientRequest::Quit);
        }

        let Some(command) = line.strip_prefix('/') else {
            return Err(Error::UnknownVerb(line.to_string()));
        };

        let (verb, arg) = match command.split_once(' ') {
            Some((verb, arg)) => (verb, Some(arg)),
            None => (command, None),
        };
        let verb = Verb::parse(verb)?;

        match verb {
            Verb::Nick => {
                let name = single_token(verb, arg)?;
                validate_nickname(&name)?;
                Ok(ClientRequest::Nick { name })
            }
            Verb::Msg => {
                let (claimed, text) = split_payload(required(verb, arg)?)?;
                Ok(ClientRequest::Msg {
                    claimed: claimed.to_string(),
                    text: text.to_string(),
                })
            }
            Verb::Whisper => {
                let (target, text) = split_payload(required(verb, arg)?)?;
                Ok(ClientRequest::Whisper {
                    target: target.to_string(),
                    text: text.to_string(),
                })
            }
            Verb::Add => {
                let room = single_token(verb, arg)?;
                validate_room_name(&room)?;
                Ok(ClientRequest::Add { room })
            }
            Verb::Leave => {
                let room = single_token(verb, arg)?;
                if room != LOBBY {
                    return Err(Error::InvalidArgument {
                        verb: verb.as_str(),
                        value: room,
                    });
                }
                Ok(ClientRequest::Leave)
            }
            Verb::Join => Ok(ClientRequest::Join {
                room: single_token(verb, arg)?,
            }),
            Verb::Rm => Ok(ClientRequest::Remove {
                room: single_token(verb, arg)?,
            }),
            Verb::User => {
                let scope = match single_token(verb, arg)?.as_str() {
                    "all" => UserScope::All,
                    room => UserScope::Room(room.to_string()),
                };
                Ok(ClientRequest::Users { scope })
            }
            Verb::List => {
                let scope = single_token(verb, arg)?;
                if scope != "all" {
                    return Err(Error::InvalidArgument {
                        verb: verb.as_str(),
                        value: scope,
                    });
                }
                Ok(ClientRequest::List)
            }
        }
    }
}

/// Line sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerResponse {
    NickOk,
    NickDup,
    NickInvalid,
    Chat {
        room: String,
        from: String,
        text: String,
    },
    Whisper {
        from: String,
        text: String,
    },
    WhisperNoUser {
        target: String,
    },
    AddOk {
        room: String,
    },
    AddDup,
    AddInvalid,
    LeaveAlreadyInLobby,
    LeaveMoved,
    JoinOk {
        room: String,
    },
    JoinNoRoom {
        room: String,
    },
    JoinAlready {
        room: String,
    },
    Joined {
        nickname: String,
        room: String,
    },
    Left {
        nickname: String,
        room: String,
    },
    RemoveOk {
        room: String,
    },
    RemoveNoRoom {
        room: String,
    },
    RemoveDenied {
        room: String,
    },
    RoomClosed {
        room: String,
    },
    Users {
        nicknames: Vec<String>,
    },
    UsersNoRoom {
        room: String,
    },
    Rooms {
        names: Vec<String>,
    },
    Error {
        reason: String,
    },
    ShuttingDown,
    ServerFull,
}

impl ServerResponse {
    pub fn error(reason: impl fmt::Display) -> Self {
        ServerResponse::Error {
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for ServerResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerResponse::NickOk => f.write_str("OK"),
            ServerResponse::NickDup => f.write_str("DUP"),
            ServerResponse::NickInvalid => f.write_str("INVALID"),
            ServerResponse::Chat { room, from, text } => write!(f, "/MSG [{room}]{from}:{text}"),
            ServerResponse::Whisper { from, text } => write!(f, "/WHISPER {from}:{text}"),
            ServerResponse::WhisperNoUser { target } => write!(f, "/WHISPER NOUSER {target}"),
            ServerResponse::AddOk { room } => write!(f, "/ADD OK {room}"),
            ServerResponse::AddDup => f.write_str("/ADD DUP"),
            ServerResponse::AddInvalid => f.write_str("/ADD INVALID"),
            ServerResponse::LeaveAlreadyInLobby => f.write_str("/LEAVE already in lobby"),
            ServerResponse::LeaveMoved => f.write_str("/LEAVE moved to lobby"),
            ServerResponse::JoinOk { room } => write!(f, "/JOIN OK {room}"),
            ServerResponse::JoinNoRoom { room } => write!(f, "/JOIN NOROOM {room}"),
            ServerResponse::JoinAlready { room } => write!(f, "/JOIN already in {room}"),
            ServerResponse::Joined { nickname, room } => {
                write!(f, "/NOTICE {nickname} joined {room}")
            }
            ServerResponse::Left { nickname, room } => write!(f, "/NOTICE {nickname} left {room}"),
            ServerResponse::RemoveOk { room } => write!(f, "/RM OK {room}"),
            ServerResponse::RemoveNoRoom { room } => write!(f, "/RM NOROOM {room}"),
            ServerResponse::RemoveDenied { room } => write!(f, "/RM DENIED {room}"),
            ServerResponse::RoomClosed { room } => write!(f, "/RM CLOSED {room}"),
            ServerResponse::Users { nicknames } => {
                f.write_str("/USER")?;
                for nickname in nicknames {
                    write!(f, " {nickname}")?;
                }
                Ok(())
            }
            ServerResponse::UsersNoRoom { room } => write!(f, "/USER NOROOM {room}"),
            ServerResponse::Rooms { names } => {
                f.write_str("/LIST")?;
                for name in names {
                    write!(f, " {name}")?;
                }
                Ok(())
            }
            ServerResponse::Error { reason } => write!(f, "/ERROR {reason}"),
            ServerResponse::ShuttingDown => f.write_str("/NOTICE server shutting down"),
            ServerResponse::ServerFull => f.write_str(SERVER_FULL),
        }
    }
}

impl MessageWrite for ServerResponse {
    fn write_payload<B: BufMut>(&self, buf: &mut B) {
        buf.put_slice(self.to_string().as_bytes());
    }
}
