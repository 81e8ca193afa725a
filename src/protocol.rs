//! Protocol primitives for reading and writing chat lines.
//!
//! Every application message is a single `\n`-terminated UTF-8 line. Requests
//! start with `/VERB`; the only exception is the bare quit token.

use bytes::{BufMut, Bytes, BytesMut};

use crate::constants::{NICKNAME_MAX_LEN, NICKNAME_MIN_LEN, ROOM_NAME_MAX_LEN, ROOM_NAME_MIN_LEN};
use crate::{Error, Result};

/// Trait for parsing a complete message out of one decoded line.
pub trait MessageRead: Sized {
    fn read_line(line: &str) -> Result<Self>;
}

/// Trait for writing a complete message as one wire line.
pub trait MessageWrite {
    /// Write the message text (without the line terminator).
    fn write_payload<B: BufMut>(&self, buf: &mut B);

    /// Write the message followed by `\n`.
    fn write_line<B: BufMut>(&self, buf: &mut B) {
        self.write_payload(buf);
        buf.put_u8(b'\n');
    }

    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.write_line(&mut buf);
        buf.freeze()
    }
}

/// Incremental splitter for `\n`-terminated lines with a length ceiling.
///
/// An oversize line is reported once as [`Error::LineTooLong`] and the rest of
/// it is skipped up to the next terminator.
#[derive(Debug)]
pub struct LineDecoder {
    max_len: usize,
    discarding: bool,
}

impl LineDecoder {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            discarding: false,
        }
    }

    /// Take the next complete line out of `buf`, if there is one.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>> {
        loop {
            let newline = buf.iter().position(|b| *b == b'\n');

            if self.discarding {
                match newline {
                    Some(pos) => {
                        let _ = buf.split_to(pos + 1);
                        self.discarding = false;
                        continue;
                    }
                    None => {
                        buf.clear();
                        return Ok(None);
                    }
                }
            }

            return match newline {
                Some(pos) => {
                    let mut line = buf.split_to(pos + 1);
                    line.truncate(pos);
                    if line.last() == Some(&b'\r') {
                        line.truncate(pos - 1);
                    }
                    if line.len() > self.max_len {
                        return Err(Error::LineTooLong { max: self.max_len });
                    }
                    Ok(Some(String::from_utf8(line.to_vec())?))
                }
                // A trailing '\r' may still be the start of a CRLF terminator.
                None if buf.len() > self.max_len + usize::from(buf.last() == Some(&b'\r')) => {
                    buf.clear();
                    self.discarding = true;
                    Err(Error::LineTooLong { max: self.max_len })
                }
                None => Ok(None),
            };
        }
    }
}

/// Check a nickname against the registration rules.
pub fn validate_nickname(name: &str) -> Result<()> {
    let len = name.len();
    if !(NICKNAME_MIN_LEN..=NICKNAME_MAX_LEN).contains(&len)
        || name.contains(':')
        || name.chars().any(char::is_whitespace)
    {
        return Err(Error::InvalidNickname {
            min: NICKNAME_MIN_LEN,
            max: NICKNAME_MAX_LEN,
        });
    }
    Ok(())
}

/// Check a user-created room name.
pub fn validate_room_name(name: &str) -> Result<()> {
    let len = name.len();
    if !(ROOM_NAME_MIN_LEN..=ROOM_NAME_MAX_LEN).contains(&len)
        || name.chars().any(char::is_whitespace)
    {
        return Err(Error::InvalidRoomName {
            min: ROOM_NAME_MIN_LEN,
            max: ROOM_NAME_MAX_LEN,
        });
    }
    Ok(())
}

/// Split a `<name>:<text>` payload at the first colon.
pub fn split_payload(payload: &str) -> Result<(&str, &str)> {
    match payload.split_once(':') {
        Some((name, text)) if !name.is_empty() => Ok((name, text)),
        _ => Err(Error::MalformedPayload),
    }
}
