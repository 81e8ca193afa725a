//! Client and room tables owned by the router.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::{Notify, mpsc};

use crate::constants::LOBBY;

static SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque id, unique for the lifetime of the process.
pub type SessionId = u64;

pub fn next_session_id() -> SessionId {
    SESSION_ID.fetch_add(1, Ordering::SeqCst)
}

/// Sending side of a client's delivery channel.
pub type DeliverySender = mpsc::Sender<Bytes>;

/// Address of a client row: the slot it occupies plus the session that owns it.
///
/// A key stays valid only while the same session holds the slot, so a stale
/// key never touches a later occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientKey {
    pub slot: usize,
    pub id: SessionId,
}

/// Index into the room table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoomId(usize);

impl RoomId {
    pub const LOBBY: RoomId = RoomId(0);

    pub fn index(&self) -> usize {
        self.0
    }
}

/// A connected client session
#[derive(Debug)]
pub struct ClientEntry {
    pub id: SessionId,
    pub addr: SocketAddr,
    pub nickname: Option<String>,
    pub room: RoomId,

    /// Channel to send lines to this client
    pub tx: DeliverySender,

    /// Wakes the writer so it stops without draining its queue
    pub kill: Arc<Notify>,
}

impl ClientEntry {
    pub fn new(addr: SocketAddr, tx: DeliverySender, kill: Arc<Notify>) -> Self {
        Self {
            id: next_session_id(),
            addr,
            nickname: None,
            room: RoomId::LOBBY,
            tx,
            kill,
        }
    }
}

/// Result of a nickname registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NickOutcome {
    Registered,
    Unchanged,
    Duplicate,
    AlreadyNamed,
    Missing,
}

/// Fixed-capacity slot table of clients with a nickname index.
///
/// New clients take the lowest free slot.
#[derive(Debug)]
pub struct ClientTable {
    slots: Vec<Option<ClientEntry>>,
    nicknames: HashMap<String, ClientKey>,
    len: usize,
}

impl ClientTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            nicknames: HashMap::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Place the entry in the first free slot, or hand it back if there is none.
    pub fn insert(&mut self, entry: ClientEntry) -> Result<ClientKey, ClientEntry> {
        let Some(slot) = self.slots.iter().position(Option::is_none) else {
            return Err(entry);
        };
        let key = ClientKey { slot, id: entry.id };
        self.slots[slot] = Some(entry);
        self.len += 1;
        Ok(key)
    }

    pub fn get(&self, key: ClientKey) -> Option<&ClientEntry> {
        self.slots
            .get(key.slot)
            .and_then(Option::as_ref)
            .filter(|entry| entry.id == key.id)
    }

    pub fn get_mut(&mut self, key: ClientKey) -> Option<&mut ClientEntry> {
        self.slots
            .get_mut(key.slot)
            .and_then(Option::as_mut)
            .filter(|entry| entry.id == key.id)
    }

    /// Free the slot held by `key`. Removing twice is a no-op.
    pub fn remove(&mut self, key: ClientKey) -> Option<ClientEntry> {
        self.get(key)?;
        let entry = self.slots[key.slot].take()?;
        if let Some(ref nickname) = entry.nickname {
            self.nicknames.remove(nickname);
        }
        self.len -= 1;
        Some(entry)
    }

    pub fn set_nickname(&mut self, key: ClientKey, nickname: &str) -> NickOutcome {
        let Some(entry) = self.get(key) else {
            return NickOutcome::Missing;
        };
        match entry.nickname.as_deref() {
            Some(current) if current == nickname => return NickOutcome::Unchanged,
            Some(_) => return NickOutcome::AlreadyNamed,
            None => {}
        }
        if self.nicknames.contains_key(nickname) {
            return NickOutcome::Duplicate;
        }

        if let Some(entry) = self.get_mut(key) {
            entry.nickname = Some(nickname.to_string());
            self.nicknames.insert(nickname.to_string(), key);
            NickOutcome::Registered
        } else {
            NickOutcome::Missing
        }
    }

    pub fn by_nickname(&self, nickname: &str) -> Option<(ClientKey, &ClientEntry)> {
        let key = *self.nicknames.get(nickname)?;
        self.get(key).map(|entry| (key, entry))
    }

    pub fn iter(&self) -> impl Iterator<Item = (ClientKey, &ClientEntry)> {
        self.slots.iter().enumerate().filter_map(|(slot, entry)| {
            entry
                .as_ref()
                .map(|entry| (ClientKey { slot, id: entry.id }, entry))
        })
    }

    pub fn keys(&self) -> Vec<ClientKey> {
        self.iter().map(|(key, _)| key).collect()
    }

    /// Snapshot of the clients currently in `room`.
    pub fn members(&self, room: RoomId) -> Vec<ClientKey> {
        self.iter()
            .filter(|(_, entry)| entry.room == room)
            .map(|(key, _)| key)
            .collect()
    }

    /// Registered nicknames, optionally restricted to one room, sorted.
    pub fn nicknames(&self, room: Option<RoomId>) -> Vec<String> {
        let mut names: Vec<String> = self
            .iter()
            .filter(|(_, entry)| room.is_none_or(|room| entry.room == room))
            .filter_map(|(_, entry)| entry.nickname.clone())
            .collect();
        names.sort();
        names
    }
}

/// Why a room could not be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateRoomError {
    Duplicate,
    Full,
}

/// Why a room could not be removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveRoomError {
    NotFound,
    Lobby,
}

/// Fixed-size room table. Slot 0 always holds the lobby.
#[derive(Debug)]
pub struct RoomTable {
    slots: Vec<Option<String>>,
}

impl RoomTable {
    pub fn new(capacity: usize) -> Self {
        let mut slots: Vec<Option<String>> = (0..capacity.max(1)).map(|_| None).collect();
        slots[RoomId::LOBBY.0] = Some(LOBBY.to_string());
        Self { slots }
    }

    pub fn find(&self, name: &str) -> Option<RoomId> {
        self.slots
            .iter()
            .position(|slot| slot.as_deref() == Some(name))
            .map(RoomId)
    }

    pub fn name(&self, id: RoomId) -> Option<&str> {
        self.slots.get(id.0).and_then(Option::as_deref)
    }

    pub fn create(&mut self, name: &str) -> Result<RoomId, CreateRoomError> {
        if self.find(name).is_some() {
            return Err(CreateRoomError::Duplicate);
        }
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(CreateRoomError::Full)?;
        self.slots[slot] = Some(name.to_string());
        Ok(RoomId(slot))
    }

    /// Deactivate a room. Callers must move its members out first.
    pub fn remove(&mut self, name: &str) -> Result<RoomId, RemoveRoomError> {
        let id = self.find(name).ok_or(RemoveRoomError::NotFound)?;
        if id == RoomId::LOBBY {
            return Err(RemoveRoomError::Lobby);
        }
        self.slots[id.0] = None;
        Ok(id)
    }

    /// Active rooms in slot order, lobby first.
    pub fn active(&self) -> impl Iterator<Item = (RoomId, &str)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, name)| name.as_deref().map(|name| (RoomId(slot), name)))
    }
}

/// Everything the router owns.
#[derive(Debug)]
pub struct ChatState {
    pub clients: ClientTable,
    pub rooms: RoomTable,
}

impl ChatState {
    pub fn new(max_clients: usize, max_rooms: usize) -> Self {
        Self {
            clients: ClientTable::new(max_clients),
            rooms: RoomTable::new(max_rooms),
        }
    }

    pub fn room_name(&self, id: RoomId) -> &str {
        self.rooms.name(id).unwrap_or(LOBBY)
    }

    /// Per-room member counts, in slot order.
    pub fn occupancy(&self) -> Vec<(String, usize)> {
        self.rooms
            .active()
            .map(|(id, name)| (name.to_string(), self.clients.members(id).len()))
            .collect()
    }
}
