//! The router: single owner of the client and room tables.
//!
//! Sessions talk to the router through a [`RouterHandle`]. Commands are
//! processed one at a time, in arrival order, so every table mutation and
//! every fan-out snapshot happens inside one uninterrupted step.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::constants::{LOBBY, Verb};
use crate::message::{ClientRequest, ServerResponse, UserScope};
use crate::protocol::MessageWrite;
use crate::{Error, Result};

use super::event::{DisconnectReason, EventBus, ServerEvent};
use super::state::{
    ChatState, ClientEntry, ClientKey, CreateRoomError, DeliverySender, NickOutcome,
    RemoveRoomError, RoomId,
};

/// Work submitted to the router.
#[derive(Debug)]
pub enum RouterCommand {
    Connect {
        addr: SocketAddr,
        tx: DeliverySender,
        kill: Arc<Notify>,
        reply: oneshot::Sender<Option<ClientKey>>,
    },
    Request {
        key: ClientKey,
        request: ClientRequest,
    },
    Invalid {
        key: ClientKey,
        error: Error,
    },
    Disconnect {
        key: ClientKey,
        reason: DisconnectReason,
    },
    Snapshot {
        reply: oneshot::Sender<StateSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<usize>,
    },
}

/// Point-in-time view of the tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSnapshot {
    pub clients: usize,
    pub nicknames: Vec<String>,
    pub rooms: Vec<(String, usize)>,
}

/// Cheap, cloneable handle for submitting work to the router.
#[derive(Debug, Clone)]
pub struct RouterHandle {
    tx: mpsc::Sender<RouterCommand>,
}

impl RouterHandle {
    /// Claim a client slot. `None` means the client table is full.
    pub async fn connect(
        &self,
        addr: SocketAddr,
        tx: DeliverySender,
        kill: Arc<Notify>,
    ) -> Result<Option<ClientKey>> {
        let (reply, rx) = oneshot::channel();
        self.send(RouterCommand::Connect {
            addr,
            tx,
            kill,
            reply,
        })
        .await?;
        rx.await.map_err(|_| Error::RouterClosed)
    }

    pub async fn submit(&self, key: ClientKey, request: ClientRequest) -> Result<()> {
        self.send(RouterCommand::Request { key, request }).await
    }

    /// Report a line that could not be parsed.
    pub async fn reject(&self, key: ClientKey, error: Error) -> Result<()> {
        self.send(RouterCommand::Invalid { key, error }).await
    }

    pub async fn disconnect(&self, key: ClientKey, reason: DisconnectReason) -> Result<()> {
        self.send(RouterCommand::Disconnect { key, reason }).await
    }

    pub async fn snapshot(&self) -> Result<StateSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(RouterCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| Error::RouterClosed)
    }

    /// Tear down every remaining client and stop the router. Returns how many
    /// clients were still present.
    pub async fn shutdown(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(RouterCommand::Shutdown { reply }).await?;
        rx.await.map_err(|_| Error::RouterClosed)
    }

    async fn send(&self, command: RouterCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| Error::RouterClosed)
    }
}

pub struct Router {
    state: ChatState,
    events: EventBus,
    evicted: Vec<(ClientKey, DisconnectReason)>,
}

impl Router {
    pub fn new(config: &Config, events: EventBus) -> Self {
        Self {
            state: ChatState::new(config.max_clients, config.max_rooms),
            events,
            evicted: Vec::new(),
        }
    }

    pub fn spawn(self, capacity: usize) -> (RouterHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity);
        let task = tokio::spawn(self.run(rx));
        (RouterHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<RouterCommand>) {
        while let Some(command) = rx.recv().await {
            let stop = self.handle(command);
            self.flush_evictions();
            if stop {
                break;
            }
        }
        debug!("Router stopped with {} clients", self.state.clients.len());
    }

    /// Apply one command. Returns `true` when the router should stop.
    fn handle(&mut self, command: RouterCommand) -> bool {
        match command {
            RouterCommand::Connect {
                addr,
                tx,
                kill,
                reply,
            } => {
                self.connect(addr, tx, kill, reply);
            }
            RouterCommand::Request { key, request } => self.dispatch(key, request),
            RouterCommand::Invalid { key, error } => self.reject(key, error),
            RouterCommand::Disconnect { key, reason } => self.teardown(key, reason),
            RouterCommand::Snapshot { reply } => {
                let _ = reply.send(StateSnapshot {
                    clients: self.state.clients.len(),
                    nicknames: self.state.clients.nicknames(None),
                    rooms: self.state.occupancy(),
                });
            }
            RouterCommand::Shutdown { reply } => {
                if !self.state.clients.is_empty() {
                    warn!(
                        "Reclaiming {} clients still connected at shutdown",
                        self.state.clients.len()
                    );
                }
                let keys = self.state.clients.keys();
                let remaining = keys.len();
                for key in keys {
                    self.teardown(key, DisconnectReason::Forced);
                }
                let _ = reply.send(remaining);
                return true;
            }
        }
        false
    }

    fn connect(
        &mut self,
        addr: SocketAddr,
        tx: DeliverySender,
        kill: Arc<Notify>,
        reply: oneshot::Sender<Option<ClientKey>>,
    ) {
        let key = match self.state.clients.insert(ClientEntry::new(addr, tx, kill)) {
            Ok(key) => key,
            Err(_) => {
                let _ = reply.send(None);
                return;
            }
        };

        if reply.send(Some(key)).is_err() {
            self.state.clients.remove(key);
            return;
        }

        info!("Client {} connected from {} (slot {})", key.id, addr, key.slot);
        self.events.emit(ServerEvent::Connected {
            session: key.id,
            slot: key.slot,
            addr,
        });
    }

    fn dispatch(&mut self, key: ClientKey, request: ClientRequest) {
        let Some(entry) = self.state.clients.get(key) else {
            debug!("Dropping request from departed session {}", key.id);
            return;
        };
        let nickname = entry.nickname.clone();
        let room = entry.room;

        let Some(verb) = request.verb() else {
            self.teardown(key, DisconnectReason::Quit);
            return;
        };

        debug!("Session {} sent {}", key.id, verb);
        self.events.emit(ServerEvent::CommandReceived {
            session: key.id,
            verb,
        });

        let nickname = match nickname {
            Some(nickname) => nickname,
            None if verb.requires_nickname() => {
                self.respond(key, &ServerResponse::error("nickname required"));
                return;
            }
            None => String::new(),
        };

        match request {
            ClientRequest::Nick { name } => self.register(key, &name),
            ClientRequest::Msg { text, .. } => self.chat(key, &nickname, room, text),
            ClientRequest::Whisper { target, text } => self.whisper(key, &nickname, &target, text),
            ClientRequest::Add { room: name } => self.add_room(key, &nickname, room, &name),
            ClientRequest::Leave => self.leave(key, &nickname, room),
            ClientRequest::Join { room: name } => self.join(key, &nickname, room, &name),
            ClientRequest::Remove { room: name } => self.remove_room(key, &name),
            ClientRequest::Users { scope } => self.list_users(key, scope),
            ClientRequest::List => self.list_rooms(key),
            ClientRequest::Quit => {}
        }
    }

    fn reject(&mut self, key: ClientKey, error: Error) {
        if self.state.clients.get(key).is_none() {
            return;
        }

        if error.is_protocol() {
            debug!("Protocol error from session {}: {}", key.id, error);
        } else {
            warn!("Unexpected error from session {}: {}", key.id, error);
        }
        self.events.emit(ServerEvent::ProtocolError {
            session: key.id,
            error: error.to_string(),
        });

        let response = match error {
            Error::InvalidNickname { .. } => ServerResponse::NickInvalid,
            other => ServerResponse::error(other),
        };
        self.respond(key, &response);
    }

    fn register(&mut self, key: ClientKey, name: &str) {
        let response = match self.state.clients.set_nickname(key, name) {
            NickOutcome::Registered => {
                info!("Session {} registered as {}", key.id, name);
                self.events.emit(ServerEvent::Registered {
                    session: key.id,
                    nickname: name.to_string(),
                });
                ServerResponse::NickOk
            }
            NickOutcome::Unchanged => ServerResponse::NickOk,
            NickOutcome::Duplicate => ServerResponse::NickDup,
            NickOutcome::AlreadyNamed => ServerResponse::NickInvalid,
            NickOutcome::Missing => return,
        };
        self.respond(key, &response);
    }

    fn chat(&mut self, key: ClientKey, nickname: &str, room: RoomId, text: String) {
        let response = ServerResponse::Chat {
            room: self.state.room_name(room).to_string(),
            from: nickname.to_string(),
            text,
        };
        let recipients = self.broadcast(room, &response, None);
        self.routed(key, Verb::Msg, recipients);
    }

    fn whisper(&mut self, key: ClientKey, nickname: &str, target: &str, text: String) {
        let Some(target_key) = self.state.clients.by_nickname(target).map(|(key, _)| key) else {
            self.respond(
                key,
                &ServerResponse::WhisperNoUser {
                    target: target.to_string(),
                },
            );
            self.routed(key, Verb::Whisper, 0);
            return;
        };

        let response = ServerResponse::Whisper {
            from: nickname.to_string(),
            text,
        };
        let recipients = usize::from(self.send(target_key, response.to_bytes()));
        self.routed(key, Verb::Whisper, recipients);
    }

    fn add_room(&mut self, key: ClientKey, nickname: &str, current: RoomId, name: &str) {
        let response = match self.state.rooms.create(name) {
            Ok(room) => {
                info!("Room {} created by {}", name, nickname);
                self.move_client(key, nickname, current, room);
                ServerResponse::AddOk {
                    room: name.to_string(),
                }
            }
            Err(CreateRoomError::Duplicate) => ServerResponse::AddDup,
            Err(CreateRoomError::Full) => ServerResponse::AddInvalid,
        };
        self.respond(key, &response);
    }

    fn leave(&mut self, key: ClientKey, nickname: &str, current: RoomId) {
        if current == RoomId::LOBBY {
            self.respond(key, &ServerResponse::LeaveAlreadyInLobby);
            return;
        }
        self.move_client(key, nickname, current, RoomId::LOBBY);
        self.respond(key, &ServerResponse::LeaveMoved);
    }

    fn join(&mut self, key: ClientKey, nickname: &str, current: RoomId, name: &str) {
        let room = name.to_string();
        let response = match self.state.rooms.find(name) {
            None => ServerResponse::JoinNoRoom { room },
            Some(target) if target == current => ServerResponse::JoinAlready { room },
            Some(target) => {
                self.move_client(key, nickname, current, target);
                ServerResponse::JoinOk { room }
            }
        };
        self.respond(key, &response);
    }

    fn remove_room(&mut self, key: ClientKey, name: &str) {
        let room = name.to_string();
        let target = match self.state.rooms.remove(name) {
            Ok(target) => target,
            Err(RemoveRoomError::Lobby) => {
                self.respond(key, &ServerResponse::RemoveDenied { room });
                return;
            }
            Err(RemoveRoomError::NotFound) => {
                self.respond(key, &ServerResponse::RemoveNoRoom { room });
                return;
            }
        };

        let lobby = self.state.clients.members(RoomId::LOBBY);
        let displaced = self.state.clients.members(target);
        let mut arrivals = Vec::new();
        for member in &displaced {
            if let Some(entry) = self.state.clients.get_mut(*member) {
                entry.room = RoomId::LOBBY;
                arrivals.extend(entry.nickname.clone());
            }
        }
        info!("Room {} removed, {} members moved to lobby", name, displaced.len());

        let closed = ServerResponse::RoomClosed { room: room.clone() }.to_bytes();
        for member in &displaced {
            if *member != key {
                self.send(*member, closed.clone());
            }
        }
        for nickname in arrivals {
            let notice = ServerResponse::Joined {
                nickname,
                room: LOBBY.to_string(),
            }
            .to_bytes();
            for member in &lobby {
                self.send(*member, notice.clone());
            }
        }

        self.respond(key, &ServerResponse::RemoveOk { room });
    }

    fn list_users(&mut self, key: ClientKey, scope: UserScope) {
        let response = match scope {
            UserScope::All => ServerResponse::Users {
                nicknames: self.state.clients.nicknames(None),
            },
            UserScope::Room(name) => match self.state.rooms.find(&name) {
                Some(room) => ServerResponse::Users {
                    nicknames: self.state.clients.nicknames(Some(room)),
                },
                None => ServerResponse::UsersNoRoom { room: name },
            },
        };
        self.respond(key, &response);
    }

    fn list_rooms(&mut self, key: ClientKey) {
        let names = self
            .state
            .rooms
            .active()
            .map(|(_, name)| name.to_string())
            .collect();
        self.respond(key, &ServerResponse::Rooms { names });
    }

    /// Move a registered client and announce it to both rooms.
    fn move_client(&mut self, key: ClientKey, nickname: &str, from: RoomId, to: RoomId) {
        match self.state.clients.get_mut(key) {
            Some(entry) => entry.room = to,
            None => return,
        }

        let left = ServerResponse::Left {
            nickname: nickname.to_string(),
            room: self.state.room_name(from).to_string(),
        };
        let joined = ServerResponse::Joined {
            nickname: nickname.to_string(),
            room: self.state.room_name(to).to_string(),
        };
        self.broadcast(from, &left, Some(key));
        self.broadcast(to, &joined, Some(key));
    }

    /// Remove a client. Safe to call for a client that is already gone.
    fn teardown(&mut self, key: ClientKey, reason: DisconnectReason) {
        let Some(entry) = self.state.clients.remove(key) else {
            debug!("Session {} already torn down ({:?})", key.id, reason);
            return;
        };

        match reason {
            DisconnectReason::SlowConsumer | DisconnectReason::Forced => entry.kill.notify_one(),
            DisconnectReason::Shutdown => {
                let _ = entry.tx.try_send(ServerResponse::ShuttingDown.to_bytes());
            }
            _ => {}
        }

        if let Some(ref nickname) = entry.nickname {
            let left = ServerResponse::Left {
                nickname: nickname.clone(),
                room: self.state.room_name(entry.room).to_string(),
            };
            self.broadcast(entry.room, &left, None);
        }

        info!(
            "Client {} ({}) from {} disconnected: {:?}",
            entry.id,
            entry.nickname.as_deref().unwrap_or("guest"),
            entry.addr,
            reason
        );
        self.events.emit(ServerEvent::Disconnected {
            session: entry.id,
            addr: entry.addr,
            nickname: entry.nickname.clone(),
            reason,
        });
    }

    fn flush_evictions(&mut self) {
        while let Some((key, reason)) = self.evicted.pop() {
            self.teardown(key, reason);
        }
    }

    fn routed(&self, key: ClientKey, verb: Verb, recipients: usize) {
        debug!("{} from session {} reached {} recipients", verb, key.id, recipients);
        self.events.emit(ServerEvent::Routed {
            session: key.id,
            verb,
            recipients,
        });
    }

    fn respond(&mut self, key: ClientKey, response: &ServerResponse) {
        self.send(key, response.to_bytes());
    }

    /// Deliver to every member of `room` captured at this instant.
    fn broadcast(
        &mut self,
        room: RoomId,
        response: &ServerResponse,
        except: Option<ClientKey>,
    ) -> usize {
        let line = response.to_bytes();
        let mut delivered = 0;
        for member in self.state.clients.members(room) {
            if Some(member) != except && self.send(member, line.clone()) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Queue a line without waiting. A client whose channel is full or closed
    /// is scheduled for teardown once the current command finishes.
    fn send(&mut self, key: ClientKey, line: Bytes) -> bool {
        let Some(entry) = self.state.clients.get(key) else {
            return false;
        };
        let reason = match entry.tx.try_send(line) {
            Ok(()) => return true,
            Err(TrySendError::Full(_)) => DisconnectReason::SlowConsumer,
            Err(TrySendError::Closed(_)) => DisconnectReason::WriterClosed,
        };
        if !self.evicted.iter().any(|(evicted, _)| *evicted == key) {
            warn!("Evicting session {}: {:?}", key.id, reason);
            self.evicted.push((key, reason));
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageRead;
    use std::time::Duration;

    struct TestClient {
        key: ClientKey,
        rx: mpsc::Receiver<Bytes>,
        kill: Arc<Notify>,
    }

    impl TestClient {
        fn lines(&mut self) -> Vec<String> {
            let mut lines = Vec::new();
            while let Ok(line) = self.rx.try_recv() {
                lines.push(String::from_utf8(line.to_vec()).unwrap().trim_end().to_string());
            }
            lines
        }
    }

    fn config(max_clients: usize, max_rooms: usize) -> Config {
        Config {
            max_clients,
            max_rooms,
            ..Config::default()
        }
    }

    fn start(config: Config) -> (RouterHandle, EventBus) {
        let events = EventBus::new();
        let (router, _task) = Router::new(&config, events.clone()).spawn(64);
        (router, events)
    }

    async fn connect_with(router: &RouterHandle, capacity: usize) -> Option<TestClient> {
        let (tx, rx) = mpsc::channel(capacity);
        let kill = Arc::new(Notify::new());
        let addr = "127.0.0.1:40000".parse().unwrap();
        let key = router.connect(addr, tx, kill.clone()).await.unwrap()?;
        Some(TestClient { key, rx, kill })
    }

    async fn connect(router: &RouterHandle) -> TestClient {
        connect_with(router, 32).await.unwrap()
    }

    /// Submit a raw line and wait until the router has processed it.
    async fn send(router: &RouterHandle, client: &TestClient, line: &str) {
        match ClientRequest::read_line(line) {
            Ok(request) => router.submit(client.key, request).await.unwrap(),
            Err(error) => router.reject(client.key, error).await.unwrap(),
        }
        router.snapshot().await.unwrap();
    }

    async fn named(router: &RouterHandle, nickname: &str) -> TestClient {
        let mut client = connect(router).await;
        send(router, &client, &format!("/NICK {nickname}")).await;
        assert_eq!(client.lines(), vec!["OK"]);
        client
    }

    #[tokio::test]
    async fn test_nickname_registration_scenario() {
        let (router, _) = start(Config::default());
        let mut a = connect(&router).await;
        let mut b = connect(&router).await;

        send(&router, &a, "/NICK alice123").await;
        assert_eq!(a.lines(), vec!["OK"]);

        send(&router, &b, "/NICK alice123").await;
        assert_eq!(b.lines(), vec!["DUP"]);

        send(&router, &b, "/NICK bobby99").await;
        assert_eq!(b.lines(), vec!["OK"]);

        send(&router, &a, "/NICK alice123").await;
        assert_eq!(a.lines(), vec!["OK"]);
        send(&router, &a, "/NICK another1").await;
        assert_eq!(a.lines(), vec!["INVALID"]);

        send(&router, &a, "/NICK abc").await;
        assert_eq!(a.lines(), vec!["INVALID"]);
    }

    #[tokio::test]
    async fn test_concurrent_registration_has_single_winner() {
        let (router, _) = start(config(32, 5));
        let mut clients = Vec::new();
        for _ in 0..16 {
            clients.push(connect(&router).await);
        }

        let mut tasks = Vec::new();
        for client in &clients {
            let router = router.clone();
            let key = client.key;
            tasks.push(tokio::spawn(async move {
                let request = ClientRequest::Nick {
                    name: "contested".to_string(),
                };
                router.submit(key, request).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        router.snapshot().await.unwrap();

        let replies: Vec<String> = clients.iter_mut().flat_map(TestClient::lines).collect();
        assert_eq!(replies.iter().filter(|r| *r == "OK").count(), 1);
        assert_eq!(replies.iter().filter(|r| *r == "DUP").count(), 15);
    }

    #[tokio::test]
    async fn test_msg_reaches_only_the_senders_room() {
        let (router, _) = start(Config::default());
        let mut a = named(&router, "alice123").await;
        let mut b = named(&router, "bobby99").await;
        let mut c = named(&router, "charlie7").await;
        let mut guest = connect(&router).await;

        send(&router, &c, "/ADD gamers").await;
        assert_eq!(c.lines(), vec!["/ADD OK gamers"]);
        assert_eq!(a.lines(), vec!["/NOTICE charlie7 left lobby"]);
        b.lines();
        guest.lines();

        send(&router, &a, "/MSG alice123:hello").await;
        assert_eq!(a.lines(), vec!["/MSG [lobby]alice123:hello"]);
        assert_eq!(b.lines(), vec!["/MSG [lobby]alice123:hello"]);
        assert_eq!(guest.lines(), vec!["/MSG [lobby]alice123:hello"]);
        assert!(c.lines().is_empty());
    }

    #[tokio::test]
    async fn test_msg_uses_registered_nickname() {
        let (router, _) = start(Config::default());
        let mut a = named(&router, "alice123").await;

        send(&router, &a, "/MSG mallory1:spoofed").await;
        assert_eq!(a.lines(), vec!["/MSG [lobby]alice123:spoofed"]);
    }

    #[tokio::test]
    async fn test_added_room_isolates_its_creator() {
        let (router, _) = start(Config::default());
        let mut a = named(&router, "alice123").await;
        let mut b = named(&router, "bobby99").await;

        send(&router, &a, "/ADD gamers").await;
        assert_eq!(a.lines(), vec!["/ADD OK gamers"]);
        b.lines();

        send(&router, &a, "/MSG alice123:hi").await;
        assert_eq!(a.lines(), vec!["/MSG [gamers]alice123:hi"]);
        assert!(b.lines().is_empty());
    }

    #[tokio::test]
    async fn test_guest_cannot_chat() {
        let (router, _) = start(Config::default());
        let mut guest = connect(&router).await;
        let mut a = named(&router, "alice123").await;

        send(&router, &guest, "/MSG guest:hello").await;
        assert_eq!(guest.lines(), vec!["/ERROR nickname required"]);
        assert!(a.lines().is_empty());

        send(&router, &guest, "/LIST all").await;
        assert_eq!(guest.lines(), vec!["/LIST lobby"]);
    }

    #[tokio::test]
    async fn test_whisper_targets_one_client() {
        let (router, _) = start(Config::default());
        let mut a = named(&router, "alice123").await;
        let mut b = named(&router, "bobby99").await;
        let mut c = named(&router, "charlie7").await;

        send(&router, &c, "/ADD gamers").await;
        a.lines();
        b.lines();
        c.lines();

        send(&router, &a, "/WHISPER charlie7:psst over here").await;
        assert_eq!(c.lines(), vec!["/WHISPER alice123:psst over here"]);
        assert!(a.lines().is_empty());
        assert!(b.lines().is_empty());

        send(&router, &a, "/WHISPER nobody12:hello?").await;
        assert_eq!(a.lines(), vec!["/WHISPER NOUSER nobody12"]);
        assert!(b.lines().is_empty());
        assert!(c.lines().is_empty());
    }

    #[tokio::test]
    async fn test_add_reports_duplicate_and_capacity() {
        let (router, _) = start(config(8, 3));
        let mut a = named(&router, "alice123").await;
        let mut b = named(&router, "bobby99").await;

        send(&router, &a, "/ADD gamers").await;
        assert_eq!(a.lines(), vec!["/ADD OK gamers"]);
        b.lines();

        send(&router, &b, "/ADD gamers").await;
        assert_eq!(b.lines(), vec!["/ADD DUP"]);

        send(&router, &b, "/ADD readers").await;
        assert_eq!(b.lines(), vec!["/ADD OK readers"]);

        send(&router, &b, "/ADD writers").await;
        assert_eq!(b.lines(), vec!["/ADD INVALID"]);

        send(&router, &b, "/ADD tiny").await;
        assert_eq!(
            b.lines(),
            vec!["/ERROR room name must be 6-99 bytes without spaces"]
        );

        let snapshot = router.snapshot().await.unwrap();
        let rooms: Vec<&str> = snapshot.rooms.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(rooms, vec!["lobby", "gamers", "readers"]);
    }

    #[tokio::test]
    async fn test_join_and_leave_with_notices() {
        let (router, _) = start(Config::default());
        let mut a = named(&router, "alice123").await;
        let mut b = named(&router, "bobby99").await;

        send(&router, &a, "/LEAVE lobby").await;
        assert_eq!(a.lines(), vec!["/LEAVE already in lobby"]);

        send(&router, &a, "/ADD gamers").await;
        a.lines();
        assert_eq!(b.lines(), vec!["/NOTICE alice123 left lobby"]);

        send(&router, &b, "/JOIN nowhere1").await;
        assert_eq!(b.lines(), vec!["/JOIN NOROOM nowhere1"]);

        send(&router, &b, "/JOIN gamers").await;
        assert_eq!(b.lines(), vec!["/JOIN OK gamers"]);
        assert_eq!(a.lines(), vec!["/NOTICE bobby99 joined gamers"]);

        send(&router, &b, "/JOIN gamers").await;
        assert_eq!(b.lines(), vec!["/JOIN already in gamers"]);

        send(&router, &a, "/LEAVE lobby").await;
        assert_eq!(a.lines(), vec!["/LEAVE moved to lobby"]);
        assert_eq!(b.lines(), vec!["/NOTICE alice123 left gamers"]);
    }

    #[tokio::test]
    async fn test_remove_room_moves_members_to_lobby() {
        let (router, _) = start(Config::default());
        let mut a = named(&router, "alice123").await;
        let mut b = named(&router, "bobby99").await;
        let mut c = named(&router, "charlie7").await;

        send(&router, &a, "/ADD gamers").await;
        send(&router, &b, "/JOIN gamers").await;
        a.lines();
        b.lines();
        c.lines();

        send(&router, &c, "/RM lobby").await;
        assert_eq!(c.lines(), vec!["/RM DENIED lobby"]);
        send(&router, &c, "/RM nowhere1").await;
        assert_eq!(c.lines(), vec!["/RM NOROOM nowhere1"]);

        send(&router, &c, "/RM gamers").await;
        assert_eq!(
            c.lines(),
            vec![
                "/NOTICE alice123 joined lobby",
                "/NOTICE bobby99 joined lobby",
                "/RM OK gamers",
            ]
        );
        assert_eq!(a.lines(), vec!["/RM CLOSED gamers"]);
        assert_eq!(b.lines(), vec!["/RM CLOSED gamers"]);

        let snapshot = router.snapshot().await.unwrap();
        assert_eq!(snapshot.rooms, vec![("lobby".to_string(), 3)]);

        send(&router, &a, "/MSG alice123:back").await;
        assert_eq!(c.lines(), vec!["/MSG [lobby]alice123:back"]);
    }

    #[tokio::test]
    async fn test_remove_room_from_inside() {
        let (router, _) = start(Config::default());
        let mut a = named(&router, "alice123").await;
        let mut b = named(&router, "bobby99").await;
        let mut c = named(&router, "charlie7").await;

        send(&router, &a, "/ADD gamers").await;
        send(&router, &b, "/JOIN gamers").await;
        a.lines();
        b.lines();
        c.lines();

        send(&router, &a, "/RM gamers").await;
        assert_eq!(a.lines(), vec!["/RM OK gamers"]);
        assert_eq!(b.lines(), vec!["/RM CLOSED gamers"]);
        assert_eq!(
            c.lines(),
            vec![
                "/NOTICE alice123 joined lobby",
                "/NOTICE bobby99 joined lobby",
            ]
        );

        let snapshot = router.snapshot().await.unwrap();
        assert_eq!(snapshot.rooms, vec![("lobby".to_string(), 3)]);

        // The freed slot can be reused under the same name.
        send(&router, &b, "/ADD gamers").await;
        assert_eq!(b.lines(), vec!["/ADD OK gamers"]);
    }

    #[tokio::test]
    async fn test_user_and_list_listings() {
        let (router, _) = start(Config::default());
        let mut a = named(&router, "alice123").await;
        let _b = named(&router, "bobby99").await;
        let _guest = connect(&router).await;

        send(&router, &a, "/ADD gamers").await;
        a.lines();

        send(&router, &a, "/USER all").await;
        assert_eq!(a.lines(), vec!["/USER alice123 bobby99"]);
        send(&router, &a, "/USER lobby").await;
        assert_eq!(a.lines(), vec!["/USER bobby99"]);
        send(&router, &a, "/USER gamers").await;
        assert_eq!(a.lines(), vec!["/USER alice123"]);
        send(&router, &a, "/USER nowhere1").await;
        assert_eq!(a.lines(), vec!["/USER NOROOM nowhere1"]);
        send(&router, &a, "/LIST all").await;
        assert_eq!(a.lines(), vec!["/LIST lobby gamers"]);
    }

    #[tokio::test]
    async fn test_protocol_errors_stay_with_sender() {
        let (router, events) = start(Config::default());
        let mut events = events.subscribe();
        let mut a = named(&router, "alice123").await;
        let mut b = named(&router, "bobby99").await;

        send(&router, &a, "/SHOUT hello").await;
        assert_eq!(a.lines(), vec!["/ERROR unknown command: SHOUT"]);
        send(&router, &a, "just text").await;
        assert_eq!(a.lines(), vec!["/ERROR unknown command: just text"]);
        assert!(b.lines().is_empty());

        let mut saw_protocol_error = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, ServerEvent::ProtocolError { session, .. } if session == a.key.id) {
                saw_protocol_error = true;
            }
        }
        assert!(saw_protocol_error);
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let (router, _) = start(config(2, 5));
        let a = named(&router, "alice123").await;
        let mut b = named(&router, "bobby99").await;

        router.disconnect(a.key, DisconnectReason::Eof).await.unwrap();
        router
            .disconnect(a.key, DisconnectReason::Shutdown)
            .await
            .unwrap();

        let snapshot = router.snapshot().await.unwrap();
        assert_eq!(snapshot.clients, 1);
        assert_eq!(snapshot.nicknames, vec!["bobby99"]);
        assert_eq!(b.lines(), vec!["/NOTICE alice123 left lobby"]);

        // The freed slot is reusable and the stale key does not reach its new owner.
        let c = connect(&router).await;
        assert_eq!(c.key.slot, a.key.slot);
        router.disconnect(a.key, DisconnectReason::Eof).await.unwrap();
        assert_eq!(router.snapshot().await.unwrap().clients, 2);

        // Nickname is free again.
        let mut c = c;
        send(&router, &c, "/NICK alice123").await;
        assert_eq!(c.lines(), vec!["OK"]);
    }

    #[tokio::test]
    async fn test_full_table_refuses_connection() {
        let (router, _) = start(config(1, 5));
        let _a = connect(&router).await;
        assert!(connect_with(&router, 4).await.is_none());
        assert_eq!(router.snapshot().await.unwrap().clients, 1);
    }

    #[tokio::test]
    async fn test_slow_consumer_is_evicted_without_blocking_others() {
        let (router, _) = start(Config::default());
        let mut a = named(&router, "alice123").await;
        let mut b = named(&router, "bobby99").await;

        let slow = connect_with(&router, 1).await.unwrap();
        send(&router, &slow, "/NICK slowpoke").await;

        send(&router, &a, "/MSG alice123:one").await;
        send(&router, &a, "/MSG alice123:two").await;

        assert_eq!(
            a.lines(),
            vec![
                "/MSG [lobby]alice123:one",
                "/NOTICE slowpoke left lobby",
                "/MSG [lobby]alice123:two",
            ]
        );
        assert_eq!(
            b.lines(),
            vec![
                "/MSG [lobby]alice123:one",
                "/NOTICE slowpoke left lobby",
                "/MSG [lobby]alice123:two",
            ]
        );

        tokio::time::timeout(Duration::from_secs(1), slow.kill.notified())
            .await
            .expect("evicted writer should be woken");
        assert_eq!(router.snapshot().await.unwrap().clients, 2);
    }

    #[tokio::test]
    async fn test_shutdown_reclaims_remaining_clients() {
        let (router, events) = start(Config::default());
        let mut events = events.subscribe();
        let _a = named(&router, "alice123").await;
        let _b = connect(&router).await;

        assert_eq!(router.shutdown().await.unwrap(), 2);
        assert!(matches!(router.snapshot().await, Err(Error::RouterClosed)));

        let mut forced = 0;
        while let Ok(event) = events.try_recv() {
            if let ServerEvent::Disconnected {
                reason: DisconnectReason::Forced,
                ..
            } = event
            {
                forced += 1;
            }
        }
        assert_eq!(forced, 2);
    }
}
