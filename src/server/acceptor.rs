//! Listener, admission control and shutdown.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, broadcast, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::config::Config;
use crate::constants::SERVER_FULL;
use crate::message::ServerResponse;
use crate::protocol::MessageWrite;

use super::event::{DisconnectReason, EventBus, ServerEvent};
use super::router::{Router, RouterHandle};
use super::session::Session;

/// Pause after a failed accept so a persistent error does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A bound chat server, ready to accept clients.
pub struct ChatServer {
    listener: TcpListener,
    config: Config,
    events: EventBus,
}

impl ChatServer {
    pub async fn bind(config: Config) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(config.bind_addr()).await?;
        Ok(Self {
            listener,
            config,
            events: EventBus::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Accept clients until `signal` resolves, then shut down.
    ///
    /// Shutdown stops accepting, tells every session to close, and waits up to
    /// the configured grace period. Sessions still open after that are aborted
    /// and their slots reclaimed by the router.
    pub async fn run_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let ChatServer {
            listener,
            config,
            events,
        } = self;

        let addr = listener.local_addr()?;
        info!("Chat server listening on {}", addr);
        events.emit(ServerEvent::Listening { addr });

        let (router, router_task) =
            Router::new(&config, events.clone()).spawn(config.router_capacity);
        let (shutdown, _) = watch::channel(false);

        let mut acceptor = Acceptor {
            router,
            config,
            events,
            shutdown,
            sessions: JoinSet::new(),
        };

        tokio::pin!(signal);
        loop {
            tokio::select! {
                _ = &mut signal => {
                    info!("Shutdown requested");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if !acceptor.admit(stream, peer).await {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        acceptor.events.emit(ServerEvent::AcceptFailed {
                            error: e.to_string(),
                        });
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(joined) = acceptor.sessions.join_next(), if !acceptor.sessions.is_empty() => {
                    if let Err(e) = joined {
                        error!("Session task failed: {}", e);
                    }
                }
            }
        }

        let Acceptor {
            router,
            config,
            events,
            shutdown,
            mut sessions,
        } = acceptor;

        info!("Shutting down, {} sessions open", sessions.len());
        events.emit(ServerEvent::ShutdownStarted);
        let _ = shutdown.send(true);

        let grace = config.shutdown_timeout();
        let drained = tokio::time::timeout(grace, async {
            while sessions.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                "{} sessions still open after {:?}, aborting",
                sessions.len(),
                grace
            );
            sessions.abort_all();
            while sessions.join_next().await.is_some() {}
        }

        let forced = match router.shutdown().await {
            Ok(forced) => forced,
            Err(e) => {
                error!("Router stopped early: {}", e);
                0
            }
        };
        drop(router);
        if let Err(e) = router_task.await {
            error!("Router task failed: {}", e);
        }
        drop(listener);

        info!("Shutdown complete ({} clients reclaimed)", forced);
        events.emit(ServerEvent::ShutdownComplete { forced });
        Ok(())
    }
}

struct Acceptor {
    router: RouterHandle,
    config: Config,
    events: EventBus,
    shutdown: watch::Sender<bool>,
    sessions: JoinSet<DisconnectReason>,
}

impl Acceptor {
    /// Register a fresh connection with the router and start its session.
    /// Returns false once the router is gone.
    async fn admit(&mut self, stream: TcpStream, peer: SocketAddr) -> bool {
        let (tx, rx) = mpsc::channel(self.config.delivery_capacity);
        let kill = Arc::new(Notify::new());

        match self.router.connect(peer, tx, kill.clone()).await {
            Ok(Some(key)) => {
                let session = Session::new(
                    key,
                    self.router.clone(),
                    self.shutdown.subscribe(),
                    self.config.max_line_len,
                    self.config.shutdown_timeout(),
                );
                self.sessions.spawn(session.run(stream, rx, kill));
                true
            }
            Ok(None) => {
                warn!("Rejecting {}: {}", peer, SERVER_FULL);
                self.events.emit(ServerEvent::Rejected {
                    addr: peer,
                    reason: SERVER_FULL.to_string(),
                });
                tokio::spawn(refuse(stream));
                true
            }
            Err(e) => {
                error!("Router unavailable: {}", e);
                false
            }
        }
    }
}

async fn refuse(mut stream: TcpStream) {
    if let Err(e) = stream.write_all(&ServerResponse::ServerFull.to_bytes()).await {
        debug!("Could not notify rejected client: {}", e);
    }
    let _ = stream.shutdown().await;
}
