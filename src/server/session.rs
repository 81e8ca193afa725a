//! Client connection handling.
//!
//! Each session owns its socket. The read half stays in the session task and
//! feeds parsed requests to the router; the write half moves into a writer
//! task that drains the client's delivery channel.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::message::ClientRequest;
use crate::protocol::{LineDecoder, MessageRead};

use super::event::DisconnectReason;
use super::router::RouterHandle;
use super::state::ClientKey;

const READ_BUFFER_SIZE: usize = 8192;

/// Aborts the writer if the session is dropped before it finishes.
struct WriterGuard(JoinHandle<()>);

impl Drop for WriterGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct Session {
    key: ClientKey,
    router: RouterHandle,
    shutdown: watch::Receiver<bool>,
    decoder: LineDecoder,
    buf: BytesMut,
    /// How long a departing session waits for queued lines to reach the socket
    drain_timeout: Duration,
}

impl Session {
    pub fn new(
        key: ClientKey,
        router: RouterHandle,
        shutdown: watch::Receiver<bool>,
        max_line_len: usize,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            key,
            router,
            shutdown,
            decoder: LineDecoder::new(max_line_len),
            buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            drain_timeout,
        }
    }

    /// Drive the connection until it closes, then release it through the router.
    pub async fn run(
        mut self,
        stream: TcpStream,
        rx: mpsc::Receiver<Bytes>,
        kill: Arc<Notify>,
    ) -> DisconnectReason {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Session {}: set_nodelay failed: {}", self.key.id, e);
        }
        let (mut read_half, write_half) = stream.into_split();
        let mut writer = WriterGuard(tokio::spawn(write_loop(write_half, rx, kill)));

        let (reason, writer_done) = self.read_loop(&mut read_half, &mut writer.0).await;
        debug!("Session {} reader finished: {:?}", self.key.id, reason);

        // Teardown is idempotent on the router side, so this is safe even when
        // the router already evicted us.
        let _ = self.router.disconnect(self.key, reason).await;

        if !writer_done
            && tokio::time::timeout(self.drain_timeout, &mut writer.0)
                .await
                .is_err()
        {
            debug!("Session {}: writer did not drain in time", self.key.id);
        }
        reason
    }

    /// Returns why reading stopped and whether the writer has already exited.
    async fn read_loop(
        &mut self,
        read_half: &mut OwnedReadHalf,
        writer: &mut JoinHandle<()>,
    ) -> (DisconnectReason, bool) {
        if *self.shutdown.borrow() {
            return (DisconnectReason::Shutdown, false);
        }

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => return (DisconnectReason::Shutdown, false),
                _ = &mut *writer => return (DisconnectReason::WriterClosed, true),
                read = read_half.read_buf(&mut self.buf) => match read {
                    Ok(0) => return (DisconnectReason::Eof, false),
                    Ok(_) => {
                        if let Some(reason) = self.process_lines().await {
                            return (reason, false);
                        }
                    }
                    Err(e) => {
                        debug!("Session {}: read failed: {}", self.key.id, e);
                        return (DisconnectReason::ReadError, false);
                    }
                },
            }
        }
    }

    /// Hand every complete buffered line to the router, in order.
    async fn process_lines(&mut self) -> Option<DisconnectReason> {
        loop {
            let submitted = match self.decoder.decode(&mut self.buf) {
                Ok(Some(line)) => match ClientRequest::read_line(&line) {
                    Ok(ClientRequest::Quit) => return Some(DisconnectReason::Quit),
                    Ok(request) => self.router.submit(self.key, request).await,
                    Err(error) => self.router.reject(self.key, error).await,
                },
                Ok(None) => return None,
                Err(error) => self.router.reject(self.key, error).await,
            };

            if let Err(e) = submitted {
                warn!("Session {}: {}", self.key.id, e);
                return Some(DisconnectReason::RouterClosed);
            }
        }
    }
}

/// Write every delivered line verbatim until the channel closes or the router
/// asks the writer to stop.
async fn write_loop(
    mut write_half: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Bytes>,
    kill: Arc<Notify>,
) {
    loop {
        let line = tokio::select! {
            biased;
            _ = kill.notified() => break,
            line = rx.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };

        tokio::select! {
            biased;
            _ = kill.notified() => break,
            written = write_half.write_all(&line) => {
                if let Err(e) = written {
                    debug!("Write failed: {}", e);
                    break;
                }
            }
        }
    }

    let _ = write_half.shutdown().await;
}
