//! Per-channel request dispatcher
//!
//! One dispatcher run drives one message channel through
//! `Uninitialized -> AwaitingOrigin -> Ready`. Lines are read in arrival
//! order; each request in `Ready` runs on its own task and replies through a
//! single writer task, so replies leave in completion order tagged with
//! their callback ids.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use custody_core::Origin;

use crate::error::{DaemonError, Result};

use super::types::{parse_inbound, Body, InitParams, Ready, Reply, Request, RESULT_INITED};

/// Outcome of the `init` handshake
pub enum Established<S> {
    Ready(S),
    Redirect { url: String },
}

/// What the dispatcher calls into
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Per-channel state created at initialization
    type Session: Send + Sync + 'static;

    /// Bind an origin for the channel and open its session
    async fn establish(
        &self,
        peer: Option<Origin>,
        init: InitParams,
    ) -> Result<Established<Self::Session>>;

    /// Execute one request
    async fn handle(&self, session: Arc<Self::Session>, request: Request) -> Result<Value>;
}

/// In-flight requests of one channel
pub struct PendingTable {
    entries: Mutex<HashMap<String, Instant>>,
    capacity: usize,
}

impl PendingTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Register `id` as in flight
    pub async fn begin(&self, id: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(id) {
            return Err(DaemonError::DuplicateCallback(id.to_string()));
        }
        if entries.len() >= self.capacity {
            return Err(DaemonError::Busy);
        }
        entries.insert(id.to_string(), Instant::now());
        Ok(())
    }

    /// Remove `id`; false if it was already evicted
    pub async fn complete(&self, id: &str) -> bool {
        match self.entries.lock().await.remove(id) {
            Some(started) => {
                debug!(
                    callback = id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Request completed"
                );
                true
            }
            None => false,
        }
    }

    /// Evict every entry, returning the evicted ids
    pub async fn drain(&self) -> Vec<String> {
        self.entries.lock().await.drain().map(|(id, _)| id).collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

enum SessionState<S> {
    Uninitialized,
    AwaitingOrigin {
        callback: String,
        task: JoinHandle<Result<Established<S>>>,
    },
    Ready(Arc<S>),
}

enum Exit {
    /// Peer closed its side
    PeerClosed,
    /// Vault ended the session
    Terminated,
}

async fn origin_resolved<S>(
    state: &mut SessionState<S>,
) -> std::result::Result<Result<Established<S>>, JoinError> {
    match state {
        SessionState::AwaitingOrigin { task, .. } => task.await,
        _ => std::future::pending().await,
    }
}

async fn send<T: Serialize>(tx: &mpsc::Sender<String>, message: &T) -> bool {
    match serde_json::to_string(message) {
        Ok(line) => tx.send(line).await.is_ok(),
        Err(e) => {
            warn!("Failed to serialize outbound message: {}", e);
            false
        }
    }
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::Receiver<String>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}

/// Drives message channels against a [`RequestHandler`]
pub struct Dispatcher<H: RequestHandler> {
    handler: Arc<H>,
    max_pending: usize,
}

impl<H: RequestHandler> Dispatcher<H> {
    pub fn new(handler: Arc<H>, max_pending: usize) -> Self {
        Self {
            handler,
            max_pending,
        }
    }

    /// Serve one channel until the peer closes it or the session ends
    pub async fn run<S>(&self, stream: S, peer: Option<Origin>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let mut lines = BufReader::new(reader).lines();

        // Replies queue up to the in-flight limit; past that, reading stalls
        let (tx, rx) = mpsc::channel::<String>(self.max_pending.max(1));
        let writer_task = tokio::spawn(write_loop(writer, rx));

        let pending = Arc::new(PendingTable::new(self.max_pending));
        let mut state: SessionState<H::Session> = SessionState::Uninitialized;

        send(&tx, &Ready { ready: true }).await;

        let exit = loop {
            tokio::select! {
                line = lines.next_line() => {
                    let line = match line {
                        Ok(Some(line)) => line,
                        Ok(None) => break Exit::PeerClosed,
                        Err(e) => {
                            warn!("Channel read failed: {}", e);
                            break Exit::PeerClosed;
                        }
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    self.on_line(&line, &mut state, &peer, &pending, &tx).await;
                }

                joined = origin_resolved(&mut state),
                    if matches!(state, SessionState::AwaitingOrigin { .. }) =>
                {
                    let previous = std::mem::replace(&mut state, SessionState::Uninitialized);
                    let callback = match previous {
                        SessionState::AwaitingOrigin { callback, .. } => callback,
                        _ => String::new(),
                    };
                    match joined {
                        Ok(Ok(Established::Ready(session))) => {
                            info!("Session ready");
                            state = SessionState::Ready(Arc::new(session));
                            let inited = Value::String(RESULT_INITED.to_string());
                            send(&tx, &Reply::success(callback, inited)).await;
                        }
                        Ok(Ok(Established::Redirect { url })) => {
                            info!("Caller sent to cookie page");
                            send(&tx, &Reply::redirect(callback, url)).await;
                            break Exit::Terminated;
                        }
                        Ok(Err(e)) => {
                            warn!("Trust establishment failed: {}", e);
                            break Exit::Terminated;
                        }
                        Err(e) => {
                            warn!("Origin binding task failed: {}", e);
                            break Exit::Terminated;
                        }
                    }
                }
            }
        };

        match exit {
            Exit::PeerClosed => {
                let evicted = pending.drain().await;
                if !evicted.is_empty() {
                    debug!(count = evicted.len(), "Evicted in-flight requests");
                }
                writer_task.abort();
                debug!("Channel closed by peer");
            }
            Exit::Terminated => {
                drop(tx);
                match writer_task.await {
                    Ok(Err(e)) => debug!("Final write failed: {}", e),
                    Err(e) => debug!("Writer task failed: {}", e),
                    Ok(Ok(())) => {}
                }
                debug!("Session terminated");
            }
        }

        Ok(())
    }

    async fn on_line(
        &self,
        line: &str,
        state: &mut SessionState<H::Session>,
        peer: &Option<Origin>,
        pending: &Arc<PendingTable>,
        tx: &mpsc::Sender<String>,
    ) {
        let inbound = match parse_inbound(line) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!("Dropping malformed message: {}", e);
                return;
            }
        };

        match state {
            SessionState::Uninitialized => {
                let init = match inbound.body {
                    Body::Init(init) => init,
                    _ => {
                        debug!("Dropping message received before init");
                        return;
                    }
                };
                let Some(callback) = inbound.callback else {
                    warn!("Dropping init without callback id");
                    return;
                };

                let handler = Arc::clone(&self.handler);
                let peer = peer.clone();
                let task = tokio::spawn(async move { handler.establish(peer, init).await });
                *state = SessionState::AwaitingOrigin { callback, task };
            }

            SessionState::AwaitingOrigin { .. } => {
                debug!("Dropping message received while binding origin");
            }

            SessionState::Ready(session) => {
                if matches!(inbound.body, Body::Init(_)) {
                    debug!("Ignoring repeated init");
                    return;
                }
                let Some(callback) = inbound.callback else {
                    warn!("Dropping request without callback id");
                    return;
                };

                let request = match inbound.body {
                    Body::Request(request) => request,
                    Body::Unknown(tag) => {
                        let err = DaemonError::UnknownOperation(tag);
                        send(tx, &Reply::failure(callback, &err)).await;
                        return;
                    }
                    Body::Invalid { tag, reason } => {
                        let reason = match tag {
                            Some(tag) => format!("{}: {}", tag, reason),
                            None => reason,
                        };
                        let err = DaemonError::InvalidRequest(reason);
                        send(tx, &Reply::failure(callback, &err)).await;
                        return;
                    }
                    Body::Init(_) => return,
                };

                if let Err(e) = pending.begin(&callback).await {
                    send(tx, &Reply::failure(callback, &e)).await;
                    return;
                }

                let handler = Arc::clone(&self.handler);
                let session = Arc::clone(session);
                let pending = Arc::clone(pending);
                let tx = tx.clone();
                tokio::spawn(async move {
                    let outcome = handler.handle(session, request).await;
                    if !pending.complete(&callback).await {
                        debug!(callback = %callback, "Discarding result of evicted request");
                        return;
                    }
                    let reply = match outcome {
                        Ok(result) => Reply::success(callback, result),
                        Err(e) => {
                            debug!(code = e.code(), "Request failed: {}", e);
                            Reply::failure(callback, &e)
                        }
                    };
                    if !send(&tx, &reply).await {
                        debug!("Reply dropped, channel closed");
                    }
                });
            }
        }
    }
}
