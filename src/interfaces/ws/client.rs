//! Per-connection protocol handler
//!
//! Owns one physical WebSocket: an inbound loop decodes commands and an
//! outbound loop drains the bounded frame queue. Authentication is lazy: the
//! first well-formed command's token is resolved to a durable user tag, and
//! every forwarded command carries the tag instead of the transport token.
//! Trackable commands record a session stage and spawn a watcher task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::domain::{
    Authenticator, CommandGateway, LogRepository, TransactionRepository,
};
use crate::notifications::pool::{
    next_client_id, ClientHandle, ClientId, PoolHandle, SubscriptionCell, SubscriptionKind,
};
use crate::session::store::{SessionStage, SessionStore};
use crate::session::watchers::{
    log_watch, meter_watch, start_watch, stop_watch, WatcherConfig, WatcherContext,
};
use crate::shared::shutdown::ShutdownSignal;

use super::protocol::{Command, UserRequest, WsResponse, KEEPALIVE};

/// Collaborators and policy shared by every connection.
#[derive(Clone)]
pub struct ClientDeps {
    pub pool: PoolHandle,
    pub sessions: Arc<SessionStore>,
    pub transactions: Arc<dyn TransactionRepository>,
    pub logs: Option<Arc<dyn LogRepository>>,
    pub authenticator: Arc<dyn Authenticator>,
    pub gateway: Arc<dyn CommandGateway>,
    pub watcher_cfg: WatcherConfig,
    /// Upper bound on token resolution.
    pub auth_timeout: Duration,
    /// Capacity of the per-connection outbound queue.
    pub queue_capacity: usize,
}

/// Authentication state of one connection. Monotonic: never goes back.
enum AuthState {
    Unauthenticated,
    Authenticated { user_tag: String },
}

/// Protocol state of one connection, independent of the socket itself.
pub struct ClientSession {
    id: ClientId,
    deps: ClientDeps,
    out: mpsc::Sender<WsResponse>,
    subscription: SubscriptionCell,
    /// Transaction ids this connection is streaming meter values for,
    /// mapped to the listener key (user tag).
    listeners: Arc<DashMap<i64, String>>,
    /// Epoch of the current log watch; bumped on every spawn so stale
    /// instances exit even across rapid subscription toggles.
    log_epoch: Arc<AtomicU64>,
    closed: ShutdownSignal,
    auth: AuthState,
}

impl ClientSession {
    pub fn new(deps: ClientDeps) -> (Self, mpsc::Receiver<WsResponse>) {
        let (out, rx) = mpsc::channel(deps.queue_capacity.max(1));
        let session = Self {
            id: next_client_id(),
            deps,
            out,
            subscription: SubscriptionCell::default(),
            listeners: Arc::new(DashMap::new()),
            log_epoch: Arc::new(AtomicU64::new(0)),
            closed: ShutdownSignal::new(),
            auth: AuthState::Unauthenticated,
        };
        (session, rx)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Handle under which the pool knows this connection.
    pub fn handle(&self) -> ClientHandle {
        ClientHandle {
            id: self.id,
            subscription: self.subscription.clone(),
            sender: self.out.clone(),
        }
    }

    pub fn closed_signal(&self) -> ShutdownSignal {
        self.closed.clone()
    }

    /// Process one inbound text payload.
    pub async fn handle_text(&mut self, text: &str) {
        let payload = text.trim();
        if payload == KEEPALIVE {
            return;
        }

        let mut request: UserRequest = match serde_json::from_str(payload) {
            Ok(request) => request,
            Err(e) => {
                debug!(client_id = self.id, error = %e, "Malformed frame");
                self.send(WsResponse::error(format!("malformed request: {e}")))
                    .await;
                return;
            }
        };

        let user_tag = match &self.auth {
            AuthState::Authenticated { user_tag } => user_tag.clone(),
            AuthState::Unauthenticated => match self.authenticate(&request.token).await {
                Some(tag) => tag,
                None => return,
            },
        };

        // Business identity replaces transport identity from here on.
        request.token = user_tag.clone();

        if let Err(e) = self.deps.gateway.execute(&request).await {
            self.send(WsResponse::error(e.to_string())).await;
            return;
        }

        self.dispatch(request, user_tag).await;
    }

    /// Resolve the token of the first well-formed command. Failure leaves the
    /// connection unauthenticated so a later frame can retry.
    async fn authenticate(&mut self, token: &str) -> Option<String> {
        match timeout(
            self.deps.auth_timeout,
            self.deps.authenticator.authenticate_by_token(token),
        )
        .await
        {
            Ok(Ok(user)) => {
                info!(client_id = self.id, user_tag = %user.tag, "Client authenticated");
                let tag = user.tag.clone();
                self.auth = AuthState::Authenticated { user_tag: tag.clone() };
                Some(tag)
            }
            Ok(Err(e)) => {
                warn!(client_id = self.id, error = %e, "Authentication failed");
                self.send(WsResponse::error(e.to_string())).await;
                None
            }
            Err(_) => {
                warn!(client_id = self.id, "Authentication timed out");
                self.send(WsResponse::error("authentication timed out")).await;
                None
            }
        }
    }

    async fn dispatch(&mut self, request: UserRequest, user_tag: String) {
        let Some(command) = Command::parse(&request.command) else {
            self.send(WsResponse::error(format!("unknown command: {}", request.command)))
                .await;
            return;
        };

        debug!(client_id = self.id, command = command.as_str(), "Dispatching command");

        match command {
            Command::StartTransaction => {
                self.deps
                    .sessions
                    .save(&user_tag, SessionStage::Start, request.transaction_id);
                // The record timestamp is T0 for the watch.
                let since = self
                    .deps
                    .sessions
                    .get(&user_tag)
                    .map(|r| r.timestamp)
                    .unwrap_or_else(chrono::Utc::now);
                tokio::spawn(start_watch(self.watcher_ctx(user_tag), since));
            }
            Command::StopTransaction => {
                self.deps
                    .sessions
                    .save(&user_tag, SessionStage::Stop, request.transaction_id);
                tokio::spawn(stop_watch(self.watcher_ctx(user_tag), request.transaction_id));
            }
            Command::CheckStatus => self.resume(user_tag).await,
            Command::ListenTransaction => {
                self.deps
                    .sessions
                    .save(&user_tag, SessionStage::Listen, request.transaction_id);
                self.start_listening(request.transaction_id, user_tag);
            }
            Command::StopListenTransaction => {
                // Cooperative: the watcher notices on its next tick.
                self.listeners.remove(&request.transaction_id);
            }
            Command::ListenLog => {
                let previous = self.subscription.get();
                self.subscription.set(SubscriptionKind::LogEvent);
                if previous != SubscriptionKind::LogEvent {
                    if let Some(logs) = self.deps.logs.clone() {
                        // Bumping the epoch retires any instance still
                        // draining its last tick.
                        let generation = self.log_epoch.fetch_add(1, Ordering::SeqCst) + 1;
                        tokio::spawn(log_watch(
                            self.watcher_ctx(user_tag),
                            logs,
                            self.subscription.clone(),
                            self.log_epoch.clone(),
                            generation,
                        ));
                    }
                }
            }
            Command::ListenChargePoints => {
                self.subscription.set(SubscriptionKind::ChargePointEvent);
            }
            Command::PingConnection => {
                self.send(WsResponse::pong()).await;
            }
        }
    }

    /// Re-derive the watcher for the user's last recorded operation without
    /// re-issuing the original business command.
    async fn resume(&mut self, user_tag: String) {
        let Some(record) = self.deps.sessions.get(&user_tag) else {
            self.send(WsResponse::error("no active operation")).await;
            return;
        };

        info!(
            client_id = self.id,
            user_tag = %user_tag,
            stage = record.stage.as_str(),
            transaction_id = record.transaction_id,
            "Resuming operation"
        );

        match record.stage {
            SessionStage::Start => {
                tokio::spawn(start_watch(self.watcher_ctx(user_tag), record.timestamp));
            }
            SessionStage::Stop => {
                tokio::spawn(stop_watch(self.watcher_ctx(user_tag), record.transaction_id));
            }
            SessionStage::Listen => {
                self.start_listening(record.transaction_id, user_tag);
            }
        }
    }

    /// Spawn a meter watcher unless one is already registered for this
    /// transaction on this connection (idempotent subscribe).
    fn start_listening(&mut self, transaction_id: i64, user_tag: String) {
        if self.listeners.contains_key(&transaction_id) {
            debug!(client_id = self.id, transaction_id, "Already listening");
            return;
        }
        self.listeners.insert(transaction_id, user_tag.clone());
        tokio::spawn(meter_watch(
            self.watcher_ctx(user_tag),
            transaction_id,
            self.listeners.clone(),
        ));
    }

    fn watcher_ctx(&self, user_tag: String) -> WatcherContext {
        WatcherContext {
            repo: self.deps.transactions.clone(),
            out: self.out.clone(),
            sessions: self.deps.sessions.clone(),
            user_tag,
            closed: self.closed.clone(),
            cfg: self.deps.watcher_cfg.clone(),
        }
    }

    async fn send(&self, frame: WsResponse) {
        // A closed queue means the outbound loop is gone; the inbound loop
        // observes the closed signal shortly after.
        let _ = self.out.send(frame).await;
    }

    /// Tear the connection down. `clean` is true when the peer sent a close
    /// frame; only then is the session record discarded.
    pub async fn close(&mut self, clean: bool) {
        self.closed.trigger();
        self.deps.pool.unregister(self.id).await;
        if clean {
            if let AuthState::Authenticated { user_tag } = &self.auth {
                self.deps.sessions.clear(user_tag);
            }
        }
        self.listeners.clear();
    }
}

/// Drive one upgraded WebSocket until it closes.
pub async fn handle_socket(socket: WebSocket, deps: ClientDeps) {
    let pool = deps.pool.clone();
    let (mut session, mut out_rx) = ClientSession::new(deps);
    let client_id = session.id();
    info!(client_id, "Notification client connected");

    pool.register(session.handle()).await;

    let (mut ws_tx, mut ws_rx) = socket.split();
    let closed = session.closed_signal();

    // Outbound loop: drain the queue in order, one frame per write.
    let writer_closed = closed.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = out_rx.recv() => {
                    let Some(frame) = frame else { break };
                    match serde_json::to_string(&frame) {
                        Ok(json) => {
                            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                                debug!(client_id, "Write failed, closing connection");
                                break;
                            }
                        }
                        Err(e) => error!(client_id, error = %e, "Failed to serialize frame"),
                    }
                }
                _ = writer_closed.notified().wait() => break,
            }
        }
        writer_closed.trigger();
    });

    // Inbound loop.
    let mut clean = false;
    loop {
        tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => session.handle_text(&text).await,
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    // Pongs are queued by the transport on read.
                }
                Some(Ok(Message::Close(_))) => {
                    debug!(client_id, "Client sent close");
                    clean = true;
                    break;
                }
                Some(Ok(Message::Binary(_))) => {
                    debug!(client_id, "Binary frame ignored");
                }
                Some(Err(e)) => {
                    warn!(client_id, error = %e, "WebSocket read error");
                    break;
                }
                None => break,
            },
            _ = closed.notified().wait() => break,
        }
    }

    session.close(clean).await;
    drop(session);
    let _ = writer.await;
    info!(client_id, "Notification client disconnected");
}

// ── Tests ──────────────────────────────────────────────────────
