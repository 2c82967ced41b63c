//! Client pool - registry of live notification connections
//!
//! A single actor task owns the membership map; registration, removal and
//! fan-out are serialized through its command channel, so no caller needs a
//! lock and membership changes never interleave with a fan-out iteration.
//!
//! Fan-out is best effort: members have bounded outbound queues and a frame
//! addressed to a full queue is dropped with a warning. A closed queue evicts
//! the member. The pool loop itself never blocks on a slow client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::interfaces::ws::protocol::WsResponse;

/// Capacity of the pool's command channel.
const POOL_COMMAND_CAPACITY: usize = 128;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of one physical connection.
pub type ClientId = u64;

/// Allocate a fresh client id.
pub fn next_client_id() -> ClientId {
    NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Kind of outbound events a connection currently wants delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    Broadcast,
    LogEvent,
    ChargePointEvent,
}

impl SubscriptionKind {
    fn to_u8(self) -> u8 {
        match self {
            Self::Broadcast => 0,
            Self::LogEvent => 1,
            Self::ChargePointEvent => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Broadcast,
            1 => Self::LogEvent,
            _ => Self::ChargePointEvent,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Broadcast => "broadcast",
            Self::LogEvent => "log-event",
            Self::ChargePointEvent => "charge-point-event",
        }
    }
}

impl Default for SubscriptionKind {
    fn default() -> Self {
        Self::ChargePointEvent
    }
}

/// Shared, atomically updatable subscription flag.
///
/// Written by the connection handler on `ListenLog`/`ListenChargePoints`,
/// read by the pool during fan-out and by the log watcher at each tick.
#[derive(Debug, Clone)]
pub struct SubscriptionCell(Arc<AtomicU8>);

impl SubscriptionCell {
    pub fn new(kind: SubscriptionKind) -> Self {
        Self(Arc::new(AtomicU8::new(kind.to_u8())))
    }

    pub fn get(&self) -> SubscriptionKind {
        SubscriptionKind::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, kind: SubscriptionKind) {
        self.0.store(kind.to_u8(), Ordering::SeqCst);
    }
}

impl Default for SubscriptionCell {
    fn default() -> Self {
        Self::new(SubscriptionKind::default())
    }
}

/// Handle under which a connection is known to the pool.
#[derive(Debug)]
pub struct ClientHandle {
    pub id: ClientId,
    pub subscription: SubscriptionCell,
    /// Bounded outbound queue of the connection.
    pub sender: mpsc::Sender<WsResponse>,
}

enum PoolCommand {
    Register(ClientHandle, oneshot::Sender<()>),
    Unregister(ClientId),
    Broadcast(WsResponse),
    LogEvent(WsResponse),
    ChpEvent(WsResponse),
    Count(oneshot::Sender<usize>),
}

/// Cloneable handle to the pool actor.
#[derive(Clone)]
pub struct PoolHandle {
    tx: mpsc::Sender<PoolCommand>,
}

impl PoolHandle {
    /// Register a connection. Resolves only after the pool has queued the
    /// connected acknowledgement, so a caller that waits here before reading
    /// inbound frames cannot respond ahead of the ack.
    pub async fn register(&self, handle: ClientHandle) {
        let (done, confirmed) = oneshot::channel();
        self.send(PoolCommand::Register(handle, done)).await;
        let _ = confirmed.await;
    }

    pub async fn unregister(&self, id: ClientId) {
        self.send(PoolCommand::Unregister(id)).await;
    }

    pub async fn send_broadcast(&self, frame: WsResponse) {
        self.send(PoolCommand::Broadcast(frame)).await;
    }

    pub async fn send_log_event(&self, frame: WsResponse) {
        self.send(PoolCommand::LogEvent(frame)).await;
    }

    pub async fn send_chp_event(&self, frame: WsResponse) {
        self.send(PoolCommand::ChpEvent(frame)).await;
    }

    /// Number of currently registered connections.
    pub async fn count(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        self.send(PoolCommand::Count(tx)).await;
        rx.await.unwrap_or(0)
    }

    async fn send(&self, command: PoolCommand) {
        if self.tx.send(command).await.is_err() {
            warn!("Client pool is stopped, command dropped");
        }
    }
}

/// The pool actor. Owns the membership map exclusively.
pub struct ClientPool {
    members: HashMap<ClientId, ClientHandle>,
}

impl ClientPool {
    /// Spawn the pool loop and return a handle to it.
    pub fn spawn() -> PoolHandle {
        let (tx, rx) = mpsc::channel(POOL_COMMAND_CAPACITY);
        let pool = Self {
            members: HashMap::new(),
        };
        tokio::spawn(pool.run(rx));
        PoolHandle { tx }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<PoolCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                PoolCommand::Register(handle, done) => {
                    self.register(handle);
                    let _ = done.send(());
                }
                PoolCommand::Unregister(id) => self.unregister(id),
                PoolCommand::Broadcast(frame) => {
                    self.fan_out(SubscriptionKind::Broadcast, frame)
                }
                PoolCommand::LogEvent(frame) => self.fan_out(SubscriptionKind::LogEvent, frame),
                PoolCommand::ChpEvent(frame) => {
                    self.fan_out(SubscriptionKind::ChargePointEvent, frame)
                }
                PoolCommand::Count(reply) => {
                    let _ = reply.send(self.members.len());
                }
            }
        }
        debug!("Client pool loop finished");
    }

    fn register(&mut self, handle: ClientHandle) {
        let id = handle.id;
        // The new member learns it is registered before any other frame.
        if let Err(e) = handle.sender.try_send(WsResponse::connected()) {
            warn!(client_id = id, error = %e, "Could not deliver connected ack");
            if matches!(e, TrySendError::Closed(_)) {
                return;
            }
        }
        self.members.insert(id, handle);
        info!(client_id = id, total = self.members.len(), "Client registered");
    }

    fn unregister(&mut self, id: ClientId) {
        if self.members.remove(&id).is_some() {
            info!(client_id = id, total = self.members.len(), "Client unregistered");
        } else {
            // Double-unregister indicates a bug upstream but is harmless here.
            warn!(client_id = id, "Attempted to unregister unknown client");
        }
    }

    fn fan_out(&mut self, kind: SubscriptionKind, frame: WsResponse) {
        let mut dead = Vec::new();

        for (id, member) in &self.members {
            if member.subscription.get() != kind {
                continue;
            }
            match member.sender.try_send(frame.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(
                        client_id = id,
                        kind = kind.as_str(),
                        "Outbound queue full, frame dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => dead.push(*id),
            }
        }

        for id in dead {
            self.members.remove(&id);
            warn!(client_id = id, "Evicted client with closed outbound queue");
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::ws::protocol::{Stage, Status};

    fn member(
        kind: SubscriptionKind,
        capacity: usize,
    ) -> (ClientId, ClientHandle, mpsc::Receiver<WsResponse>) {
        let (tx, rx) = mpsc::channel(capacity);
        let id = next_client_id();
        let handle = ClientHandle {
            id,
            subscription: SubscriptionCell::new(kind),
            sender: tx,
        };
        (id, handle, rx)
    }

    #[tokio::test]
    async fn register_yields_connected_ack_first() {
        let pool = ClientPool::spawn();
        let (_, handle, mut rx) = member(SubscriptionKind::Broadcast, 8);

        pool.register(handle).await;
        pool.send_broadcast(WsResponse::new(Status::Value, Stage::Info, "one")).await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first, WsResponse::connected());
        let second = rx.recv().await.unwrap();
        assert_eq!(second.info, "one");
    }

    #[tokio::test]
    async fn register_resolves_after_ack_is_queued() {
        let pool = ClientPool::spawn();
        let (_, handle, mut rx) = member(SubscriptionKind::Broadcast, 8);

        pool.register(handle).await;
        // No further await: the ack is already sitting in the queue.
        assert_eq!(rx.try_recv().unwrap(), WsResponse::connected());
    }

    #[tokio::test]
    async fn fan_out_respects_subscription_kind() {
        let pool = ClientPool::spawn();
        let (_, log_member, mut log_rx) = member(SubscriptionKind::LogEvent, 8);
        let (_, chp_member, mut chp_rx) = member(SubscriptionKind::ChargePointEvent, 8);
        pool.register(log_member).await;
        pool.register(chp_member).await;
        // Drain acks.
        assert_eq!(log_rx.recv().await.unwrap(), WsResponse::connected());
        assert_eq!(chp_rx.recv().await.unwrap(), WsResponse::connected());

        pool.send_log_event(WsResponse::error("log")).await;
        pool.send_chp_event(WsResponse::error("chp")).await;
        // Serialize behind both sends.
        assert_eq!(pool.count().await, 2);

        assert_eq!(log_rx.try_recv().unwrap().info, "log");
        assert!(log_rx.try_recv().is_err());
        assert_eq!(chp_rx.try_recv().unwrap().info, "chp");
        assert!(chp_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn frames_per_connection_stay_in_order() {
        let pool = ClientPool::spawn();
        let (_, handle, mut rx) = member(SubscriptionKind::Broadcast, 16);
        pool.register(handle).await;
        assert_eq!(rx.recv().await.unwrap(), WsResponse::connected());

        for i in 0..10 {
            pool.send_broadcast(WsResponse::error(format!("frame-{i}"))).await;
        }
        pool.count().await;

        for i in 0..10 {
            assert_eq!(rx.try_recv().unwrap().info, format!("frame-{i}"));
        }
    }

    #[tokio::test]
    async fn slow_client_does_not_stall_fan_out() {
        let pool = ClientPool::spawn();
        // Capacity 1 plus the connected ack makes this member full immediately.
        let (_, slow, _slow_rx) = member(SubscriptionKind::Broadcast, 1);
        let (_, fast, mut fast_rx) = member(SubscriptionKind::Broadcast, 16);
        pool.register(slow).await;
        pool.register(fast).await;
        assert_eq!(fast_rx.recv().await.unwrap(), WsResponse::connected());

        for i in 0..5 {
            pool.send_broadcast(WsResponse::error(format!("frame-{i}"))).await;
        }
        // The pool is still responsive and the fast member got everything.
        assert_eq!(pool.count().await, 2);
        for i in 0..5 {
            assert_eq!(fast_rx.try_recv().unwrap().info, format!("frame-{i}"));
        }
    }

    #[tokio::test]
    async fn closed_queue_evicts_member() {
        let pool = ClientPool::spawn();
        let (_, handle, rx) = member(SubscriptionKind::Broadcast, 8);
        pool.register(handle).await;
        assert_eq!(pool.count().await, 1);

        drop(rx);
        pool.send_broadcast(WsResponse::error("into the void")).await;
        assert_eq!(pool.count().await, 0);
    }

    #[tokio::test]
    async fn unregister_twice_is_a_noop() {
        let pool = ClientPool::spawn();
        let (id, handle, _rx) = member(SubscriptionKind::ChargePointEvent, 8);
        pool.register(handle).await;
        pool.unregister(id).await;
        pool.unregister(id).await;
        assert_eq!(pool.count().await, 0);
    }

    #[test]
    fn subscription_cell_roundtrip() {
        let cell = SubscriptionCell::default();
        assert_eq!(cell.get(), SubscriptionKind::ChargePointEvent);
        cell.set(SubscriptionKind::LogEvent);
        assert_eq!(cell.get(), SubscriptionKind::LogEvent);
        cell.set(SubscriptionKind::Broadcast);
        assert_eq!(cell.get(), SubscriptionKind::Broadcast);
    }
}
