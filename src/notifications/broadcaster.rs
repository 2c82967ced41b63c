//! Log broadcaster
//!
//! A single long-lived task, independent of any connection, that polls the
//! log repository from a moving watermark and pushes every new entry into the
//! pool's log-event channel. Entries that carry a charge point identifier
//! additionally produce a charge-point event. Runs until shutdown; without a
//! log repository it idles rather than erroring.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info};

use crate::domain::LogRepository;
use crate::interfaces::ws::protocol::WsResponse;
use crate::notifications::pool::PoolHandle;
use crate::shared::shutdown::ShutdownSignal;

pub struct Broadcaster {
    pool: PoolHandle,
    logs: Option<Arc<dyn LogRepository>>,
    poll: Duration,
    repo_timeout: Duration,
}

impl Broadcaster {
    pub fn new(
        pool: PoolHandle,
        logs: Option<Arc<dyn LogRepository>>,
        poll: Duration,
        repo_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            logs,
            poll,
            repo_timeout,
        }
    }

    /// Spawn the broadcaster loop.
    pub fn start(self, shutdown: ShutdownSignal) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, shutdown: ShutdownSignal) {
        let Some(logs) = self.logs else {
            info!("No log repository configured, broadcaster idles until shutdown");
            shutdown.wait().await;
            return;
        };

        info!(poll_ms = self.poll.as_millis() as u64, "Broadcaster started");
        let mut watermark = Utc::now();
        let mut ticker = interval(self.poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.notified().wait() => {
                    info!("Broadcaster shutting down");
                    return;
                }
            }

            let entries = match timeout(self.repo_timeout, logs.read_log_after(watermark)).await {
                Ok(Ok(entries)) => entries,
                Ok(Err(e)) => {
                    debug!(error = %e, "Broadcaster log poll failed");
                    continue;
                }
                Err(_) => {
                    debug!("Broadcaster log poll timed out");
                    continue;
                }
            };

            for entry in entries {
                if entry.timestamp > watermark {
                    watermark = entry.timestamp;
                }
                self.pool.send_log_event(WsResponse::log_event(&entry)).await;
                if entry.has_charge_point() {
                    self.pool
                        .send_chp_event(WsResponse::charge_point_event(&entry))
                        .await;
                }
            }
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    use crate::domain::LogEntry;
    use crate::infrastructure::memory::MemoryLogRepository;
    use crate::interfaces::ws::protocol::{Stage, WsResponse};
    use crate::notifications::pool::{
        next_client_id, ClientHandle, ClientPool, SubscriptionCell, SubscriptionKind,
    };

    async fn subscribed_member(
        pool: &PoolHandle,
        kind: SubscriptionKind,
    ) -> mpsc::Receiver<WsResponse> {
        let (tx, mut rx) = mpsc::channel(16);
        pool.register(ClientHandle {
            id: next_client_id(),
            subscription: SubscriptionCell::new(kind),
            sender: tx,
        })
        .await;
        assert_eq!(rx.recv().await.unwrap(), WsResponse::connected());
        rx
    }

    #[tokio::test]
    async fn fans_out_log_and_charge_point_events() {
        let pool = ClientPool::spawn();
        let mut log_rx = subscribed_member(&pool, SubscriptionKind::LogEvent).await;
        let mut chp_rx = subscribed_member(&pool, SubscriptionKind::ChargePointEvent).await;

        let logs = Arc::new(MemoryLogRepository::new());
        let shutdown = ShutdownSignal::new();
        let handle = Broadcaster::new(
            pool.clone(),
            Some(logs.clone()),
            Duration::from_millis(20),
            Duration::from_secs(1),
        )
        .start(shutdown.clone());

        tokio::time::sleep(Duration::from_millis(10)).await;
        let mut entry = LogEntry::for_charge_point("CP001", "connector 2 now Charging");
        entry.connector_id = Some(2);
        entry.connector_status = Some("Charging".into());
        logs.push(entry);
        logs.push(LogEntry::new("billing cycle finished"));

        let log_frame = timeout(Duration::from_secs(2), log_rx.recv()).await.unwrap().unwrap();
        assert_eq!(log_frame.stage, Stage::LogEvent);
        assert_eq!(log_frame.info, "connector 2 now Charging");

        let second = timeout(Duration::from_secs(2), log_rx.recv()).await.unwrap().unwrap();
        assert_eq!(second.info, "billing cycle finished");

        // Only the entry with a charge point id becomes a charge-point event.
        let chp_frame = timeout(Duration::from_secs(2), chp_rx.recv()).await.unwrap().unwrap();
        assert_eq!(chp_frame.stage, Stage::ChargePointEvent);
        assert_eq!(chp_frame.connector_id, Some(2));
        assert_eq!(chp_frame.connector_status.as_deref(), Some("Charging"));
        assert!(chp_rx.try_recv().is_err());

        shutdown.trigger();
        timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn entries_are_delivered_once() {
        let pool = ClientPool::spawn();
        let mut log_rx = subscribed_member(&pool, SubscriptionKind::LogEvent).await;

        let logs = Arc::new(MemoryLogRepository::new());
        let shutdown = ShutdownSignal::new();
        let handle = Broadcaster::new(
            pool.clone(),
            Some(logs.clone()),
            Duration::from_millis(20),
            Duration::from_secs(1),
        )
        .start(shutdown.clone());

        tokio::time::sleep(Duration::from_millis(10)).await;
        logs.push(LogEntry::new("only once"));

        let frame = timeout(Duration::from_secs(2), log_rx.recv()).await.unwrap().unwrap();
        assert_eq!(frame.info, "only once");
        // Several polls later the watermark has moved past the entry.
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(log_rx.try_recv().is_err());

        shutdown.trigger();
        timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn idles_without_log_repository() {
        let pool = ClientPool::spawn();
        let shutdown = ShutdownSignal::new();
        let handle = Broadcaster::new(
            pool,
            None,
            Duration::from_millis(10),
            Duration::from_secs(1),
        )
        .start(shutdown.clone());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!handle.is_finished());
        shutdown.trigger();
        timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    }
}
