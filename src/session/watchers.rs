//! Watcher state machines
//!
//! Per-command polling tasks that repeatedly query the transaction/log
//! repository on a timer and emit progress and terminal frames into one
//! connection's outbound queue:
//!
//! - start watch: wait for the first transaction created after T0 (90s budget)
//! - stop watch: wait for a transaction to finish (90s budget, fail-fast
//!   existence pre-check)
//! - meter watch: stream meter samples until unlisted (no budget, bounded
//!   consecutive-error retry)
//! - log watch: stream log entries while the connection subscribes to them
//!   (errors swallowed, best effort)
//!
//! Every repository call is bounded by a short timeout so a slow collaborator
//! cannot stall a watcher. Cancellation is an explicit per-connection signal
//! checked at every suspension point.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::domain::{DomainError, DomainResult, LogRepository, TransactionRepository};
use crate::interfaces::ws::protocol::{Stage, Status, WsResponse};
use crate::notifications::pool::{SubscriptionCell, SubscriptionKind};
use crate::session::store::{SessionStage, SessionStore};
use crate::shared::shutdown::ShutdownSignal;

/// Timing and retry policy for all watchers.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Overall budget of the start watch.
    pub start_budget: Duration,
    /// Poll interval of the start watch.
    pub start_poll: Duration,
    /// Overall budget of the stop watch.
    pub stop_budget: Duration,
    /// Poll interval of the stop watch.
    pub stop_poll: Duration,
    /// Poll interval of the meter and log streams.
    pub stream_poll: Duration,
    /// Upper bound on any single repository call.
    pub repo_timeout: Duration,
    /// Consecutive repository errors after which a meter stream gives up.
    pub max_stream_errors: u32,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            start_budget: Duration::from_secs(90),
            start_poll: Duration::from_secs(2),
            stop_budget: Duration::from_secs(90),
            stop_poll: Duration::from_secs(3),
            stream_poll: Duration::from_secs(5),
            repo_timeout: Duration::from_secs(5),
            max_stream_errors: 10,
        }
    }
}

/// Everything a watcher needs from its connection.
#[derive(Clone)]
pub struct WatcherContext {
    pub repo: Arc<dyn TransactionRepository>,
    /// The connection's outbound queue.
    pub out: mpsc::Sender<WsResponse>,
    pub sessions: Arc<SessionStore>,
    pub user_tag: String,
    /// Cancellation signal of the owning connection.
    pub closed: ShutdownSignal,
    pub cfg: WatcherConfig,
}

/// Run a repository call with the configured upper bound.
async fn bounded<T, F>(limit: Duration, call: F) -> DomainResult<T>
where
    F: Future<Output = DomainResult<T>>,
{
    match timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(DomainError::Timeout("repository call".into())),
    }
}

/// Queue a frame; returns false when the connection is gone.
async fn emit(ctx: &WatcherContext, frame: WsResponse) -> bool {
    if ctx.out.send(frame).await.is_err() {
        debug!(user_tag = %ctx.user_tag, "Outbound queue closed, watcher exits");
        return false;
    }
    true
}

fn progress_percent(elapsed: Duration, budget: Duration) -> u8 {
    let ratio = elapsed.as_secs_f64() / budget.as_secs_f64();
    (ratio * 100.0).min(100.0) as u8
}

/// Clear the session record unless the connection is already tearing down.
fn clear_session(ctx: &WatcherContext) {
    if !ctx.closed.is_triggered() {
        ctx.sessions.clear(&ctx.user_tag);
    }
}

fn clear_listen_record(ctx: &WatcherContext, transaction_id: i64) {
    if ctx.closed.is_triggered() {
        return;
    }
    if let Some(record) = ctx.sessions.get(&ctx.user_tag) {
        if record.stage == SessionStage::Listen && record.transaction_id == transaction_id {
            ctx.sessions.clear(&ctx.user_tag);
        }
    }
}

fn poll_ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

// ── Start watch ────────────────────────────────────────────────

/// Wait for the first transaction created for this user after `since`.
pub async fn start_watch(ctx: WatcherContext, since: DateTime<Utc>) {
    let started = Instant::now();
    let mut ticker = poll_ticker(ctx.cfg.start_poll);
    ticker.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = ctx.closed.notified().wait() => return,
        }

        match bounded(
            ctx.cfg.repo_timeout,
            ctx.repo.get_transaction_after(&ctx.user_tag, since),
        )
        .await
        {
            Ok(Some(tx)) if tx.id >= 0 => {
                let mut frame =
                    WsResponse::new(Status::Success, Stage::Start, "transaction started");
                frame.id = Some(tx.id);
                frame.user_id = Some(ctx.user_tag.clone());
                emit(&ctx, frame).await;
                clear_session(&ctx);
                return;
            }
            Ok(_) => {}
            Err(e) => {
                // Transient: retried on the next tick within the budget.
                debug!(user_tag = %ctx.user_tag, error = %e, "Start watch poll failed");
            }
        }

        let elapsed = started.elapsed();
        if elapsed >= ctx.cfg.start_budget {
            emit(
                &ctx,
                WsResponse::error_at(Stage::Start, "timed out waiting for transaction start"),
            )
            .await;
            clear_session(&ctx);
            return;
        }

        let progress = progress_percent(elapsed, ctx.cfg.start_budget);
        if !emit(&ctx, WsResponse::waiting(Stage::Start, progress)).await {
            return;
        }
    }
}

// ── Stop watch ─────────────────────────────────────────────────

/// Wait for a transaction to be marked finished.
pub async fn stop_watch(ctx: WatcherContext, transaction_id: i64) {
    // Fail fast before entering the loop: an unknown id never finishes.
    match bounded(ctx.cfg.repo_timeout, ctx.repo.get_transaction(transaction_id)).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            emit(
                &ctx,
                WsResponse::error_at(Stage::Stop, format!("transaction {transaction_id} not found")),
            )
            .await;
            clear_session(&ctx);
            return;
        }
        Err(e) => {
            emit(&ctx, WsResponse::error_at(Stage::Stop, e.to_string())).await;
            clear_session(&ctx);
            return;
        }
    }

    let started = Instant::now();
    let mut ticker = poll_ticker(ctx.cfg.stop_poll);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = ctx.closed.notified().wait() => return,
        }

        match bounded(ctx.cfg.repo_timeout, ctx.repo.get_transaction(transaction_id)).await {
            Ok(Some(tx)) if tx.is_finished() => {
                let mut frame =
                    WsResponse::new(Status::Success, Stage::Stop, "transaction finished");
                frame.id = Some(tx.id);
                frame.user_id = Some(ctx.user_tag.clone());
                frame.price = tx.price;
                frame.minute = tx.duration_minutes();
                emit(&ctx, frame).await;
                clear_session(&ctx);
                return;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(user_tag = %ctx.user_tag, error = %e, "Stop watch poll failed");
            }
        }

        let elapsed = started.elapsed();
        if elapsed >= ctx.cfg.stop_budget {
            emit(
                &ctx,
                WsResponse::error_at(Stage::Stop, "timed out waiting for transaction stop"),
            )
            .await;
            clear_session(&ctx);
            return;
        }

        let progress = progress_percent(elapsed, ctx.cfg.stop_budget);
        if !emit(&ctx, WsResponse::waiting(Stage::Stop, progress)).await {
            return;
        }
    }
}

// ── Meter value watch ──────────────────────────────────────────

/// Stream meter samples of a transaction until the connection stops
/// listening, the connection closes, or the repository keeps failing.
///
/// `StopListenTransaction` only removes the id from `listeners`; this task
/// notices on its next tick and exits on its own.
pub async fn meter_watch(
    ctx: WatcherContext,
    transaction_id: i64,
    listeners: Arc<DashMap<i64, String>>,
) {
    let mut watermark = Utc::now();
    let mut consecutive_errors: u32 = 0;
    let mut ticker = poll_ticker(ctx.cfg.stream_poll);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = ctx.closed.notified().wait() => return,
        }

        if !listeners.contains_key(&transaction_id) {
            debug!(transaction_id, "No longer listed, meter watch exits");
            clear_listen_record(&ctx, transaction_id);
            return;
        }

        match bounded(
            ctx.cfg.repo_timeout,
            ctx.repo.get_meter_values_after(transaction_id, watermark),
        )
        .await
        {
            Ok(samples) => {
                consecutive_errors = 0;
                for sample in samples {
                    if sample.timestamp > watermark {
                        watermark = sample.timestamp;
                    }
                    if !emit(&ctx, WsResponse::meter_sample(sample)).await {
                        return;
                    }
                }
            }
            Err(e) => {
                consecutive_errors += 1;
                if consecutive_errors >= ctx.cfg.max_stream_errors {
                    warn!(
                        transaction_id,
                        errors = consecutive_errors,
                        error = %e,
                        "Meter watch giving up after repeated repository failures"
                    );
                    listeners.remove(&transaction_id);
                    return;
                }
                debug!(transaction_id, error = %e, "Meter watch poll failed");
            }
        }
    }
}

// ── Log watch ──────────────────────────────────────────────────

/// Stream new log entries to one connection while it subscribes to log
/// events. Repository errors are swallowed; log delivery is best effort.
///
/// `generation` pins this instance to the connection's log-watch epoch:
/// every spawn bumps the epoch, so a stale instance exits on its next tick
/// even if the subscription has flipped back to log events in the meantime.
pub async fn log_watch(
    ctx: WatcherContext,
    logs: Arc<dyn LogRepository>,
    subscription: SubscriptionCell,
    epoch: Arc<AtomicU64>,
    generation: u64,
) {
    let mut watermark = Utc::now();
    let mut ticker = poll_ticker(ctx.cfg.stream_poll);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = ctx.closed.notified().wait() => return,
        }

        if subscription.get() != SubscriptionKind::LogEvent {
            debug!(user_tag = %ctx.user_tag, "Subscription moved away from logs, log watch exits");
            return;
        }
        if epoch.load(Ordering::SeqCst) != generation {
            debug!(user_tag = %ctx.user_tag, generation, "Superseded by a newer log watch, exits");
            return;
        }

        match bounded(ctx.cfg.repo_timeout, logs.read_log_after(watermark)).await {
            Ok(entries) => {
                for entry in entries {
                    if entry.timestamp > watermark {
                        watermark = entry.timestamp;
                    }
                    if !emit(&ctx, WsResponse::log_event(&entry)).await {
                        return;
                    }
                }
            }
            Err(e) => {
                debug!(user_tag = %ctx.user_tag, error = %e, "Log watch poll failed");
            }
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────
