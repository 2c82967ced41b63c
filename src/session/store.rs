//! Session store - last known operation stage per user
//!
//! Lets a client resume an in-flight operation after reconnecting: the
//! connection handler saves a record whenever a trackable command starts and
//! `CheckStatus` re-derives the matching watcher from it. One record per user
//! tag, last write wins.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

/// Stage of the operation a user last started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStage {
    Start,
    Stop,
    Listen,
}

impl SessionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Listen => "listen",
        }
    }
}

/// One resumable operation.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub user_tag: String,
    pub stage: SessionStage,
    pub transaction_id: i64,
    /// When the operation was started; the start watcher polls for
    /// transactions created after this instant.
    pub timestamp: DateTime<Utc>,
}

/// Process-wide map of user tag → last known operation stage.
pub struct SessionStore {
    records: DashMap<String, SessionRecord>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Create or overwrite the record for a user.
    pub fn save(&self, user_tag: &str, stage: SessionStage, transaction_id: i64) {
        debug!(user_tag, stage = stage.as_str(), transaction_id, "Session record saved");
        self.records.insert(
            user_tag.to_string(),
            SessionRecord {
                user_tag: user_tag.to_string(),
                stage,
                transaction_id,
                timestamp: Utc::now(),
            },
        );
    }

    pub fn get(&self, user_tag: &str) -> Option<SessionRecord> {
        self.records.get(user_tag).map(|r| r.clone())
    }

    pub fn clear(&self, user_tag: &str) {
        if self.records.remove(user_tag).is_some() {
            debug!(user_tag, "Session record cleared");
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ──────────────────────────────────────────────────────
