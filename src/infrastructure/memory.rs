//! In-memory collaborator implementations
//!
//! Back the collaborator traits with process-local maps for development
//! wiring and tests. Real deployments substitute database-backed
//! implementations behind the same traits.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::domain::{
    Authenticator, CommandGateway, DomainError, DomainResult, LogEntry, LogRepository,
    MeterValue, Transaction, TransactionRepository, User,
};
use crate::interfaces::ws::protocol::UserRequest;

/// In-memory transaction and meter-value store.
pub struct MemoryTransactionRepository {
    transactions: DashMap<i64, Transaction>,
    meter_values: Mutex<Vec<MeterValue>>,
}

impl MemoryTransactionRepository {
    pub fn new() -> Self {
        Self {
            transactions: DashMap::new(),
            meter_values: Mutex::new(Vec::new()),
        }
    }

    /// Insert or replace a transaction.
    pub fn insert_transaction(&self, transaction: Transaction) {
        self.transactions.insert(transaction.id, transaction);
    }

    pub fn push_meter_value(&self, sample: MeterValue) {
        self.meter_values
            .lock()
            .expect("meter value lock poisoned")
            .push(sample);
    }
}

impl Default for MemoryTransactionRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransactionRepository for MemoryTransactionRepository {
    async fn get_transaction_after(
        &self,
        user_tag: &str,
        since: DateTime<Utc>,
    ) -> DomainResult<Option<Transaction>> {
        let earliest = self
            .transactions
            .iter()
            .filter(|t| t.user_tag == user_tag && t.started_at > since)
            .map(|t| t.clone())
            .min_by_key(|t| t.started_at);
        Ok(earliest)
    }

    async fn get_transaction(&self, id: i64) -> DomainResult<Option<Transaction>> {
        Ok(self.transactions.get(&id).map(|t| t.clone()))
    }

    async fn get_meter_values_after(
        &self,
        transaction_id: i64,
        since: DateTime<Utc>,
    ) -> DomainResult<Vec<MeterValue>> {
        let mut samples: Vec<MeterValue> = self
            .meter_values
            .lock()
            .expect("meter value lock poisoned")
            .iter()
            .filter(|s| s.transaction_id == transaction_id && s.timestamp > since)
            .cloned()
            .collect();
        samples.sort_by_key(|s| s.timestamp);
        Ok(samples)
    }
}

/// In-memory system log.
pub struct MemoryLogRepository {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLogRepository {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, entry: LogEntry) {
        self.entries.lock().expect("log lock poisoned").push(entry);
    }
}

impl Default for MemoryLogRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogRepository for MemoryLogRepository {
    async fn read_log_after(&self, since: DateTime<Utc>) -> DomainResult<Vec<LogEntry>> {
        let mut entries: Vec<LogEntry> = self
            .entries
            .lock()
            .expect("log lock poisoned")
            .iter()
            .filter(|e| e.timestamp > since)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.timestamp);
        Ok(entries)
    }
}

/// Token → user map.
pub struct MemoryAuthenticator {
    tokens: DashMap<String, User>,
}

impl MemoryAuthenticator {
    pub fn new() -> Self {
        Self {
            tokens: DashMap::new(),
        }
    }

    pub fn insert_token(&self, token: impl Into<String>, user: User) {
        self.tokens.insert(token.into(), user);
    }
}

impl Default for MemoryAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Authenticator for MemoryAuthenticator {
    async fn authenticate_by_token(&self, token: &str) -> DomainResult<User> {
        self.tokens
            .get(token)
            .map(|u| u.clone())
            .ok_or_else(|| DomainError::AuthenticationFailed("unknown token".into()))
    }
}

/// Records every forwarded command; can be told to reject.
pub struct MemoryCommandGateway {
    requests: Mutex<Vec<UserRequest>>,
    reject_with: Mutex<Option<String>>,
}

impl MemoryCommandGateway {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            reject_with: Mutex::new(None),
        }
    }

    /// Every request forwarded so far, in order.
    pub fn recorded(&self) -> Vec<UserRequest> {
        self.requests.lock().expect("gateway lock poisoned").clone()
    }

    /// Make subsequent `execute` calls fail with a validation error.
    pub fn reject_with(&self, reason: impl Into<String>) {
        *self.reject_with.lock().expect("gateway lock poisoned") = Some(reason.into());
    }
}

impl Default for MemoryCommandGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandGateway for MemoryCommandGateway {
    async fn execute(&self, request: &UserRequest) -> DomainResult<()> {
        if let Some(reason) = self.reject_with.lock().expect("gateway lock poisoned").clone() {
            return Err(DomainError::Validation(reason));
        }
        self.requests
            .lock()
            .expect("gateway lock poisoned")
            .push(request.clone());
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transaction_after_picks_earliest_match() {
        let repo = MemoryTransactionRepository::new();
        let since = Utc::now() - chrono::Duration::seconds(60);

        let mut first = Transaction::new(1, "alice", "CP001", 1, 0);
        first.started_at = Utc::now() - chrono::Duration::seconds(30);
        let mut second = Transaction::new(2, "alice", "CP001", 1, 0);
        second.started_at = Utc::now() - chrono::Duration::seconds(10);
        let mut other_user = Transaction::new(3, "bob", "CP002", 1, 0);
        other_user.started_at = Utc::now() - chrono::Duration::seconds(20);
        repo.insert_transaction(first);
        repo.insert_transaction(second);
        repo.insert_transaction(other_user);

        let found = repo.get_transaction_after("alice", since).await.unwrap().unwrap();
        assert_eq!(found.id, 1);

        let none = repo.get_transaction_after("carol", since).await.unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn meter_values_filtered_and_ordered() {
        let repo = MemoryTransactionRepository::new();
        let since = Utc::now() - chrono::Duration::seconds(60);

        let mut old = MeterValue::new(7, 100);
        old.timestamp = Utc::now() - chrono::Duration::seconds(90);
        let recent = MeterValue::new(7, 200);
        let other_tx = MeterValue::new(8, 300);
        repo.push_meter_value(recent.clone());
        repo.push_meter_value(old);
        repo.push_meter_value(other_tx);

        let samples = repo.get_meter_values_after(7, since).await.unwrap();
        assert_eq!(samples, vec![recent]);
    }

    #[tokio::test]
    async fn authenticator_resolves_known_token() {
        let auth = MemoryAuthenticator::new();
        auth.insert_token("T-1", User::new("u1", "alice"));

        let user = auth.authenticate_by_token("T-1").await.unwrap();
        assert_eq!(user.tag, "alice");
        assert!(auth.authenticate_by_token("nope").await.is_err());
    }

    #[tokio::test]
    async fn gateway_records_and_rejects() {
        let gateway = MemoryCommandGateway::new();
        let request = UserRequest {
            command: "StartTransaction".into(),
            ..Default::default()
        };
        gateway.execute(&request).await.unwrap();
        assert_eq!(gateway.recorded().len(), 1);

        gateway.reject_with("charge point offline");
        assert!(gateway.execute(&request).await.is_err());
    }
}
