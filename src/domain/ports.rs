//! Collaborator interfaces consumed by the notification core
//!
//! The REST surface, persistence and token issuance live outside this crate;
//! the core only ever talks to them through these traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{DomainResult, LogEntry, MeterValue, Transaction, User};
use crate::interfaces::ws::protocol::UserRequest;

/// Read-only access to transactions and their meter samples.
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// First transaction created for `user_tag` strictly after `since`.
    async fn get_transaction_after(
        &self,
        user_tag: &str,
        since: DateTime<Utc>,
    ) -> DomainResult<Option<Transaction>>;

    async fn get_transaction(&self, id: i64) -> DomainResult<Option<Transaction>>;

    /// Meter samples of a transaction recorded strictly after `since`,
    /// oldest first.
    async fn get_meter_values_after(
        &self,
        transaction_id: i64,
        since: DateTime<Utc>,
    ) -> DomainResult<Vec<MeterValue>>;
}

/// Read-only access to the system event log.
#[async_trait]
pub trait LogRepository: Send + Sync {
    /// Log entries recorded strictly after `since`, oldest first.
    async fn read_log_after(&self, since: DateTime<Utc>) -> DomainResult<Vec<LogEntry>>;
}

/// Resolves transport-level tokens to durable user identities.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate_by_token(&self, token: &str) -> DomainResult<User>;
}

/// Business-command collaborator ("WsRequest").
///
/// Every authenticated command is forwarded here, with the token field
/// already rewritten to the resolved user tag.
#[async_trait]
pub trait CommandGateway: Send + Sync {
    async fn execute(&self, request: &UserRequest) -> DomainResult<()>;
}
