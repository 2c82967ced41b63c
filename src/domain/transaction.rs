//! Transaction domain entity

use chrono::{DateTime, Utc};

/// Transaction status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Transaction is active
    Active,
    /// Transaction completed successfully
    Completed,
    /// Transaction was stopped with an error
    Failed,
}

/// Charging transaction
#[derive(Debug, Clone)]
pub struct Transaction {
    /// Unique transaction ID
    pub id: i64,
    /// User tag that started the transaction
    pub user_tag: String,
    /// Charge point ID
    pub charge_point_id: String,
    /// Connector ID
    pub connector_id: u32,
    /// Transaction status
    pub status: TransactionStatus,
    /// Meter value at start (Wh)
    pub meter_start: i32,
    /// Meter value at stop (Wh)
    pub meter_stop: Option<i32>,
    /// When the transaction started
    pub started_at: DateTime<Utc>,
    /// When the transaction stopped
    pub stopped_at: Option<DateTime<Utc>>,
    /// Final price, set when the transaction is finished
    pub price: Option<f64>,
}

impl Transaction {
    pub fn new(
        id: i64,
        user_tag: impl Into<String>,
        charge_point_id: impl Into<String>,
        connector_id: u32,
        meter_start: i32,
    ) -> Self {
        Self {
            id,
            user_tag: user_tag.into(),
            charge_point_id: charge_point_id.into(),
            connector_id,
            status: TransactionStatus::Active,
            meter_start,
            meter_stop: None,
            started_at: Utc::now(),
            stopped_at: None,
            price: None,
        }
    }

    /// Mark the transaction as finished.
    pub fn finish(&mut self, meter_stop: i32, price: Option<f64>) {
        self.meter_stop = Some(meter_stop);
        self.stopped_at = Some(Utc::now());
        self.price = price;
        self.status = TransactionStatus::Completed;
    }

    pub fn is_active(&self) -> bool {
        self.status == TransactionStatus::Active
    }

    /// A transaction is finished once it is no longer active.
    pub fn is_finished(&self) -> bool {
        !self.is_active()
    }

    /// Energy consumed in Wh, available once the transaction stopped.
    pub fn energy_consumed(&self) -> Option<i32> {
        self.meter_stop.map(|stop| stop - self.meter_start)
    }

    /// Charging duration in whole minutes, if finished.
    pub fn duration_minutes(&self) -> Option<i64> {
        self.stopped_at
            .map(|stop| stop.signed_duration_since(self.started_at).num_minutes())
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        Transaction::new(1, "alice", "CP001", 1, 1000)
    }

    #[test]
    fn new_transaction_is_active() {
        let tx = sample_tx();
        assert!(tx.is_active());
        assert!(!tx.is_finished());
        assert_eq!(tx.meter_start, 1000);
        assert!(tx.meter_stop.is_none());
        assert!(tx.stopped_at.is_none());
    }

    #[test]
    fn finish_sets_completed() {
        let mut tx = sample_tx();
        tx.finish(5000, Some(12.5));
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert!(tx.is_finished());
        assert_eq!(tx.meter_stop, Some(5000));
        assert_eq!(tx.price, Some(12.5));
        assert!(tx.stopped_at.is_some());
    }

    #[test]
    fn energy_consumed_after_finish() {
        let mut tx = sample_tx();
        tx.finish(6000, None);
        assert_eq!(tx.energy_consumed(), Some(5000));
    }

    #[test]
    fn energy_consumed_none_while_active() {
        let tx = sample_tx();
        assert_eq!(tx.energy_consumed(), None);
        assert_eq!(tx.duration_minutes(), None);
    }
}
