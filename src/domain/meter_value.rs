//! Meter value sample

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single timestamped meter reading belonging to a transaction.
///
/// Embedded verbatim in outbound `value` frames, so it is a serde type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterValue {
    /// Transaction this sample belongs to
    pub transaction_id: i64,
    /// When the sample was recorded
    pub timestamp: DateTime<Utc>,
    /// Meter register value (Wh)
    pub meter_wh: i32,
    /// Instantaneous charging power (W)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub power_w: Option<f64>,
    /// Charging rate relative to the connector maximum (0.0–1.0)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub power_rate: Option<f64>,
    /// State of charge (%)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub soc: Option<i32>,
}

impl MeterValue {
    pub fn new(transaction_id: i64, meter_wh: i32) -> Self {
        Self {
            transaction_id,
            timestamp: Utc::now(),
            meter_wh,
            power_w: None,
            power_rate: None,
            soc: None,
        }
    }
}
