//! System log entry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of the system event log.
///
/// Entries may or may not be tied to a charge point; the broadcaster uses
/// [`LogEntry::has_charge_point`] to decide whether an entry additionally
/// produces a charge-point event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// When the entry was recorded
    pub timestamp: DateTime<Utc>,
    /// Charge point the entry refers to, empty for system-wide entries
    #[serde(default)]
    pub charge_point_id: String,
    /// Connector the entry refers to, if any
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub connector_id: Option<u32>,
    /// Connector status carried by the entry, if any
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub connector_status: Option<String>,
    /// Human-readable message
    pub message: String,
}

impl LogEntry {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            charge_point_id: String::new(),
            connector_id: None,
            connector_status: None,
            message: message.into(),
        }
    }

    pub fn for_charge_point(
        charge_point_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            charge_point_id: charge_point_id.into(),
            ..Self::new(message)
        }
    }

    /// True when the entry carries a non-trivial charge point identifier.
    pub fn has_charge_point(&self) -> bool {
        !self.charge_point_id.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_entry_has_no_charge_point() {
        let entry = LogEntry::new("server started");
        assert!(!entry.has_charge_point());
    }

    #[test]
    fn charge_point_entry() {
        let entry = LogEntry::for_charge_point("CP001", "connector 1 now Charging");
        assert!(entry.has_charge_point());
        assert_eq!(entry.charge_point_id, "CP001");
    }

    #[test]
    fn blank_charge_point_id_is_trivial() {
        let mut entry = LogEntry::new("noise");
        entry.charge_point_id = "   ".to_string();
        assert!(!entry.has_charge_point());
    }
}
