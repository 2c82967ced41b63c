//! Wire protocol for notification clients
//!
//! One JSON object per frame in both directions. Inbound frames are
//! [`UserRequest`]s; a literal `"ping"` payload is a transport keepalive and
//! produces no response. Outbound frames are [`WsResponse`]s.

use serde::{Deserialize, Serialize};

use crate::domain::{LogEntry, MeterValue};

/// Transport-level keepalive payload, accepted without a response.
pub const KEEPALIVE: &str = "ping";

/// Sentinel for "no transaction id supplied".
pub const NO_TRANSACTION: i64 = -1;

// ── Inbound ────────────────────────────────────────────────────

/// Command vocabulary understood by the connection handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    StartTransaction,
    StopTransaction,
    CheckStatus,
    ListenTransaction,
    StopListenTransaction,
    ListenChargePoints,
    ListenLog,
    PingConnection,
}

impl Command {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "StartTransaction" => Some(Self::StartTransaction),
            "StopTransaction" => Some(Self::StopTransaction),
            "CheckStatus" => Some(Self::CheckStatus),
            "ListenTransaction" => Some(Self::ListenTransaction),
            "StopListenTransaction" => Some(Self::StopListenTransaction),
            "ListenChargePoints" => Some(Self::ListenChargePoints),
            "ListenLog" => Some(Self::ListenLog),
            "PingConnection" => Some(Self::PingConnection),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartTransaction => "StartTransaction",
            Self::StopTransaction => "StopTransaction",
            Self::CheckStatus => "CheckStatus",
            Self::ListenTransaction => "ListenTransaction",
            Self::StopListenTransaction => "StopListenTransaction",
            Self::ListenChargePoints => "ListenChargePoints",
            Self::ListenLog => "ListenLog",
            Self::PingConnection => "PingConnection",
        }
    }
}

/// Inbound wire command.
///
/// Every field is defaulted so sparse frames still decode; validation of the
/// combination happens at dispatch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRequest {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub charge_point_id: String,
    #[serde(default)]
    pub connector_id: u32,
    #[serde(default = "no_transaction")]
    pub transaction_id: i64,
    #[serde(default)]
    pub command: String,
}

fn no_transaction() -> i64 {
    NO_TRANSACTION
}

impl Default for UserRequest {
    fn default() -> Self {
        Self {
            token: String::new(),
            charge_point_id: String::new(),
            connector_id: 0,
            transaction_id: NO_TRANSACTION,
            command: String::new(),
        }
    }
}

// ── Outbound ───────────────────────────────────────────────────

/// Frame status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
    Waiting,
    Ping,
    Value,
}

/// Frame stage: which operation or event subscription the frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "start")]
    Start,
    #[serde(rename = "stop")]
    Stop,
    #[serde(rename = "info")]
    Info,
    #[serde(rename = "log-event")]
    LogEvent,
    #[serde(rename = "charge-point-event")]
    ChargePointEvent,
}

/// Outbound wire frame. Constructed once, never mutated after emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsResponse {
    pub status: Status,
    pub stage: Stage,
    pub info: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub power: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub power_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub soc: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub minute: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub connector_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub connector_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub meter_value: Option<MeterValue>,
}

impl WsResponse {
    pub fn new(status: Status, stage: Stage, info: impl Into<String>) -> Self {
        Self {
            status,
            stage,
            info: info.into(),
            user_id: None,
            progress: None,
            power: None,
            power_rate: None,
            soc: None,
            price: None,
            minute: None,
            id: None,
            data: None,
            connector_id: None,
            connector_status: None,
            meter_value: None,
        }
    }

    /// Synthetic acknowledgement sent right after registration.
    pub fn connected() -> Self {
        Self::new(Status::Success, Stage::Info, "connected")
    }

    pub fn error(info: impl Into<String>) -> Self {
        Self::new(Status::Error, Stage::Info, info)
    }

    pub fn error_at(stage: Stage, info: impl Into<String>) -> Self {
        Self::new(Status::Error, stage, info)
    }

    pub fn pong() -> Self {
        Self::new(Status::Ping, Stage::Info, "pong")
    }

    pub fn waiting(stage: Stage, progress: u8) -> Self {
        let mut frame = Self::new(Status::Waiting, stage, "waiting");
        frame.progress = Some(progress);
        frame
    }

    /// `value` frame carrying one meter sample.
    pub fn meter_sample(sample: MeterValue) -> Self {
        let mut frame = Self::new(Status::Value, Stage::Info, "meter value");
        frame.id = Some(sample.transaction_id);
        frame.power = sample.power_w;
        frame.power_rate = sample.power_rate;
        frame.soc = sample.soc;
        frame.meter_value = Some(sample);
        frame
    }

    pub fn log_event(entry: &LogEntry) -> Self {
        let mut frame = Self::new(Status::Value, Stage::LogEvent, entry.message.clone());
        if entry.has_charge_point() {
            frame.data = Some(entry.charge_point_id.clone());
        }
        frame
    }

    pub fn charge_point_event(entry: &LogEntry) -> Self {
        let mut frame = Self::new(Status::Value, Stage::ChargePointEvent, entry.message.clone());
        frame.data = Some(entry.charge_point_id.clone());
        frame.connector_id = entry.connector_id;
        frame.connector_status = entry.connector_status.clone();
        frame
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn sparse_request_decodes_with_defaults() {
        let req: UserRequest = serde_json::from_str(r#"{"command":"PingConnection"}"#).unwrap();
        assert_eq!(req.command, "PingConnection");
        assert_eq!(req.token, "");
        assert_eq!(req.transaction_id, NO_TRANSACTION);
        assert_eq!(req.connector_id, 0);
    }

    #[test]
    fn command_parse_roundtrip() {
        for name in [
            "StartTransaction",
            "StopTransaction",
            "CheckStatus",
            "ListenTransaction",
            "StopListenTransaction",
            "ListenChargePoints",
            "ListenLog",
            "PingConnection",
        ] {
            let cmd = Command::parse(name).unwrap();
            assert_eq!(cmd.as_str(), name);
        }
        assert!(Command::parse("RebootEverything").is_none());
    }

    #[test]
    fn stage_wire_names() {
        assert_eq!(
            serde_json::to_string(&Stage::LogEvent).unwrap(),
            "\"log-event\""
        );
        assert_eq!(
            serde_json::to_string(&Stage::ChargePointEvent).unwrap(),
            "\"charge-point-event\""
        );
        assert_eq!(serde_json::to_string(&Status::Waiting).unwrap(), "\"waiting\"");
    }

    #[test]
    fn response_roundtrip_keeps_populated_optionals() {
        let mut frame = WsResponse::new(Status::Success, Stage::Stop, "transaction finished");
        frame.user_id = Some("alice".into());
        frame.progress = Some(100);
        frame.power = Some(7400.0);
        frame.power_rate = Some(0.85);
        frame.soc = Some(64);
        frame.price = Some(3.14);
        frame.minute = Some(42);
        frame.id = Some(7);
        frame.data = Some("CP001".into());
        frame.connector_id = Some(2);
        frame.connector_status = Some("Charging".into());
        frame.meter_value = Some(MeterValue {
            transaction_id: 7,
            timestamp: Utc::now(),
            meter_wh: 1234,
            power_w: Some(7400.0),
            power_rate: None,
            soc: Some(64),
        });

        let json = serde_json::to_string(&frame).unwrap();
        let back: WsResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn none_fields_are_omitted_from_wire() {
        let json = serde_json::to_string(&WsResponse::connected()).unwrap();
        assert!(!json.contains("meter_value"));
        assert!(!json.contains("progress"));
        assert!(json.contains("\"status\":\"success\""));
    }
}
