use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// UDP port nodes broadcast their advertisements on.
pub const BROADCAST_PORT: u16 = 1911;

pub const ENDPOINT_STATUS: &str = "/status";
pub const ENDPOINT_UPLOAD_BIN: &str = "/uploadbin";
pub const ENDPOINT_UPLOAD_PAYLOAD: &str = "/uploadpayload";
pub const ENDPOINT_ARG: &str = "/arg";
pub const ENDPOINT_EXECUTE: &str = "/execute";
pub const ENDPOINT_OUTPUT: &str = "/output";

/// Multipart field carrying an uploaded blob.
pub const UPLOAD_FIELD: &str = "file";
/// Query parameter naming an uploaded payload.
pub const PAYLOAD_NAME_PARAM: &str = "filename";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Available,
    Busy,
    #[default]
    #[serde(other)]
    Unknown,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Available => "available",
            NodeStatus::Busy => "busy",
            NodeStatus::Unknown => "unknown",
        }
    }

    /// Anything other than the two known states reads as `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "available" => NodeStatus::Available,
            "busy" => NodeStatus::Busy,
            _ => NodeStatus::Unknown,
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Self-description a node broadcasts on the discovery port.
///
/// Every field is optional on the wire. Missing or mistyped fields fall back
/// to their defaults and unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertisement {
    pub node: String,
    pub mac: String,
    pub total_executed: u64,
    pub status: NodeStatus,
    pub free_spiffs_bytes: u64,
    pub rssi: i64,
}

impl Default for Advertisement {
    fn default() -> Self {
        Self {
            node: "Unknown".to_string(),
            mac: "Unknown".to_string(),
            total_executed: 0,
            status: NodeStatus::Unknown,
            free_spiffs_bytes: 0,
            rssi: 0,
        }
    }
}

impl Advertisement {
    /// Decodes a raw datagram. Fails only when the bytes are not a JSON object.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let fields: Map<String, Value> = serde_json::from_slice(bytes)?;
        Ok(Self::from_fields(&fields))
    }

    pub fn from_fields(fields: &Map<String, Value>) -> Self {
        let defaults = Self::default();
        Self {
            node: string_field(fields, "node").unwrap_or(defaults.node),
            mac: string_field(fields, "mac").unwrap_or(defaults.mac),
            total_executed: fields
                .get("total_executed")
                .and_then(Value::as_u64)
                .unwrap_or(defaults.total_executed),
            status: fields
                .get("status")
                .and_then(Value::as_str)
                .map(NodeStatus::parse)
                .unwrap_or(defaults.status),
            free_spiffs_bytes: fields
                .get("free_spiffs_bytes")
                .and_then(Value::as_u64)
                .unwrap_or(defaults.free_spiffs_bytes),
            rssi: fields
                .get("rssi")
                .and_then(Value::as_i64)
                .unwrap_or(defaults.rssi),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

fn string_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Body of `GET /status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub status: NodeStatus,
}
