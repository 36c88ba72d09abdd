//! Typed payloads carried by decoded mesh events.
//!
//! The same structs serve both wire encodings: JSON gateways publish them
//! directly, and the protobuf path converts generated messages into them
//! (see `convert.rs`). They are also what the registry stores on each node.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::node_id::{NodeId, NodeIdError};

/// Hardware model or device role. Protobuf gateways send the enum number,
/// some JSON gateways send the enum name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelCode {
    Code(i64),
    Name(String),
}

impl fmt::Display for ModelCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelCode::Code(c) => write!(f, "{c}"),
            ModelCode::Name(n) => f.write_str(n),
        }
    }
}

/// A node reference exactly as it appeared on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeRef {
    Number(u64),
    Text(String),
}

impl NodeRef {
    /// Parse without a registry; names do not resolve here.
    pub fn to_node_id(&self) -> Result<NodeId, NodeIdError> {
        match self {
            NodeRef::Number(n) => NodeId::from_u64(*n),
            NodeRef::Text(s) => s.parse(),
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRef::Number(n) => write!(f, "{n}"),
            NodeRef::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawNodeInfo")]
pub struct NodeInfoPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<NodeRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shortname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hardware: Option<ModelCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<ModelCode>,
}

// Gateways disagree on key spelling, and some send both. The gateway-native
// short keys win over the protobuf-style ones.
#[derive(Deserialize)]
struct RawNodeInfo {
    #[serde(default)]
    id: Option<NodeRef>,
    #[serde(default)]
    shortname: Option<String>,
    #[serde(default)]
    short_name: Option<String>,
    #[serde(default)]
    longname: Option<String>,
    #[serde(default)]
    long_name: Option<String>,
    #[serde(default)]
    hardware: Option<ModelCode>,
    #[serde(default)]
    hw_model: Option<ModelCode>,
    #[serde(default)]
    role: Option<ModelCode>,
}

impl From<RawNodeInfo> for NodeInfoPayload {
    fn from(raw: RawNodeInfo) -> Self {
        NodeInfoPayload {
            id: raw.id,
            shortname: raw.shortname.or(raw.short_name),
            longname: raw.longname.or(raw.long_name),
            hardware: raw.hardware.or(raw.hw_model),
            role: raw.role,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude_i: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude_i: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision_bits: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sats_in_view: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_speed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_track: Option<u32>,
    /// Reverse-geocoding result attached by the ingest pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geocoded: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_geocoding: Option<DateTime<Utc>>,
}

impl Position {
    /// Latitude/longitude in degrees. `None` when either is missing or both are zero.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude_i, self.longitude_i) {
            (Some(0), Some(0)) => None,
            (Some(lat), Some(lon)) => Some((lat as f64 / 1e7, lon as f64 / 1e7)),
            _ => None,
        }
    }
}

/// Flattened telemetry; device, environment, power and local-stats variants
/// all land in the same struct with unused fields left empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voltage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_utilization: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub air_util_tx: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_humidity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barometric_pressure: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_resistance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iaq: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lux: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ch1_voltage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ch1_current: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ch2_voltage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ch2_current: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ch3_voltage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ch3_current: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_packets_tx: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_packets_rx: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_online_nodes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_total_nodes: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub node_id: NodeId,
    #[serde(default)]
    pub snr: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NeighborInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_broadcast_interval_secs: Option<u32>,
    #[serde(default)]
    pub neighbors: Vec<Neighbor>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextPayload {
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceroutePayload {
    #[serde(default)]
    pub route: Vec<NodeRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub route_back: Vec<NodeRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub snr_towards: Vec<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub snr_back: Vec<i32>,
}

/// Periodic self-report published on the `/2/map/` topics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapReportPayload {
    #[serde(default, alias = "longname")]
    pub long_name: String,
    #[serde(default, alias = "shortname")]
    pub short_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<ModelCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hw_model: Option<ModelCode>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub firmware_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modem_preset: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude_i: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude_i: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_precision: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_online_local_nodes: Option<u32>,
}

impl MapReportPayload {
    pub fn position(&self) -> Option<Position> {
        let position = Position {
            latitude_i: self.latitude_i,
            longitude_i: self.longitude_i,
            altitude: self.altitude,
            precision_bits: self.position_precision,
            ..Default::default()
        };
        position.coordinates().map(|_| position)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub route: Vec<NodeRef>,
}
