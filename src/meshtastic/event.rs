use chrono::Utc;
use serde::Serialize;

use super::node_id::NodeId;
use super::payload::{
    MapReportPayload, NeighborInfo, NodeInfoPayload, Position, RoutingPayload, Telemetry,
    TextPayload, TraceroutePayload,
};

/// Which wire encoding an event was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Json,
    Protobuf,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum Payload {
    NodeInfo(NodeInfoPayload),
    Position(Position),
    Telemetry(Telemetry),
    Text(TextPayload),
    Traceroute(TraceroutePayload),
    NeighborInfo(NeighborInfo),
    MapReport(MapReportPayload),
    Routing(RoutingPayload),
    /// Undecodable or unrecognised content, kept only for logging.
    Unknown(serde_json::Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NodeInfo,
    Position,
    Telemetry,
    Text,
    Traceroute,
    NeighborInfo,
    MapReport,
    Routing,
    Unknown,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::NodeInfo => "nodeinfo",
            EventKind::Position => "position",
            EventKind::Telemetry => "telemetry",
            EventKind::Text => "text",
            EventKind::Traceroute => "traceroute",
            EventKind::NeighborInfo => "neighborinfo",
            EventKind::MapReport => "mapreport",
            EventKind::Routing => "routing",
            EventKind::Unknown => "unknown",
        }
    }
}

impl Payload {
    pub fn kind(&self) -> EventKind {
        match self {
            Payload::NodeInfo(_) => EventKind::NodeInfo,
            Payload::Position(_) => EventKind::Position,
            Payload::Telemetry(_) => EventKind::Telemetry,
            Payload::Text(_) => EventKind::Text,
            Payload::Traceroute(_) => EventKind::Traceroute,
            Payload::NeighborInfo(_) => EventKind::NeighborInfo,
            Payload::MapReport(_) => EventKind::MapReport,
            Payload::Routing(_) => EventKind::Routing,
            Payload::Unknown(_) => EventKind::Unknown,
        }
    }
}

/// One decoded mesh packet, normalised across wire encodings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<NodeId>,
    /// Gateway that relayed the packet to the broker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Receive time, unix seconds.
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hops_away: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hop_limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hop_start: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snr: Option<f32>,
    #[serde(flatten)]
    pub payload: Payload,
    pub topic: String,
    #[serde(skip)]
    pub encoding: Encoding,
}

impl Event {
    pub fn new(topic: &str, payload: Payload) -> Self {
        Event {
            id: None,
            from: None,
            to: None,
            sender: None,
            channel: None,
            timestamp: Utc::now().timestamp(),
            hops_away: None,
            hop_limit: None,
            hop_start: None,
            rssi: None,
            snr: None,
            payload,
            topic: topic.to_string(),
            encoding: Encoding::Json,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Fill `hops_away` from the hop counters when the gateway did not send it.
    pub(crate) fn derive_hops_away(&mut self) {
        if self.hops_away.is_none() {
            if let (Some(start), Some(limit)) = (self.hop_start, self.hop_limit) {
                if start > 0 {
                    self.hops_away = Some(start.saturating_sub(limit));
                }
            }
        }
    }
}

/// Gateway id from the last topic segment, e.g. `msh/US/2/e/LongFast/!da639058`.
pub fn sender_from_topic(topic: &str) -> Option<NodeId> {
    topic
        .rsplit('/')
        .next()
        .filter(|seg| seg.starts_with('!'))
        .and_then(|seg| seg.parse().ok())
}
