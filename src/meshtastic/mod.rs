//! # Meshtastic Wire Decoding
//!
//! Turns raw MQTT publications from Meshtastic gateways into typed [`Event`]s.
//!
//! Two encodings are understood:
//!
//! - **JSON** (`msh/<region>/2/json/...`): gateway-decoded packets with a
//!   `type` discriminator and a `payload` object.
//! - **Protobuf** (`msh/<region>/2/e/...` and `/2/map/...`, requires the
//!   `meshtastic-proto` feature): a `ServiceEnvelope` wrapping a `MeshPacket`,
//!   whose payload may be AES-CTR encrypted with one of the configured
//!   channel keys.
//!
//! Decoding is pure; nothing here touches the registry. Failures come back as
//! [`DecodeError`] and the caller decides how loudly to log them.
//!
//! ```rust
//! use meshinfo::meshtastic::{Payload, WireDecoder};
//!
//! let decoder = WireDecoder::new(true, false, Vec::new());
//! let raw = br#"{"type":"text","from":3663958104,"payload":{"text":"hello"}}"#;
//! let event = decoder.decode("msh/US/2/json/LongFast/!da639058", raw).unwrap();
//! assert!(matches!(event.payload, Payload::Text(_)));
//! assert_eq!(event.from.unwrap().to_string(), "da639058");
//! ```

pub mod crypto;
pub mod event;
pub mod node_id;
pub mod payload;

#[cfg(feature = "meshtastic-proto")]
mod convert;

use chrono::Utc;
use log::{debug, trace};
use serde_json::{Map, Value};

use crate::config::BrokerConfig;
use crate::logutil::escape_log;

pub use crypto::ChannelKey;
pub use event::{sender_from_topic, Encoding, Event, EventKind, Payload};
pub use node_id::{canonicalize, NodeId, NodeIdError};
pub use payload::{
    MapReportPayload, ModelCode, Neighbor, NeighborInfo, NodeInfoPayload, NodeRef, Position,
    RoutingPayload, Telemetry, TextPayload, TraceroutePayload,
};

#[cfg(feature = "meshtastic-proto")]
use crate::protobuf::meshtastic_generated as proto;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("no enabled decoder handles topic '{0}'")]
    UnhandledTopic(String),

    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("JSON message is not an object")]
    NotAnObject,

    #[cfg(feature = "meshtastic-proto")]
    #[error("malformed protobuf: {0}")]
    Protobuf(#[from] prost::DecodeError),

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("bad node id in '{field}': {source}")]
    InvalidNodeId {
        field: &'static str,
        #[source]
        source: NodeIdError,
    },
}

/// Decoder for gateway publications.
pub struct WireDecoder {
    json: bool,
    protobuf: bool,
    keys: Vec<ChannelKey>,
}

impl WireDecoder {
    pub fn new(json: bool, protobuf: bool, keys: Vec<ChannelKey>) -> Self {
        if protobuf && cfg!(not(feature = "meshtastic-proto")) {
            log::warn!("Protobuf decoding requested but the meshtastic-proto feature is not compiled in");
        }
        Self {
            json,
            protobuf: protobuf && cfg!(feature = "meshtastic-proto"),
            keys,
        }
    }

    /// Build from broker config; channel keys are tried in config order.
    pub fn from_config(config: &BrokerConfig) -> anyhow::Result<Self> {
        let mut keys = Vec::new();
        for channel in &config.channels {
            let bytes = channel.key_bytes()?;
            match ChannelKey::from_bytes(&bytes) {
                Ok(Some(key)) => keys.push(key),
                Ok(None) => debug!("Channel '{}' has no encryption key", channel.name),
                Err(e) => return Err(anyhow::anyhow!("channel '{}': {}", channel.name, e)),
            }
        }
        Ok(Self::new(config.decoders.json, config.decoders.protobuf, keys))
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    pub fn decode(&self, topic: &str, raw: &[u8]) -> Result<Event, DecodeError> {
        let mut event = if self.json && topic.contains("/2/json/") {
            self.decode_json(topic, raw)?
        } else if self.protobuf && (topic.contains("/2/e/") || topic.contains("/2/map/")) {
            self.decode_envelope(topic, raw)?
        } else {
            return Err(DecodeError::UnhandledTopic(topic.to_string()));
        };
        event.derive_hops_away();
        if event.sender.is_none() {
            event.sender = sender_from_topic(topic);
        }
        trace!(
            "Decoded {} event on {} from {:?}",
            event.kind().as_str(),
            escape_log(topic),
            event.from
        );
        Ok(event)
    }

    fn decode_json(&self, topic: &str, raw: &[u8]) -> Result<Event, DecodeError> {
        let text = std::str::from_utf8(raw)?;
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(mut obj) = value else {
            return Err(DecodeError::NotAnObject);
        };
        let kind = obj
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_ascii_lowercase();
        let body = obj.remove("payload").unwrap_or(Value::Null);
        let payload = json_payload(&kind, body)?;

        let mut event = Event::new(topic, payload);
        event.encoding = Encoding::Json;
        event.id = json_u32(&obj, "id");
        event.from = json_node_id(&obj, "from")?;
        event.to = json_node_id(&obj, "to")?;
        event.sender = json_node_id(&obj, "sender")?;
        event.channel = obj.get("channel").and_then(|c| match c {
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) => Some(s.clone()),
            _ => None,
        });
        if let Some(ts) = obj.get("timestamp").and_then(Value::as_i64) {
            if ts > 0 {
                event.timestamp = ts;
            }
        }
        event.hops_away = json_u32(&obj, "hops_away");
        event.hop_limit = json_u32(&obj, "hop_limit");
        event.hop_start = json_u32(&obj, "hop_start");
        event.rssi = obj
            .get("rssi")
            .and_then(Value::as_i64)
            .and_then(|v| i32::try_from(v).ok());
        event.snr = obj.get("snr").and_then(Value::as_f64).map(|v| v as f32);
        Ok(event)
    }

    #[cfg(feature = "meshtastic-proto")]
    fn decode_envelope(&self, topic: &str, raw: &[u8]) -> Result<Event, DecodeError> {
        use prost::Message;
        use proto::mesh_packet::PayloadVariant;

        let envelope = proto::ServiceEnvelope::decode(raw)?;
        let packet = envelope.packet.ok_or(DecodeError::MissingField("packet"))?;

        let (data, encrypted_len) = match packet.payload_variant {
            Some(PayloadVariant::Decoded(data)) => (Some(data), 0),
            Some(PayloadVariant::Encrypted(cipher)) => (
                self.try_decrypt(packet.id, packet.from, &cipher),
                cipher.len(),
            ),
            None => (None, 0),
        };
        let payload = match data {
            Some(data) => port_payload(data)?,
            None => Payload::Unknown(serde_json::json!({
                "encrypted": encrypted_len > 0,
                "length": encrypted_len,
            })),
        };

        let mut event = Event::new(topic, payload);
        event.encoding = Encoding::Protobuf;
        event.id = (packet.id != 0).then_some(packet.id);
        event.from = Some(NodeId::new(packet.from));
        event.to = Some(NodeId::new(packet.to));
        event.sender = if envelope.gateway_id.is_empty() {
            None
        } else {
            envelope.gateway_id.parse().ok()
        };
        event.channel = Some(if envelope.channel_id.is_empty() {
            packet.channel.to_string()
        } else {
            envelope.channel_id
        });
        if packet.rx_time != 0 {
            event.timestamp = i64::from(packet.rx_time);
        } else {
            event.timestamp = Utc::now().timestamp();
        }
        event.hop_limit = Some(packet.hop_limit);
        event.hop_start = Some(packet.hop_start);
        event.rssi = (packet.rx_rssi != 0).then_some(packet.rx_rssi);
        event.snr = (packet.rx_rssi != 0 || packet.rx_snr != 0.0).then_some(packet.rx_snr);
        Ok(event)
    }

    #[cfg(not(feature = "meshtastic-proto"))]
    fn decode_envelope(&self, topic: &str, _raw: &[u8]) -> Result<Event, DecodeError> {
        Err(DecodeError::UnhandledTopic(topic.to_string()))
    }

    /// Try each channel key in order. A key is accepted only when the
    /// plaintext parses as `Data` with a known, non-zero port number.
    #[cfg(feature = "meshtastic-proto")]
    fn try_decrypt(&self, packet_id: u32, from: u32, cipher: &[u8]) -> Option<proto::Data> {
        use prost::Message;

        if cipher.is_empty() {
            return None;
        }
        for (idx, key) in self.keys.iter().enumerate() {
            let plain = key.apply(packet_id, from, cipher);
            match proto::Data::decode(plain.as_slice()) {
                Ok(data)
                    if data.portnum != 0 && proto::PortNum::try_from(data.portnum).is_ok() =>
                {
                    trace!("Packet {:08x} decrypted with channel key #{}", packet_id, idx);
                    return Some(data);
                }
                _ => continue,
            }
        }
        debug!(
            "Packet {:08x} from {:08x} did not decrypt with any of {} channel key(s)",
            packet_id,
            from,
            self.keys.len()
        );
        None
    }
}

#[cfg(feature = "meshtastic-proto")]
fn port_payload(data: proto::Data) -> Result<Payload, DecodeError> {
    use prost::Message;
    use proto::PortNum;

    let port = PortNum::try_from(data.portnum).unwrap_or(PortNum::UnknownApp);
    let body = data.payload;
    let payload = match port {
        PortNum::TextMessageApp => Payload::Text(TextPayload {
            text: std::str::from_utf8(&body)?.to_string(),
        }),
        PortNum::NodeinfoApp => Payload::NodeInfo(proto::User::decode(body)?.into()),
        PortNum::PositionApp => Payload::Position(proto::Position::decode(body)?.into()),
        PortNum::TelemetryApp => Payload::Telemetry(proto::Telemetry::decode(body)?.into()),
        PortNum::NeighborinfoApp => {
            Payload::NeighborInfo(proto::NeighborInfo::decode(body)?.into())
        }
        PortNum::TracerouteApp => {
            Payload::Traceroute(proto::RouteDiscovery::decode(body)?.into())
        }
        PortNum::MapReportApp => Payload::MapReport(proto::MapReport::decode(body)?.into()),
        PortNum::RoutingApp => Payload::Routing(proto::Routing::decode(body)?.into()),
        other => Payload::Unknown(serde_json::json!({
            "portnum": data.portnum,
            "port": format!("{:?}", other),
            "length": body.len(),
        })),
    };
    Ok(payload)
}

fn json_payload(kind: &str, body: Value) -> Result<Payload, DecodeError> {
    let payload = match kind {
        "nodeinfo" => Payload::NodeInfo(serde_json::from_value(body)?),
        "position" => Payload::Position(serde_json::from_value(body)?),
        "telemetry" => Payload::Telemetry(serde_json::from_value(body)?),
        "text" | "sendtext" => match body {
            Value::String(text) => Payload::Text(TextPayload { text }),
            other => Payload::Text(serde_json::from_value(other)?),
        },
        "traceroute" => Payload::Traceroute(serde_json::from_value(body)?),
        "neighborinfo" => Payload::NeighborInfo(serde_json::from_value(body)?),
        "mapreport" => Payload::MapReport(serde_json::from_value(body)?),
        "routing" => Payload::Routing(serde_json::from_value(body)?),
        _ => Payload::Unknown(body),
    };
    Ok(payload)
}

fn json_u32(obj: &Map<String, Value>, key: &str) -> Option<u32> {
    obj.get(key)
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
}

fn json_node_id(
    obj: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<NodeId>, DecodeError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => NodeId::from_json(v)
            .map(Some)
            .map_err(|source| DecodeError::InvalidNodeId { field, source }),
    }
}
