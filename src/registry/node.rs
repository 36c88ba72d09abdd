use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::meshtastic::{ModelCode, NeighborInfo, NodeId, Position, Telemetry};

pub const UNKNOWN_SHORTNAME: &str = "UNK";
pub const UNKNOWN_LONGNAME: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub shortname: String,
    pub longname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware: Option<ModelCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<ModelCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_position_update: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<Telemetry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neighborinfo: Option<NeighborInfo>,
    #[serde(default)]
    pub active: bool,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub first_seen: Option<DateTime<Utc>>,
    /// Seconds between the previous sighting and `last_seen`.
    #[serde(default)]
    pub since: Option<i64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub tc2_bbs: bool,
}

impl Node {
    /// Placeholder for a node we have heard of but know nothing about yet.
    pub fn skeleton(id: NodeId, now: DateTime<Utc>) -> Self {
        Node {
            id,
            shortname: UNKNOWN_SHORTNAME.to_string(),
            longname: UNKNOWN_LONGNAME.to_string(),
            hardware: None,
            role: None,
            position: None,
            last_position_update: None,
            telemetry: None,
            neighborinfo: None,
            active: true,
            last_seen: Some(now),
            first_seen: Some(now),
            since: Some(0),
            tc2_bbs: false,
        }
    }

    /// The channel-wide broadcast destination. Never active.
    pub fn broadcast() -> Self {
        Node {
            shortname: "ALL".to_string(),
            longname: "Everyone".to_string(),
            active: false,
            last_seen: None,
            first_seen: None,
            since: None,
            ..Node::skeleton(NodeId::BROADCAST, Utc::now())
        }
    }

    pub fn has_placeholder_names(&self) -> bool {
        self.shortname == UNKNOWN_SHORTNAME || self.longname == UNKNOWN_LONGNAME
    }

    /// Neighbour ids this node reported hearing.
    pub fn heard(&self) -> impl Iterator<Item = (NodeId, f32)> + '_ {
        self.neighborinfo
            .iter()
            .flat_map(|ni| ni.neighbors.iter().map(|n| (n.node_id, n.snr)))
    }
}

// A corrupt timestamp should cost one field, not the whole nodes.json.
fn lenient_datetime<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Loose {
        Text(String),
        Other(serde::de::IgnoredAny),
    }

    Ok(match Option::<Loose>::deserialize(deserializer)? {
        Some(Loose::Text(s)) => match DateTime::parse_from_rfc3339(&s) {
            Ok(dt) => Some(dt.with_timezone(&Utc)),
            Err(e) => {
                log::warn!("Discarding unparsable timestamp '{}': {}", s, e);
                None
            }
        },
        _ => None,
    })
}

/// Field names a [`NodeUpdate`] can carry; used by `ignore_update_keys`.
pub const UPDATE_KEYS: &[&str] = &[
    "shortname",
    "longname",
    "hardware",
    "role",
    "position",
    "last_position_update",
    "telemetry",
    "neighborinfo",
    "tc2_bbs",
];

/// Partial node record produced by the reconciler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeUpdate {
    pub shortname: Option<String>,
    pub longname: Option<String>,
    pub hardware: Option<ModelCode>,
    pub role: Option<ModelCode>,
    pub position: Option<Position>,
    pub last_position_update: Option<DateTime<Utc>>,
    pub telemetry: Option<Telemetry>,
    pub neighborinfo: Option<NeighborInfo>,
    pub tc2_bbs: Option<bool>,
}

impl NodeUpdate {
    /// Drop fields named in an override's `ignore_update_keys`.
    pub fn without_keys(mut self, keys: &[String]) -> Self {
        for key in keys {
            match key.as_str() {
                "shortname" => self.shortname = None,
                "longname" => self.longname = None,
                "hardware" => self.hardware = None,
                "role" => self.role = None,
                "position" => self.position = None,
                "last_position_update" => self.last_position_update = None,
                "telemetry" => self.telemetry = None,
                "neighborinfo" => self.neighborinfo = None,
                "tc2_bbs" => self.tc2_bbs = None,
                other => log::debug!("Ignoring unknown update key '{}'", other),
            }
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == NodeUpdate::default()
    }

    pub(crate) fn apply_to(self, node: &mut Node) {
        if let Some(v) = self.shortname {
            node.shortname = v;
        }
        if let Some(v) = self.longname {
            node.longname = v;
        }
        if let Some(v) = self.hardware {
            node.hardware = Some(v);
        }
        if let Some(v) = self.role {
            node.role = Some(v);
        }
        if let Some(v) = self.position {
            node.position = Some(v);
        }
        if let Some(v) = self.last_position_update {
            node.last_position_update = Some(v);
        }
        if let Some(v) = self.telemetry {
            node.telemetry = Some(v);
        }
        if let Some(v) = self.neighborinfo {
            node.neighborinfo = Some(v);
        }
        if let Some(v) = self.tc2_bbs {
            node.tc2_bbs = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_last_seen_is_dropped_not_fatal() {
        let raw = r#"{"id":"da639058","shortname":"A","longname":"B","active":true,"last_seen":"yesterday-ish","first_seen":12}"#;
        let node: Node = serde_json::from_str(raw).unwrap();
        assert!(node.last_seen.is_none());
        assert!(node.first_seen.is_none());
    }

    #[test]
    fn ignored_keys_are_stripped() {
        let update = NodeUpdate {
            shortname: Some("NEW".into()),
            longname: Some("New Name".into()),
            ..Default::default()
        }
        .without_keys(&["shortname".to_string()]);
        assert_eq!(update.shortname, None);
        assert_eq!(update.longname.as_deref(), Some("New Name"));
    }

    #[test]
    fn every_update_key_is_strippable() {
        let keys: Vec<String> = UPDATE_KEYS.iter().map(|k| k.to_string()).collect();
        let update = NodeUpdate {
            shortname: Some("x".into()),
            longname: Some("x".into()),
            hardware: Some(ModelCode::Code(1)),
            role: Some(ModelCode::Code(1)),
            position: Some(Position::default()),
            last_position_update: Some(Utc::now()),
            telemetry: Some(Telemetry::default()),
            neighborinfo: Some(NeighborInfo::default()),
            tc2_bbs: Some(true),
        };
        assert!(update.without_keys(&keys).is_empty());
    }
}
