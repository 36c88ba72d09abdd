//! Operator overrides loaded from `nodes-overrides.json`.
//!
//! ```json
//! {
//!   "da639058": { "shortname": "JTRC", "ignore_update_keys": ["shortname"] },
//!   "deadbeef": { "purge": true }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::node::Node;
use crate::meshtastic::{ModelCode, NodeId, Position};

pub type NodeOverrides = HashMap<NodeId, NodeOverride>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeOverride {
    /// Never keep this node in the registry.
    #[serde(default)]
    pub purge: bool,
    /// Update fields to drop before merging.
    #[serde(default)]
    pub ignore_update_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shortname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware: Option<ModelCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<ModelCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl NodeOverride {
    /// Force the pinned values onto a node after every merge.
    pub fn force(&self, node: &mut Node) {
        if let Some(v) = &self.shortname {
            node.shortname = v.clone();
        }
        if let Some(v) = &self.longname {
            node.longname = v.clone();
        }
        if let Some(v) = &self.hardware {
            node.hardware = Some(v.clone());
        }
        if let Some(v) = &self.role {
            node.role = Some(v.clone());
        }
        if let Some(v) = &self.position {
            node.position = Some(v.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_keyed_by_any_id_spelling() {
        let raw = r#"{"!DA639058":{"shortname":"JTRC"},"3735928559":{"purge":true}}"#;
        let map: NodeOverrides = serde_json::from_str(raw).unwrap();
        assert_eq!(
            map[&NodeId::new(0xda63_9058)].shortname.as_deref(),
            Some("JTRC")
        );
        assert!(map[&NodeId::new(0xdead_beef)].purge);
    }
}
