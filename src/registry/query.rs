//! Read-only projections consumed by the renderer and the CLI.

use serde::Serialize;

use super::logs::{ChatChannel, TelemetryRecord, TracerouteRecord};
use super::node::Node;
use super::Registry;
use crate::geo::distance_km;
use crate::graph::{build_graph, GraphNode};
use crate::meshtastic::NodeId;
use crate::metrics;

/// Node list filter. Name matches are exact and case-sensitive.
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub active_only: bool,
    pub shortname: Option<String>,
    pub longname: Option<String>,
}

impl NodeFilter {
    pub fn active() -> Self {
        NodeFilter {
            active_only: true,
            ..Default::default()
        }
    }

    pub fn matches(&self, node: &Node) -> bool {
        if self.active_only && !node.active {
            return false;
        }
        if let Some(s) = &self.shortname {
            if &node.shortname != s {
                return false;
            }
        }
        if let Some(l) = &self.longname {
            if &node.longname != l {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub active_nodes: usize,
    pub total_nodes: usize,
    pub chat_messages: usize,
    pub raw_messages: usize,
    pub telemetry: usize,
    pub traceroutes: usize,
    pub ingest: metrics::Snapshot,
}

impl Registry {
    pub fn list_nodes(&self, filter: &NodeFilter) -> Vec<&Node> {
        self.nodes().filter(|n| filter.matches(n)).collect()
    }

    /// Look up by any id spelling or exact name.
    pub fn node(&self, raw: &str) -> Option<&Node> {
        let id = self.resolve_node_id(raw).ok()?;
        self.get(&id)
    }

    /// Distance in km from the local node, when both have positions.
    pub fn distance_from_local(&self, node: &Node) -> Option<f64> {
        let local = self.local_node()?.position.as_ref()?;
        distance_km(local, node.position.as_ref()?)
    }

    /// Telemetry newest-first, for one node or all.
    pub fn telemetry(&self, id: Option<NodeId>) -> Vec<&TelemetryRecord> {
        match id {
            Some(id) => self
                .telemetry_by_node
                .get(&id)
                .map(|v| v.iter().collect())
                .unwrap_or_default(),
            None => self.telemetry_log().iter().collect(),
        }
    }

    /// Traceroutes newest-first, for one originating node or all.
    pub fn traceroutes(&self, id: Option<NodeId>) -> Vec<&TracerouteRecord> {
        match id {
            Some(id) => self
                .traceroutes_by_node
                .get(&id)
                .map(|v| v.iter().collect())
                .unwrap_or_default(),
            None => self.traceroute_log().iter().collect(),
        }
    }

    /// Chat channels by id; a single channel when `channel` is given.
    pub fn chat_channels(&self, channel: Option<&str>) -> Vec<(&str, &ChatChannel)> {
        self.chat()
            .channels
            .iter()
            .filter(|(key, _)| channel.map(|c| c == key.as_str()).unwrap_or(true))
            .map(|(key, ch)| (key.as_str(), ch))
            .collect()
    }

    pub fn stats(&self) -> Stats {
        Stats {
            active_nodes: self.nodes().filter(|n| n.active).count(),
            total_nodes: self.len(),
            chat_messages: self.chat().total_messages(),
            raw_messages: self.messages().len(),
            telemetry: self.telemetry_log().len(),
            traceroutes: self.traceroute_log().len(),
            ingest: metrics::snapshot(),
        }
    }

    /// Neighbour graph rooted at the local node.
    pub fn graph(&self, max_depth: usize) -> Option<GraphNode> {
        build_graph(self, self.local_id(), max_depth)
    }
}
