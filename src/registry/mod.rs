//! # Node Registry
//!
//! Authoritative in-memory state: every node ever heard, keyed by canonical
//! [`NodeId`] in display order, plus the chat, telemetry, traceroute and raw
//! message logs.
//!
//! Invariants held by every mutating method:
//!
//! - the local node and the broadcast node (`ffffffff`) are always present,
//!   and a `purge` override naming either is ignored;
//! - the broadcast node is never active;
//! - `first_seen` is set once and never changed;
//! - a node whose override says `purge` is never stored;
//! - every in-memory log stays within its [`LogLimits`] cap, and a per-node
//!   index never holds a record its global log has dropped.
//!
//! All methods that depend on the clock have an `_at` variant taking the
//! current time explicitly, which is what the tests use.

pub mod logs;
pub mod node;
pub mod overrides;
pub mod query;

use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use log::{debug, info, warn};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::LogsConfig;
use crate::meshtastic::{NodeId, NodeIdError, NodeRef};

pub use logs::{Chat, ChatChannel, ChatMessage, Envelope, RouteHop, TelemetryRecord, TracerouteRecord};
pub use node::{Node, NodeUpdate, UNKNOWN_LONGNAME, UNKNOWN_SHORTNAME, UPDATE_KEYS};
pub use overrides::{NodeOverride, NodeOverrides};
pub use query::{NodeFilter, Stats};

/// Registry shared between the ingest loop and the maintenance task.
pub type SharedRegistry = Arc<RwLock<Registry>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Created,
    Updated,
    Purged,
}

/// Caps on the in-memory logs. Chat is capped per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogLimits {
    pub messages: usize,
    pub chat: usize,
    pub telemetry: usize,
    pub traceroutes: usize,
}

impl Default for LogLimits {
    fn default() -> Self {
        LogLimits::from(&LogsConfig::default())
    }
}

impl From<&LogsConfig> for LogLimits {
    fn from(logs: &LogsConfig) -> Self {
        LogLimits {
            messages: logs.max_messages_in_memory,
            chat: logs.max_chat_in_memory,
            telemetry: logs.max_telemetry_in_memory,
            traceroutes: logs.max_traceroutes_in_memory,
        }
    }
}

/// Persisted state handed to [`Registry::restore`].
#[derive(Debug, Default)]
pub struct RestoredState {
    pub nodes: IndexMap<NodeId, Node>,
    pub chat: Option<Chat>,
    pub telemetry: VecDeque<TelemetryRecord>,
    pub traceroutes: VecDeque<TracerouteRecord>,
    pub overrides: NodeOverrides,
}

#[derive(Debug, Clone)]
pub struct Registry {
    local_id: NodeId,
    nodes: IndexMap<NodeId, Node>,
    overrides: NodeOverrides,
    chat: Chat,
    telemetry: VecDeque<TelemetryRecord>,
    telemetry_by_node: HashMap<NodeId, VecDeque<TelemetryRecord>>,
    traceroutes: VecDeque<TracerouteRecord>,
    traceroutes_by_node: HashMap<NodeId, VecDeque<TracerouteRecord>>,
    messages: VecDeque<String>,
    limits: LogLimits,
}

impl Registry {
    pub fn new(local_id: NodeId) -> Self {
        Self::new_at(local_id, Utc::now())
    }

    pub fn new_at(local_id: NodeId, now: DateTime<Utc>) -> Self {
        let mut registry = Registry {
            local_id,
            nodes: IndexMap::new(),
            overrides: NodeOverrides::new(),
            chat: Chat::default(),
            telemetry: VecDeque::new(),
            telemetry_by_node: HashMap::new(),
            traceroutes: VecDeque::new(),
            traceroutes_by_node: HashMap::new(),
            messages: VecDeque::new(),
            limits: LogLimits::default(),
        };
        registry.ensure_sentinels(now);
        registry
    }

    /// Rebuild from persisted state, re-deriving the per-node log indices.
    pub fn restore(local_id: NodeId, state: RestoredState, now: DateTime<Utc>) -> Self {
        let mut registry = Registry::new_at(local_id, now);
        registry.nodes = state.nodes;
        if let Some(chat) = state.chat {
            registry.chat = chat;
        }
        for record in &state.telemetry {
            registry
                .telemetry_by_node
                .entry(record.envelope.from)
                .or_default()
                .push_back(record.clone());
        }
        for record in &state.traceroutes {
            registry
                .traceroutes_by_node
                .entry(record.envelope.from)
                .or_default()
                .push_back(record.clone());
        }
        registry.telemetry = state.telemetry;
        registry.traceroutes = state.traceroutes;
        registry.set_overrides(state.overrides, now);
        registry.ensure_sentinels(now);
        registry.sort_by_shortname();
        registry
    }

    /// Set the log caps, dropping the oldest records already over them.
    pub fn with_limits(mut self, limits: LogLimits) -> Self {
        self.limits = limits;
        self.messages.truncate(limits.messages);
        self.chat.trim(limits.chat);
        cap_log(
            &mut self.telemetry,
            &mut self.telemetry_by_node,
            limits.telemetry,
            |r| r.envelope.from,
        );
        cap_log(
            &mut self.traceroutes,
            &mut self.traceroutes_by_node,
            limits.traceroutes,
            |r| r.envelope.from,
        );
        self
    }

    pub fn limits(&self) -> LogLimits {
        self.limits
    }

    fn ensure_sentinels(&mut self, now: DateTime<Utc>) {
        if !self.nodes.contains_key(&self.local_id) {
            self.nodes
                .insert(self.local_id, Node::skeleton(self.local_id, now));
        }
        let broadcast = self
            .nodes
            .entry(NodeId::BROADCAST)
            .or_insert_with(Node::broadcast);
        broadcast.active = false;
    }

    /// Drop a purged node and its per-node log indices. The global logs keep
    /// its history until it ages out.
    fn remove_purged(&mut self, id: NodeId) {
        if self.nodes.shift_remove(&id).is_some() {
            info!("Purged node {} per overrides", id);
        }
        self.telemetry_by_node.remove(&id);
        self.traceroutes_by_node.remove(&id);
    }

    /// Install overrides; purged nodes are dropped and pinned values forced at once.
    pub fn set_overrides(&mut self, mut overrides: NodeOverrides, now: DateTime<Utc>) {
        for id in [self.local_id, NodeId::BROADCAST] {
            if let Some(o) = overrides.get_mut(&id).filter(|o| o.purge) {
                warn!("Ignoring purge override for sentinel node {}", id);
                o.purge = false;
            }
        }
        self.overrides = overrides;
        let purged: Vec<NodeId> = self
            .overrides
            .iter()
            .filter(|(_, o)| o.purge)
            .map(|(id, _)| *id)
            .collect();
        for id in purged {
            self.remove_purged(id);
        }
        for (id, node) in self.nodes.iter_mut() {
            if let Some(o) = self.overrides.get(id) {
                o.force(node);
            }
        }
        self.ensure_sentinels(now);
    }

    pub fn overrides(&self) -> &NodeOverrides {
        &self.overrides
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    pub fn local_node(&self) -> Option<&Node> {
        self.nodes.get(&self.local_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Nodes in display order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub(crate) fn node_map(&self) -> &IndexMap<NodeId, Node> {
        &self.nodes
    }

    pub fn find_by_short_name(&self, shortname: &str) -> Option<&Node> {
        self.nodes.values().find(|n| n.shortname == shortname)
    }

    pub fn find_by_long_name(&self, longname: &str) -> Option<&Node> {
        self.nodes.values().find(|n| n.longname == longname)
    }

    /// Resolve an operator- or wire-supplied id: numeric/hex spellings first,
    /// then an exact shortname, then an exact longname.
    pub fn resolve_node_id(&self, raw: &str) -> Result<NodeId, NodeIdError> {
        match raw.parse::<NodeId>() {
            Ok(id) => Ok(id),
            Err(err) => self
                .find_by_short_name(raw)
                .or_else(|| self.find_by_long_name(raw))
                .map(|n| n.id)
                .ok_or(err),
        }
    }

    pub fn resolve_node_ref(&self, raw: &NodeRef) -> Result<NodeId, NodeIdError> {
        match raw {
            NodeRef::Number(n) => NodeId::from_u64(*n),
            NodeRef::Text(s) => self.resolve_node_id(s),
        }
    }

    pub fn merge(&mut self, id: NodeId, update: NodeUpdate) -> MergeOutcome {
        self.merge_at(id, update, Utc::now())
    }

    /// Merge an update into a node, creating a skeleton if needed, and mark
    /// it active and seen at `now`.
    pub fn merge_at(&mut self, id: NodeId, update: NodeUpdate, now: DateTime<Utc>) -> MergeOutcome {
        let over = self.overrides.get(&id);
        if over.map(|o| o.purge).unwrap_or(false) {
            self.remove_purged(id);
            return MergeOutcome::Purged;
        }
        let update = match over {
            Some(o) if !o.ignore_update_keys.is_empty() => update.without_keys(&o.ignore_update_keys),
            _ => update,
        };

        let mut outcome = MergeOutcome::Updated;
        let node = self.nodes.entry(id).or_insert_with(|| {
            outcome = MergeOutcome::Created;
            Node::skeleton(id, now)
        });
        update.apply_to(node);

        node.since = Some(
            node.last_seen
                .map(|prev| (now - prev).num_seconds().max(0))
                .unwrap_or(0),
        );
        node.last_seen = Some(now);
        if node.first_seen.is_none() {
            node.first_seen = Some(now);
        }
        node.active = !id.is_broadcast();
        if let Some(o) = over {
            o.force(node);
        }
        if outcome == MergeOutcome::Created {
            debug!("New node {} ({})", id, node.longname);
        }
        outcome
    }

    /// Apply looked-up names without touching activity or timestamps.
    pub fn apply_names(&mut self, id: NodeId, update: NodeUpdate) -> bool {
        let update = match self.overrides.get(&id) {
            Some(o) => update.without_keys(&o.ignore_update_keys),
            None => update,
        };
        let Some(node) = self.nodes.get_mut(&id) else {
            return false;
        };
        update.apply_to(node);
        if let Some(o) = self.overrides.get(&id) {
            o.force(node);
        }
        true
    }

    pub fn prune(&mut self, threshold_secs: u64) -> usize {
        self.prune_at(threshold_secs, Utc::now())
    }

    /// Deactivate nodes not seen for `threshold_secs`. Returns how many
    /// nodes went from active to inactive.
    pub fn prune_at(&mut self, threshold_secs: u64, now: DateTime<Utc>) -> usize {
        let threshold = i64::try_from(threshold_secs).unwrap_or(i64::MAX);
        let mut deactivated = 0;
        for node in self.nodes.values_mut() {
            if !node.active {
                continue;
            }
            let stale = match node.last_seen {
                Some(seen) => (now - seen).num_seconds() >= threshold,
                None => true,
            };
            if stale || node.id.is_broadcast() {
                node.active = false;
                deactivated += 1;
                debug!("Node {} ({}) is now inactive", node.id, node.shortname);
            }
        }
        deactivated
    }

    /// Stable sort by shortname; ties keep insertion order.
    pub fn sort_by_shortname(&mut self) {
        self.nodes.sort_by(|_, a, _, b| a.shortname.cmp(&b.shortname));
    }

    /// Fresh geocoding result already stored on a node, if any.
    pub fn cached_geocode(
        &self,
        id: &NodeId,
        now: DateTime<Utc>,
        max_age_minutes: i64,
    ) -> Option<(serde_json::Value, DateTime<Utc>)> {
        let position = self.nodes.get(id)?.position.as_ref()?;
        let at = position.last_geocoding?;
        let geocoded = position.geocoded.clone()?;
        (now - at < Duration::minutes(max_age_minutes)).then_some((geocoded, at))
    }

    /// Up to `limit` nodes still carrying placeholder names.
    pub fn nodes_missing_names(&self, limit: usize) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| !n.id.is_broadcast() && n.has_placeholder_names())
            .map(|n| n.id)
            .take(limit)
            .collect()
    }

    pub fn chat(&self) -> &Chat {
        &self.chat
    }

    pub fn push_chat(&mut self, message: ChatMessage) {
        self.chat.push(message);
        self.chat.trim(self.limits.chat);
    }

    pub fn push_telemetry(&mut self, record: TelemetryRecord) {
        self.telemetry_by_node
            .entry(record.envelope.from)
            .or_default()
            .push_front(record.clone());
        self.telemetry.push_front(record);
        cap_log(
            &mut self.telemetry,
            &mut self.telemetry_by_node,
            self.limits.telemetry,
            |r| r.envelope.from,
        );
    }

    pub fn push_traceroute(&mut self, record: TracerouteRecord) {
        self.traceroutes_by_node
            .entry(record.envelope.from)
            .or_default()
            .push_front(record.clone());
        self.traceroutes.push_front(record);
        cap_log(
            &mut self.traceroutes,
            &mut self.traceroutes_by_node,
            self.limits.traceroutes,
            |r| r.envelope.from,
        );
    }

    /// Keep a raw message line, dropping the oldest beyond the cap.
    pub fn push_message(&mut self, line: String) {
        self.messages.push_front(line);
        self.messages.truncate(self.limits.messages);
    }

    pub fn telemetry_log(&self) -> &VecDeque<TelemetryRecord> {
        &self.telemetry
    }

    pub fn traceroute_log(&self) -> &VecDeque<TracerouteRecord> {
        &self.traceroutes
    }

    pub fn messages(&self) -> &VecDeque<String> {
        &self.messages
    }
}

/// Drop the oldest records beyond `cap` from a newest-first log. The
/// globally oldest record is also the oldest in its node's index, so the
/// index loses its back entry.
fn cap_log<T>(
    log: &mut VecDeque<T>,
    by_node: &mut HashMap<NodeId, VecDeque<T>>,
    cap: usize,
    from: fn(&T) -> NodeId,
) {
    while log.len() > cap {
        let Some(oldest) = log.pop_back() else {
            break;
        };
        let id = from(&oldest);
        if let Some(per_node) = by_node.get_mut(&id) {
            per_node.pop_back();
            if per_node.is_empty() {
                by_node.remove(&id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    const LOCAL: NodeId = NodeId::new(0x4355_f528);
    const A: NodeId = NodeId::new(0xda63_9058);

    fn names(short: &str, long: &str) -> NodeUpdate {
        NodeUpdate {
            shortname: Some(short.into()),
            longname: Some(long.into()),
            ..Default::default()
        }
    }

    #[test]
    fn sentinels_exist_and_broadcast_stays_inactive() {
        let mut reg = Registry::new_at(LOCAL, t(0));
        assert!(reg.get(&LOCAL).is_some());
        let bc = reg.get(&NodeId::BROADCAST).unwrap();
        assert_eq!(bc.longname, "Everyone");
        assert!(!bc.active);

        reg.merge_at(NodeId::BROADCAST, NodeUpdate::default(), t(5));
        assert!(!reg.get(&NodeId::BROADCAST).unwrap().active);
    }

    #[test]
    fn merge_creates_skeleton_and_keeps_first_seen() {
        let mut reg = Registry::new_at(LOCAL, t(0));
        assert_eq!(reg.merge_at(A, NodeUpdate::default(), t(10)), MergeOutcome::Created);
        let node = reg.get(&A).unwrap();
        assert_eq!(node.shortname, UNKNOWN_SHORTNAME);
        assert_eq!(node.first_seen, Some(t(10)));
        assert!(node.active);

        assert_eq!(reg.merge_at(A, names("JTRC", "Node JTRC"), t(70)), MergeOutcome::Updated);
        let node = reg.get(&A).unwrap();
        assert_eq!(node.first_seen, Some(t(10)));
        assert_eq!(node.last_seen, Some(t(70)));
        assert_eq!(node.since, Some(60));
        assert_eq!(node.shortname, "JTRC");
    }

    #[test]
    fn prune_uses_threshold_inclusive() {
        let mut reg = Registry::new_at(LOCAL, t(0));
        reg.merge_at(A, NodeUpdate::default(), t(0));
        assert_eq!(reg.prune_at(100, t(99)), 0);
        assert!(reg.get(&A).unwrap().active);
        // local node also went stale
        assert_eq!(reg.prune_at(100, t(100)), 2);
        assert!(!reg.get(&A).unwrap().active);
        // re-seen brings it back
        reg.merge_at(A, NodeUpdate::default(), t(200));
        assert!(reg.get(&A).unwrap().active);
    }

    #[test]
    fn purge_and_ignore_keys_and_forced_values() {
        let mut reg = Registry::new_at(LOCAL, t(0));
        reg.merge_at(A, names("OLD", "Old"), t(0));
        let purged = NodeId::new(0xdead_beef);
        reg.merge_at(purged, NodeUpdate::default(), t(0));

        let mut overrides = NodeOverrides::new();
        overrides.insert(purged, NodeOverride { purge: true, ..Default::default() });
        overrides.insert(
            A,
            NodeOverride {
                ignore_update_keys: vec!["shortname".into()],
                longname: Some("Pinned".into()),
                ..Default::default()
            },
        );
        reg.set_overrides(overrides, t(1));
        assert!(reg.get(&purged).is_none());
        assert_eq!(reg.get(&A).unwrap().longname, "Pinned");

        assert_eq!(reg.merge_at(purged, NodeUpdate::default(), t(2)), MergeOutcome::Purged);
        assert!(reg.get(&purged).is_none());

        reg.merge_at(A, names("NEW", "Fresh"), t(3));
        let a = reg.get(&A).unwrap();
        assert_eq!(a.shortname, "OLD");
        assert_eq!(a.longname, "Pinned");
    }

    #[test]
    fn sort_is_stable_on_ties() {
        let mut reg = Registry::new_at(LOCAL, t(0));
        let b = NodeId::new(2);
        let c = NodeId::new(3);
        reg.merge_at(b, names("ZZZ", "first zzz"), t(0));
        reg.merge_at(c, names("ZZZ", "second zzz"), t(0));
        reg.merge_at(A, names("AAA", "a"), t(0));
        reg.sort_by_shortname();
        let order: Vec<NodeId> = reg.nodes().map(|n| n.id).collect();
        let pos = |id| order.iter().position(|x| *x == id).unwrap();
        assert!(pos(A) < pos(b));
        assert!(pos(b) < pos(c));
    }

    #[test]
    fn resolves_names_after_ids() {
        let mut reg = Registry::new_at(LOCAL, t(0));
        reg.merge_at(A, names("JTRC", "Node JTRC"), t(0));
        assert_eq!(reg.resolve_node_id("!da639058").unwrap(), A);
        assert_eq!(reg.resolve_node_id("JTRC").unwrap(), A);
        assert_eq!(reg.resolve_node_id("Node JTRC").unwrap(), A);
        assert!(reg.resolve_node_id("jtrc").is_err());
    }

    fn limits(cap: usize) -> LogLimits {
        LogLimits {
            messages: cap,
            chat: cap,
            telemetry: cap,
            traceroutes: cap,
        }
    }

    fn envelope(from: NodeId, timestamp: i64) -> Envelope {
        Envelope {
            id: None,
            from,
            to: None,
            sender: None,
            channel: None,
            timestamp,
            hops_away: None,
            rssi: None,
            snr: None,
        }
    }

    fn telemetry(from: NodeId, timestamp: i64) -> TelemetryRecord {
        TelemetryRecord {
            envelope: envelope(from, timestamp),
            payload: Default::default(),
        }
    }

    fn traceroute(from: NodeId, timestamp: i64) -> TracerouteRecord {
        TracerouteRecord {
            envelope: envelope(from, timestamp),
            route: vec![],
            route_ids: vec![],
        }
    }

    fn stamps<'a>(records: impl IntoIterator<Item = &'a Envelope>) -> Vec<i64> {
        records.into_iter().map(|e| e.timestamp).collect()
    }

    #[test]
    fn prune_keeps_fresh_nodes_and_deactivates_stale_ones() {
        let mut reg = Registry::new_at(LOCAL, t(0));
        let stale = NodeId::new(0x0000_0bad);
        reg.merge_at(stale, NodeUpdate::default(), t(0));
        reg.merge_at(A, NodeUpdate::default(), t(80));
        reg.merge_at(LOCAL, NodeUpdate::default(), t(80));

        assert_eq!(reg.prune_at(100, t(120)), 1);
        assert!(!reg.get(&stale).unwrap().active);
        assert!(reg.get(&A).unwrap().active);
        assert!(reg.get(&LOCAL).unwrap().active);
        // already inactive nodes are not counted again
        assert_eq!(reg.prune_at(100, t(120)), 0);
    }

    #[test]
    fn prune_deactivates_active_node_never_seen() {
        let mut never_seen = Node::skeleton(A, t(0));
        never_seen.last_seen = None;
        let mut nodes = IndexMap::new();
        nodes.insert(A, never_seen);
        let mut reg = Registry::restore(
            LOCAL,
            RestoredState {
                nodes,
                ..Default::default()
            },
            t(0),
        );
        assert!(reg.get(&A).unwrap().active);

        assert_eq!(reg.prune_at(3600, t(1)), 1);
        assert!(!reg.get(&A).unwrap().active);
        assert!(reg.get(&LOCAL).unwrap().active);
    }

    #[test]
    fn message_log_is_capped() {
        let mut reg = Registry::new_at(LOCAL, t(0)).with_limits(limits(2));
        for i in 0..5 {
            reg.push_message(format!("m{i}"));
        }
        assert_eq!(reg.messages().iter().cloned().collect::<Vec<_>>(), vec!["m4", "m3"]);
    }

    #[test]
    fn chat_is_capped_per_channel() {
        let mut reg = Registry::new_at(LOCAL, t(0)).with_limits(limits(2));
        for i in 0..5 {
            reg.push_chat(ChatMessage {
                envelope: envelope(A, i),
                text: format!("c{i}"),
            });
        }
        let mut side = envelope(A, 9);
        side.channel = Some("1".into());
        reg.push_chat(ChatMessage {
            envelope: side,
            text: "side".into(),
        });

        let general: Vec<&str> = reg.chat().channels["0"]
            .messages
            .iter()
            .map(|m| m.text.as_str())
            .collect();
        assert_eq!(general, vec!["c4", "c3"]);
        assert_eq!(reg.chat().channels["1"].messages.len(), 1);
    }

    #[test]
    fn telemetry_is_capped_with_its_node_index() {
        let b = NodeId::new(0x0000_00bb);
        let mut reg = Registry::new_at(LOCAL, t(0)).with_limits(limits(3));
        reg.push_telemetry(telemetry(b, 1));
        reg.push_telemetry(telemetry(A, 2));
        reg.push_telemetry(telemetry(A, 3));
        reg.push_telemetry(telemetry(A, 4));
        reg.push_telemetry(telemetry(A, 5));

        assert_eq!(stamps(reg.telemetry_log().iter().map(|r| &r.envelope)), vec![5, 4, 3]);
        assert_eq!(stamps(reg.telemetry(Some(A)).into_iter().map(|r| &r.envelope)), vec![5, 4, 3]);
        assert!(reg.telemetry(Some(b)).is_empty());
        assert!(!reg.telemetry_by_node.contains_key(&b));
    }

    #[test]
    fn traceroutes_are_capped_with_their_node_index() {
        let b = NodeId::new(0x0000_00bb);
        let mut reg = Registry::new_at(LOCAL, t(0)).with_limits(limits(2));
        reg.push_traceroute(traceroute(A, 1));
        reg.push_traceroute(traceroute(b, 2));
        reg.push_traceroute(traceroute(A, 3));

        assert_eq!(stamps(reg.traceroute_log().iter().map(|r| &r.envelope)), vec![3, 2]);
        assert_eq!(stamps(reg.traceroutes(Some(A)).into_iter().map(|r| &r.envelope)), vec![3]);
        assert_eq!(stamps(reg.traceroutes(Some(b)).into_iter().map(|r| &r.envelope)), vec![2]);
    }

    #[test]
    fn restored_logs_are_trimmed_to_limits() {
        let state = RestoredState {
            telemetry: (0..4).rev().map(|i| telemetry(A, i)).collect(),
            traceroutes: (0..4).rev().map(|i| traceroute(A, i)).collect(),
            ..Default::default()
        };
        let reg = Registry::restore(LOCAL, state, t(0)).with_limits(limits(2));
        assert_eq!(stamps(reg.telemetry_log().iter().map(|r| &r.envelope)), vec![3, 2]);
        assert_eq!(reg.telemetry(Some(A)).len(), 2);
        assert_eq!(reg.traceroutes(Some(A)).len(), 2);
    }

    #[test]
    fn purge_drops_per_node_indices() {
        let mut reg = Registry::new_at(LOCAL, t(0));
        reg.merge_at(A, NodeUpdate::default(), t(0));
        reg.push_telemetry(telemetry(A, 1));
        reg.push_traceroute(traceroute(A, 1));

        let mut overrides = NodeOverrides::new();
        overrides.insert(A, NodeOverride { purge: true, ..Default::default() });
        reg.set_overrides(overrides, t(1));

        assert!(reg.get(&A).is_none());
        assert!(reg.telemetry(Some(A)).is_empty());
        assert!(reg.traceroutes(Some(A)).is_empty());
        // global history stays until it ages out
        assert_eq!(reg.telemetry_log().len(), 1);
    }

    #[test]
    fn purge_override_cannot_remove_sentinels() {
        let mut reg = Registry::new_at(LOCAL, t(0));
        let mut overrides = NodeOverrides::new();
        overrides.insert(LOCAL, NodeOverride { purge: true, ..Default::default() });
        overrides.insert(
            NodeId::BROADCAST,
            NodeOverride { purge: true, ..Default::default() },
        );
        reg.set_overrides(overrides, t(1));

        assert!(reg.get(&LOCAL).is_some());
        assert!(reg.get(&NodeId::BROADCAST).is_some());
        assert_eq!(
            reg.merge_at(LOCAL, names("HOME", "Home base"), t(2)),
            MergeOutcome::Updated
        );
        assert_eq!(reg.get(&LOCAL).unwrap().shortname, "HOME");
    }
}
