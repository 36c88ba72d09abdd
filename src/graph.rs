//! Bounded neighbour graph rooted at one node.
//!
//! The result is a tree: a node heard by several others shows up once per
//! branch. Expansion is iterative over an arena of entries, so deep or
//! cyclic neighbour reports cannot blow the stack.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::geo::distance_km;
use crate::meshtastic::NodeId;
use crate::registry::{Node, Registry};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphNode {
    pub id: NodeId,
    pub shortname: String,
    pub longname: String,
    pub active: bool,
    pub last_seen: Option<DateTime<Utc>>,
    /// SNR of the edge from the parent, as reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snr: Option<f32>,
    /// Distance to the parent when both have positions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
    pub neighbors_heard: Vec<GraphNode>,
    pub neighbors_heard_by: Vec<GraphNode>,
}

impl GraphNode {
    fn leaf(node: &Node, snr: Option<f32>, distance_km: Option<f64>) -> Self {
        GraphNode {
            id: node.id,
            shortname: node.shortname.clone(),
            longname: node.longname.clone(),
            active: node.active,
            last_seen: node.last_seen,
            snr,
            distance_km,
            neighbors_heard: Vec::new(),
            neighbors_heard_by: Vec::new(),
        }
    }

    /// Total number of entries in this subtree, root included.
    pub fn size(&self) -> usize {
        1 + self
            .neighbors_heard
            .iter()
            .chain(&self.neighbors_heard_by)
            .map(GraphNode::size)
            .sum::<usize>()
    }
}

struct Entry {
    id: NodeId,
    depth: usize,
    snr: Option<f32>,
    distance_km: Option<f64>,
    heard: Vec<usize>,
    heard_by: Vec<usize>,
}

/// Build the graph around `root`. `None` when the root is not in the registry.
///
/// The root has depth 0 and a node's neighbour lists are filled only while
/// its depth is below `max_depth`. Neighbours equal to the root are elided,
/// neighbours missing from the registry are dropped, and a node already
/// visited is kept as a leaf once past depth 1.
pub fn build_graph(registry: &Registry, root: NodeId, max_depth: usize) -> Option<GraphNode> {
    let root_node = registry.get(&root)?;

    // reverse index: who reports hearing whom
    let mut heard_by: HashMap<NodeId, Vec<(NodeId, f32)>> = HashMap::new();
    for node in registry.nodes() {
        for (nb, snr) in node.heard() {
            heard_by.entry(nb).or_default().push((node.id, snr));
        }
    }

    let mut arena = vec![Entry {
        id: root,
        depth: 0,
        snr: None,
        distance_km: None,
        heard: Vec::new(),
        heard_by: Vec::new(),
    }];
    let mut visited: HashSet<NodeId> = HashSet::from([root]);
    let mut stack = vec![0usize];

    while let Some(idx) = stack.pop() {
        let (id, depth) = (arena[idx].id, arena[idx].depth);
        if depth >= max_depth {
            continue;
        }
        let Some(node) = registry.get(&id) else {
            continue;
        };
        let heard: Vec<(NodeId, f32)> = node.heard().collect();
        let hearers = heard_by.get(&id).cloned().unwrap_or_default();

        for (side, list) in [(Side::Heard, heard), (Side::HeardBy, hearers)] {
            for (nb, snr) in list {
                if nb == root {
                    continue;
                }
                let Some(nb_node) = registry.get(&nb) else {
                    continue;
                };
                let child_depth = depth + 1;
                let expand = visited.insert(nb) || child_depth <= 1;
                let distance = match (&node.position, &nb_node.position) {
                    (Some(a), Some(b)) => distance_km(a, b),
                    _ => None,
                };
                let child = arena.len();
                arena.push(Entry {
                    id: nb,
                    depth: child_depth,
                    snr: Some(snr),
                    distance_km: distance,
                    heard: Vec::new(),
                    heard_by: Vec::new(),
                });
                match side {
                    Side::Heard => arena[idx].heard.push(child),
                    Side::HeardBy => arena[idx].heard_by.push(child),
                }
                if expand {
                    stack.push(child);
                }
            }
        }
    }

    // Children always sit after their parent in the arena, so a reverse pass
    // sees every subtree complete before its parent.
    let mut built: Vec<Option<GraphNode>> = Vec::with_capacity(arena.len());
    built.resize_with(arena.len(), || None);
    for idx in (0..arena.len()).rev() {
        let entry = &arena[idx];
        let node = if idx == 0 {
            root_node
        } else {
            match registry.get(&entry.id) {
                Some(n) => n,
                None => continue,
            }
        };
        let mut gn = GraphNode::leaf(node, entry.snr, entry.distance_km);
        gn.neighbors_heard = entry.heard.iter().filter_map(|c| built[*c].take()).collect();
        gn.neighbors_heard_by = entry
            .heard_by
            .iter()
            .filter_map(|c| built[*c].take())
            .collect();
        built[idx] = Some(gn);
    }
    built.into_iter().next().flatten()
}

#[derive(Clone, Copy)]
enum Side {
    Heard,
    HeardBy,
}
