//! JSON API snapshot writer.
//!
//! Produces the read-only projections served by a static web server:
//! `nodes.json`, `stats.json`, `graph.json` and `chat.json` under the output
//! directory. Every file is replaced atomically.

use anyhow::{anyhow, Result};
use indexmap::IndexMap;
use log::debug;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::meshtastic::NodeId;
use crate::registry::{Node, NodeFilter, Registry};
use crate::storage::write_atomic;

pub const NODES_API_FILE: &str = "nodes.json";
pub const STATS_API_FILE: &str = "stats.json";
pub const GRAPH_API_FILE: &str = "graph.json";
pub const CHAT_API_FILE: &str = "chat.json";

#[derive(Serialize)]
struct ApiNode<'a> {
    #[serde(flatten)]
    node: &'a Node,
    #[serde(skip_serializing_if = "Option::is_none")]
    distance_from_host_node: Option<f64>,
}

pub struct JsonApiRenderer {
    output_dir: PathBuf,
}

impl JsonApiRenderer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write every projection of `registry`. Callers pass a snapshot, not the
    /// live registry, so ingestion is not blocked on disk I/O.
    pub async fn render(&self, registry: &Registry, graph_depth: usize) -> Result<()> {
        tokio::fs::create_dir_all(&self.output_dir).await.map_err(|e| {
            anyhow!(
                "Failed to create output directory {}: {}",
                self.output_dir.display(),
                e
            )
        })?;

        let nodes: IndexMap<NodeId, ApiNode<'_>> = registry
            .list_nodes(&NodeFilter::active())
            .into_iter()
            .map(|node| {
                let api = ApiNode {
                    node,
                    distance_from_host_node: registry.distance_from_local(node),
                };
                (node.id, api)
            })
            .collect();
        self.write(NODES_API_FILE, &nodes)?;
        self.write(STATS_API_FILE, &registry.stats())?;
        self.write(GRAPH_API_FILE, &registry.graph(graph_depth))?;
        self.write(CHAT_API_FILE, registry.chat())?;

        debug!(
            "Rendered {} active nodes to {}",
            nodes.len(),
            self.output_dir.display()
        );
        Ok(())
    }

    fn write<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        let content = serde_json::to_string_pretty(value)
            .map_err(|e| anyhow!("Failed to serialize {}: {}", name, e))?;
        write_atomic(&self.output_dir.join(name), &content)
    }
}
