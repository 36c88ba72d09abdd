//! # Storage Module - JSON Persistence
//!
//! Persists the registry as a handful of JSON files under the data directory:
//!
//! ```text
//! data/
//! ├── nodes.json            ← id → Node, display order
//! ├── chat.json             ← {channels: {id: {name, messages}}}
//! ├── telemetry.json        ← newest-first
//! ├── traceroutes.json      ← newest-first
//! ├── message-log.jsonl     ← append-only raw message audit log
//! ├── nodes-overrides.json  ← optional, operator maintained
//! └── .lock                 ← held while a collector owns the directory
//! ```
//!
//! Missing files on load mean "first run" and yield empty state. Any other
//! read or parse error is returned, as is every write error: losing data
//! silently is worse than stopping.
//!
//! ```rust,no_run
//! use meshinfo::config::LogsConfig;
//! use meshinfo::meshtastic::NodeId;
//! use meshinfo::registry::LogLimits;
//! use meshinfo::storage::Storage;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let storage = Storage::new("./output/data").await?;
//!     let registry = storage.load_registry(NodeId::new(0x4355_f528), LogLimits::default()).await?;
//!     storage.save(&registry, &LogsConfig::default()).await?;
//!     Ok(())
//! }
//! ```

use anyhow::{anyhow, Result};
use chrono::Utc;
use fs2::FileExt;
use indexmap::IndexMap;
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::VecDeque;
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::config::LogsConfig;
use crate::meshtastic::NodeId;
use crate::registry::{Chat, LogLimits, Node, NodeOverrides, Registry, RestoredState};

pub const NODES_FILE: &str = "nodes.json";
pub const CHAT_FILE: &str = "chat.json";
pub const TELEMETRY_FILE: &str = "telemetry.json";
pub const TRACEROUTES_FILE: &str = "traceroutes.json";
pub const MESSAGE_LOG_FILE: &str = "message-log.jsonl";
pub const OVERRIDES_FILE: &str = "nodes-overrides.json";
const LOCK_FILE: &str = ".lock";

pub struct Storage {
    data_dir: PathBuf,
    lock: Option<File>,
}

impl Storage {
    /// Open the data directory, creating it if needed.
    pub async fn new(data_dir: &str) -> Result<Self> {
        fs::create_dir_all(data_dir)
            .await
            .map_err(|e| anyhow!("Failed to create data directory {}: {}", data_dir, e))?;
        Ok(Storage {
            data_dir: PathBuf::from(data_dir),
            lock: None,
        })
    }

    /// Take an exclusive lock on the directory so a second collector cannot
    /// write into it. Held until the `Storage` is dropped.
    pub fn acquire_lock(&mut self) -> Result<()> {
        let path = self.data_dir.join(LOCK_FILE);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        file.try_lock_exclusive().map_err(|e| {
            anyhow!(
                "Data directory {} is in use by another process: {}",
                self.data_dir.display(),
                e
            )
        })?;
        self.lock = Some(file);
        Ok(())
    }

    async fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.data_dir.join(name);
        match fs::read_to_string(&path).await {
            Ok(data) => {
                // Guard against any accidental leading NULs
                let cleaned = data.trim_start_matches('\0');
                let value = serde_json::from_str(cleaned)
                    .map_err(|e| anyhow!("Failed to parse {}: {}", path.display(), e))?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{} not found, starting empty", path.display());
                Ok(None)
            }
            Err(e) => Err(anyhow!("Failed reading {}: {}", path.display(), e)),
        }
    }

    pub async fn load_overrides(&self) -> Result<NodeOverrides> {
        Ok(self.read_json(OVERRIDES_FILE).await?.unwrap_or_default())
    }

    /// Rebuild a registry from disk, trimming logs that exceed `limits`.
    pub async fn load_registry(&self, local_id: NodeId, limits: LogLimits) -> Result<Registry> {
        let mut nodes: IndexMap<NodeId, Node> =
            self.read_json(NODES_FILE).await?.unwrap_or_default();
        // the key is authoritative
        for (id, node) in nodes.iter_mut() {
            node.id = *id;
        }
        let state = RestoredState {
            nodes,
            chat: self.read_json::<Chat>(CHAT_FILE).await?,
            telemetry: self
                .read_json::<VecDeque<_>>(TELEMETRY_FILE)
                .await?
                .unwrap_or_default(),
            traceroutes: self
                .read_json::<VecDeque<_>>(TRACEROUTES_FILE)
                .await?
                .unwrap_or_default(),
            overrides: self.load_overrides().await?,
        };
        let registry = Registry::restore(local_id, state, Utc::now()).with_limits(limits);
        info!(
            "Loaded {} nodes, {} telemetry and {} traceroute records from {}",
            registry.len(),
            registry.telemetry_log().len(),
            registry.traceroute_log().len(),
            self.data_dir.display()
        );
        Ok(registry)
    }

    /// Write the registry snapshot. Log files are skipped when their
    /// `persist` flag is off.
    pub async fn save(&self, registry: &Registry, logs: &LogsConfig) -> Result<()> {
        self.write_json(NODES_FILE, registry.node_map()).await?;
        if logs.chat.persist {
            self.write_json(CHAT_FILE, registry.chat()).await?;
        }
        if logs.telemetry.persist {
            self.write_json(TELEMETRY_FILE, registry.telemetry_log()).await?;
        }
        if logs.traceroutes.persist {
            self.write_json(TRACEROUTES_FILE, registry.traceroute_log()).await?;
        }
        debug!("Saved registry ({} nodes) to {}", registry.len(), self.data_dir.display());
        Ok(())
    }

    pub async fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        let content = serde_json::to_string_pretty(value)
            .map_err(|e| anyhow!("Failed to serialize {}: {}", name, e))?;
        write_atomic(&self.data_dir.join(name), &content)
    }

    /// Append one line to the raw message audit log.
    pub async fn append_message_log(&self, line: &str) -> Result<()> {
        use std::io::Write;

        let path = self.data_dir.join(MESSAGE_LOG_FILE);
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| anyhow!("Failed to open {}: {}", path.display(), e))?;
        file.lock_exclusive()?;
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line.trim_end_matches('\n'));
        buf.push('\n');
        file.write_all(buf.as_bytes())?;
        file.unlock()?;
        Ok(())
    }
}

/// Write `content` to a uniquely named temp file next to `path`, fsync it,
/// then rename over the destination.
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    use std::fs::{self as sfs, OpenOptions};
    use std::io::Write;

    if let Some(parent) = path.parent() {
        sfs::create_dir_all(parent)?;
    }
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let base = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("data.json");
    let mut counter = 0u32;
    let tmp_path = loop {
        let candidate = dir.join(format!(".{}.tmp-{}-{}", base, std::process::id(), counter));
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(mut tmp) => {
                tmp.write_all(content.as_bytes())?;
                tmp.flush()?;
                let _ = tmp.sync_all();
                break candidate;
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                counter = counter.saturating_add(1);
                continue;
            }
            Err(e) => return Err(anyhow!("Failed to create temp file for atomic write: {}", e)),
        }
    };

    sfs::rename(&tmp_path, path)?;
    // persist the rename (best-effort)
    if let Ok(dir_file) = File::open(dir) {
        let _ = dir_file.sync_all();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_files_mean_empty_state() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path().to_str().unwrap()).await.unwrap();
        let reg = storage.load_registry(NodeId::new(1), LogLimits::default()).await.unwrap();
        // only the two sentinels
        assert_eq!(reg.len(), 2);
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(NODES_FILE), "{ nope").unwrap();
        let storage = Storage::new(dir.path().to_str().unwrap()).await.unwrap();
        assert!(storage.load_registry(NodeId::new(1), LogLimits::default()).await.is_err());
    }

    #[tokio::test]
    async fn lock_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_str().unwrap();
        let mut first = Storage::new(path).await.unwrap();
        first.acquire_lock().unwrap();
        let mut second = Storage::new(path).await.unwrap();
        assert!(second.acquire_lock().is_err());
        drop(first);
        assert!(second.acquire_lock().is_ok());
    }

    #[tokio::test]
    async fn message_log_appends_lines() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path().to_str().unwrap()).await.unwrap();
        storage.append_message_log("{\"a\":1}").await.unwrap();
        storage.append_message_log("{\"b\":2}\n").await.unwrap();
        let text = std::fs::read_to_string(dir.path().join(MESSAGE_LOG_FILE)).unwrap();
        assert_eq!(text, "{\"a\":1}\n{\"b\":2}\n");
    }
}
