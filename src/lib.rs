//! # Meshinfo - Meshtastic Network Collector
//!
//! Meshinfo listens to a Meshtastic MQTT feed, keeps a live model of every node
//! it hears about, and periodically writes that model to disk and to a small
//! read-only JSON API.
//!
//! ## Features
//!
//! - **Wire Decoding**: Gateway JSON and binary `ServiceEnvelope` protobuf topics, with AES-CTR channel decryption.
//! - **Node Registry**: One entry per node id with merge, operator overrides, activity pruning and shortname ordering.
//! - **Activity Logs**: Chat by channel, telemetry and traceroutes, newest-first with per-node indices.
//! - **Neighbour Graph**: Depth-bounded tree of who hears whom, rooted at the host node.
//! - **Enrichment**: Optional name backfill from a node directory and reverse geocoding of positions.
//! - **Persistence**: Atomic JSON snapshots under a locked data directory, plus a raw message audit log.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio::sync::RwLock;
//! use meshinfo::config::Config;
//! use meshinfo::ingest::Pipeline;
//! use meshinfo::meshtastic::WireDecoder;
//! use meshinfo::mqtt::MqttIngest;
//! use meshinfo::registry::LogLimits;
//! use meshinfo::storage::Storage;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     config.validate()?;
//!
//!     let storage = Arc::new(Storage::new(&config.paths.data).await?);
//!     let registry = storage
//!         .load_registry(config.server.local_node_id()?, LogLimits::from(&config.logs))
//!         .await?;
//!     let registry = Arc::new(RwLock::new(registry));
//!
//!     let decoder = WireDecoder::from_config(&config.broker)?;
//!     let pipeline = Pipeline::new(&config, decoder, registry, Some(storage));
//!     MqttIngest::new(config.broker.clone(), pipeline).run().await
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`meshtastic`] - Node ids, payload types and the wire decoder
//! - [`registry`] - The node table, activity logs and read queries
//! - [`reconcile`] - Applies decoded events to the registry
//! - [`graph`] - Neighbour graph builder
//! - [`ingest`] - Per-message pipeline driven by [`mqtt`]
//! - [`maintenance`] - Timer-gated save, render and backfill
//! - [`storage`] - JSON persistence
//! - [`config`] - Configuration management and validation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  MQTT session   │ ← one publication at a time
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │ Decode/Reconcile│ ← event → registry merge
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │    Registry     │ ← shared, read-mostly
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │   Maintenance   │ ← save / render / backfill
//! └─────────────────┘
//! ```

pub mod config;
pub mod enrich;
pub mod geo;
pub mod graph;
pub mod ingest;
pub mod logutil;
pub mod maintenance;
pub mod meshtastic;
pub mod metrics;
pub mod mqtt;
pub mod protobuf; // always declare; internal stubs handle feature gating
pub mod reconcile;
pub mod registry;
pub mod render;
pub mod storage;
