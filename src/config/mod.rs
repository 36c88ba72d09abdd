//! # Configuration Management Module
//!
//! Centralised, type-safe configuration for the collector. Every section has
//! defaults, so a partial `config.toml` is enough to get started.
//!
//! ## Configuration Structure
//!
//! - [`BrokerConfig`] - MQTT connection, subscriptions, decoder toggles, channel keys
//! - [`ServerConfig`] - local node identity, prune threshold, maintenance intervals
//! - [`PathsConfig`] - data and output directories
//! - [`LogsConfig`] - which append-only logs are kept in memory and persisted
//! - [`GeocodingConfig`] / [`EnrichmentConfig`] - optional outbound lookups
//! - [`LoggingConfig`] - log level and optional log file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use meshinfo::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     config.validate()?;
//!     println!("Broker: {}:{}", config.broker.host, config.broker.port);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [broker]
//! host = "localhost"
//! port = 1883
//! client_id = "meshinfo"
//! topics = ["msh/2/json/#", "msh/US/2/e/#"]
//!
//! [broker.decoders]
//! json = true
//! protobuf = true
//!
//! [[broker.channels]]
//! name = "LongFast"
//! key = "1PG7OiApB1nwvP+rz05pAQ=="
//!
//! [server]
//! node_id = "4355f528"
//! node_activity_prune_threshold = 7200
//! ```

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::meshtastic::NodeId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub broker: BrokerConfig,
    pub server: ServerConfig,
    pub paths: PathsConfig,
    #[serde(default)]
    pub logs: LogsConfig,
    #[serde(default)]
    pub text: TextConfig,
    #[serde(default)]
    pub geocoding: GeocodingConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Topics to subscribe to. When empty, the single `topic` is used instead.
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Fixed delay between reconnect attempts after the broker connection drops.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    #[serde(default)]
    pub decoders: DecoderToggles,
    /// Channel keys tried in order when a packet arrives encrypted.
    #[serde(default)]
    pub channels: Vec<ChannelKeyConfig>,
}

fn default_true() -> bool {
    true
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderToggles {
    pub json: bool,
    pub protobuf: bool,
}

impl Default for DecoderToggles {
    fn default() -> Self {
        Self {
            json: true,
            protobuf: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelKeyConfig {
    #[serde(default)]
    pub name: String,
    /// Base64 PSK. One byte selects a Meshtastic default key, 16 bytes is AES-128, 32 bytes AES-256.
    pub key: String,
}

impl ChannelKeyConfig {
    pub fn key_bytes(&self) -> Result<Vec<u8>> {
        general_purpose::STANDARD
            .decode(self.key.trim())
            .map_err(|e| anyhow!("Invalid base64 key for channel '{}': {}", self.name, e))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Hex id of the host node; the registry always keeps an entry for it.
    pub node_id: String,
    /// Seconds without traffic after which a node is flagged inactive.
    pub node_activity_prune_threshold: u64,
    #[serde(default = "default_graph_max_depth")]
    pub graph_max_depth: usize,
    #[serde(default)]
    pub intervals: IntervalsConfig,
}

fn default_graph_max_depth() -> usize {
    3
}

impl ServerConfig {
    pub fn local_node_id(&self) -> Result<NodeId> {
        self.node_id
            .parse::<NodeId>()
            .map_err(|e| anyhow!("Invalid server.node_id '{}': {}", self.node_id, e))
    }
}

/// Minimum seconds between runs of each maintenance step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalsConfig {
    pub data_save: u64,
    pub render: u64,
    pub enrichment: u64,
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        Self {
            data_save: 60,
            render: 5,
            enrichment: 900,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub data: String,
    pub output: String,
}

/// Whether a log kind is kept in memory and whether it is written to the data directory.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogPolicy {
    pub retain: bool,
    pub persist: bool,
}

impl Default for LogPolicy {
    fn default() -> Self {
        Self {
            retain: true,
            persist: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsConfig {
    #[serde(default)]
    pub chat: LogPolicy,
    #[serde(default)]
    pub telemetry: LogPolicy,
    #[serde(default)]
    pub traceroutes: LogPolicy,
    /// Raw message audit log (`message-log.jsonl`).
    #[serde(default)]
    pub messages: LogPolicy,
    /// Cap on raw messages kept in memory; the file log is unbounded.
    #[serde(default = "default_max_messages")]
    pub max_messages_in_memory: usize,
    /// Newest chat messages kept per channel.
    #[serde(default = "default_max_chat")]
    pub max_chat_in_memory: usize,
    #[serde(default = "default_max_telemetry")]
    pub max_telemetry_in_memory: usize,
    #[serde(default = "default_max_traceroutes")]
    pub max_traceroutes_in_memory: usize,
}

fn default_max_messages() -> usize {
    1000
}

fn default_max_chat() -> usize {
    1000
}

fn default_max_telemetry() -> usize {
    5000
}

fn default_max_traceroutes() -> usize {
    1000
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            chat: LogPolicy::default(),
            telemetry: LogPolicy::default(),
            traceroutes: LogPolicy::default(),
            messages: LogPolicy::default(),
            max_messages_in_memory: default_max_messages(),
            max_chat_in_memory: default_max_chat(),
            max_telemetry_in_memory: default_max_telemetry(),
            max_traceroutes_in_memory: default_max_traceroutes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextConfig {
    /// A chat message containing every keyword marks its sender as a TC2 BBS node.
    pub bbs_keywords: Vec<String>,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            bbs_keywords: vec!["TC".to_string(), "BBS".to_string(), "Commands".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocodingConfig {
    pub enabled: bool,
    /// Nominatim-compatible reverse endpoint.
    pub url: String,
    pub user_agent: String,
    pub timeout_seconds: u64,
    /// A cached result younger than this is reused.
    pub max_age_minutes: i64,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "https://nominatim.openstreetmap.org/reverse".to_string(),
            user_agent: format!("meshinfo/{}", env!("CARGO_PKG_VERSION")),
            timeout_seconds: 5,
            max_age_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    pub enabled: bool,
    /// Node directory lookup; `{id}` is replaced by the 8-hex-char node id.
    pub url: String,
    pub timeout_seconds: u64,
    /// Upper bound on lookups per backfill run.
    pub batch_size: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "https://map.meshtastic.org/api/v1/nodes/{id}".to_string(),
            timeout_seconds: 5,
            batch_size: 25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl BrokerConfig {
    /// Topics to subscribe to, preferring the `topics` list over the single `topic`.
    pub fn subscriptions(&self) -> Vec<String> {
        if !self.topics.is_empty() {
            return self.topics.clone();
        }
        self.topic.iter().cloned().collect()
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Reject configurations the collector cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.server.local_node_id()?;
        if self.broker.enabled && self.broker.subscriptions().is_empty() {
            return Err(anyhow!(
                "No MQTT topics to subscribe to; set broker.topics or broker.topic"
            ));
        }
        for channel in &self.broker.channels {
            channel.key_bytes()?;
        }
        if self.server.node_activity_prune_threshold == 0 {
            return Err(anyhow!("server.node_activity_prune_threshold must be > 0"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            broker: BrokerConfig {
                enabled: true,
                host: "localhost".to_string(),
                port: 1883,
                client_id: "meshinfo".to_string(),
                username: None,
                password: None,
                topics: vec!["msh/2/json/#".to_string()],
                topic: None,
                keep_alive_secs: default_keep_alive_secs(),
                reconnect_delay_secs: default_reconnect_delay_secs(),
                decoders: DecoderToggles::default(),
                channels: vec![ChannelKeyConfig {
                    name: "LongFast".to_string(),
                    key: "1PG7OiApB1nwvP+rz05pAQ==".to_string(),
                }],
            },
            server: ServerConfig {
                node_id: "4355f528".to_string(),
                node_activity_prune_threshold: 7200,
                graph_max_depth: default_graph_max_depth(),
                intervals: IntervalsConfig::default(),
            },
            paths: PathsConfig {
                data: "output/data".to_string(),
                output: "output/api".to_string(),
            },
            logs: LogsConfig::default(),
            text: TextConfig::default(),
            geocoding: GeocodingConfig::default(),
            enrichment: EnrichmentConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                file: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.local_node_id().unwrap().to_string(), "4355f528");
    }

    #[test]
    fn single_topic_fallback() {
        let mut config = Config::default();
        config.broker.topics.clear();
        assert!(config.validate().is_err());

        config.broker.topic = Some("msh/US/2/e/#".to_string());
        assert_eq!(config.broker.subscriptions(), vec!["msh/US/2/e/#".to_string()]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn bad_channel_key_rejected() {
        let mut config = Config::default();
        config.broker.channels.push(ChannelKeyConfig {
            name: "broken".to_string(),
            key: "not base64!".to_string(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_round_trip_and_partial_sections() {
        let serialized = toml::to_string_pretty(&Config::default()).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.server.intervals.render, 5);

        let minimal = r#"
            [broker]
            host = "mqtt.example.net"
            port = 1883
            client_id = "test"
            topic = "msh/2/json/#"

            [server]
            node_id = "!da639058"
            node_activity_prune_threshold = 600

            [paths]
            data = "d"
            output = "o"

            [logging]
            level = "debug"
        "#;
        let parsed: Config = toml::from_str(minimal).unwrap();
        assert!(parsed.broker.decoders.json);
        assert!(!parsed.broker.decoders.protobuf);
        assert!(parsed.logs.telemetry.retain);
        assert_eq!(parsed.server.graph_max_depth, 3);
        assert_eq!(parsed.server.local_node_id().unwrap().to_string(), "da639058");
    }
}
