//! Test utilities & fixtures shared by the integration tests.

use std::sync::Arc;
use tokio::sync::RwLock;

use meshinfo::config::Config;
use meshinfo::meshtastic::NodeId;
use meshinfo::registry::{Registry, SharedRegistry};

/// Host node used by every fixture config.
pub const LOCAL: NodeId = NodeId::new(0x4355_f528);

/// JSON topic a gateway with the local id would publish on.
#[allow(dead_code)]
pub const JSON_TOPIC: &str = "msh/US/2/json/LongFast/!4355f528";

/// Default config with data and output paths inside `dir`.
#[allow(dead_code)]
pub fn test_config(dir: &tempfile::TempDir) -> Config {
    let mut config = Config::default();
    config.paths.data = dir.path().join("data").to_string_lossy().into_owned();
    config.paths.output = dir.path().join("api").to_string_lossy().into_owned();
    config
}

#[allow(dead_code)]
pub fn shared_registry() -> SharedRegistry {
    Arc::new(RwLock::new(Registry::new(LOCAL)))
}
