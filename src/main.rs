//! Binary entrypoint for the meshinfo CLI.
//!
//! Commands:
//! - `start` - connect to the MQTT broker and collect until interrupted
//! - `init` - write a starter `config.toml`
//! - `status` - load the persisted state and print node/log counts as JSON
//!
//! See the library crate docs for module-level details: `meshinfo::`.
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

use meshinfo::config::Config;
use meshinfo::ingest::Pipeline;
use meshinfo::maintenance::Maintenance;
use meshinfo::meshtastic::WireDecoder;
use meshinfo::mqtt::MqttIngest;
use meshinfo::registry::LogLimits;
use meshinfo::storage::Storage;

#[derive(Parser)]
#[command(name = "meshinfo")]
#[command(about = "Collects Meshtastic node, chat and telemetry data from MQTT")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start collecting
    Start,
    /// Write a default configuration file
    Init,
    /// Print node and log counts from the data directory
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            let config = Config::load(&cli.config).await?;
            init_logging(&Some(config.clone()), cli.verbose);
            config.validate()?;
            info!("Starting meshinfo v{}", env!("CARGO_PKG_VERSION"));
            start(config).await?;
        }
        Commands::Init => {
            init_logging(&None, cli.verbose);
            if tokio::fs::try_exists(&cli.config).await.unwrap_or(false) {
                return Err(anyhow!("{} already exists; not overwriting", cli.config));
            }
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::Status => {
            let config = Config::load(&cli.config).await?;
            init_logging(&Some(config.clone()), cli.verbose);
            let storage = Storage::new(&config.paths.data).await?;
            let registry = storage
                .load_registry(config.server.local_node_id()?, LogLimits::from(&config.logs))
                .await?;
            println!("{}", serde_json::to_string_pretty(&registry.stats())?);
        }
    }

    Ok(())
}

async fn start(config: Config) -> Result<()> {
    let mut storage = Storage::new(&config.paths.data).await?;
    storage.acquire_lock()?;
    let storage = Arc::new(storage);

    let registry = storage
        .load_registry(config.server.local_node_id()?, LogLimits::from(&config.logs))
        .await?;
    let registry = Arc::new(RwLock::new(registry));

    let decoder = WireDecoder::from_config(&config.broker)?;
    info!("Loaded {} channel key(s)", decoder.key_count());
    let mut pipeline = Pipeline::new(&config, decoder, registry.clone(), Some(storage.clone()));
    let mut maintenance = Maintenance::new(&config, registry, storage, pipeline.notifier());

    #[cfg(feature = "lookups")]
    {
        use meshinfo::enrich::{HttpEnricher, HttpGeocoder};
        if config.geocoding.enabled {
            pipeline = pipeline.with_geocoder(Arc::new(HttpGeocoder::new(config.geocoding.clone())?));
            info!("Reverse geocoding via {}", config.geocoding.url);
        }
        if config.enrichment.enabled {
            maintenance =
                maintenance.with_enricher(Arc::new(HttpEnricher::new(config.enrichment.clone())));
            info!("Name backfill via {}", config.enrichment.url);
        }
    }
    #[cfg(not(feature = "lookups"))]
    if config.geocoding.enabled || config.enrichment.enabled {
        warn!("Geocoding/enrichment configured but the 'lookups' feature is disabled");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut maintenance_task = tokio::spawn(maintenance.run(shutdown_rx));

    let broker = config.broker.clone();
    let ingest = async move {
        if broker.enabled {
            MqttIngest::new(broker, pipeline).run().await
        } else {
            warn!("MQTT broker disabled; only maintenance will run");
            std::future::pending::<Result<()>>().await
        }
    };

    let mut ingest_result = Ok(());
    tokio::select! {
        result = ingest => {
            if let Err(e) = &result {
                error!("Ingestion stopped: {}", e);
            }
            ingest_result = result;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        joined = &mut maintenance_task => {
            return joined.map_err(|e| anyhow!("Maintenance task failed: {}", e))?;
        }
    }

    let _ = shutdown_tx.send(true);
    maintenance_task
        .await
        .map_err(|e| anyhow!("Maintenance task failed: {}", e))??;
    info!("Shutdown complete");
    ingest_result
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    let log_file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });
    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // foreground runs also echo to the console
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}
