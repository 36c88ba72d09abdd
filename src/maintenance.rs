//! Timer-gated maintenance: data save, JSON render and name backfill.
//!
//! Each step has its own minimum interval. A cycle runs whenever ingestion
//! signals new data or the housekeeping tick fires, and performs at most one
//! run of every step that is due. The last-run times live in
//! [`MaintenanceSchedule`].

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;

use crate::config::{Config, IntervalsConfig, LogsConfig};
use crate::enrich::Enricher;
use crate::registry::{NodeUpdate, SharedRegistry};
use crate::render::JsonApiRenderer;
use crate::storage::Storage;

const TICK: std::time::Duration = std::time::Duration::from_secs(1);

/// Which steps a cycle should run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DueSteps {
    pub backfill: bool,
    pub save: bool,
    pub render: bool,
}

impl DueSteps {
    pub fn any(&self) -> bool {
        self.backfill || self.save || self.render
    }
}

#[derive(Debug, Clone)]
pub struct MaintenanceSchedule {
    intervals: IntervalsConfig,
    last_data_save: Option<DateTime<Utc>>,
    last_render: Option<DateTime<Utc>>,
    last_backfill: Option<DateTime<Utc>>,
}

fn elapsed(last: Option<DateTime<Utc>>, now: DateTime<Utc>, every_secs: u64) -> bool {
    match last {
        None => true,
        Some(at) => now - at >= Duration::seconds(i64::try_from(every_secs).unwrap_or(i64::MAX)),
    }
}

impl MaintenanceSchedule {
    pub fn new(intervals: IntervalsConfig) -> Self {
        Self {
            intervals,
            last_data_save: None,
            last_render: None,
            last_backfill: None,
        }
    }

    pub fn due(&self, now: DateTime<Utc>) -> DueSteps {
        DueSteps {
            backfill: elapsed(self.last_backfill, now, self.intervals.enrichment),
            save: elapsed(self.last_data_save, now, self.intervals.data_save),
            render: elapsed(self.last_render, now, self.intervals.render),
        }
    }

    fn mark(&mut self, steps: DueSteps, now: DateTime<Utc>) {
        if steps.backfill {
            self.last_backfill = Some(now);
        }
        if steps.save {
            self.last_data_save = Some(now);
        }
        if steps.render {
            self.last_render = Some(now);
        }
    }

    pub fn last_data_save(&self) -> Option<DateTime<Utc>> {
        self.last_data_save
    }
}

pub struct Maintenance {
    registry: SharedRegistry,
    storage: Arc<Storage>,
    renderer: JsonApiRenderer,
    enricher: Option<Arc<dyn Enricher>>,
    notify: Arc<Notify>,
    schedule: MaintenanceSchedule,
    logs: LogsConfig,
    graph_depth: usize,
    batch_size: usize,
}

impl Maintenance {
    pub fn new(
        config: &Config,
        registry: SharedRegistry,
        storage: Arc<Storage>,
        notify: Arc<Notify>,
    ) -> Self {
        Self {
            registry,
            storage,
            renderer: JsonApiRenderer::new(&config.paths.output),
            enricher: None,
            notify,
            schedule: MaintenanceSchedule::new(config.server.intervals.clone()),
            logs: config.logs.clone(),
            graph_depth: config.server.graph_max_depth,
            batch_size: config.enrichment.batch_size,
        }
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    pub fn schedule(&self) -> &MaintenanceSchedule {
        &self.schedule
    }

    /// Run every due step once. Backfill and render failures are logged;
    /// a failed save is returned.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<DueSteps> {
        let mut due = self.schedule.due(now);
        if self.enricher.is_none() {
            due.backfill = false;
        }
        if !due.any() {
            return Ok(due);
        }

        if due.backfill {
            self.backfill().await;
        }

        // serialize from a copy so ingestion is never blocked on disk I/O
        let snapshot = self.registry.read().await.clone();
        if due.save {
            self.storage.save(&snapshot, &self.logs).await?;
        }
        if due.render {
            if let Err(e) = self.renderer.render(&snapshot, self.graph_depth).await {
                warn!("Render to {} failed: {}", self.renderer.output_dir().display(), e);
            }
        }
        self.schedule.mark(due, now);
        Ok(due)
    }

    async fn backfill(&self) {
        let Some(enricher) = &self.enricher else {
            return;
        };
        let pending = self.registry.read().await.nodes_missing_names(self.batch_size);
        if pending.is_empty() {
            return;
        }
        debug!("Looking up names for {} node(s)", pending.len());
        let mut named = 0;
        for id in pending {
            match enricher.lookup(id).await {
                Ok(Some(info)) => {
                    let update = NodeUpdate {
                        shortname: info.shortname,
                        longname: info.longname,
                        hardware: info.hardware,
                        role: info.role,
                        ..Default::default()
                    };
                    if self.registry.write().await.apply_names(id, update) {
                        named += 1;
                    }
                }
                Ok(None) => debug!("No directory entry for {}", id),
                Err(e) => warn!("Name lookup for {} failed: {}", id, e),
            }
        }
        if named > 0 {
            let mut registry = self.registry.write().await;
            registry.sort_by_shortname();
            info!("Backfilled names for {} node(s)", named);
        }
    }

    /// Loop until `shutdown` flips, then write a final save.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut tick = tokio::time::interval(TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let notify = self.notify.clone();

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = notify.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            self.run_cycle(Utc::now()).await?;
        }

        info!("Maintenance stopping, writing final save");
        let snapshot = self.registry.read().await.clone();
        self.storage.save(&snapshot, &self.logs).await
    }
}
