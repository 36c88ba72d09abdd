//! Per-message pipeline: decode → geocode → audit → reconcile → prune.
//!
//! One message is fully applied before the next is accepted; the MQTT loop
//! awaits [`Pipeline::handle_message`] for each publication in turn.

use chrono::Utc;
use log::{debug, trace, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::timeout;

use crate::config::Config;
use crate::enrich::Geocoder;
use crate::logutil::{escape_log, hex_preview};
use crate::meshtastic::{DecodeError, Encoding, Event, EventKind, Payload, WireDecoder};
use crate::metrics;
use crate::reconcile::{Outcome, Reconciler};
use crate::registry::SharedRegistry;
use crate::storage::Storage;

pub struct Pipeline {
    decoder: WireDecoder,
    reconciler: Reconciler,
    registry: SharedRegistry,
    storage: Option<Arc<Storage>>,
    geocoder: Option<Arc<dyn Geocoder>>,
    notify: Arc<Notify>,
    prune_threshold: u64,
    retain_messages: bool,
    persist_messages: bool,
    geocode_max_age_minutes: i64,
    geocode_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        decoder: WireDecoder,
        registry: SharedRegistry,
        storage: Option<Arc<Storage>>,
    ) -> Self {
        Self {
            decoder,
            reconciler: Reconciler::new(config.logs.clone(), &config.text),
            registry,
            storage,
            geocoder: None,
            notify: Arc::new(Notify::new()),
            prune_threshold: config.server.node_activity_prune_threshold,
            retain_messages: config.logs.messages.retain,
            persist_messages: config.logs.messages.persist,
            geocode_max_age_minutes: config.geocoding.max_age_minutes,
            geocode_timeout: Duration::from_secs(config.geocoding.timeout_seconds.max(1)),
        }
    }

    pub fn with_geocoder(mut self, geocoder: Arc<dyn Geocoder>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    /// Signalled after every applied event so maintenance can check its timers.
    pub fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Handle one publication. Decode and reconcile faults are logged and
    /// swallowed; only audit-log write failures are returned.
    pub async fn handle_message(&self, topic: &str, raw: &[u8]) -> anyhow::Result<Option<Outcome>> {
        metrics::inc_received();
        let mut event = match self.decoder.decode(topic, raw) {
            Ok(event) => event,
            Err(DecodeError::UnhandledTopic(_)) => {
                metrics::inc_unhandled_topic();
                trace!("Ignoring message on unhandled topic {}", escape_log(topic));
                return Ok(None);
            }
            Err(e) => {
                metrics::inc_decode_failed();
                warn!(
                    "Dropping message on {}: {} (payload {})",
                    escape_log(topic),
                    e,
                    hex_preview(raw, 32)
                );
                return Ok(None);
            }
        };
        metrics::record_decoded(event.kind());
        if is_undecryptable(&event) {
            metrics::inc_undecryptable();
        }

        self.attach_geocode(&mut event).await;
        self.audit(&event, raw).await?;

        let outcome = {
            let mut registry = self.registry.write().await;
            let result = self.reconciler.apply(&mut registry, &event);
            let deactivated = registry.prune(self.prune_threshold);
            if deactivated > 0 {
                debug!("{} node(s) went inactive", deactivated);
            }
            result
        };
        self.notify.notify_one();

        match outcome {
            Ok(outcome) => Ok(Some(outcome)),
            Err(e) => {
                metrics::inc_reconcile_failed();
                warn!("Dropping {} event on {}: {}", event.kind().as_str(), escape_log(topic), e);
                Ok(None)
            }
        }
    }

    async fn audit(&self, event: &Event, raw: &[u8]) -> anyhow::Result<()> {
        if !self.retain_messages && !self.persist_messages {
            return Ok(());
        }
        let line = match event.encoding {
            Encoding::Json => String::from_utf8_lossy(raw).into_owned(),
            Encoding::Protobuf => serde_json::to_string(event)?,
        };
        if self.persist_messages {
            if let Some(storage) = &self.storage {
                storage.append_message_log(&line).await?;
            }
        }
        if self.retain_messages {
            self.registry.write().await.push_message(line);
        }
        Ok(())
    }

    /// Reuse a fresh cached geocode or ask the geocoder. Failures only log.
    async fn attach_geocode(&self, event: &mut Event) {
        let Some(geocoder) = &self.geocoder else {
            return;
        };
        let Some(from) = event.from else {
            return;
        };
        let Payload::Position(position) = &mut event.payload else {
            return;
        };
        let Some((lat, lon)) = position.coordinates() else {
            return;
        };
        let now = Utc::now();
        let cached = self
            .registry
            .read()
            .await
            .cached_geocode(&from, now, self.geocode_max_age_minutes);
        if let Some((geocoded, at)) = cached {
            position.geocoded = Some(geocoded);
            position.last_geocoding = Some(at);
            return;
        }
        match timeout(self.geocode_timeout, geocoder.reverse(lat, lon)).await {
            Ok(Ok(geocoded)) => {
                position.geocoded = Some(geocoded);
                position.last_geocoding = Some(now);
            }
            Ok(Err(e)) => warn!("Reverse geocoding for {} failed: {}", from, e),
            Err(_) => warn!("Reverse geocoding for {} timed out", from),
        }
    }
}

fn is_undecryptable(event: &Event) -> bool {
    event.kind() == EventKind::Unknown
        && matches!(&event.payload, Payload::Unknown(v) if v.get("encrypted") == Some(&serde_json::Value::Bool(true)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::LookupFuture;
    use crate::meshtastic::NodeId;
    use crate::registry::Registry;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::RwLock;

    struct CountingGeocoder(AtomicUsize);

    impl Geocoder for CountingGeocoder {
        fn reverse(&self, _lat: f64, _lon: f64) -> LookupFuture<'_, serde_json::Value> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(serde_json::json!({"display_name": "Somewhere"})) })
        }
    }

    fn pipeline(config: &Config) -> Pipeline {
        let local = config.server.local_node_id().unwrap();
        let registry = Arc::new(RwLock::new(Registry::new(local)));
        Pipeline::new(config, WireDecoder::from_config(&config.broker).unwrap(), registry, None)
    }

    #[tokio::test]
    async fn geocode_is_cached_between_positions() {
        let config = Config::default();
        let geocoder = Arc::new(CountingGeocoder(AtomicUsize::new(0)));
        let p = pipeline(&config).with_geocoder(geocoder.clone());
        let raw = br#"{"type":"position","from":3663958104,"payload":{"latitude_i":376543210,"longitude_i":-1223456789}}"#;
        p.handle_message("msh/US/2/json/LongFast/!4355f528", raw).await.unwrap();
        p.handle_message("msh/US/2/json/LongFast/!4355f528", raw).await.unwrap();
        assert_eq!(geocoder.0.load(Ordering::SeqCst), 1);

        let reg = p.registry().read().await;
        let pos = reg.get(&NodeId::new(0xda63_9058)).unwrap().position.clone().unwrap();
        assert_eq!(pos.geocoded.unwrap()["display_name"], "Somewhere");
    }

    #[tokio::test]
    async fn bad_messages_do_not_touch_registry() {
        let config = Config::default();
        let p = pipeline(&config);
        let before = p.registry().read().await.len();
        let out = p
            .handle_message("msh/US/2/json/LongFast/!4355f528", b"\xff\xfe")
            .await
            .unwrap();
        assert!(out.is_none());
        assert_eq!(p.registry().read().await.len(), before);
        assert!(p.registry().read().await.messages().is_empty());
    }

    #[tokio::test]
    async fn raw_json_is_kept_in_message_log() {
        let config = Config::default();
        let p = pipeline(&config);
        let raw = br#"{"type":"text","from":1,"payload":{"text":"yo"}}"#;
        p.handle_message("msh/US/2/json/LongFast/!4355f528", raw).await.unwrap();
        let reg = p.registry().read().await;
        assert_eq!(reg.messages()[0], String::from_utf8_lossy(raw));
    }
}
