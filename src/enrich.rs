//! Outbound lookups: node-name enrichment and reverse geocoding.
//!
//! Both sit behind small object-safe traits so the maintenance cycle and the
//! ingest pipeline can be exercised without network access. The HTTP
//! implementations need the `lookups` feature.

use std::future::Future;
use std::pin::Pin;

use crate::meshtastic::{NodeId, NodeInfoPayload};

pub type LookupFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

/// Looks up display names for a node still carrying placeholders.
pub trait Enricher: Send + Sync {
    /// `Ok(None)` when the directory does not know the node.
    fn lookup(&self, id: NodeId) -> LookupFuture<'_, Option<NodeInfoPayload>>;
}

/// Reverse geocoding of a latitude/longitude pair in degrees.
pub trait Geocoder: Send + Sync {
    fn reverse(&self, lat: f64, lon: f64) -> LookupFuture<'_, serde_json::Value>;
}

#[cfg(feature = "lookups")]
pub use http::{HttpEnricher, HttpGeocoder};

#[cfg(feature = "lookups")]
mod http {
    use anyhow::anyhow;
    use log::debug;
    use reqwest::StatusCode;
    use std::time::Duration;
    use tokio::time::timeout;

    use super::{Enricher, Geocoder, LookupFuture};
    use crate::config::{EnrichmentConfig, GeocodingConfig};
    use crate::meshtastic::{NodeId, NodeInfoPayload};

    /// Node directory client; `{id}` in the URL is replaced by the node id.
    pub struct HttpEnricher {
        config: EnrichmentConfig,
        client: reqwest::Client,
    }

    impl HttpEnricher {
        pub fn new(config: EnrichmentConfig) -> Self {
            Self {
                config,
                client: reqwest::Client::new(),
            }
        }

        pub fn build_url(&self, id: NodeId) -> String {
            self.config.url.replace("{id}", &id.to_string())
        }

        async fn fetch(&self, id: NodeId) -> anyhow::Result<Option<NodeInfoPayload>> {
            let url = self.build_url(id);
            debug!("Looking up node {} at {}", id, url);
            let timeout_duration = Duration::from_secs(self.config.timeout_seconds);
            let response = timeout(timeout_duration, self.client.get(&url).send())
                .await
                .map_err(|_| anyhow!("Request timeout after {}s", self.config.timeout_seconds))?
                .map_err(|e| anyhow!("HTTP request failed: {}", e))?;

            if response.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !response.status().is_success() {
                return Err(anyhow!("Directory returned status: {}", response.status()));
            }
            let info: NodeInfoPayload = response
                .json()
                .await
                .map_err(|e| anyhow!("Failed to parse directory response: {}", e))?;
            if info.shortname.is_none() && info.longname.is_none() {
                return Ok(None);
            }
            Ok(Some(info))
        }
    }

    impl Enricher for HttpEnricher {
        fn lookup(&self, id: NodeId) -> LookupFuture<'_, Option<NodeInfoPayload>> {
            Box::pin(self.fetch(id))
        }
    }

    /// Nominatim-compatible reverse geocoder.
    pub struct HttpGeocoder {
        config: GeocodingConfig,
        client: reqwest::Client,
    }

    impl HttpGeocoder {
        pub fn new(config: GeocodingConfig) -> anyhow::Result<Self> {
            let client = reqwest::Client::builder()
                .user_agent(config.user_agent.clone())
                .build()
                .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))?;
            Ok(Self { config, client })
        }

        async fn fetch(&self, lat: f64, lon: f64) -> anyhow::Result<serde_json::Value> {
            let url = format!(
                "{}?format=jsonv2&lat={:.7}&lon={:.7}",
                self.config.url, lat, lon
            );
            let timeout_duration = Duration::from_secs(self.config.timeout_seconds);
            let response = timeout(timeout_duration, self.client.get(&url).send())
                .await
                .map_err(|_| anyhow!("Request timeout after {}s", self.config.timeout_seconds))?
                .map_err(|e| anyhow!("HTTP request failed: {}", e))?;
            if !response.status().is_success() {
                return Err(anyhow!("Geocoder returned status: {}", response.status()));
            }
            response
                .json()
                .await
                .map_err(|e| anyhow!("Failed to parse geocoder response: {}", e))
        }
    }

    impl Geocoder for HttpGeocoder {
        fn reverse(&self, lat: f64, lon: f64) -> LookupFuture<'_, serde_json::Value> {
            Box::pin(self.fetch(lat, lon))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn url_template_substitutes_id() {
            let e = HttpEnricher::new(EnrichmentConfig {
                url: "https://dir.example/nodes/{id}/info".into(),
                ..Default::default()
            });
            assert_eq!(
                e.build_url(NodeId::new(0xda63_9058)),
                "https://dir.example/nodes/da639058/info"
            );
        }
    }
}
