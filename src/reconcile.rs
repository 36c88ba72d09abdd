//! # Event Reconciler
//!
//! Applies one decoded [`Event`] to the [`Registry`]: works out which node the
//! event is about, builds the matching [`NodeUpdate`], merges it and appends
//! to the chat / telemetry / traceroute logs when those are retained.
//!
//! Reconciliation is synchronous and never does I/O. Geocoding happens in the
//! ingest pipeline before the event gets here.

use chrono::{DateTime, Utc};
use log::debug;

use crate::config::{LogsConfig, TextConfig};
use crate::logutil::escape_log;
use crate::meshtastic::{Event, NodeId, NodeRef, Payload};
use crate::registry::{
    ChatMessage, Envelope, MergeOutcome, NodeUpdate, Registry, RouteHop, TelemetryRecord,
    TracerouteRecord,
};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("{0} event has no usable node id")]
    MissingNode(&'static str),
}

/// What an event did to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub node: Option<NodeId>,
    pub merge: Option<MergeOutcome>,
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    logs: LogsConfig,
    bbs_keywords: Vec<String>,
}

impl Reconciler {
    pub fn new(logs: LogsConfig, text: &TextConfig) -> Self {
        Self {
            logs,
            bbs_keywords: text.bbs_keywords.clone(),
        }
    }

    pub fn apply(&self, registry: &mut Registry, event: &Event) -> Result<Outcome, ReconcileError> {
        self.apply_at(registry, event, Utc::now())
    }

    pub fn apply_at(
        &self,
        registry: &mut Registry,
        event: &Event,
        now: DateTime<Utc>,
    ) -> Result<Outcome, ReconcileError> {
        let kind = event.kind().as_str();
        let from = || event.from.ok_or(ReconcileError::MissingNode(kind));

        let (id, update) = match &event.payload {
            Payload::NodeInfo(info) => {
                // the node describes itself; the payload id wins over `from`
                let id = info
                    .id
                    .as_ref()
                    .and_then(|r| match registry.resolve_node_ref(r) {
                        Ok(id) => Some(id),
                        Err(e) => {
                            debug!("nodeinfo id '{}' unusable ({}), using from", r, e);
                            None
                        }
                    })
                    .map(Ok)
                    .unwrap_or_else(from)?;
                let update = NodeUpdate {
                    shortname: info.shortname.clone(),
                    longname: info.longname.clone(),
                    hardware: info.hardware.clone(),
                    role: info.role.clone(),
                    ..Default::default()
                };
                (id, update)
            }
            Payload::Position(position) => (
                from()?,
                NodeUpdate {
                    position: Some(position.clone()),
                    last_position_update: Some(now),
                    ..Default::default()
                },
            ),
            Payload::Telemetry(telemetry) => {
                let id = from()?;
                if self.logs.telemetry.retain {
                    registry.push_telemetry(TelemetryRecord {
                        envelope: Envelope::from_event(event, id),
                        payload: telemetry.clone(),
                    });
                }
                (
                    id,
                    NodeUpdate {
                        telemetry: Some(telemetry.clone()),
                        ..Default::default()
                    },
                )
            }
            Payload::NeighborInfo(info) => (
                from()?,
                NodeUpdate {
                    neighborinfo: Some(info.clone()),
                    ..Default::default()
                },
            ),
            Payload::Text(text) => {
                let id = from()?;
                if self.logs.chat.retain {
                    let mut envelope = Envelope::from_event(event, id);
                    if envelope.channel.is_none() {
                        envelope.channel = Some("0".to_string());
                    }
                    registry.push_chat(ChatMessage {
                        envelope,
                        text: text.text.clone(),
                    });
                }
                debug!("Chat from {}: {}", id, escape_log(&text.text));
                let mut update = NodeUpdate::default();
                if self.is_bbs_advert(&text.text) {
                    update.tc2_bbs = Some(true);
                }
                (id, update)
            }
            Payload::Traceroute(route) => {
                let id = from()?;
                if self.logs.traceroutes.retain {
                    let route_ids = route
                        .route
                        .iter()
                        .map(|hop| resolve_hop(registry, hop))
                        .collect();
                    registry.push_traceroute(TracerouteRecord {
                        envelope: Envelope::from_event(event, id),
                        route: route.route.clone(),
                        route_ids,
                    });
                }
                (id, NodeUpdate::default())
            }
            Payload::MapReport(report) => {
                let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
                let position = report.position();
                (
                    from()?,
                    NodeUpdate {
                        shortname: non_empty(&report.short_name),
                        longname: non_empty(&report.long_name),
                        hardware: report.hw_model.clone(),
                        role: report.role.clone(),
                        last_position_update: position.as_ref().map(|_| now),
                        position,
                        ..Default::default()
                    },
                )
            }
            Payload::Routing(_) => (from()?, NodeUpdate::default()),
            Payload::Unknown(_) => {
                return Ok(Outcome {
                    node: event.from,
                    merge: None,
                })
            }
        };

        let renames = update.shortname.is_some();
        let merge = registry.merge_at(id, update, now);
        if renames && merge != MergeOutcome::Purged {
            registry.sort_by_shortname();
        }
        Ok(Outcome {
            node: Some(id),
            merge: Some(merge),
        })
    }

    fn is_bbs_advert(&self, text: &str) -> bool {
        !self.bbs_keywords.is_empty() && self.bbs_keywords.iter().all(|k| text.contains(k.as_str()))
    }
}

/// Names resolve by exact longname; numbers resolve only to known nodes.
fn resolve_hop(registry: &Registry, hop: &NodeRef) -> RouteHop {
    let resolved = match hop {
        NodeRef::Number(n) => NodeId::from_u64(*n).ok().filter(|id| registry.contains(id)),
        NodeRef::Text(s) => registry
            .find_by_long_name(s)
            .map(|n| n.id)
            .or_else(|| s.parse::<NodeId>().ok().filter(|id| registry.contains(id))),
    };
    match resolved {
        Some(id) => RouteHop::Resolved(id),
        None => RouteHop::Unresolved(hop.clone()),
    }
}
