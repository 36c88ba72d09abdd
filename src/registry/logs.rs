//! Append-only activity logs kept alongside the node table.
//! All logs are newest-first.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use crate::meshtastic::{Event, NodeId, NodeRef, Telemetry};

/// Envelope fields shared by every logged event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    pub from: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hops_away: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snr: Option<f32>,
}

impl Envelope {
    pub fn from_event(event: &Event, from: NodeId) -> Self {
        Envelope {
            id: event.id,
            from,
            to: event.to,
            sender: event.sender,
            channel: event.channel.clone(),
            timestamp: event.timestamp,
            hops_away: event.hops_away,
            rssi: event.rssi,
            snr: event.snr,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatChannel {
    pub name: String,
    #[serde(default)]
    pub messages: VecDeque<ChatMessage>,
}

pub const DEFAULT_CHANNEL: &str = "0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    #[serde(default)]
    pub channels: BTreeMap<String, ChatChannel>,
}

impl Default for Chat {
    fn default() -> Self {
        let mut channels = BTreeMap::new();
        channels.insert(
            DEFAULT_CHANNEL.to_string(),
            ChatChannel {
                name: "General".to_string(),
                messages: VecDeque::new(),
            },
        );
        Chat { channels }
    }
}

impl Chat {
    /// Push a message to the front of its channel, creating the channel on first use.
    pub fn push(&mut self, message: ChatMessage) {
        let key = message
            .envelope
            .channel
            .clone()
            .unwrap_or_else(|| DEFAULT_CHANNEL.to_string());
        let channel = self.channels.entry(key.clone()).or_insert_with(|| ChatChannel {
            name: format!("Channel {key}"),
            messages: VecDeque::new(),
        });
        channel.messages.push_front(message);
    }

    /// Keep at most `max_per_channel` newest messages in every channel.
    pub fn trim(&mut self, max_per_channel: usize) {
        for channel in self.channels.values_mut() {
            channel.messages.truncate(max_per_channel);
        }
    }

    pub fn total_messages(&self) -> usize {
        self.channels.values().map(|c| c.messages.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub payload: Telemetry,
}

/// A traceroute hop after resolution against the registry. Tagged on disk
/// (`{"resolved": "da639058"}` / `{"unresolved": 12345}`) so a raw hop that
/// happens to look like an id is never read back as resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteHop {
    Resolved(NodeId),
    Unresolved(NodeRef),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracerouteRecord {
    #[serde(flatten)]
    pub envelope: Envelope,
    /// Hops exactly as received.
    pub route: Vec<NodeRef>,
    pub route_ids: Vec<RouteHop>,
}
