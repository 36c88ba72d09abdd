//! Process-wide ingest counters.
//! Exposed through `stats.json` and the `status` command.
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

use crate::meshtastic::EventKind;

static MESSAGES_RECEIVED: AtomicU64 = AtomicU64::new(0);
static EVENTS_DECODED: AtomicU64 = AtomicU64::new(0);
static DECODE_FAILED: AtomicU64 = AtomicU64::new(0);
static UNHANDLED_TOPIC: AtomicU64 = AtomicU64::new(0);
static UNDECRYPTABLE: AtomicU64 = AtomicU64::new(0);
static RECONCILE_FAILED: AtomicU64 = AtomicU64::new(0);
static BROKER_RECONNECTS: AtomicU64 = AtomicU64::new(0);

static EVENT_KINDS: OnceLock<Mutex<BTreeMap<&'static str, u64>>> = OnceLock::new();

pub fn inc_received() {
    MESSAGES_RECEIVED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_decode_failed() {
    DECODE_FAILED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_unhandled_topic() {
    UNHANDLED_TOPIC.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_undecryptable() {
    UNDECRYPTABLE.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_reconcile_failed() {
    RECONCILE_FAILED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_reconnects() {
    BROKER_RECONNECTS.fetch_add(1, Ordering::Relaxed);
}

fn kind_lock() -> &'static Mutex<BTreeMap<&'static str, u64>> {
    EVENT_KINDS.get_or_init(|| Mutex::new(BTreeMap::new()))
}

pub fn record_decoded(kind: EventKind) {
    EVENTS_DECODED.fetch_add(1, Ordering::Relaxed);
    let mut guard = kind_lock().lock().unwrap_or_else(|p| p.into_inner());
    let count = guard.entry(kind.as_str()).or_default();
    *count = count.saturating_add(1);
}

#[derive(Debug, Default, Clone, Serialize, PartialEq, Eq)]
pub struct Snapshot {
    pub messages_received: u64,
    pub events_decoded: u64,
    pub decode_failed: u64,
    pub unhandled_topic: u64,
    pub undecryptable: u64,
    pub reconcile_failed: u64,
    pub broker_reconnects: u64,
    pub by_type: BTreeMap<String, u64>,
}

pub fn snapshot() -> Snapshot {
    let by_type = kind_lock()
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .iter()
        .map(|(k, v)| (k.to_string(), *v))
        .collect();
    Snapshot {
        messages_received: MESSAGES_RECEIVED.load(Ordering::Relaxed),
        events_decoded: EVENTS_DECODED.load(Ordering::Relaxed),
        decode_failed: DECODE_FAILED.load(Ordering::Relaxed),
        unhandled_topic: UNHANDLED_TOPIC.load(Ordering::Relaxed),
        undecryptable: UNDECRYPTABLE.load(Ordering::Relaxed),
        reconcile_failed: RECONCILE_FAILED.load(Ordering::Relaxed),
        broker_reconnects: BROKER_RECONNECTS.load(Ordering::Relaxed),
        by_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Counters are global and tests run in parallel, so only check deltas.
    #[test]
    fn decoded_events_are_counted_by_type() {
        let before = snapshot();
        record_decoded(EventKind::Traceroute);
        record_decoded(EventKind::Traceroute);
        inc_decode_failed();
        let after = snapshot();
        assert!(after.events_decoded >= before.events_decoded + 2);
        assert!(after.decode_failed > before.decode_failed);
        let t_before = before.by_type.get("traceroute").copied().unwrap_or(0);
        assert!(after.by_type["traceroute"] >= t_before + 2);
    }
}
