mod common;

use chrono::{DateTime, TimeZone, Utc};

use common::LOCAL;
use meshinfo::config::LogsConfig;
use meshinfo::meshtastic::{NodeId, NodeRef, Position, Telemetry};
use meshinfo::registry::{
    Envelope, LogLimits, NodeUpdate, Registry, RouteHop, TelemetryRecord, TracerouteRecord,
};
use meshinfo::storage::{Storage, CHAT_FILE, NODES_FILE, OVERRIDES_FILE, TRACEROUTES_FILE};

const A: NodeId = NodeId::new(0xda63_9058);
const B: NodeId = NodeId::new(0x0000_00aa);

fn named(short: &str, long: &str) -> NodeUpdate {
    NodeUpdate {
        shortname: Some(short.into()),
        longname: Some(long.into()),
        ..Default::default()
    }
}

#[tokio::test]
async fn registry_survives_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::new(dir.path().to_str().unwrap()).await.unwrap();

    let mut reg = Registry::new(LOCAL);
    reg.merge(A, named("JTRC", "Node JTRC"));
    reg.merge(
        A,
        NodeUpdate {
            position: Some(Position {
                latitude_i: Some(376_543_210),
                longitude_i: Some(-1_223_456_789),
                ..Default::default()
            }),
            last_position_update: Some(Utc::now()),
            ..Default::default()
        },
    );
    reg.merge(B, named("BBBB", "Quiet"));
    // force B inactive
    reg.prune_at(1, Utc::now() + chrono::Duration::hours(1));
    reg.merge(A, NodeUpdate::default());
    reg.sort_by_shortname();
    storage.save(&reg, &LogsConfig::default()).await.unwrap();

    let loaded = storage.load_registry(LOCAL, LogLimits::default()).await.unwrap();
    assert_eq!(loaded.len(), reg.len());
    let a = loaded.get(&A).unwrap();
    assert_eq!(a.shortname, "JTRC");
    assert_eq!(a.longname, "Node JTRC");
    assert!(a.active);
    assert_eq!(a.position.as_ref().unwrap().latitude_i, Some(376_543_210));
    assert!(!loaded.get(&B).unwrap().active);

    // keys on disk are canonical hex strings
    let text = std::fs::read_to_string(dir.path().join(NODES_FILE)).unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert!(json.get("da639058").is_some());
    assert!(json.get("000000aa").is_some());
}

#[tokio::test]
async fn persist_flags_skip_log_files() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::new(dir.path().to_str().unwrap()).await.unwrap();
    let mut logs = LogsConfig::default();
    logs.chat.persist = false;

    storage.save(&Registry::new(LOCAL), &logs).await.unwrap();
    assert!(dir.path().join(NODES_FILE).exists());
    assert!(!dir.path().join(CHAT_FILE).exists());
}

#[tokio::test]
async fn overrides_are_applied_on_load() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join(OVERRIDES_FILE),
        r#"{"da639058": {"shortname": "OVR"}, "000000aa": {"purge": true}}"#,
    )
    .unwrap();
    let storage = Storage::new(dir.path().to_str().unwrap()).await.unwrap();

    let mut reg = Registry::new(LOCAL);
    reg.merge(A, named("JTRC", "Node JTRC"));
    reg.merge(B, named("BBBB", "Quiet"));
    storage.save(&reg, &LogsConfig::default()).await.unwrap();

    let loaded = storage.load_registry(LOCAL, LogLimits::default()).await.unwrap();
    assert_eq!(loaded.get(&A).unwrap().shortname, "OVR");
    assert!(loaded.get(&B).is_none());
}

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn envelope(from: NodeId, timestamp: i64) -> Envelope {
    Envelope {
        id: Some(42),
        from,
        to: Some(NodeId::BROADCAST),
        sender: Some(LOCAL),
        channel: Some("0".into()),
        timestamp,
        hops_away: Some(1),
        rssi: Some(-90),
        snr: Some(6.5),
    }
}

#[tokio::test]
async fn sighting_times_survive_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::new(dir.path().to_str().unwrap()).await.unwrap();

    let mut reg = Registry::new_at(LOCAL, at(0));
    reg.merge_at(A, named("JTRC", "Node JTRC"), at(10));
    reg.merge_at(A, NodeUpdate::default(), at(95));
    storage.save(&reg, &LogsConfig::default()).await.unwrap();

    let loaded = storage.load_registry(LOCAL, LogLimits::default()).await.unwrap();
    let a = loaded.get(&A).unwrap();
    assert_eq!(a.first_seen, Some(at(10)));
    assert_eq!(a.last_seen, Some(at(95)));
    assert_eq!(a.since, Some(85));
}

#[tokio::test]
async fn telemetry_and_traceroutes_survive_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::new(dir.path().to_str().unwrap()).await.unwrap();

    let mut reg = Registry::new(LOCAL);
    reg.merge(A, named("JTRC", "Node JTRC"));
    reg.push_telemetry(TelemetryRecord {
        envelope: envelope(A, 1_700_000_100),
        payload: Telemetry {
            battery_level: Some(87),
            voltage: Some(4.1),
            ..Default::default()
        },
    });
    reg.push_traceroute(TracerouteRecord {
        envelope: envelope(A, 1_700_000_200),
        route: vec![
            NodeRef::Number(12345),
            NodeRef::Text("deadbeef".into()),
            NodeRef::Number(u64::from(A.as_u32())),
        ],
        route_ids: vec![
            RouteHop::Unresolved(NodeRef::Number(12345)),
            RouteHop::Unresolved(NodeRef::Text("deadbeef".into())),
            RouteHop::Resolved(A),
        ],
    });
    storage.save(&reg, &LogsConfig::default()).await.unwrap();

    let loaded = storage.load_registry(LOCAL, LogLimits::default()).await.unwrap();
    assert_eq!(loaded.telemetry_log(), reg.telemetry_log());
    assert_eq!(loaded.traceroute_log(), reg.traceroute_log());
    assert_eq!(loaded.telemetry(Some(A)).len(), 1);
    assert_eq!(loaded.traceroutes(Some(A)).len(), 1);

    // an unresolved hop that looks like a node id stays unresolved on disk
    let text = std::fs::read_to_string(dir.path().join(TRACEROUTES_FILE)).unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(
        json[0]["route_ids"][1],
        serde_json::json!({"unresolved": "deadbeef"})
    );
}

#[tokio::test]
async fn load_applies_log_limits() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::new(dir.path().to_str().unwrap()).await.unwrap();

    let mut reg = Registry::new(LOCAL);
    for i in 0..5 {
        reg.push_telemetry(TelemetryRecord {
            envelope: envelope(A, i),
            payload: Telemetry::default(),
        });
    }
    storage.save(&reg, &LogsConfig::default()).await.unwrap();

    let mut logs = LogsConfig::default();
    logs.max_telemetry_in_memory = 2;
    let loaded = storage.load_registry(LOCAL, LogLimits::from(&logs)).await.unwrap();
    let kept: Vec<i64> = loaded.telemetry_log().iter().map(|r| r.envelope.timestamp).collect();
    assert_eq!(kept, vec![4, 3]);
}
