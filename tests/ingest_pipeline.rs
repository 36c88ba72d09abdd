mod common;

use std::sync::Arc;
use tokio_test::assert_ok;

use common::{shared_registry, test_config, JSON_TOPIC, LOCAL};
use meshinfo::config::Config;
use meshinfo::ingest::Pipeline;
use meshinfo::meshtastic::{NodeId, WireDecoder};
use meshinfo::registry::{MergeOutcome, NodeFilter};
use meshinfo::storage::{Storage, MESSAGE_LOG_FILE};

const JTRC: NodeId = NodeId::new(0xda63_9058);

fn pipeline(config: &Config, storage: Option<Arc<Storage>>) -> Pipeline {
    let decoder = WireDecoder::from_config(&config.broker).unwrap();
    Pipeline::new(config, decoder, shared_registry(), storage)
}

#[tokio::test]
async fn nodeinfo_creates_active_sorted_entry() {
    let config = Config::default();
    let p = pipeline(&config, None);

    let zulu = br#"{"type":"nodeinfo","from":1,"payload":{"shortname":"ZULU","longname":"Last"}}"#;
    assert_ok!(p.handle_message(JSON_TOPIC, zulu).await);

    let raw = br#"{"type":"nodeinfo","from":3663958104,"payload":{"id":"!da639058","shortname":"JTRC","longname":"Node JTRC","hardware":43}}"#;
    let outcome = p.handle_message(JSON_TOPIC, raw).await.unwrap().unwrap();
    assert_eq!(outcome.node, Some(JTRC));
    assert_eq!(outcome.merge, Some(MergeOutcome::Created));

    let reg = p.registry().read().await;
    let node = reg.node("da639058").unwrap();
    assert_eq!(node.shortname, "JTRC");
    assert_eq!(node.longname, "Node JTRC");
    assert!(node.active);

    let names: Vec<&str> = reg.nodes().map(|n| n.shortname.as_str()).collect();
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);
}

#[tokio::test]
async fn neighbor_reports_feed_the_graph() {
    let config = Config::default();
    let p = pipeline(&config, None);
    let local = LOCAL.as_u32();

    let report = format!(
        r#"{{"type":"neighborinfo","from":{},"payload":{{"node_id":{},"neighbors":[{{"node_id":3663958104,"snr":6.5}}]}}}}"#,
        local, local
    );
    assert_ok!(p.handle_message(JSON_TOPIC, report.as_bytes()).await);
    let name = br#"{"type":"nodeinfo","from":3663958104,"payload":{"shortname":"JTRC"}}"#;
    assert_ok!(p.handle_message(JSON_TOPIC, name).await);

    let reg = p.registry().read().await;
    let graph = reg.graph(2).unwrap();
    assert_eq!(graph.id, LOCAL);
    assert_eq!(graph.neighbors_heard.len(), 1);
    assert_eq!(graph.neighbors_heard[0].id, JTRC);
    assert_eq!(graph.neighbors_heard[0].shortname, "JTRC");
    assert_eq!(graph.neighbors_heard[0].snr, Some(6.5));

    let active = reg.list_nodes(&NodeFilter::active());
    assert!(active.iter().any(|n| n.id == JTRC));
}

#[tokio::test]
async fn traffic_without_sender_is_dropped() {
    let config = Config::default();
    let p = pipeline(&config, None);
    let before = p.registry().read().await.len();

    let raw = br#"{"type":"position","payload":{"latitude_i":1,"longitude_i":2}}"#;
    let out = p
        .handle_message("msh/US/2/json/LongFast/notanode", raw)
        .await
        .unwrap();
    assert!(out.is_none());
    assert_eq!(p.registry().read().await.len(), before);
}

#[tokio::test]
async fn audit_log_is_written_when_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let storage = Arc::new(Storage::new(&config.paths.data).await.unwrap());
    let p = pipeline(&config, Some(storage));

    let raw = br#"{"type":"text","from":3663958104,"channel":0,"payload":{"text":"hello mesh"}}"#;
    assert_ok!(p.handle_message(JSON_TOPIC, raw).await);
    assert_ok!(p.handle_message("msh/US/2/stat/!da639058", b"online").await);

    let log = std::fs::read_to_string(dir.path().join("data").join(MESSAGE_LOG_FILE)).unwrap();
    assert_eq!(log.lines().count(), 1);
    assert!(log.contains("hello mesh"));

    let reg = p.registry().read().await;
    let general = &reg.chat().channels["0"];
    assert_eq!(general.messages[0].text, "hello mesh");
}
