//! End-to-end maintenance flow: heartbeats in, mode switches, backlog out

use axum::body::Body;
use axum::http::{Request, StatusCode};
use ringwarden::common::{MaintenanceConfig, RegistryConfig};
use ringwarden::maintenance::{MaintenanceAgent, ModeSwitcher};
use ringwarden::registry::http::{create_router, RegistryState};
use ringwarden::registry::{
    DiskRecord, DiskReport, MaintenanceBacklog, MaintenanceTarget, MissingDisks, NodeEntry,
    NodeMode, NodeRegistry, NodeStatus,
};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

struct Fleet {
    _dir: TempDir,
    registry: NodeRegistry,
    backlog: MaintenanceBacklog,
    switcher: ModeSwitcher,
    agent: MaintenanceAgent,
    app: axum::Router,
}

fn registry_config(dir: &Path) -> RegistryConfig {
    RegistryConfig {
        db_path: dir.join("registry"),
        backlog_path: dir.join("backlog"),
        lock_dir: dir.join("locks"),
        lock_retries: 3,
        lock_retry_delay_ms: 10,
        ..RegistryConfig::default()
    }
}

fn fleet() -> Fleet {
    let dir = tempfile::tempdir().unwrap();
    let config = registry_config(dir.path());
    let maintenance = MaintenanceConfig {
        replication_time_secs: 100,
        refresh_time_secs: 100,
        daemon_sleep_secs: 1,
    };
    let registry = NodeRegistry::from_config(&config);
    let backlog = MaintenanceBacklog::from_config(&config);
    let app = create_router(RegistryState {
        registry: Arc::new(registry.clone()),
        backlog: Arc::new(backlog.clone()),
    });
    Fleet {
        switcher: ModeSwitcher::new(registry.clone(), &maintenance),
        agent: MaintenanceAgent::from_config(&config, &maintenance),
        registry,
        backlog,
        app,
        _dir: dir,
    }
}

async fn call(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let request = builder
        .body(body.map_or(Body::empty(), |b| Body::from(b.to_string())))
        .unwrap();
    let res = app.clone().oneshot(request).await.unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_broken_disks_flow_from_heartbeat_to_backlog_and_back() {
    let fleet = fleet();
    let (status, _) = call(&fleet.app, "POST", "/nodes", Some(json!({"hostname": "storage-01"}))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = call(
        &fleet.app,
        "POST",
        "/heartbeat",
        Some(json!({
            "hostname": "storage-01",
            "status": "alive",
            "timestamp": 9_990,
            "diskReport": {
                "missing": {"count": 0, "timestamp": 0},
                "broken": [{"SN": "1", "timestamp": 9_800}, {"SN": "2", "timestamp": 9_950}],
                "healthy": [{"SN": "3", "timestamp": 9_000}]
            },
            "daemonReport": {"object-server": "up"}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // A disk broke inside the replication window: out of service
    let summary = fleet.switcher.tick_at(10_000).unwrap();
    assert_eq!(summary.to_waiting, vec!["storage-01"]);

    // Only disk 1 is past the grace period
    let renew = fleet.agent.renew_at(10_000).unwrap();
    assert_eq!(renew.inserted.as_deref(), Some("storage-01"));
    let (status, body) = call(&fleet.app, "GET", "/backlog?target=disk_broken", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(
        body["tasks"][0]["target"],
        json!({"disk_broken": {"disksToReplace": ["1"]}})
    );
    assert_eq!(body["tasks"][0]["createdAt"], 10_000);

    // Disk 2 crosses its deadline: the task is rewritten with a new age
    fleet.agent.renew_at(10_100).unwrap();
    let task = fleet.backlog.get("storage-01").unwrap().unwrap();
    assert_eq!(
        task.target,
        MaintenanceTarget::DiskBroken {
            disks_to_replace: vec!["1".into(), "2".into()]
        }
    );
    assert_eq!(task.created_at, 10_100);

    // Disks replaced: clean report puts the node back and clears the backlog
    let (status, _) = call(
        &fleet.app,
        "POST",
        "/heartbeat",
        Some(json!({
            "hostname": "storage-01",
            "status": "alive",
            "timestamp": 10_150,
            "diskReport": {
                "missing": {"count": 0, "timestamp": 0},
                "broken": [],
                "healthy": [{"SN": "3", "timestamp": 10_150}, {"SN": "4", "timestamp": 10_150}]
            }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let summary = fleet.switcher.tick_at(10_160).unwrap();
    assert_eq!(summary.to_service, vec!["storage-01"]);
    let renew = fleet.agent.renew_at(10_160).unwrap();
    assert_eq!(renew.removed, vec!["storage-01"]);
    assert!(fleet.backlog.is_empty().unwrap());
}

#[tokio::test]
async fn test_malformed_heartbeat_is_rejected_at_the_boundary() {
    let fleet = fleet();
    call(&fleet.app, "POST", "/nodes", Some(json!({"hostname": "storage-02"}))).await;

    let (status, body) = call(
        &fleet.app,
        "POST",
        "/heartbeat",
        Some(json!({
            "hostname": "storage-02",
            "status": "alive",
            "timestamp": 50,
            "diskReport": {
                "missing": {"count": 0, "timestamp": 0},
                "broken": [{"SN": "X", "timestamp": 40}],
                "healthy": [{"SN": "X", "timestamp": 40}]
            }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("X"));

    let node = fleet.registry.get("storage-02").unwrap().unwrap();
    assert_eq!(node.status, NodeStatus::Unknown);
    assert!(node.disk_report.is_none());
}

fn waiting(hostname: &str, status: NodeStatus, report: DiskReport) -> NodeEntry {
    NodeEntry {
        status,
        disk_report: Some(report),
        mode: NodeMode::Waiting,
        ..NodeEntry::new(hostname, 0)
    }
}

#[test]
fn test_discovery_queues_one_node_per_cycle() {
    let fleet = fleet();
    let missing = DiskReport {
        missing: MissingDisks {
            count: 2,
            timestamp: 100,
        },
        broken: vec![],
        healthy: vec![DiskRecord::new("H1", 100)],
    };
    let broken = DiskReport {
        missing: MissingDisks::default(),
        broken: vec![DiskRecord::new("B1", 100)],
        healthy: vec![],
    };
    fleet
        .registry
        .add_node(&waiting("storage-a", NodeStatus::Alive, missing))
        .unwrap();
    // Dead wins over broken disks
    fleet
        .registry
        .add_node(&waiting("storage-b", NodeStatus::Dead, broken))
        .unwrap();

    let first = fleet.agent.renew_at(1_000).unwrap();
    assert_eq!(first.inserted.as_deref(), Some("storage-a"));
    let task = fleet.backlog.get("storage-a").unwrap().unwrap();
    assert_eq!(
        task.target,
        MaintenanceTarget::DiskMissing {
            disks_to_reserve: vec!["H1".into()]
        }
    );

    // Backlog not empty: refresh only
    let second = fleet.agent.renew_at(1_010).unwrap();
    assert_eq!(second.refreshed, vec!["storage-a"]);
    assert!(second.inserted.is_none());
    assert_eq!(fleet.backlog.list().unwrap().len(), 1);
    assert_eq!(fleet.backlog.get("storage-a").unwrap().unwrap(), task);

    // storage-a leaves the fleet; its task goes and storage-b gets its turn
    assert!(fleet.registry.deregister("storage-a").unwrap());
    let third = fleet.agent.renew_at(1_020).unwrap();
    assert_eq!(third.removed, vec!["storage-a"]);
    assert_eq!(third.inserted.as_deref(), Some("storage-b"));
    assert_eq!(
        fleet.backlog.get("storage-b").unwrap().unwrap().target,
        MaintenanceTarget::NodeMissing
    );
}
