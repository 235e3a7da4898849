//! Node monitor integration test: liveness transitions are persisted.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;

use fleet_nodes::{NodeClientPool, NodeMonitor};
use fleet_state::{NodeRecord, NodeStatus, StateStore};

async fn spawn_ok_node() -> SocketAddr {
    let router = Router::new().route("/", get(|| async { "ok" }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn node_record(addr: SocketAddr) -> NodeRecord {
    NodeRecord {
        node_ip: addr.ip().to_string(),
        node_port: addr.port(),
        available_gpu_ids: BTreeSet::new(),
        available_models: BTreeSet::new(),
        status: NodeStatus::Unknown,
        last_heartbeat: None,
        created_at: 0,
        updated_at: 0,
    }
}

#[tokio::test]
async fn refresh_marks_nodes_online_and_offline() {
    let live = spawn_ok_node().await;
    let dead = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr
    };

    let state = StateStore::open_in_memory().unwrap();
    state.put_node(&node_record(live)).unwrap();
    state.put_node(&node_record(dead)).unwrap();

    let pool = Arc::new(NodeClientPool::new(Duration::from_secs(2)));
    let monitor = NodeMonitor::new(state.clone(), pool);

    let online = monitor.refresh_all().await.unwrap();
    assert_eq!(online, 1);

    let live_row = state
        .get_node(&format!("{}:{}", live.ip(), live.port()))
        .unwrap()
        .unwrap();
    assert_eq!(live_row.status, NodeStatus::Online);
    assert!(live_row.last_heartbeat.is_some());

    let dead_row = state
        .get_node(&format!("{}:{}", dead.ip(), dead.port()))
        .unwrap()
        .unwrap();
    assert_eq!(dead_row.status, NodeStatus::Offline);
    assert_eq!(dead_row.last_heartbeat, None);
}

#[tokio::test]
async fn refresh_with_no_nodes_is_a_noop() {
    let state = StateStore::open_in_memory().unwrap();
    let pool = Arc::new(NodeClientPool::new(Duration::from_secs(1)));
    let monitor = NodeMonitor::new(state, pool);
    assert_eq!(monitor.refresh_all().await.unwrap(), 0);
}
