//! End-to-end scheduling pass tests against stateful axum mock nodes.
//!
//! Each mock node keeps its running-instance list current across
//! start/stop calls, the way a real node would, so the baseline step's
//! fresh status fetch observes earlier placements.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use fleet_nodes::NodeClientPool;
use fleet_scheduler::{BusyQueueStrategy, StrategyConfig, StrategyRunner};
use fleet_state::{
    BUSY_QUEUE_SCALING, ModelRecord, NodeRecord, NodeStatus, StateStore, StrategyRecord,
};

const TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Default)]
struct MockNode {
    instances: Arc<Mutex<Vec<Value>>>,
    starts: Arc<Mutex<Vec<(String, u32)>>>,
    stops: Arc<Mutex<Vec<(String, u32)>>>,
    fail_starts: Arc<AtomicBool>,
}

impl MockNode {
    fn with_instance(self, model: &str, gpu_id: u32) -> Self {
        self.instances.lock().unwrap().push(json!({
            "model_name": model,
            "gpu_id": gpu_id,
            "pid": 1000 + gpu_id,
            "status": "RUNNING",
        }));
        self
    }

    fn starts(&self) -> Vec<(String, u32)> {
        self.starts.lock().unwrap().clone()
    }

    fn stops(&self) -> Vec<(String, u32)> {
        self.stops.lock().unwrap().clone()
    }
}

async fn spawn_node(mock: MockNode) -> SocketAddr {
    let router = Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/api/v1/gpus", get(|| async { Json(json!([])) }))
        .route(
            "/api/v1/models/status",
            get(|State(node): State<MockNode>| async move {
                Json(Value::Array(node.instances.lock().unwrap().clone()))
            }),
        )
        .route(
            "/api/v1/models/start",
            post(|State(node): State<MockNode>, Json(body): Json<Value>| async move {
                if node.fail_starts.load(Ordering::Relaxed) {
                    return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({})));
                }
                let name = body["model_name"].as_str().unwrap_or_default().to_string();
                let gpu_id = body["gpu_id"].as_u64().unwrap_or_default() as u32;
                node.starts.lock().unwrap().push((name.clone(), gpu_id));
                node.instances.lock().unwrap().push(json!({
                    "model_name": name,
                    "gpu_id": gpu_id,
                    "pid": 2000 + gpu_id,
                    "status": "RUNNING",
                }));
                (StatusCode::OK, Json(json!({"status": "success"})))
            }),
        )
        .route(
            "/api/v1/models/stop",
            post(|State(node): State<MockNode>, Json(body): Json<Value>| async move {
                let name = body["model_name"].as_str().unwrap_or_default().to_string();
                let gpu_id = body["gpu_id"].as_u64().unwrap_or_default() as u32;
                node.stops.lock().unwrap().push((name, gpu_id));
                node.instances
                    .lock()
                    .unwrap()
                    .retain(|i| i["gpu_id"].as_u64() != Some(u64::from(gpu_id)));
                Json(json!({"status": "success"}))
            }),
        )
        .with_state(mock);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn node_record(addr: SocketAddr, gpus: &[u32], models: &[&str]) -> NodeRecord {
    NodeRecord {
        node_ip: addr.ip().to_string(),
        node_port: addr.port(),
        available_gpu_ids: gpus.iter().copied().collect(),
        available_models: models.iter().map(|m| m.to_string()).collect(),
        status: NodeStatus::Online,
        last_heartbeat: None,
        created_at: 0,
        updated_at: 0,
    }
}

fn model(id: u64, name: &str, inference_time: Option<f64>) -> ModelRecord {
    ModelRecord {
        id,
        model_name: name.to_string(),
        average_inference_time: inference_time,
        rabbitmq_host: None,
        rabbitmq_port: 15672,
        rabbitmq_queue_name: None,
        rabbitmq_username: None,
        rabbitmq_password: None,
        rabbitmq_vhost: None,
        created_at: 0,
        updated_at: 0,
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Append `count` samples of the given length, `age_secs` in the past.
fn seed_samples(state: &StateStore, model_id: u64, count: usize, length: u64, age_secs: u64) {
    let ts = now() - age_secs;
    for _ in 0..count {
        state.append_queue_length(model_id, length, ts).unwrap();
    }
}

fn strategy(state: StateStore) -> BusyQueueStrategy {
    BusyQueueStrategy::new(
        state,
        Arc::new(NodeClientPool::new(TIMEOUT)),
        StrategyConfig::default(),
    )
}

#[tokio::test]
async fn busy_model_is_started_on_a_free_gpu() {
    // 12 samples averaging 5 with an 80s inference time (400 > 300),
    // recent 5-minute average 3 > 0: one candidate.
    let state = StateStore::open_in_memory().unwrap();
    state.put_model(&model(1, "mam", Some(80.0))).unwrap();
    seed_samples(&state, 1, 6, 7, 400);
    seed_samples(&state, 1, 6, 3, 100);

    let mock = MockNode::default();
    let addr = spawn_node(mock.clone()).await;
    state.put_node(&node_record(addr, &[2], &["mam"])).unwrap();

    let report = strategy(state).run_pass().await.unwrap();

    assert_eq!(report.candidates, 1);
    assert_eq!(report.started, 1);
    assert_eq!(report.baseline_started, 0);
    assert_eq!(report.failed, 0);
    assert_eq!(mock.starts(), vec![("mam".to_string(), 2)]);
}

#[tokio::test]
async fn unsupported_candidate_is_consumed_without_placement() {
    let state = StateStore::open_in_memory().unwrap();
    state.put_model(&model(1, "mam", Some(80.0))).unwrap();
    seed_samples(&state, 1, 12, 5, 100);

    let mock = MockNode::default();
    let addr = spawn_node(mock.clone()).await;
    // The node has a free GPU but cannot run "mam".
    state
        .put_node(&node_record(addr, &[0], &["other"]))
        .unwrap();

    let report = strategy(state).run_pass().await.unwrap();

    assert_eq!(report.candidates, 1);
    assert_eq!(report.started, 0);
    assert_eq!(report.failed, 0);
    assert!(mock.starts().is_empty());
    assert!(mock.stops().is_empty());
}

#[tokio::test]
async fn consumed_candidate_does_not_block_later_slots() {
    // Candidate "a" outranks "b" but the node only supports "b": "a"
    // is popped for GPU 0 and lost, "b" lands on GPU 1.
    let state = StateStore::open_in_memory().unwrap();
    state.put_model(&model(1, "a", Some(60.0))).unwrap();
    state.put_model(&model(2, "b", Some(60.0))).unwrap();
    seed_samples(&state, 1, 12, 30, 100);
    seed_samples(&state, 2, 12, 20, 100);

    let mock = MockNode::default();
    let addr = spawn_node(mock.clone()).await;
    state.put_node(&node_record(addr, &[0, 1], &["b"])).unwrap();

    let report = strategy(state).run_pass().await.unwrap();

    assert_eq!(report.candidates, 2);
    assert_eq!(report.started, 1);
    assert_eq!(mock.starts(), vec![("b".to_string(), 1)]);
}

#[tokio::test]
async fn higher_recent_average_wins_the_last_gpu() {
    let state = StateStore::open_in_memory().unwrap();
    state.put_model(&model(1, "a", Some(60.0))).unwrap();
    state.put_model(&model(2, "b", Some(60.0))).unwrap();
    seed_samples(&state, 1, 12, 10, 100);
    seed_samples(&state, 2, 12, 20, 100);

    let mock = MockNode::default();
    let addr = spawn_node(mock.clone()).await;
    state
        .put_node(&node_record(addr, &[0], &["a", "b"]))
        .unwrap();

    let report = strategy(state).run_pass().await.unwrap();

    assert_eq!(report.candidates, 2);
    assert_eq!(mock.starts(), vec![("b".to_string(), 0)]);
}

#[tokio::test]
async fn steady_state_pass_issues_no_calls() {
    // Model has an instance and little history: nothing to do.
    let state = StateStore::open_in_memory().unwrap();
    state.put_model(&model(1, "mam", Some(80.0))).unwrap();
    seed_samples(&state, 1, 3, 2, 100);

    let mock = MockNode::default().with_instance("mam", 0);
    let addr = spawn_node(mock.clone()).await;
    state
        .put_node(&node_record(addr, &[0, 1], &["mam"]))
        .unwrap();

    let report = strategy(state).run_pass().await.unwrap();

    assert_eq!(report, Default::default());
    assert!(mock.starts().is_empty());
    assert!(mock.stops().is_empty());
}

#[tokio::test]
async fn idle_instance_is_replaced_by_a_candidate() {
    let state = StateStore::open_in_memory().unwrap();
    state.put_model(&model(1, "hot", Some(60.0))).unwrap();
    // "cold" is registered but has no queue activity at all.
    state.put_model(&model(2, "cold", Some(60.0))).unwrap();
    seed_samples(&state, 1, 12, 10, 100);

    let mock = MockNode::default().with_instance("cold", 0);
    let addr = spawn_node(mock.clone()).await;
    state
        .put_node(&node_record(addr, &[0], &["hot", "cold"]))
        .unwrap();

    let report = strategy(state).run_pass().await.unwrap();

    assert_eq!(report.replaced, 1);
    assert_eq!(report.started, 0);
    assert_eq!(mock.stops(), vec![("cold".to_string(), 0)]);
    assert_eq!(mock.starts(), vec![("hot".to_string(), 0)]);
}

#[tokio::test]
async fn unregistered_instances_are_never_replaced() {
    let state = StateStore::open_in_memory().unwrap();
    state.put_model(&model(1, "hot", Some(60.0))).unwrap();
    seed_samples(&state, 1, 12, 10, 100);

    // The running instance belongs to a model the registry doesn't know.
    let mock = MockNode::default().with_instance("mystery", 0);
    let addr = spawn_node(mock.clone()).await;
    state.put_node(&node_record(addr, &[0], &["hot"])).unwrap();

    let report = strategy(state).run_pass().await.unwrap();

    assert_eq!(report.candidates, 1);
    assert_eq!(report.replaced, 0);
    assert!(mock.starts().is_empty());
    assert!(mock.stops().is_empty());
}

#[tokio::test]
async fn offline_node_does_not_abort_the_pass() {
    let state = StateStore::open_in_memory().unwrap();
    state.put_model(&model(1, "hot", Some(60.0))).unwrap();
    seed_samples(&state, 1, 12, 10, 100);

    // One unreachable node (still marked online in the store) and one
    // healthy node with capacity.
    let dead = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr
    };
    state.put_node(&node_record(dead, &[], &["hot"])).unwrap();

    let mock = MockNode::default();
    let addr = spawn_node(mock.clone()).await;
    state.put_node(&node_record(addr, &[0], &["hot"])).unwrap();

    let report = strategy(state).run_pass().await.unwrap();

    assert_eq!(report.started, 1);
    assert_eq!(mock.starts(), vec![("hot".to_string(), 0)]);
}

#[tokio::test]
async fn baseline_places_absent_models_first_fit() {
    // No telemetry at all: the model is not busy, but the baseline
    // guarantee still places one instance on the lowest free GPU.
    let state = StateStore::open_in_memory().unwrap();
    state.put_model(&model(1, "mam", None)).unwrap();

    let mock = MockNode::default();
    let addr = spawn_node(mock.clone()).await;
    state
        .put_node(&node_record(addr, &[0, 1], &["mam"]))
        .unwrap();

    let report = strategy(state).run_pass().await.unwrap();

    assert_eq!(report.baseline_started, 1);
    assert_eq!(mock.starts(), vec![("mam".to_string(), 0)]);
}

#[tokio::test]
async fn baseline_keeps_scanning_after_a_failed_start() {
    let state = StateStore::open_in_memory().unwrap();
    state.put_model(&model(1, "mam", None)).unwrap();

    let mock_a = MockNode::default();
    let mock_b = MockNode::default();
    let addr_a = spawn_node(mock_a.clone()).await;
    let addr_b = spawn_node(mock_b.clone()).await;
    state
        .put_node(&node_record(addr_a, &[0], &["mam"]))
        .unwrap();
    state
        .put_node(&node_record(addr_b, &[0], &["mam"]))
        .unwrap();

    // Whichever node the store enumerates first refuses starts.
    let first_key = state.list_nodes().unwrap()[0].node_key();
    let (failing, healthy) = if first_key == format!("{}:{}", addr_a.ip(), addr_a.port()) {
        (&mock_a, &mock_b)
    } else {
        (&mock_b, &mock_a)
    };
    failing.fail_starts.store(true, Ordering::Relaxed);

    let report = strategy(state).run_pass().await.unwrap();

    assert_eq!(report.baseline_started, 1);
    assert_eq!(report.failed, 1);
    assert!(failing.starts().is_empty());
    assert_eq!(healthy.starts(), vec![("mam".to_string(), 0)]);
}

#[tokio::test]
async fn runner_applies_only_active_strategies() {
    let state = StateStore::open_in_memory().unwrap();
    state.put_model(&model(1, "mam", None)).unwrap();

    let mock = MockNode::default();
    let addr = spawn_node(mock.clone()).await;
    state.put_node(&node_record(addr, &[0], &["mam"])).unwrap();

    let runner = StrategyRunner::new(
        state.clone(),
        Arc::new(NodeClientPool::new(TIMEOUT)),
        StrategyConfig::default(),
    );

    // No strategy rows: nothing happens.
    assert_eq!(runner.apply_active().await.unwrap(), None);
    assert!(mock.starts().is_empty());

    // Inactive strategy: still nothing.
    state
        .put_strategy(&StrategyRecord {
            name: BUSY_QUEUE_SCALING.to_string(),
            active: false,
        })
        .unwrap();
    assert_eq!(runner.apply_active().await.unwrap(), None);
    assert!(mock.starts().is_empty());

    // Active strategy: the pass runs and the baseline fires.
    state
        .put_strategy(&StrategyRecord {
            name: BUSY_QUEUE_SCALING.to_string(),
            active: true,
        })
        .unwrap();
    let report = runner.apply_active().await.unwrap().unwrap();
    assert_eq!(report.baseline_started, 1);
    assert_eq!(mock.starts(), vec![("mam".to_string(), 0)]);
}
