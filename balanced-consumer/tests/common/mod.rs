#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Once};
use std::time::Duration;

use balanced_consumer::inner::fake::FakeInnerConsumerFactory;
use balanced_consumer::{BalancedConsumer, CoordinatorConfig, Partition, StaticTopicMetadata};
use coord_store::{CoordinatorClient, StoreConfig};
use envconfig::Envconfig;

pub const ETCD_ENDPOINT: &str = "http://localhost:2379";
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

static TRACING_INIT: Once = Once::new();

/// Route the crate's `tracing` output through the test harness's own
/// writer instead of stdout, so a failing convergence test shows what the
/// rebalancer actually did.
pub fn setup_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_writer(tracing_subscriber::fmt::TestWriter::new())
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .init()
    });
}

pub async fn test_store(test_name: &str) -> CoordinatorClient {
    setup_tracing();
    let prefix = format!("/test-{}-{}/", test_name, uuid::Uuid::new_v4());
    let config = StoreConfig {
        endpoints: vec![ETCD_ENDPOINT.to_string()],
        prefix,
    };
    CoordinatorClient::connect(config)
        .await
        .expect("failed to connect to etcd")
}

pub fn partitions(topic: &str, n: i32) -> Vec<Partition> {
    (0..n).map(|i| Partition::new(topic, 0, i)).collect()
}

/// A config tuned for fast-converging tests: liveness checking is
/// effectively disabled (watches + the initial rebalance already drive
/// convergence in these scenarios) and the session TTL is short enough
/// that a `stop()` or lease loss resolves quickly.
pub fn test_config() -> CoordinatorConfig {
    let mut config =
        CoordinatorConfig::init_from_hashmap(&HashMap::new()).expect("defaults should parse");
    config.liveness_check_interval_seconds = 3600;
    config.session_ttl_seconds = 10;
    config.rebalance_backoff_ms = 50;
    config
}

pub async fn start_member(store: &CoordinatorClient, topic: &str, n_partitions: i32) -> BalancedConsumer {
    BalancedConsumer::start(
        "test-cluster",
        "test-group",
        topic,
        store.clone(),
        Arc::new(StaticTopicMetadata::new(partitions(topic, n_partitions))),
        Arc::new(FakeInnerConsumerFactory),
        test_config(),
        None,
    )
    .await
    .expect("member should start")
}

pub async fn owner_of(store: &CoordinatorClient, topic: &str, leader_id: i32, partition_id: i32) -> Option<String> {
    let key = format!("{}owners/{}/{}-{}", store.prefix(), topic, leader_id, partition_id);
    store.get::<String>(&key).await.unwrap()
}

pub async fn owned_by(store: &CoordinatorClient, topic: &str, n: i32, member_id: &str) -> usize {
    let mut count = 0;
    for i in 0..n {
        if owner_of(store, topic, 0, i).await.as_deref() == Some(member_id) {
            count += 1;
        }
    }
    count
}

pub async fn owned_count(store: &CoordinatorClient, topic: &str, n: i32) -> usize {
    let mut count = 0;
    for i in 0..n {
        if owner_of(store, topic, 0, i).await.is_some() {
            count += 1;
        }
    }
    count
}

pub async fn wait_for_condition<F, Fut>(timeout: Duration, interval: Duration, f: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if f().await {
            return;
        }
        tokio::time::sleep(interval).await;
    }
    panic!("condition not met within {timeout:?}");
}
