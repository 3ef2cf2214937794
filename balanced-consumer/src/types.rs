use serde::{Deserialize, Serialize};

/// A member id, stable for the lifetime of the process: `"<hostname>:<uuid>"`.
pub type MemberId = String;

/// One unit of parallelism within a topic, owned by at most one member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Partition {
    pub topic: String,
    pub leader_id: i32,
    pub partition_id: i32,
}

impl Partition {
    pub fn new(topic: impl Into<String>, leader_id: i32, partition_id: i32) -> Self {
        Self {
            topic: topic.into(),
            leader_id,
            partition_id,
        }
    }

    /// Canonical sort key: `<topic>-<leader_id>-<partition_id>`. Every
    /// member canonicalizes `T` identically before running the assignment
    /// function, which is what lets the assignment be agreed on without
    /// any cross-member communication.
    pub fn sort_key(&self) -> String {
        format!("{}-{}-{}", self.topic, self.leader_id, self.partition_id)
    }

    /// The coordinator key segment this partition's ownership record lives
    /// under: `<leader_id>-<partition_id>`. Uses the leader id *at
    /// registration time* — if the leader later changes, `read_held` will
    /// miss the record, but a leader change also fires the topic watch and
    /// triggers a fresh rebalance, so the staleness is self-correcting.
    pub fn owner_key_segment(&self) -> String {
        format!("{}-{}", self.leader_id, self.partition_id)
    }
}

/// Per-partition progress the inner consumer reports back, the Rust
/// rendering of the source's `_partitions_by_id.itervalues()` access
/// pattern: "enumerate currently-tracked (partition, offset) pairs"
/// without inheriting the legacy accessor name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionProgress {
    pub last_offset_consumed: i64,
}

/// A single delivered message.
#[derive(Debug, Clone)]
pub struct Message {
    pub partition: Partition,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
}
