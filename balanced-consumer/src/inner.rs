use std::collections::HashMap;

use async_trait::async_trait;

use crate::config::InnerConsumerConfig;
use crate::error::Result;
use crate::types::{Message, Partition, PartitionProgress};

/// The per-partition fetch/decompress/iterate collaborator. Out of scope
/// for this crate: this trait is only the interface the core drives, not
/// an implementation of the fetch path itself.
#[async_trait]
pub trait InnerConsumer: Send + Sync {
    async fn stop(&self);

    async fn commit_offsets(&self) -> Result<()>;

    async fn reset_offsets(&self, partition_offsets: HashMap<Partition, i64>) -> Result<()>;

    /// Fetch the next message. `block` controls whether the call waits
    /// for one to arrive; `Ok(None)` means no message arrived within the
    /// configured timeout.
    async fn consume(&self, block: bool) -> Result<Option<Message>>;

    /// Enumerate every partition this inner consumer currently tracks,
    /// with its progress: currently-tracked (partition, offset) pairs,
    /// named for what they return rather than for any legacy accessor.
    fn tracked_partitions(&self) -> Vec<(Partition, PartitionProgress)>;
}

/// Builds an [`InnerConsumer`] over a fixed partition set. The rebalancer
/// tears down and rebuilds through this factory every time the assignment
/// changes.
#[async_trait]
pub trait InnerConsumerFactory: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn build(
        &self,
        topic: &str,
        cluster: &str,
        group: &str,
        partitions: &[Partition],
        config: &InnerConsumerConfig,
        auto_start: bool,
        reset_offset_on_start: bool,
    ) -> Result<Box<dyn InnerConsumer>>;
}

/// An in-memory fake inner consumer, for testing the rebalancer and
/// façade without a real broker connection — the same in-memory-fake
/// treatment applied to the coordination backend, applied here to the
/// inner consumer.
pub mod fake {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct State {
        queue: VecDeque<Message>,
        offsets: HashMap<Partition, i64>,
        stopped: bool,
        commit_count: u32,
    }

    pub struct FakeInnerConsumer {
        partitions: Vec<Partition>,
        state: Mutex<State>,
    }

    impl FakeInnerConsumer {
        pub fn new(partitions: Vec<Partition>, reset_offset_on_start: bool) -> Self {
            let mut offsets = HashMap::new();
            for p in &partitions {
                offsets.insert(p.clone(), if reset_offset_on_start { 0 } else { -1 });
            }
            Self {
                partitions,
                state: Mutex::new(State {
                    offsets,
                    ..Default::default()
                }),
            }
        }

        /// Test hook: enqueue a message as if the broker delivered it.
        pub fn push(&self, message: Message) {
            let mut state = self.state.lock().unwrap();
            state.offsets.insert(message.partition.clone(), message.offset);
            state.queue.push_back(message);
        }

        pub fn commit_count(&self) -> u32 {
            self.state.lock().unwrap().commit_count
        }

        pub fn is_stopped(&self) -> bool {
            self.state.lock().unwrap().stopped
        }
    }

    #[async_trait]
    impl InnerConsumer for FakeInnerConsumer {
        async fn stop(&self) {
            self.state.lock().unwrap().stopped = true;
        }

        async fn commit_offsets(&self) -> Result<()> {
            self.state.lock().unwrap().commit_count += 1;
            Ok(())
        }

        async fn reset_offsets(&self, partition_offsets: HashMap<Partition, i64>) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            for (p, offset) in partition_offsets {
                state.offsets.insert(p, offset);
            }
            Ok(())
        }

        async fn consume(&self, _block: bool) -> Result<Option<Message>> {
            Ok(self.state.lock().unwrap().queue.pop_front())
        }

        fn tracked_partitions(&self) -> Vec<(Partition, PartitionProgress)> {
            let state = self.state.lock().unwrap();
            self.partitions
                .iter()
                .map(|p| {
                    let offset = state.offsets.get(p).copied().unwrap_or(-1);
                    (
                        p.clone(),
                        PartitionProgress {
                            last_offset_consumed: offset,
                        },
                    )
                })
                .collect()
        }
    }

    pub struct FakeInnerConsumerFactory;

    #[async_trait]
    impl InnerConsumerFactory for FakeInnerConsumerFactory {
        async fn build(
            &self,
            _topic: &str,
            _cluster: &str,
            _group: &str,
            partitions: &[Partition],
            _config: &InnerConsumerConfig,
            _auto_start: bool,
            reset_offset_on_start: bool,
        ) -> Result<Box<dyn InnerConsumer>> {
            Ok(Box::new(FakeInnerConsumer::new(
                partitions.to_vec(),
                reset_offset_on_start,
            )))
        }
    }
}
