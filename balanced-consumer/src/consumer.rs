use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex as SyncMutex};
use std::time::Duration;

use coord_store::{CoordinatorClient, Session};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::config::CoordinatorConfig;
use crate::error::{Error, Result};
use crate::inner::{InnerConsumer, InnerConsumerFactory};
use crate::member::{generate_member_id, now_millis};
use crate::ownership::OwnershipRegistry;
use crate::topic::TopicMetadata;
use crate::types::{MemberId, Message, Partition};

/// Shared state behind a [`BalancedConsumer`]. Background tasks (watch
/// dispatch, liveness checking) hold only `Weak<Member>`, so nothing but
/// the façade itself keeps a member alive.
pub(crate) struct Member {
    pub member_id: MemberId,
    pub topic: String,
    pub cluster: String,
    pub group: String,
    pub store: CoordinatorClient,
    pub topic_metadata: Arc<dyn TopicMetadata>,
    pub inner_factory: Arc<dyn InnerConsumerFactory>,
    pub config: CoordinatorConfig,
    pub ownership: OwnershipRegistry,

    pub running: AtomicBool,
    pub setting_watches: AtomicBool,
    pub owns_session: AtomicBool,
    pub lease_id: AtomicI64,
    /// Millis-since-epoch of the last delivered message, refreshed on
    /// every successful `consume()`. `consumer_timeout_ms` is measured
    /// from this timestamp rather than from the start of each `consume()`
    /// call, so a caller polling in a tight loop still gets "no message"
    /// once the configured idle window has elapsed overall.
    pub last_message_at: AtomicI64,
    pub inner_built_once: AtomicBool,

    pub session: AsyncMutex<Option<Session>>,
    pub rebalance_lock: AsyncMutex<()>,
    pub inner_consumer: AsyncMutex<Option<Box<dyn InnerConsumer>>>,
    pub assigned: AsyncMutex<Vec<Partition>>,
    pub watch_tasks: AsyncMutex<Vec<JoinHandle<()>>>,

    pub background_error: SyncMutex<Option<String>>,
    pub liveness_task: SyncMutex<Option<JoinHandle<()>>>,
}

/// The external façade: `start`/`stop`/`consume`/`commit_offsets`/
/// `reset_offsets`, with background errors surfaced synchronously at the
/// next call after they occur.
pub struct BalancedConsumer {
    member: Arc<Member>,
}

impl BalancedConsumer {
    /// Start a new member of the consumer group. If `session` is `None`,
    /// a coordinator session (etcd lease) is opened and owned by this
    /// member; otherwise the caller retains ownership of `session` and is
    /// responsible for its lifecycle beyond this member's `stop`.
    #[allow(clippy::too_many_arguments)]
    pub async fn start(
        cluster: impl Into<String>,
        group: impl Into<String>,
        topic: impl Into<String>,
        store: CoordinatorClient,
        topic_metadata: Arc<dyn TopicMetadata>,
        inner_factory: Arc<dyn InnerConsumerFactory>,
        config: CoordinatorConfig,
        session: Option<Session>,
    ) -> Result<Self> {
        let topic = topic.into();
        let cluster = cluster.into();
        let group = group.into();
        let member_id = generate_member_id();

        let (session, owns_session) = match session {
            Some(session) => (session, false),
            None => (
                Session::open(&store, config.session_ttl_seconds).await?,
                true,
            ),
        };
        let lease_id = session.lease_id();

        let ownership = OwnershipRegistry::new(store.clone(), topic.clone(), member_id.clone());

        let member = Arc::new(Member {
            member_id,
            topic,
            cluster,
            group,
            store,
            topic_metadata,
            inner_factory,
            config,
            ownership,
            running: AtomicBool::new(false),
            setting_watches: AtomicBool::new(false),
            owns_session: AtomicBool::new(owns_session),
            lease_id: AtomicI64::new(lease_id),
            last_message_at: AtomicI64::new(now_millis()),
            inner_built_once: AtomicBool::new(false),
            session: AsyncMutex::new(Some(session)),
            rebalance_lock: AsyncMutex::new(()),
            inner_consumer: AsyncMutex::new(None),
            assigned: AsyncMutex::new(Vec::new()),
            watch_tasks: AsyncMutex::new(Vec::new()),
            background_error: SyncMutex::new(None),
            liveness_task: SyncMutex::new(None),
        });

        if let Err(e) = start_inner(&member).await {
            request_stop(&member).await;
            return Err(e);
        }

        Ok(Self { member })
    }

    pub fn member_id(&self) -> &str {
        &self.member.member_id
    }

    /// Stop this member: deregister, release held partitions, tear down
    /// the inner consumer, and either close the owned session or explicitly
    /// clean up if the session was externally supplied.
    pub async fn stop(self) {
        request_stop(&self.member).await;
    }

    /// Fetch the next message, or `None` if none arrives within
    /// `consumer_timeout_ms` of the last delivered message (infinite if
    /// negative). Fails fast if no partitions are currently assigned.
    ///
    /// Mirrors the source's `consume()`: a `ConsumerStopped` from the
    /// inner consumer is swallowed and retried as long as the member is
    /// still running, and only turns into "no message" (or, if the
    /// member has since stopped, propagates) once `running` has actually
    /// gone false. A momentarily absent inner consumer (mid-swap during a
    /// rebalance) is treated the same way rather than short-circuiting to
    /// "no message".
    pub async fn consume(&self, block: bool) -> Result<Option<Message>> {
        self.surface_background_error()?;

        if self.member.assigned.lock().await.is_empty() {
            return Err(Error::NoPartitionsForConsumer);
        }

        let timeout_ms = self.member.config.inner.consumer_timeout_ms;

        loop {
            if !self.member.running.load(Ordering::SeqCst) {
                return Ok(None);
            }

            let remaining = if timeout_ms >= 0 {
                let elapsed = now_millis() - self.member.last_message_at.load(Ordering::SeqCst);
                let remaining_ms = timeout_ms.saturating_sub(elapsed.max(0));
                if remaining_ms <= 0 {
                    return Ok(None);
                }
                Some(Duration::from_millis(remaining_ms as u64))
            } else {
                None
            };

            let inner_guard = self.member.inner_consumer.lock().await;
            let Some(inner) = inner_guard.as_ref() else {
                drop(inner_guard);
                tokio::task::yield_now().await;
                continue;
            };

            let outcome = match remaining {
                Some(remaining) => tokio::time::timeout(remaining, inner.consume(block)).await,
                None => Ok(inner.consume(block).await),
            };
            drop(inner_guard);

            match outcome {
                Ok(Ok(Some(message))) => {
                    self.member
                        .last_message_at
                        .store(now_millis(), Ordering::SeqCst);
                    return Ok(Some(message));
                }
                Ok(Ok(None)) => return Ok(None),
                Ok(Err(Error::ConsumerStopped)) => {
                    tokio::task::yield_now().await;
                    continue;
                }
                Ok(Err(e)) => return Err(e),
                Err(_elapsed) => return Ok(None),
            }
        }
    }

    pub async fn commit_offsets(&self) -> Result<()> {
        self.surface_background_error()?;
        match self.member.inner_consumer.lock().await.as_ref() {
            Some(inner) => inner.commit_offsets().await,
            None => Ok(()),
        }
    }

    pub async fn reset_offsets(&self, partition_offsets: HashMap<Partition, i64>) -> Result<()> {
        self.surface_background_error()?;
        match self.member.inner_consumer.lock().await.as_ref() {
            Some(inner) => inner.reset_offsets(partition_offsets).await,
            None => Ok(()),
        }
    }

    fn surface_background_error(&self) -> Result<()> {
        let mut slot = self.member.background_error.lock().unwrap();
        if let Some(message) = slot.take() {
            return Err(Error::BackgroundWorkerError(message));
        }
        Ok(())
    }
}

async fn start_inner(member: &Arc<Member>) -> Result<()> {
    let owners_root = format!("{}owners/{}", member.store.prefix(), member.topic);
    member.store.ensure_path(&owners_root).await?;

    register_self(member).await?;
    member.running.store(true, Ordering::SeqCst);

    let watch_tasks = crate::watch::install_all(member).await?;
    *member.watch_tasks.lock().await = watch_tasks;

    crate::rebalancer::rebalance(member).await?;

    let liveness = crate::liveness::spawn(member);
    *member.liveness_task.lock().unwrap() = Some(liveness);

    Ok(())
}

/// Self-registration: fail fast with `CapacityExceeded` if the group
/// already has at least as many participants as partitions, otherwise
/// write (or refresh) this member's participant record.
pub(crate) async fn register_self(member: &Arc<Member>) -> Result<()> {
    let participants = crate::watch::get_participants(&member.store, &member.topic).await?;
    let partitions = member.topic_metadata.partitions(&member.topic).await?;

    if !participants.iter().any(|p| p == &member.member_id) && participants.len() >= partitions.len()
    {
        return Err(Error::CapacityExceeded {
            participants: participants.len(),
            partitions: partitions.len(),
        });
    }

    let key = format!("{}ids/{}", member.store.prefix(), member.member_id);
    let lease_id = member.lease_id.load(Ordering::SeqCst);
    // A plain put (not create_ephemeral) is safe here: only this member
    // ever writes to its own member-id key, so there is no peer to race.
    member.store.put(&key, &member.topic, Some(lease_id)).await?;
    Ok(())
}

pub(crate) fn record_background_error(member: &Arc<Member>, message: String) {
    let mut slot = member.background_error.lock().unwrap();
    if slot.is_none() {
        tracing::error!(error = %message, "background worker error captured");
        *slot = Some(message);
    }
}

pub(crate) async fn request_stop(member: &Arc<Member>) {
    {
        let _guard = member.rebalance_lock.lock().await;
        member.running.store(false, Ordering::SeqCst);
    }

    for task in member.watch_tasks.lock().await.drain(..) {
        task.abort();
    }
    if let Some(task) = member.liveness_task.lock().unwrap().take() {
        task.abort();
    }

    if let Some(inner) = member.inner_consumer.lock().await.take() {
        inner.stop().await;
    }

    if member.owns_session.load(Ordering::SeqCst) {
        if let Some(session) = member.session.lock().await.take() {
            if let Err(e) = session.close(&member.store).await {
                tracing::warn!(error = %e, "failed to close session cleanly during stop");
            }
        }
    } else {
        // Authoritative, not `member.assigned`: the local cache can be
        // stale or empty here, e.g. when `rebalance()` claimed some
        // partitions and then failed on a later one before updating it.
        // Trusting the cache would leak those ownership records until the
        // caller's externally-managed session eventually ends.
        let held = match member.topic_metadata.partitions(&member.topic).await {
            Ok(partitions) => match member.ownership.read_held(&partitions).await {
                Ok(held) => held,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read held partitions on stop");
                    Vec::new()
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "failed to fetch partitions on stop");
                Vec::new()
            }
        };
        for partition in &held {
            if let Err(e) = member.ownership.remove(partition).await {
                tracing::warn!(
                    error = %e,
                    partition = %partition.sort_key(),
                    "failed to release partition on stop"
                );
            }
        }
        let key = format!("{}ids/{}", member.store.prefix(), member.member_id);
        if let Err(e) = member.store.delete(&key).await {
            tracing::warn!(error = %e, "failed to delete participant record on stop");
        }
    }
}
