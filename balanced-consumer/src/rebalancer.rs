use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::consumer::Member;
use crate::error::{Error, Result};
use crate::types::Partition;

enum Outcome {
    Converged,
    ShouldStop,
}

/// Bring the coordinator's ownership state and the inner consumer into
/// agreement with the assignment implied by the current participant and
/// partition sets. Exactly one rebalance runs at a time; concurrent
/// triggers serialize behind `member.rebalance_lock`.
pub(crate) async fn rebalance(member: &Arc<Member>) -> Result<()> {
    if let Some(inner) = member.inner_consumer.lock().await.as_ref() {
        if let Err(e) = inner.commit_offsets().await {
            tracing::warn!(error = %e, "best-effort offset commit before rebalance failed");
        }
    }

    let guard = member.rebalance_lock.lock().await;
    if !member.running.load(Ordering::SeqCst) {
        return Err(Error::ConsumerStopped);
    }

    let mut should_stop = false;
    let mut result = Ok(());

    for attempt in 0..member.config.rebalance_max_retries {
        match try_once(member).await {
            Ok(Outcome::Converged) => {
                result = Ok(());
                break;
            }
            Ok(Outcome::ShouldStop) => {
                should_stop = true;
                result = Ok(());
                break;
            }
            Err(Error::PartitionOwned(p)) => {
                if attempt + 1 == member.config.rebalance_max_retries {
                    result = Err(Error::PartitionOwned(p));
                    break;
                }
                tracing::debug!(
                    partition = %p.sort_key(),
                    attempt,
                    "partition still owned by a peer, backing off and retrying"
                );
                tokio::time::sleep(Duration::from_millis(
                    member.config.rebalance_backoff_ms * attempt as u64,
                ))
                .await;
                continue;
            }
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }

    drop(guard);

    if should_stop {
        crate::consumer::request_stop(member).await;
    }

    result
}

async fn try_once(member: &Arc<Member>) -> Result<Outcome> {
    let mut participants = crate::watch::get_participants(&member.store, &member.topic).await?;
    if !participants.iter().any(|p| p == &member.member_id) {
        crate::consumer::register_self(member).await?;
        participants.push(member.member_id.clone());
        participants.sort();
    }

    let partitions = member.topic_metadata.partitions(&member.topic).await?;
    let assignment = crate::assign::assign(&participants, &partitions, &member.member_id);

    if assignment.is_empty() {
        return Ok(Outcome::ShouldStop);
    }

    // Authoritative: always re-read from the coordinator. After a session
    // expiry our local view of "what we own" is stale, since ephemeral
    // nodes were already removed server-side.
    let held = member.ownership.read_held(&partitions).await?;

    let to_release: Vec<Partition> = held
        .iter()
        .filter(|p| !assignment.contains(p))
        .cloned()
        .collect();
    let to_claim: Vec<Partition> = assignment
        .iter()
        .filter(|p| !held.contains(p))
        .cloned()
        .collect();

    // Release before claim: draining stale ownership first reduces
    // collision with peers racing to claim the same partitions.
    for partition in &to_release {
        member.ownership.remove(partition).await?;
    }

    let lease_id = member.lease_id.load(Ordering::SeqCst);
    for partition in &to_claim {
        member.ownership.add(partition, lease_id).await?;
    }

    let mut assigned = member.assigned.lock().await;
    let mut current_sorted = assigned.clone();
    current_sorted.sort_by_key(|p| p.sort_key());
    let mut new_sorted = assignment.clone();
    new_sorted.sort_by_key(|p| p.sort_key());

    if current_sorted != new_sorted {
        rebuild_inner_consumer(member, assignment.clone()).await?;
        *assigned = assignment;
    }

    Ok(Outcome::Converged)
}

async fn rebuild_inner_consumer(member: &Arc<Member>, partitions: Vec<Partition>) -> Result<()> {
    let mut slot = member.inner_consumer.lock().await;
    if let Some(old) = slot.take() {
        old.stop().await;
    }

    // `reset_offset_on_start` only honored on the very first construction
    // of the inner consumer for this member, regardless of how many
    // rebalances follow.
    let first_build = !member.inner_built_once.load(Ordering::SeqCst);
    let reset_offset_on_start = first_build && member.config.reset_offset_on_start;

    let inner = member
        .inner_factory
        .build(
            &member.topic,
            &member.cluster,
            &member.group,
            &partitions,
            &member.config.inner,
            member.config.auto_start,
            reset_offset_on_start,
        )
        .await?;

    if first_build {
        member.inner_built_once.store(true, Ordering::SeqCst);
    }
    *slot = Some(inner);
    Ok(())
}
