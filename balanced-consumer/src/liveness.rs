use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::consumer::{record_background_error, Member};

/// Spawn the periodic drift check. Wakes on `liveness_check_interval_seconds`,
/// compares the coordinator's authoritative held set against the locally
/// tracked partition set, and triggers a rebalance on mismatch. Exits as
/// soon as the member stops running or is reclaimed.
pub(crate) fn spawn(member: &Arc<Member>) -> JoinHandle<()> {
    let weak = Arc::downgrade(member);
    tokio::spawn(async move {
        loop {
            let interval = {
                let Some(member) = weak.upgrade() else { return };
                if !member.running.load(Ordering::SeqCst) {
                    return;
                }
                Duration::from_secs(member.config.liveness_check_interval_seconds)
            };
            tokio::time::sleep(interval).await;

            let Some(member) = weak.upgrade() else { return };
            if !member.running.load(Ordering::SeqCst) {
                return;
            }

            if let Err(e) = check_once(&member).await {
                record_background_error(&member, format!("liveness check failed: {e}"));
            }
        }
    })
}

async fn check_once(member: &Arc<Member>) -> crate::error::Result<()> {
    let partitions = member.topic_metadata.partitions(&member.topic).await?;
    let held = member.ownership.read_held(&partitions).await?;
    let local = member.assigned.lock().await.clone();

    let mut held_sorted = held;
    held_sorted.sort_by_key(|p| p.sort_key());
    let mut local_sorted = local;
    local_sorted.sort_by_key(|p| p.sort_key());

    let ownership_drifted = held_sorted != local_sorted;

    // Ownership matching local state doesn't mean the assignment itself
    // is still right: a repartition (partitions added or removed) with an
    // unchanged participant set never touches what *this* member holds,
    // so it would never show up as ownership drift above. Recomputing the
    // assignment from the current participant and partition sets catches
    // it even when no topic watch is wired up to catch it directly.
    let participants = crate::watch::get_participants(&member.store, &member.topic).await?;
    let mut expected_sorted = crate::assign::assign(&participants, &partitions, &member.member_id);
    expected_sorted.sort_by_key(|p| p.sort_key());

    let assignment_drifted = expected_sorted != local_sorted;

    if ownership_drifted || assignment_drifted {
        tracing::warn!(
            member_id = %member.member_id,
            ownership_drifted,
            assignment_drifted,
            "liveness check found drift, triggering rebalance"
        );
        crate::rebalancer::rebalance(member).await?;
    }

    Ok(())
}
