use std::sync::atomic::Ordering;
use std::sync::Arc;

use coord_store::ChildWatch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::consumer::Member;
use crate::error::Result;
use crate::types::MemberId;

/// List the current participants for `topic`: the member ids registered
/// under the group's participants path whose recorded value is `topic`
/// (the same path may host consumers of other topics). Sorted; entries
/// that vanish between the child listing and the value read are skipped.
pub(crate) async fn get_participants(
    store: &coord_store::CoordinatorClient,
    topic: &str,
) -> Result<Vec<MemberId>> {
    let prefix = format!("{}ids/", store.prefix());
    let children = store.get_children(&prefix).await?;
    let mut participants = Vec::new();
    for child in children {
        let key = format!("{prefix}{child}");
        if let Some(registered_topic) = store.get::<String>(&key).await? {
            if registered_topic == topic {
                participants.push(child);
            }
        }
    }
    participants.sort();
    Ok(participants)
}

/// Install every watch the dispatcher is responsible for and return the
/// background tasks driving them, so the caller can abort them on stop.
pub(crate) async fn install_all(member: &Arc<Member>) -> Result<Vec<JoinHandle<()>>> {
    member.setting_watches.store(true, Ordering::SeqCst);

    let mut tasks = Vec::new();

    let participants_prefix = format!("{}ids/", member.store.prefix());
    let participants_watch = member
        .store
        .watch_children(participants_prefix, CancellationToken::new())
        .await?;
    tasks.push(spawn_dispatch(member, participants_watch, "participants"));

    if let Some(topic_watch) = member.topic_metadata.watch().await? {
        tasks.push(spawn_dispatch(member, topic_watch, "topic"));
    }

    member.setting_watches.store(false, Ordering::SeqCst);
    Ok(tasks)
}

/// Drive one `ChildWatch`: block on the next change, then trigger a
/// rebalance. Holds only a `Weak<Member>` so this task never keeps the
/// façade alive past `stop` — a failed upgrade is treated the same as the
/// source's "disarm" sentinel.
fn spawn_dispatch(member: &Arc<Member>, mut watch: ChildWatch, label: &'static str) -> JoinHandle<()> {
    let weak = Arc::downgrade(member);
    tokio::spawn(async move {
        loop {
            match watch.changed().await {
                Some(_children) => {
                    let Some(member) = weak.upgrade() else {
                        return;
                    };
                    if !member.running.load(Ordering::SeqCst) {
                        return;
                    }
                    if member.setting_watches.load(Ordering::SeqCst) {
                        // Initial rebalance already covers this; avoid a
                        // redundant pass while watches are still going up.
                        continue;
                    }
                    tracing::debug!(watch = label, "child set changed, scheduling rebalance");
                    if let Err(e) = crate::rebalancer::rebalance(&member).await {
                        crate::consumer::record_background_error(
                            &member,
                            format!("{label} watch rebalance failed: {e}"),
                        );
                    }
                }
                None => return,
            }
        }
    })
}
