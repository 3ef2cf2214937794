use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::store::CoordinatorClient;

/// The liveness connection between this process and the coordinator. Its
/// loss causes every ephemeral key attached to its lease to vanish.
///
/// One `Session` owns exactly one etcd lease. Ephemeral writes made during
/// the session's lifetime (participant record, ownership records) should
/// all be attached to [`Session::lease_id`] so the coordinator reclaims
/// them atomically on session loss, without the process itself needing to
/// detect the loss and clean up.
pub struct Session {
    lease_id: i64,
    expired: CancellationToken,
    keepalive_task: JoinHandle<()>,
}

impl Session {
    /// Open a new session: grant a lease and start its keepalive loop.
    pub async fn open(store: &CoordinatorClient, ttl_seconds: i64) -> Result<Self> {
        let lease_id = store.grant_lease(ttl_seconds).await?;
        let expired = CancellationToken::new();
        let keepalive_interval = Duration::from_secs((ttl_seconds as u64 / 3).max(1));

        let keepalive_task = {
            let store = store.clone();
            let expired = expired.clone();
            tokio::spawn(async move {
                if let Err(e) =
                    run_keepalive(&store, lease_id, keepalive_interval, expired.clone()).await
                {
                    tracing::warn!(lease_id, error = %e, "session keepalive failed, session considered expired");
                }
                expired.cancel();
            })
        };

        Ok(Self {
            lease_id,
            expired,
            keepalive_task,
        })
    }

    pub fn lease_id(&self) -> i64 {
        self.lease_id
    }

    /// Resolves when the session's lease has been lost, either because the
    /// keepalive loop failed or because [`Session::close`] was called.
    pub async fn on_expired(&self) {
        self.expired.cancelled().await;
    }

    pub fn is_expired(&self) -> bool {
        self.expired.is_cancelled()
    }

    /// Close the session: stop the keepalive loop and revoke the lease,
    /// which deletes every ephemeral key attached to it in one shot.
    pub async fn close(self, store: &CoordinatorClient) -> Result<()> {
        self.expired.cancel();
        self.keepalive_task.abort();
        store.revoke_lease(self.lease_id).await
    }
}

async fn run_keepalive(
    store: &CoordinatorClient,
    lease_id: i64,
    interval: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    let (mut keeper, mut stream) = store.keep_alive(lease_id).await?;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(interval) => {
                keeper.keep_alive().await?;
                if stream.message().await?.is_none() {
                    return Err(Error::SessionLost);
                }
            }
        }
    }
}
