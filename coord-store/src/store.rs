use std::collections::BTreeSet;

use etcd_client::{
    Client, Compare, CompareOp, DeleteOptions, GetOptions, PutOptions, Txn, TxnOp, TxnResponse,
    WatchOptions, WatchStream,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub endpoints: Vec<String>,
    /// Key prefix for all operations, e.g. "/consumers/my-group/".
    pub prefix: String,
}

/// Prefixed etcd client with typed JSON helpers.
///
/// Provides the generic building blocks a domain-specific coordinator
/// composes on top of: get, list, put, delete, child-watch, and lease
/// management. `Client` is `Clone` (wraps an inner `Arc`), so each method
/// clones it cheaply.
#[derive(Clone)]
pub struct CoordinatorClient {
    client: Client,
    config: StoreConfig,
}

impl CoordinatorClient {
    pub async fn connect(config: StoreConfig) -> Result<Self> {
        let client = Client::connect(&config.endpoints, None).await?;
        Ok(Self { client, config })
    }

    #[cfg(any(test, feature = "test-util"))]
    pub fn from_client(client: Client, config: StoreConfig) -> Self {
        Self { client, config }
    }

    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    // ── JSON helpers ─────────────────────────────────────────────

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let resp = self.client.clone().get(key, None).await?;
        match resp.kvs().first() {
            Some(kv) => Ok(Some(serde_json::from_slice(kv.value())?)),
            None => Ok(None),
        }
    }

    pub async fn get_versioned<T: DeserializeOwned>(&self, key: &str) -> Result<Option<(T, i64)>> {
        let resp = self.client.clone().get(key, None).await?;
        match resp.kvs().first() {
            Some(kv) => {
                let value = serde_json::from_slice(kv.value())?;
                Ok(Some((value, kv.version())))
            }
            None => Ok(None),
        }
    }

    pub async fn list<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>> {
        let options = GetOptions::new().with_prefix();
        let resp = self.client.clone().get(prefix, Some(options)).await?;
        resp.kvs()
            .iter()
            .map(|kv| serde_json::from_slice(kv.value()).map_err(Error::from))
            .collect()
    }

    /// List the immediate children of `prefix`, i.e. the first path segment
    /// past the prefix for every key currently stored under it. Matches
    /// ZooKeeper's `get_children` over a keyspace that has no real
    /// directory nodes.
    pub async fn get_children(&self, prefix: &str) -> Result<Vec<String>> {
        let options = GetOptions::new().with_prefix().with_keys_only();
        let resp = self.client.clone().get(prefix, Some(options)).await?;
        let mut children = BTreeSet::new();
        for kv in resp.kvs() {
            let key = kv
                .key_str()
                .map_err(|e| Error::InvalidState(format!("non-utf8 key: {e}")))?;
            if let Some(child) = immediate_child(prefix, key) {
                children.insert(child);
            }
        }
        Ok(children.into_iter().collect())
    }

    pub async fn put<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        lease_id: Option<i64>,
    ) -> Result<()> {
        let value = serde_json::to_string(value)?;
        let options = lease_id.map(|id| PutOptions::new().with_lease(id));
        self.client.clone().put(key, value, options).await?;
        Ok(())
    }

    /// Create a node only if it does not already exist, attached to
    /// `lease_id` so it disappears when the lease expires. Returns
    /// `Error::NodeExists` if a peer won the race.
    pub async fn create_ephemeral<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        lease_id: i64,
    ) -> Result<()> {
        let value = serde_json::to_string(value)?;

        let txn = Txn::new()
            .when(vec![Compare::version(key, CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(
                key,
                value,
                Some(PutOptions::new().with_lease(lease_id)),
            )])
            .or_else(vec![TxnOp::get(key, None)]);

        let resp = self.client.clone().txn(txn).await?;
        if resp.succeeded() {
            Ok(())
        } else {
            Err(Error::NodeExists(key.to_string()))
        }
    }

    /// Idempotent delete: a missing key is not an error.
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.client.clone().delete(key, None).await?;
        Ok(())
    }

    pub async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        let options = DeleteOptions::new().with_prefix();
        self.client.clone().delete(prefix, Some(options)).await?;
        Ok(())
    }

    /// No-op: etcd's keyspace is flat, so there are no persistent ancestor
    /// nodes to create before writing a key under `path`. Kept as a method
    /// so call sites read the same as the ZooKeeper-backed original.
    pub async fn ensure_path(&self, _path: &str) -> Result<()> {
        Ok(())
    }

    // ── Transactions ─────────────────────────────────────────────

    pub async fn txn(&self, txn: Txn) -> Result<TxnResponse> {
        Ok(self.client.clone().txn(txn).await?)
    }

    // ── Lease operations ─────────────────────────────────────────

    pub async fn grant_lease(&self, ttl: i64) -> Result<i64> {
        let resp = self.client.clone().lease_grant(ttl, None).await?;
        Ok(resp.id())
    }

    pub async fn keep_alive(
        &self,
        lease_id: i64,
    ) -> Result<(etcd_client::LeaseKeeper, etcd_client::LeaseKeepAliveStream)> {
        let (keeper, stream) = self.client.clone().lease_keep_alive(lease_id).await?;
        Ok((keeper, stream))
    }

    pub async fn revoke_lease(&self, lease_id: i64) -> Result<()> {
        self.client.clone().lease_revoke(lease_id).await?;
        Ok(())
    }

    async fn watch_raw(&self, prefix: &str) -> Result<(etcd_client::Watcher, WatchStream)> {
        let options = WatchOptions::new().with_prefix();
        let (watcher, stream) = self.client.clone().watch(prefix, Some(options)).await?;
        Ok((watcher, stream))
    }

    /// Install a watch over every key under `prefix`, re-deriving the
    /// immediate-child list on each batch of events and publishing it on a
    /// `watch` channel. This is the channel-based rendering of
    /// `install_child_watch(path, callback)`: receivers call `.changed()`
    /// in a loop instead of registering a callback.
    pub async fn watch_children(
        &self,
        prefix: impl Into<String>,
        cancel: CancellationToken,
    ) -> Result<ChildWatch> {
        let prefix = prefix.into();
        let initial = self.get_children(&prefix).await?;
        let (tx, rx) = watch::channel(initial);

        let store = self.clone();
        let task_prefix = prefix.clone();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            // The watcher handle must stay alive for the duration of the
            // watch; etcd cancels it server-side once it's dropped.
            let (_watcher, mut stream) = match store.watch_raw(&task_prefix).await {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(prefix = %task_prefix, error = %e, "failed to install child watch");
                    return;
                }
            };
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => return,
                    message = stream.message() => {
                        match message {
                            Ok(Some(_resp)) => {
                                match store.get_children(&task_prefix).await {
                                    Ok(children) => {
                                        if tx.send(children).is_err() {
                                            return;
                                        }
                                    }
                                    Err(e) => tracing::warn!(
                                        prefix = %task_prefix, error = %e,
                                        "failed to refresh children after watch event"
                                    ),
                                }
                            }
                            Ok(None) => return,
                            Err(e) => {
                                tracing::warn!(prefix = %task_prefix, error = %e, "child watch stream error");
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok(ChildWatch {
            receiver: rx,
            cancel,
            task,
        })
    }

    // ── Cleanup ──────────────────────────────────────────────────

    pub async fn delete_all(&self) -> Result<()> {
        self.delete_prefix(&self.config.prefix).await
    }
}

/// Handle to a live child-watch. Holds the latest known child set and the
/// means to tear the background task down.
pub struct ChildWatch {
    receiver: watch::Receiver<Vec<String>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ChildWatch {
    /// Current children, without waiting for a change.
    pub fn current(&self) -> Vec<String> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change and return the new child list. Returns
    /// `None` if the watch was cancelled or the stream ended.
    pub async fn changed(&mut self) -> Option<Vec<String>> {
        if self.receiver.changed().await.is_err() {
            return None;
        }
        Some(self.receiver.borrow().clone())
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ChildWatch {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

/// The first path segment of `key` past `prefix`, or `None` if `key` is
/// not under `prefix` or names the prefix itself with nothing after it.
fn immediate_child(prefix: &str, key: &str) -> Option<String> {
    let rest = key.strip_prefix(prefix)?;
    let child = rest.split('/').next().unwrap_or(rest);
    (!child.is_empty()).then(|| child.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_child_returns_first_segment_past_prefix() {
        assert_eq!(
            immediate_child("/consumers/g/ids/", "/consumers/g/ids/host:uuid"),
            Some("host:uuid".to_string())
        );
    }

    #[test]
    fn immediate_child_collapses_nested_segments() {
        assert_eq!(
            immediate_child("/consumers/g/owners/", "/consumers/g/owners/topic/0-3"),
            Some("topic".to_string())
        );
    }

    #[test]
    fn immediate_child_rejects_keys_outside_the_prefix() {
        assert_eq!(immediate_child("/consumers/g/ids/", "/brokers/ids/1"), None);
    }

    #[test]
    fn immediate_child_rejects_the_prefix_itself() {
        assert_eq!(immediate_child("/consumers/g/ids/", "/consumers/g/ids/"), None);
    }
}
