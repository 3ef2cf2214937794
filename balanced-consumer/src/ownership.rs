use coord_store::CoordinatorClient;

use crate::error::{Error, Result};
use crate::types::{MemberId, Partition};

/// Reads and writes the authoritative "which member owns which partition"
/// record for one topic, under `<group_prefix>owners/<topic>/`.
pub struct OwnershipRegistry {
    store: CoordinatorClient,
    topic: String,
    member_id: MemberId,
}

impl OwnershipRegistry {
    pub fn new(store: CoordinatorClient, topic: impl Into<String>, member_id: MemberId) -> Self {
        Self {
            store,
            topic: topic.into(),
            member_id,
        }
    }

    fn owners_prefix(&self) -> String {
        format!("{}owners/{}/", self.store.prefix(), self.topic)
    }

    fn owner_key(&self, partition: &Partition) -> String {
        format!("{}{}", self.owners_prefix(), partition.owner_key_segment())
    }

    /// Claim `partition` for this member, attached to `lease_id` so it is
    /// released automatically on session loss. Fails with
    /// `Error::PartitionOwned` if a peer still holds it.
    pub async fn add(&self, partition: &Partition, lease_id: i64) -> Result<()> {
        match self
            .store
            .create_ephemeral(&self.owner_key(partition), &self.member_id, lease_id)
            .await
        {
            Ok(()) => {
                tracing::debug!(
                    member_id = %self.member_id,
                    partition = %partition.sort_key(),
                    "claimed partition"
                );
                Ok(())
            }
            Err(coord_store::Error::NodeExists(_)) => Err(Error::PartitionOwned(partition.clone())),
            Err(e) => Err(e.into()),
        }
    }

    /// Release `partition`. A partition we never held is a no-op.
    pub async fn remove(&self, partition: &Partition) -> Result<()> {
        self.store.delete(&self.owner_key(partition)).await?;
        tracing::debug!(
            member_id = %self.member_id,
            partition = %partition.sort_key(),
            "released partition"
        );
        Ok(())
    }

    /// The authoritative held set: enumerate the ownership records under
    /// this topic, read each one's value, and return the subset of
    /// `candidates` currently owned by this member. Always asks the
    /// coordinator, never trusts local memory — after a session loss, the
    /// local view of "what we own" is stale.
    pub async fn read_held(&self, candidates: &[Partition]) -> Result<Vec<Partition>> {
        let prefix = self.owners_prefix();
        let children = self.store.get_children(&prefix).await?;
        let mut held = Vec::new();
        for child in children {
            let key = format!("{prefix}{child}");
            let owner: Option<MemberId> = self.store.get(&key).await?;
            let Some(owner) = owner else {
                // Vanished between the child list and this read; ignore.
                continue;
            };
            if owner != self.member_id {
                continue;
            }
            if let Some(partition) = candidates.iter().find(|p| p.owner_key_segment() == child) {
                held.push(partition.clone());
            }
        }
        Ok(held)
    }
}

#[cfg(test)]
mod tests {
    use coord_store::StoreConfig;

    use super::*;

    const ETCD_ENDPOINT: &str = "http://localhost:2379";

    async fn test_store(test_name: &str) -> CoordinatorClient {
        let prefix = format!("/test-ownership-{}-{}/", test_name, uuid::Uuid::new_v4());
        let config = StoreConfig {
            endpoints: vec![ETCD_ENDPOINT.to_string()],
            prefix,
        };
        CoordinatorClient::connect(config)
            .await
            .expect("failed to connect to etcd")
    }

    /// Two members race to claim the same partition. The loser sees
    /// `PartitionOwned`; once the winner releases, the loser's retry
    /// succeeds.
    #[tokio::test]
    async fn claim_collision_then_release_lets_the_loser_succeed() {
        let store = test_store("claim-collision").await;
        let partition = Partition::new("events", 0, 0);

        let winner = OwnershipRegistry::new(store.clone(), "events", "winner".to_string());
        let loser = OwnershipRegistry::new(store.clone(), "events", "loser".to_string());

        let winner_lease = store.grant_lease(30).await.expect("lease");
        let loser_lease = store.grant_lease(30).await.expect("lease");

        winner.add(&partition, winner_lease).await.expect("winner claims first");

        let collision = loser.add(&partition, loser_lease).await;
        assert!(matches!(collision, Err(Error::PartitionOwned(p)) if p == partition));

        winner.remove(&partition).await.expect("winner releases");

        loser
            .add(&partition, loser_lease)
            .await
            .expect("loser succeeds once the winner has released");

        let held = loser
            .read_held(std::slice::from_ref(&partition))
            .await
            .expect("read_held");
        assert_eq!(held, vec![partition]);
    }
}
