use envconfig::Envconfig;

/// Tuning passed straight through to the inner consumer. The core never
/// reads these itself; it only carries them to `InnerConsumerFactory`.
#[derive(Envconfig, Debug, Clone)]
pub struct InnerConsumerConfig {
    #[envconfig(default = "1048576")]
    pub fetch_message_max_bytes: u32,

    #[envconfig(default = "1")]
    pub num_consumer_fetchers: u32,

    #[envconfig(default = "2000")]
    pub queued_max_messages: u32,

    #[envconfig(default = "1")]
    pub fetch_min_bytes: u32,

    #[envconfig(default = "100")]
    pub fetch_wait_max_ms: u32,

    #[envconfig(default = "false")]
    pub auto_commit_enable: bool,

    #[envconfig(default = "60000")]
    pub auto_commit_interval_ms: u32,

    #[envconfig(default = "1000")]
    pub offsets_channel_backoff_ms: u32,

    #[envconfig(default = "5")]
    pub offsets_commit_max_retries: u32,

    /// "earliest" or "latest".
    #[envconfig(default = "earliest")]
    pub auto_offset_reset: String,

    /// -1 = infinite.
    #[envconfig(default = "-1")]
    pub consumer_timeout_ms: i64,
}

/// Configuration recognized by the rebalance coordinator itself.
#[derive(Envconfig, Debug, Clone)]
pub struct CoordinatorConfig {
    #[envconfig(nested = true)]
    pub inner: InnerConsumerConfig,

    #[envconfig(default = "5")]
    pub rebalance_max_retries: u32,

    #[envconfig(default = "2000")]
    pub rebalance_backoff_ms: u64,

    /// etcd connection timeout; the direct analogue of
    /// `zookeeper_connection_timeout_ms`.
    #[envconfig(default = "6000")]
    pub etcd_connection_timeout_ms: u64,

    /// Replaces `zookeeper_connect` — the coordination backend is etcd,
    /// not ZooKeeper. Comma-separated list of endpoints.
    #[envconfig(default = "127.0.0.1:2379")]
    pub etcd_endpoints: String,

    #[envconfig(default = "true")]
    pub auto_start: bool,

    #[envconfig(default = "false")]
    pub reset_offset_on_start: bool,

    /// How long a session's lease lives before it must be renewed; loss of
    /// renewal (suspension/expiry) is what sheds this member's ephemeral
    /// ownership and participant records.
    #[envconfig(default = "30")]
    pub session_ttl_seconds: i64,

    /// How often the liveness checker compares coordinator-held
    /// ownership against the locally-tracked partition set.
    #[envconfig(default = "120")]
    pub liveness_check_interval_seconds: u64,
}

impl CoordinatorConfig {
    pub fn etcd_endpoint_list(&self) -> Vec<String> {
        self.etcd_endpoints
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_apply_when_env_absent() {
        let config =
            CoordinatorConfig::init_from_hashmap(&HashMap::new()).expect("defaults should parse");
        assert_eq!(config.rebalance_max_retries, 5);
        assert_eq!(config.rebalance_backoff_ms, 2000);
        assert_eq!(config.etcd_endpoints, "127.0.0.1:2379");
        assert!(!config.reset_offset_on_start);
        assert_eq!(config.inner.auto_offset_reset, "earliest");
        assert_eq!(config.inner.consumer_timeout_ms, -1);
    }

    #[test]
    fn explicit_env_overrides_defaults() {
        let mut env = HashMap::new();
        env.insert("REBALANCE_MAX_RETRIES".to_string(), "9".to_string());
        env.insert(
            "ETCD_ENDPOINTS".to_string(),
            "etcd-0:2379,etcd-1:2379".to_string(),
        );
        let config = CoordinatorConfig::init_from_hashmap(&env).expect("should parse");
        assert_eq!(config.rebalance_max_retries, 9);
        assert_eq!(
            config.etcd_endpoint_list(),
            vec!["etcd-0:2379".to_string(), "etcd-1:2379".to_string()]
        );
    }

    #[test]
    fn endpoint_list_splits_and_trims() {
        let mut env = HashMap::new();
        env.insert(
            "ETCD_ENDPOINTS".to_string(),
            " etcd-0:2379 , etcd-1:2379 ".to_string(),
        );
        let config = CoordinatorConfig::init_from_hashmap(&env).expect("should parse");
        assert_eq!(
            config.etcd_endpoint_list(),
            vec!["etcd-0:2379".to_string(), "etcd-1:2379".to_string()]
        );
    }
}
