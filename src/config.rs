//! Cluster configuration.
//!
//! Options are handed to the supervisor and the shard pool verbatim.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_PROCESS_TERM_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_SOCKET_CHANNEL_LIMIT: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusterOptions {
    /// One address (socket path or host:port) per shard, in shard id order.
    pub stores: Vec<String>,
    pub secret_key: Option<String>,
    /// Granularity of key expiry checks inside a store.
    pub expiry_accuracy_ms: Option<u64>,
    pub downgrade_to_user: Option<String>,
    /// Executable launched once per store address.
    pub store_controller_path: Option<PathBuf>,
    pub process_term_timeout_ms: u64,
    pub store_options: serde_json::Value,
    pub connect_timeout_ms: u64,
    /// `None` or `Some(0)` disables the per-socket ceiling.
    pub socket_channel_limit: Option<usize>,
    /// Upper bound on an unacknowledged shard subscribe. Unset waits forever.
    pub subscribe_timeout_ms: Option<u64>,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            stores: Vec::new(),
            secret_key: None,
            expiry_accuracy_ms: None,
            downgrade_to_user: None,
            store_controller_path: None,
            process_term_timeout_ms: DEFAULT_PROCESS_TERM_TIMEOUT_MS,
            store_options: serde_json::Value::Null,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            socket_channel_limit: Some(DEFAULT_SOCKET_CHANNEL_LIMIT),
            subscribe_timeout_ms: None,
        }
    }
}

impl ClusterOptions {
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn process_term_timeout(&self) -> Duration {
        Duration::from_millis(self.process_term_timeout_ms)
    }

    pub fn subscribe_timeout(&self) -> Option<Duration> {
        self.subscribe_timeout_ms.map(Duration::from_millis)
    }

    pub fn channel_limit(&self) -> Option<usize> {
        self.socket_channel_limit.filter(|limit| *limit > 0)
    }
}
