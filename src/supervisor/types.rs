use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::ClusterOptions;
use crate::routing::types::ShardId;

/// Everything needed to launch one shard process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShardSpec {
    pub id: ShardId,
    pub address: String,
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    pub expiry_accuracy_ms: Option<u64>,
    pub downgrade_to_user: Option<String>,
    pub store_controller_path: Option<PathBuf>,
    pub process_term_timeout_ms: u64,
    pub store_options: serde_json::Value,
}

impl ShardSpec {
    pub fn from_options(id: ShardId, address: &str, options: &ClusterOptions) -> Self {
        Self {
            id,
            address: address.to_string(),
            secret_key: options.secret_key.clone(),
            expiry_accuracy_ms: options.expiry_accuracy_ms,
            downgrade_to_user: options.downgrade_to_user.clone(),
            store_controller_path: options.store_controller_path.clone(),
            process_term_timeout_ms: options.process_term_timeout_ms,
            store_options: options.store_options.clone(),
        }
    }

    /// One spec per configured store, ids in address order.
    pub fn all_from_options(options: &ClusterOptions) -> Vec<Self> {
        options
            .stores
            .iter()
            .enumerate()
            .map(|(index, address)| Self::from_options(ShardId(index), address, options))
            .collect()
    }
}
