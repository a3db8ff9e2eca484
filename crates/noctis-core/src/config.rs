use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::constants::{
    VAULT_BREAKER_COOLDOWN_MS, VAULT_BREAKER_FAILURE_THRESHOLD, VAULT_REQUEST_TIMEOUT_MS,
    VAULT_RETRY_MAX_ELAPSED_MS,
};

/// Maker admission policy, fixed for the life of the process.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhitelistMode {
    /// Every maker is admitted.
    Permissionless,
    /// Only whitelisted maker public keys are admitted; the list is mutable
    /// via admin operations.
    Permissioned,
}

/// Egress policy for the external privacy vault.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Base URL of the vault relayer, e.g. `http://127.0.0.1:9040`.
    pub base_url: String,
    pub request_timeout_ms: u64,
    pub retry_max_elapsed_ms: u64,
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown_ms: u64,
}

impl VaultConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout_ms: VAULT_REQUEST_TIMEOUT_MS,
            retry_max_elapsed_ms: VAULT_RETRY_MAX_ELAPSED_MS,
            breaker_failure_threshold: VAULT_BREAKER_FAILURE_THRESHOLD,
            breaker_cooldown_ms: VAULT_BREAKER_COOLDOWN_MS,
        }
    }
}

/// Immutable process configuration, built once at startup and injected into
/// components by reference. Never a global mutable.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// REST listen address.
    pub rpc_addr: SocketAddr,
    /// Directory for the persistent state database.
    pub data_dir: PathBuf,
    pub whitelist_mode: WhitelistMode,
    /// Shared admin key for whitelist and ledger back-channel endpoints.
    /// `None` disables all admin endpoints.
    pub admin_key: Option<String>,
    pub vault: VaultConfig,
}
