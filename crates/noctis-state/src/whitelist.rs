use std::sync::Arc;

use tracing::info;

use noctis_core::config::WhitelistMode;
use noctis_core::error::NoctisError;
use noctis_core::types::WotsPublicKey;
use noctis_crypto::stealth::fingerprint;

use crate::db::StateDb;

/// Maker admission gate. The mode is process-wide and fixed at startup;
/// in permissioned mode membership is persisted and mutable via admin
/// operations.
#[derive(Clone)]
pub struct WhitelistGate {
    mode: WhitelistMode,
    db: Arc<StateDb>,
}

impl WhitelistGate {
    pub fn new(mode: WhitelistMode, db: Arc<StateDb>) -> Self {
        Self { mode, db }
    }

    pub fn mode(&self) -> WhitelistMode {
        self.mode
    }

    /// Consulted on every quote submission.
    pub fn is_whitelisted(&self, public_key: &WotsPublicKey) -> Result<bool, NoctisError> {
        match self.mode {
            WhitelistMode::Permissionless => Ok(true),
            WhitelistMode::Permissioned => self.db.whitelist_contains(public_key),
        }
    }

    pub fn add(&self, public_key: &WotsPublicKey) -> Result<(), NoctisError> {
        self.db.whitelist_add(public_key)?;
        info!(maker = %fingerprint(public_key), "maker whitelisted");
        Ok(())
    }

    /// Returns whether the key was present.
    pub fn remove(&self, public_key: &WotsPublicKey) -> Result<bool, NoctisError> {
        let removed = self.db.whitelist_remove(public_key)?;
        if removed {
            info!(maker = %fingerprint(public_key), "maker removed from whitelist");
        }
        Ok(removed)
    }

    pub fn list_ids(&self) -> Result<Vec<String>, NoctisError> {
        self.db.whitelist_ids()
    }
}
