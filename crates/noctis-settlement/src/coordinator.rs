//! The settlement coordinator: drives the two-legged atomic swap between the
//! taker's and maker's vault deposits when a quote is accepted.
//!
//! Discipline: both nullifiers and both commitments are reserved in the
//! ledger before the vault sees anything, so the vault is never asked to
//! consume a note the core has not committed to. The DB-side `filled`
//! transition has already committed by the time this runs; on-chain
//! transfers are irreversible, so there is no reverse-direction
//! compensation, only bounded idempotent retries of the second leg.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, warn};

use noctis_core::constants::LEG_B_MAX_RETRIES;
use noctis_core::ledger::{CommitmentStatus, NullifierStatus, Party};
use noctis_core::error::NoctisError;
use noctis_core::settlement::{
    LegReceipt, SettlementDriver, SettlementError, SettlementLeg, SettlementPlan, SettlementRecord,
};
use noctis_core::types::Direction;
use noctis_state::NullifierLedger;
use noctis_vault::{VaultClient, VaultError};

/// The slice of the vault client the coordinator needs; a seam for scripted
/// vaults in tests.
#[async_trait]
pub trait SettlementVault: Send + Sync {
    async fn execute_settlement_leg(&self, leg: &SettlementLeg) -> Result<LegReceipt, VaultError>;
}

#[async_trait]
impl SettlementVault for VaultClient {
    async fn execute_settlement_leg(&self, leg: &SettlementLeg) -> Result<LegReceipt, VaultError> {
        VaultClient::execute_settlement_leg(self, leg).await
    }
}

/// Map the trade direction onto the two legs.
///
/// The quoted `price_total` is the full quote-token total, never per-unit.
/// Leg (a) is always taker→maker; leg (b) always maker→taker:
///   buy  — taker pays `price_total` of the quote token and receives
///          `base_amount` of the base token;
///   sell — mirrored.
pub fn plan_legs(plan: &SettlementPlan) -> (SettlementLeg, SettlementLeg) {
    let (payment_amount, payment_token, asset_amount, asset_token) = match plan.direction {
        Direction::Buy => (
            plan.price_total,
            plan.pair.quote.clone(),
            plan.base_amount,
            plan.pair.base.clone(),
        ),
        Direction::Sell => (
            plan.base_amount,
            plan.pair.base.clone(),
            plan.price_total,
            plan.pair.quote.clone(),
        ),
    };
    let payment = SettlementLeg {
        from_commitment: plan.taker.commitment.clone(),
        from_nullifier: plan.taker.nullifier_hash,
        to_address: plan.maker.address.clone(),
        amount: payment_amount,
        token: payment_token,
        chain_id: plan.chain_id,
    };
    let asset = SettlementLeg {
        from_commitment: plan.maker.commitment.clone(),
        from_nullifier: plan.maker.nullifier_hash,
        to_address: plan.taker.address.clone(),
        amount: asset_amount,
        token: asset_token,
        chain_id: plan.chain_id,
    };
    (payment, asset)
}

pub struct SettlementCoordinator {
    vault: Arc<dyn SettlementVault>,
    ledger: NullifierLedger,
    leg_b_max_retries: u32,
}

impl SettlementCoordinator {
    pub fn new(vault: Arc<dyn SettlementVault>, ledger: NullifierLedger) -> Self {
        Self {
            vault,
            ledger,
            leg_b_max_retries: LEG_B_MAX_RETRIES,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_retries(mut self, retries: u32) -> Self {
        self.leg_b_max_retries = retries;
        self
    }

    /// Reserve both nullifiers (pending) and both commitments (active).
    /// Any conflict unwinds whatever was reserved so far.
    fn reserve(&self, plan: &SettlementPlan) -> Result<(), NoctisError> {
        let now = Utc::now().timestamp_millis();
        let quote_id = plan.quote_id;

        self.ledger.mark_nullifier_used(
            plan.taker.nullifier_hash,
            Some(quote_id),
            Party::Taker,
            NullifierStatus::Pending,
            now,
        )?;

        if let Err(e) = self.ledger.mark_nullifier_used(
            plan.maker.nullifier_hash,
            Some(quote_id),
            Party::Maker,
            NullifierStatus::Pending,
            now,
        ) {
            self.release_nullifier(plan, Party::Taker, NullifierStatus::Cancelled);
            return Err(e);
        }

        if let Err(e) = self.ledger.mark_commitment_used(
            plan.taker.commitment.clone(),
            quote_id,
            Party::Taker,
            CommitmentStatus::Active,
            now,
        ) {
            self.release_nullifier(plan, Party::Taker, NullifierStatus::Cancelled);
            self.release_nullifier(plan, Party::Maker, NullifierStatus::Cancelled);
            return Err(e);
        }

        if let Err(e) = self.ledger.mark_commitment_used(
            plan.maker.commitment.clone(),
            quote_id,
            Party::Maker,
            CommitmentStatus::Active,
            now,
        ) {
            self.release_nullifier(plan, Party::Taker, NullifierStatus::Cancelled);
            self.release_nullifier(plan, Party::Maker, NullifierStatus::Cancelled);
            self.release_commitment(plan, Party::Taker, CommitmentStatus::Cancelled);
            return Err(e);
        }

        Ok(())
    }

    fn release_nullifier(&self, plan: &SettlementPlan, party: Party, status: NullifierStatus) {
        let hash = match party {
            Party::Taker => &plan.taker.nullifier_hash,
            Party::Maker | Party::Manual => &plan.maker.nullifier_hash,
        };
        if let Err(e) = self.ledger.update_nullifier_status(hash, status) {
            warn!(error = %e, party = party.as_str(), "failed to release nullifier reservation");
        }
    }

    fn release_commitment(&self, plan: &SettlementPlan, party: Party, status: CommitmentStatus) {
        let commitment = match party {
            Party::Taker => &plan.taker.commitment,
            Party::Maker | Party::Manual => &plan.maker.commitment,
        };
        if let Err(e) =
            self.ledger
                .update_commitment_status(commitment, &plan.quote_id, party, status)
        {
            warn!(error = %e, party = party.as_str(), "failed to release commitment reservation");
        }
    }

    fn release_all(&self, plan: &SettlementPlan) {
        self.release_nullifier(plan, Party::Taker, NullifierStatus::Cancelled);
        self.release_nullifier(plan, Party::Maker, NullifierStatus::Cancelled);
        self.release_commitment(plan, Party::Taker, CommitmentStatus::Cancelled);
        self.release_commitment(plan, Party::Maker, CommitmentStatus::Cancelled);
    }

    /// Bounded compensating retry of the asset leg after the payment leg has
    /// irreversibly executed. Idempotent at the vault by the maker
    /// nullifier; only availability failures are worth re-submitting.
    async fn drive_asset_leg(&self, asset: &SettlementLeg) -> Result<LegReceipt, (VaultError, u32)> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.vault.execute_settlement_leg(asset).await {
                Ok(receipt) => return Ok(receipt),
                Err(e) if e.is_pre_transfer() && !matches!(e, VaultError::CircuitOpen { .. }) => {
                    // A definitive rejection will not improve by retrying.
                    return Err((e, attempts));
                }
                Err(e) => {
                    if attempts > self.leg_b_max_retries {
                        return Err((e, attempts));
                    }
                    warn!(
                        attempt = attempts,
                        error = %e,
                        "asset leg failed; scheduling compensating retry"
                    );
                }
            }
        }
    }
}

#[async_trait]
impl SettlementDriver for SettlementCoordinator {
    async fn execute(&self, plan: &SettlementPlan) -> Result<SettlementRecord, SettlementError> {
        let (payment, asset) = plan_legs(plan);

        // Reserve-then-call: the vault never sees a nullifier the ledger has
        // not already committed to.
        self.reserve(plan).map_err(SettlementError::pre_transfer)?;

        // Leg (a): taker → maker payment.
        let payment_receipt = match self.vault.execute_settlement_leg(&payment).await {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!(
                    quote_id = %plan.quote_id,
                    error = %e,
                    "payment leg failed; releasing reservations"
                );
                self.release_all(plan);
                return Err(SettlementError {
                    pre_transfer: e.is_pre_transfer(),
                    error: e.into_noctis(),
                });
            }
        };

        // The taker's note is consumed whatever happens next.
        self.release_nullifier(plan, Party::Taker, NullifierStatus::Settled);
        self.release_commitment(plan, Party::Taker, CommitmentStatus::Settled);

        // Leg (b): maker → taker asset delivery.
        match self.drive_asset_leg(&asset).await {
            Ok(asset_receipt) => {
                self.release_nullifier(plan, Party::Maker, NullifierStatus::Settled);
                self.release_commitment(plan, Party::Maker, CommitmentStatus::Settled);
                info!(
                    quote_id = %plan.quote_id,
                    tx_payment = %payment_receipt.tx_hash,
                    tx_asset = %asset_receipt.tx_hash,
                    "settlement complete"
                );
                Ok(SettlementRecord {
                    payment: payment_receipt,
                    asset: asset_receipt,
                })
            }
            Err((e, attempts)) => {
                // Maker nullifier stays pending for operator reconciliation;
                // this is the only outcome needing human attention.
                error!(
                    quote_id = %plan.quote_id,
                    tx_payment = %payment_receipt.tx_hash,
                    attempts,
                    error = %e,
                    "asset leg unresolved; trade is settlement_partial"
                );
                Err(SettlementError::post_transfer(
                    NoctisError::SettlementPartial {
                        tx_hash_a: payment_receipt.tx_hash,
                        attempts,
                    },
                ))
            }
        }
    }
}
