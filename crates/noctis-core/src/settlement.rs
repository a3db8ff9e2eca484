use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::NoctisError;
use crate::types::{
    Amount, AssetPair, ChainId, Commitment, Direction, NullifierHash, QuoteId, RequestId,
};

// ── Vault-facing shapes ──────────────────────────────────────────────────────

/// One directional transfer of the atomic swap, as submitted to the vault.
/// Idempotent at the vault by `from_nullifier`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SettlementLeg {
    pub from_commitment: Commitment,
    pub from_nullifier: NullifierHash,
    pub to_address: String,
    pub amount: Amount,
    pub token: String,
    pub chain_id: ChainId,
}

/// The vault's acknowledgement of an executed leg.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LegReceipt {
    pub tx_hash: String,
    pub zk_compressed: Option<bool>,
    pub compression_signature: Option<String>,
}

// ── Coordinator inputs / outputs ─────────────────────────────────────────────

/// One party's deposit note and receive address.
#[derive(Clone, Debug)]
pub struct PartyDeposit {
    pub commitment: Commitment,
    pub nullifier_hash: NullifierHash,
    pub address: String,
}

/// Everything the settlement coordinator needs to drive one accepted trade.
#[derive(Clone, Debug)]
pub struct SettlementPlan {
    pub request_id: RequestId,
    pub quote_id: QuoteId,
    pub pair: AssetPair,
    pub direction: Direction,
    /// Base-token amount from the request, smallest units.
    pub base_amount: Amount,
    /// Total price from the accepted quote, quote-token smallest units.
    pub price_total: Amount,
    pub chain_id: ChainId,
    pub taker: PartyDeposit,
    pub maker: PartyDeposit,
}

/// Combined record of a fully settled trade.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SettlementRecord {
    /// Leg (a): taker → maker payment.
    pub payment: LegReceipt,
    /// Leg (b): maker → taker asset delivery.
    pub asset: LegReceipt,
}

/// A settlement failure, tagged with whether it is certain that no transfer
/// executed. Only pre-transfer failures permit compensating the acceptance
/// back to `active`; anything else leaves the trade `filled` for
/// reconciliation.
#[derive(Debug)]
pub struct SettlementError {
    pub pre_transfer: bool,
    pub error: NoctisError,
}

impl SettlementError {
    pub fn pre_transfer(error: NoctisError) -> Self {
        Self {
            pre_transfer: true,
            error,
        }
    }

    pub fn post_transfer(error: NoctisError) -> Self {
        Self {
            pre_transfer: false,
            error,
        }
    }
}

// ── Seams ────────────────────────────────────────────────────────────────────

/// The RFQ state machine drives settlement through this seam; the concrete
/// coordinator lives in its own crate and is injected at node construction.
#[async_trait]
pub trait SettlementDriver: Send + Sync {
    async fn execute(&self, plan: &SettlementPlan) -> Result<SettlementRecord, SettlementError>;
}

/// Pre-trade balance checks against the vault, optional at both request
/// creation and quote submission.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    /// The spendable amount the vault discloses for a deposit-note
    /// commitment on `chain_id`.
    async fn available_balance(
        &self,
        commitment: &Commitment,
        chain_id: ChainId,
    ) -> Result<Amount, NoctisError>;
}
