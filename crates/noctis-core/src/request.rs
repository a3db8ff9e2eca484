use serde::{Deserialize, Serialize};

use crate::types::{
    Amount, AssetPair, Commitment, Direction, NullifierHash, QuoteId, RequestId,
    SettlementNullifier, StealthAddress, TimestampMs, WotsPublicKey,
};

// ── RequestStatus ────────────────────────────────────────────────────────────

/// Lifecycle status of a quote request. Transitions form a DAG with a single
/// incoming edge into each terminal state:
///
/// ```text
/// active ──▶ filled     (accept_quote succeeds; terminal)
///   │──────▶ cancelled  (cancel_request; terminal)
///   └──────▶ expired    (lazy, now ≥ expires_at; terminal)
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Active,
    Expired,
    Filled,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Active => "active",
            RequestStatus::Expired => "expired",
            RequestStatus::Filled => "filled",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Active)
    }
}

// ── QuoteStatus ──────────────────────────────────────────────────────────────

/// Lifecycle status of a quote: `active → accepted | rejected | expired`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteStatus {
    Active,
    Expired,
    Accepted,
    Rejected,
}

impl QuoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteStatus::Active => "active",
            QuoteStatus::Expired => "expired",
            QuoteStatus::Accepted => "accepted",
            QuoteStatus::Rejected => "rejected",
        }
    }
}

// ── QuoteRequest ─────────────────────────────────────────────────────────────

/// A taker's request for quotes on an asset pair.
///
/// Invariant: `settlement_nullifier.is_some() ⇔ status == Filled`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub request_id: RequestId,
    pub asset_pair: AssetPair,
    pub direction: Direction,
    /// Base-token amount in its smallest unit.
    pub amount: Amount,
    pub created_at: TimestampMs,
    /// Must satisfy `created_at < expires_at ≤ created_at + 24h`.
    pub expires_at: TimestampMs,
    /// One-time reply route handed back to the taker at creation.
    pub stealth_address: StealthAddress,
    pub taker_public_key: WotsPublicKey,
    pub status: RequestStatus,
    /// Set exactly when the request fills.
    pub settlement_nullifier: Option<SettlementNullifier>,
}

impl QuoteRequest {
    pub fn is_expired(&self, now: TimestampMs) -> bool {
        now >= self.expires_at
    }
}

// ── Quote ────────────────────────────────────────────────────────────────────

/// A maker's priced response to a quote request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Quote {
    pub quote_id: QuoteId,
    pub request_id: RequestId,
    /// Total price in the quote token's smallest unit, not a per-unit rate.
    pub price: Amount,
    pub maker_public_key: WotsPublicKey,
    /// Chain-native address the maker receives the payment leg at.
    pub maker_settlement_address: String,
    /// Deposit-note commitment backing the maker's asset leg, if bound at
    /// submission time (it may instead be supplied at acceptance).
    pub maker_commitment: Option<Commitment>,
    pub maker_nullifier_hash: Option<NullifierHash>,
    pub created_at: TimestampMs,
    /// Never later than the parent request's `expires_at`.
    pub expires_at: TimestampMs,
    pub status: QuoteStatus,
}

impl Quote {
    pub fn is_expired(&self, now: TimestampMs) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_status_terminality() {
        assert!(!RequestStatus::Active.is_terminal());
        assert!(RequestStatus::Expired.is_terminal());
        assert!(RequestStatus::Filled.is_terminal());
        assert!(RequestStatus::Cancelled.is_terminal());
    }

    #[test]
    fn asset_pair_parse() {
        let p = AssetPair::parse("SOL/USDC").unwrap();
        assert_eq!(p.base, "SOL");
        assert_eq!(p.quote, "USDC");
        assert!(AssetPair::parse("SOLUSDC").is_none());
        assert!(AssetPair::parse("/USDC").is_none());
        assert!(AssetPair::parse("SOL/").is_none());
        assert!(AssetPair::parse("A/B/C").is_none());
    }
}
