use serde::{Deserialize, Serialize};

use crate::types::{Commitment, NullifierHash, QuoteId, SignatureHash, TimestampMs, WotsPublicKey};

// ── OperationKind ────────────────────────────────────────────────────────────

/// The operation a one-time signature authorized. Recorded for audit only:
/// reuse is rejected on the signature hash alone, across all kinds.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    CreateQuoteRequest,
    CancelQuoteRequest,
    SubmitQuote,
    AcceptQuote,
    SendMessage,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::CreateQuoteRequest => "create_quote_request",
            OperationKind::CancelQuoteRequest => "cancel_quote_request",
            OperationKind::SubmitQuote => "submit_quote",
            OperationKind::AcceptQuote => "accept_quote",
            OperationKind::SendMessage => "send_message",
        }
    }
}

// ── UsedSignature ────────────────────────────────────────────────────────────

/// Insert-only record of a consumed one-time signature. Unique on
/// `signature_hash`; a duplicate insert is reuse and is rejected.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UsedSignature {
    pub signature_hash: SignatureHash,
    pub used_at: TimestampMs,
    pub operation: OperationKind,
    pub public_key: WotsPublicKey,
}

// ── Party ────────────────────────────────────────────────────────────────────

/// Which side of a trade consumed a nullifier or commitment. `Manual` marks
/// entries pushed by the external vault's withdrawal flow.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Party {
    Taker,
    Maker,
    Manual,
}

impl Party {
    pub fn as_str(&self) -> &'static str {
        match self {
            Party::Taker => "taker",
            Party::Maker => "maker",
            Party::Manual => "manual",
        }
    }

    /// Single-byte tag used in composite sled keys.
    pub fn tag(&self) -> u8 {
        match self {
            Party::Taker => b't',
            Party::Maker => b'm',
            Party::Manual => b'x',
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "taker" => Some(Party::Taker),
            "maker" => Some(Party::Maker),
            "manual" => Some(Party::Manual),
            _ => None,
        }
    }
}

// ── NullifierStatus ──────────────────────────────────────────────────────────

/// Reservation lifecycle of a consumed nullifier. `Pending` is held during
/// settlement; `Settled` is final consumption; `Cancelled`/`Expired` release
/// the reservation without consuming the note.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NullifierStatus {
    Pending,
    Settled,
    Expired,
    Cancelled,
}

impl NullifierStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NullifierStatus::Pending => "pending",
            NullifierStatus::Settled => "settled",
            NullifierStatus::Expired => "expired",
            NullifierStatus::Cancelled => "cancelled",
        }
    }

    /// Whether this row blocks further use of the nullifier.
    pub fn is_consuming(&self) -> bool {
        matches!(self, NullifierStatus::Pending | NullifierStatus::Settled)
    }
}

// ── CommitmentStatus ─────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitmentStatus {
    Active,
    Settled,
    Expired,
    Cancelled,
}

impl CommitmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitmentStatus::Active => "active",
            CommitmentStatus::Settled => "settled",
            CommitmentStatus::Expired => "expired",
            CommitmentStatus::Cancelled => "cancelled",
        }
    }

    /// Rows in these states make the commitment unavailable for a new quote.
    pub fn is_blocking(&self) -> bool {
        matches!(self, CommitmentStatus::Active)
    }
}

// ── UsedNullifier ────────────────────────────────────────────────────────────

/// Ledger row for a nullifier hash. Unique on the hash; the authoritative
/// "which notes are consumed" registry shared with the external vault.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UsedNullifier {
    pub nullifier_hash: NullifierHash,
    /// Absent for rows pushed by the external withdrawal flow.
    pub quote_id: Option<QuoteId>,
    pub party: Party,
    pub status: NullifierStatus,
    pub used_at: TimestampMs,
}

// ── UsedCommitment ───────────────────────────────────────────────────────────

/// Ledger row for a deposit-note commitment, unique on
/// `(commitment, quote_id, party)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UsedCommitment {
    pub commitment: Commitment,
    pub quote_id: QuoteId,
    pub party: Party,
    pub status: CommitmentStatus,
    pub used_at: TimestampMs,
}
