//! The nullifier & commitment ledger: the authoritative registry of consumed
//! deposit notes, shared conceptually with the external privacy vault.
//!
//! The nullifier hash is the sole cross-system anchor that stops a party
//! from both withdrawing a deposit note through the vault and using it to
//! back a trade. Rows are append-only; only their status moves.

use std::sync::Arc;

use noctis_core::error::NoctisError;
use noctis_core::ledger::{
    CommitmentStatus, NullifierStatus, Party, UsedCommitment, UsedNullifier,
};
use noctis_core::types::{Commitment, NullifierHash, QuoteId, TimestampMs};

use crate::db::StateDb;

#[derive(Clone)]
pub struct NullifierLedger {
    db: Arc<StateDb>,
}

impl NullifierLedger {
    pub fn new(db: Arc<StateDb>) -> Self {
        Self { db }
    }

    /// Look up a nullifier row regardless of status.
    pub fn check_nullifier_used(
        &self,
        hash: &NullifierHash,
    ) -> Result<Option<UsedNullifier>, NoctisError> {
        self.db.get_nullifier(hash)
    }

    /// Look up a commitment, reporting only rows that currently block reuse.
    pub fn check_commitment_used(
        &self,
        commitment: &Commitment,
    ) -> Result<Option<UsedCommitment>, NoctisError> {
        let rows = self.db.commitment_rows(commitment)?;
        Ok(rows.into_iter().find(|r| r.status.is_blocking()))
    }

    /// Reserve a nullifier. Fails with `NullifierAlreadyUsed` if any row for
    /// the hash exists, whatever its status: a nullifier is never recycled.
    pub fn mark_nullifier_used(
        &self,
        hash: NullifierHash,
        quote_id: Option<QuoteId>,
        party: Party,
        status: NullifierStatus,
        now: TimestampMs,
    ) -> Result<(), NoctisError> {
        let record = UsedNullifier {
            nullifier_hash: hash,
            quote_id,
            party,
            status,
            used_at: now,
        };
        match self.db.try_insert_nullifier(&record)? {
            Ok(()) => Ok(()),
            Err(existing) => Err(NoctisError::NullifierAlreadyUsed {
                status: existing.status.as_str(),
            }),
        }
    }

    /// Reserve a commitment for a quote. Conflicts only with an existing row
    /// for the same (commitment, quote, party) triple.
    pub fn mark_commitment_used(
        &self,
        commitment: Commitment,
        quote_id: QuoteId,
        party: Party,
        status: CommitmentStatus,
        now: TimestampMs,
    ) -> Result<(), NoctisError> {
        let record = UsedCommitment {
            commitment,
            quote_id,
            party,
            status,
            used_at: now,
        };
        match self.db.try_insert_commitment(&record)? {
            Ok(()) => Ok(()),
            Err(_) => Err(NoctisError::CommitmentInUse),
        }
    }

    /// Move a reserved nullifier to a new status (pending→settled on
    /// success, pending→cancelled/expired on release).
    pub fn update_nullifier_status(
        &self,
        hash: &NullifierHash,
        status: NullifierStatus,
    ) -> Result<(), NoctisError> {
        let mut record = self
            .db
            .get_nullifier(hash)?
            .ok_or_else(|| NoctisError::Internal(format!("nullifier {hash} not reserved")))?;
        record.status = status;
        self.db.put_nullifier(&record)
    }

    pub fn update_commitment_status(
        &self,
        commitment: &Commitment,
        quote_id: &QuoteId,
        party: Party,
        status: CommitmentStatus,
    ) -> Result<(), NoctisError> {
        let rows = self.db.commitment_rows(commitment)?;
        let mut record = rows
            .into_iter()
            .find(|r| r.quote_id == *quote_id && r.party == party)
            .ok_or_else(|| NoctisError::Internal("commitment row not reserved".into()))?;
        record.status = status;
        self.db.put_commitment(&record)
    }

    /// Back-channel from the external vault's withdrawal flow: record that a
    /// deposit note was consumed outside the RFQ system so acceptance
    /// attempts against it reject without contacting the vault.
    pub fn mark_external_nullifier_used(
        &self,
        hash: NullifierHash,
        now: TimestampMs,
    ) -> Result<(), NoctisError> {
        self.mark_nullifier_used(hash, None, Party::Manual, NullifierStatus::Settled, now)
    }

    /// Every nullifier currently consuming a note (pending ∪ settled).
    pub fn list_consumed_nullifiers(&self) -> Result<Vec<UsedNullifier>, NoctisError> {
        let mut rows: Vec<UsedNullifier> = self
            .db
            .iter_nullifiers()?
            .into_iter()
            .filter(|r| r.status.is_consuming())
            .collect();
        rows.sort_by_key(|r| r.used_at);
        Ok(rows)
    }
}
