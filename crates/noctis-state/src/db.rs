use std::path::Path;

use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;

use noctis_core::error::NoctisError;
use noctis_core::ledger::{Party, UsedCommitment, UsedNullifier, UsedSignature};
use noctis_core::message::Message;
use noctis_core::request::{Quote, QuoteRequest, QuoteStatus, RequestStatus};
use noctis_core::types::{
    Commitment, QuoteId, RequestId, SettlementNullifier, SignatureHash, WotsPublicKey,
};

/// Outcome of an atomic signature reservation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SignatureReservation {
    Fresh,
    Reused,
}

/// Persistent state database backed by sled (pure-Rust, no C dependencies).
///
/// Named trees:
///   requests         — RequestId bytes (16)                        → bincode(QuoteRequest)
///   quotes           — QuoteId bytes (16)                          → bincode(Quote)
///   request_quotes   — RequestId ∥ QuoteId                         → [] (index)
///   used_signatures  — SignatureHash bytes (32)                    → bincode(UsedSignature)
///   used_nullifiers  — NullifierHash bytes (32)                    → bincode(UsedNullifier)
///   used_commitments — be16(len) ∥ commitment ∥ QuoteId ∥ party    → bincode(UsedCommitment)
///   messages         — RequestId ∥ be64(created_at) ∥ MessageId    → bincode(Message)
///   whitelist        — blake3(public_key)                          → public_key bytes
///   meta             — utf8 key bytes                              → raw bytes
///
/// Uniqueness on signature hashes and nullifier hashes is enforced with
/// compare-and-swap inserts, which sled linearizes: of any number of
/// concurrent attempts exactly one observes `Fresh`.
pub struct StateDb {
    _db: sled::Db,
    requests: sled::Tree,
    quotes: sled::Tree,
    request_quotes: sled::Tree,
    used_signatures: sled::Tree,
    used_nullifiers: sled::Tree,
    used_commitments: sled::Tree,
    messages: sled::Tree,
    whitelist: sled::Tree,
    meta: sled::Tree,
}

fn storage_err(e: sled::Error) -> NoctisError {
    NoctisError::Storage(e.to_string())
}

fn ser<T: serde::Serialize>(v: &T) -> Result<Vec<u8>, NoctisError> {
    bincode::serialize(v).map_err(|e| NoctisError::Serialization(e.to_string()))
}

fn de<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, NoctisError> {
    bincode::deserialize(bytes).map_err(|e| NoctisError::Serialization(e.to_string()))
}

impl StateDb {
    /// Open or create the state database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, NoctisError> {
        let db = sled::open(path).map_err(storage_err)?;
        let requests         = db.open_tree("requests").map_err(storage_err)?;
        let quotes           = db.open_tree("quotes").map_err(storage_err)?;
        let request_quotes   = db.open_tree("request_quotes").map_err(storage_err)?;
        let used_signatures  = db.open_tree("used_signatures").map_err(storage_err)?;
        let used_nullifiers  = db.open_tree("used_nullifiers").map_err(storage_err)?;
        let used_commitments = db.open_tree("used_commitments").map_err(storage_err)?;
        let messages         = db.open_tree("messages").map_err(storage_err)?;
        let whitelist        = db.open_tree("whitelist").map_err(storage_err)?;
        let meta             = db.open_tree("meta").map_err(storage_err)?;
        meta.insert("schema_version", 1u32.to_be_bytes().to_vec())
            .map_err(storage_err)?;
        Ok(Self { _db: db, requests, quotes, request_quotes, used_signatures,
                  used_nullifiers, used_commitments, messages, whitelist, meta })
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), NoctisError> {
        self._db.flush().map_err(storage_err)?;
        Ok(())
    }

    pub fn schema_version(&self) -> u32 {
        self.meta
            .get("schema_version")
            .ok()
            .flatten()
            .and_then(|b| b.as_ref().try_into().ok().map(u32::from_be_bytes))
            .unwrap_or(0)
    }

    // ── Quote requests ───────────────────────────────────────────────────────

    pub fn get_request(&self, id: &RequestId) -> Result<Option<QuoteRequest>, NoctisError> {
        match self.requests.get(id.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(de(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_request(&self, request: &QuoteRequest) -> Result<(), NoctisError> {
        self.requests
            .insert(request.request_id.as_bytes(), ser(request)?)
            .map_err(storage_err)?;
        Ok(())
    }

    /// Return every quote request in the DB (no filter). The caller applies
    /// status filtering and lazy expiry.
    pub fn iter_requests(&self) -> Result<Vec<QuoteRequest>, NoctisError> {
        let mut out = Vec::new();
        for item in self.requests.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(de(&bytes)?);
        }
        Ok(out)
    }

    // ── Quotes ───────────────────────────────────────────────────────────────

    pub fn get_quote(&self, id: &QuoteId) -> Result<Option<Quote>, NoctisError> {
        match self.quotes.get(id.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(de(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Insert or update a quote, maintaining the per-request index.
    pub fn put_quote(&self, quote: &Quote) -> Result<(), NoctisError> {
        self.quotes
            .insert(quote.quote_id.as_bytes(), ser(quote)?)
            .map_err(storage_err)?;
        let mut index_key = quote.request_id.as_bytes().to_vec();
        index_key.extend_from_slice(quote.quote_id.as_bytes());
        self.request_quotes
            .insert(index_key, &[] as &[u8])
            .map_err(storage_err)?;
        Ok(())
    }

    /// All quotes submitted against a request, in insertion-index order.
    pub fn quotes_for_request(&self, id: &RequestId) -> Result<Vec<Quote>, NoctisError> {
        let mut out = Vec::new();
        for item in self.request_quotes.scan_prefix(id.as_bytes()) {
            let (key, _) = item.map_err(storage_err)?;
            let quote_id = &key[16..32];
            if let Some(bytes) = self.quotes.get(quote_id).map_err(storage_err)? {
                out.push(de(&bytes)?);
            }
        }
        Ok(out)
    }

    // ── Used signatures ──────────────────────────────────────────────────────

    /// Atomically record a one-time signature as consumed. Exactly one of
    /// any number of concurrent attempts for the same hash sees `Fresh`.
    pub fn reserve_signature(
        &self,
        record: &UsedSignature,
    ) -> Result<SignatureReservation, NoctisError> {
        let outcome = self
            .used_signatures
            .compare_and_swap(
                record.signature_hash.as_bytes(),
                None as Option<&[u8]>,
                Some(ser(record)?),
            )
            .map_err(storage_err)?;
        Ok(match outcome {
            Ok(()) => SignatureReservation::Fresh,
            Err(_) => SignatureReservation::Reused,
        })
    }

    pub fn get_used_signature(
        &self,
        hash: &SignatureHash,
    ) -> Result<Option<UsedSignature>, NoctisError> {
        match self.used_signatures.get(hash.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(de(&bytes)?)),
            None => Ok(None),
        }
    }

    // ── Used nullifiers ──────────────────────────────────────────────────────

    /// Insert a nullifier row; on conflict the existing row is returned in
    /// the inner `Err`.
    pub fn try_insert_nullifier(
        &self,
        record: &UsedNullifier,
    ) -> Result<Result<(), UsedNullifier>, NoctisError> {
        let outcome = self
            .used_nullifiers
            .compare_and_swap(
                record.nullifier_hash.as_bytes(),
                None as Option<&[u8]>,
                Some(ser(record)?),
            )
            .map_err(storage_err)?;
        match outcome {
            Ok(()) => Ok(Ok(())),
            Err(cas) => {
                let existing = cas
                    .current
                    .as_ref()
                    .map(|b| de::<UsedNullifier>(b))
                    .transpose()?
                    .ok_or_else(|| NoctisError::Internal("nullifier CAS lost current".into()))?;
                Ok(Err(existing))
            }
        }
    }

    pub fn get_nullifier(
        &self,
        hash: &noctis_core::types::NullifierHash,
    ) -> Result<Option<UsedNullifier>, NoctisError> {
        match self.used_nullifiers.get(hash.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(de(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Overwrite an existing nullifier row. The row's settlement task is its
    /// only writer after reservation, so a plain read-modify-write is safe.
    pub fn put_nullifier(&self, record: &UsedNullifier) -> Result<(), NoctisError> {
        self.used_nullifiers
            .insert(record.nullifier_hash.as_bytes(), ser(record)?)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn iter_nullifiers(&self) -> Result<Vec<UsedNullifier>, NoctisError> {
        let mut out = Vec::new();
        for item in self.used_nullifiers.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(de(&bytes)?);
        }
        Ok(out)
    }

    // ── Used commitments ─────────────────────────────────────────────────────

    fn commitment_prefix(commitment: &Commitment) -> Vec<u8> {
        let mut key = (commitment.0.len() as u16).to_be_bytes().to_vec();
        key.extend_from_slice(&commitment.0);
        key
    }

    fn commitment_key(commitment: &Commitment, quote_id: &QuoteId, party: Party) -> Vec<u8> {
        let mut key = Self::commitment_prefix(commitment);
        key.extend_from_slice(quote_id.as_bytes());
        key.push(party.tag());
        key
    }

    /// Insert a commitment row, unique on (commitment, quote_id, party).
    pub fn try_insert_commitment(
        &self,
        record: &UsedCommitment,
    ) -> Result<Result<(), UsedCommitment>, NoctisError> {
        let key = Self::commitment_key(&record.commitment, &record.quote_id, record.party);
        let outcome = self
            .used_commitments
            .compare_and_swap(key, None as Option<&[u8]>, Some(ser(record)?))
            .map_err(storage_err)?;
        match outcome {
            Ok(()) => Ok(Ok(())),
            Err(cas) => {
                let existing = cas
                    .current
                    .as_ref()
                    .map(|b| de::<UsedCommitment>(b))
                    .transpose()?
                    .ok_or_else(|| NoctisError::Internal("commitment CAS lost current".into()))?;
                Ok(Err(existing))
            }
        }
    }

    /// All rows for a given commitment across quotes and parties.
    pub fn commitment_rows(&self, commitment: &Commitment) -> Result<Vec<UsedCommitment>, NoctisError> {
        let mut out = Vec::new();
        for item in self.used_commitments.scan_prefix(Self::commitment_prefix(commitment)) {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(de(&bytes)?);
        }
        Ok(out)
    }

    pub fn put_commitment(&self, record: &UsedCommitment) -> Result<(), NoctisError> {
        let key = Self::commitment_key(&record.commitment, &record.quote_id, record.party);
        self.used_commitments
            .insert(key, ser(record)?)
            .map_err(storage_err)?;
        Ok(())
    }

    // ── Messages ─────────────────────────────────────────────────────────────

    /// Append a relayed message. The key embeds `created_at` big-endian so a
    /// prefix scan yields chronological order.
    pub fn append_message(&self, message: &Message) -> Result<(), NoctisError> {
        let mut key = message.request_id.as_bytes().to_vec();
        key.extend_from_slice(&(message.created_at.max(0) as u64).to_be_bytes());
        key.extend_from_slice(message.message_id.as_bytes());
        self.messages.insert(key, ser(message)?).map_err(storage_err)?;
        Ok(())
    }

    pub fn messages_for_request(&self, id: &RequestId) -> Result<Vec<Message>, NoctisError> {
        let mut out = Vec::new();
        for item in self.messages.scan_prefix(id.as_bytes()) {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(de(&bytes)?);
        }
        Ok(out)
    }

    // ── Whitelist ────────────────────────────────────────────────────────────

    pub fn whitelist_add(&self, public_key: &WotsPublicKey) -> Result<(), NoctisError> {
        let key = noctis_crypto::hash::blake3_hash(&public_key.0);
        self.whitelist
            .insert(key, public_key.0.clone())
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn whitelist_remove(&self, public_key: &WotsPublicKey) -> Result<bool, NoctisError> {
        let key = noctis_crypto::hash::blake3_hash(&public_key.0);
        Ok(self.whitelist.remove(key).map_err(storage_err)?.is_some())
    }

    pub fn whitelist_contains(&self, public_key: &WotsPublicKey) -> Result<bool, NoctisError> {
        let key = noctis_crypto::hash::blake3_hash(&public_key.0);
        self.whitelist.contains_key(key).map_err(storage_err)
    }

    /// Hex identifiers (BLAKE3 of the key) of all whitelisted makers.
    pub fn whitelist_ids(&self) -> Result<Vec<String>, NoctisError> {
        let mut out = Vec::new();
        for item in self.whitelist.iter() {
            let (key, _) = item.map_err(storage_err)?;
            out.push(hex::encode(&key));
        }
        Ok(out)
    }

    // ── Acceptance critical section ──────────────────────────────────────────

    /// The single transactional compare-and-set that fills a request.
    ///
    /// Atomically, with respect to every other acceptance and cancellation:
    ///   1. re-reads the request and aborts with `AcceptConflict` unless it
    ///      is still `active`;
    ///   2. marks the request `filled` and records the settlement nullifier;
    ///   3. marks the accepted quote `accepted` and every other still-active
    ///      sibling `rejected`.
    ///
    /// Returns the sibling quote ids that were moved to `rejected`, so a
    /// pre-transfer settlement failure can compensate precisely.
    pub fn accept_quote_txn(
        &self,
        request_id: &RequestId,
        quote_id: &QuoteId,
        sibling_ids: &[QuoteId],
        nullifier: SettlementNullifier,
    ) -> Result<Vec<QuoteId>, NoctisError> {
        let result: Result<Vec<QuoteId>, TransactionError<NoctisError>> =
            (&self.requests, &self.quotes).transaction(|(rt, qt)| {
                let abort_ser = |e: bincode::Error| {
                    ConflictableTransactionError::Abort(NoctisError::Serialization(e.to_string()))
                };

                let raw = rt.get(request_id.as_bytes())?.ok_or_else(|| {
                    ConflictableTransactionError::Abort(NoctisError::RequestNotFound(
                        request_id.to_string(),
                    ))
                })?;
                let mut request: QuoteRequest =
                    bincode::deserialize(&raw).map_err(abort_ser)?;

                if request.status != RequestStatus::Active {
                    return Err(ConflictableTransactionError::Abort(
                        NoctisError::AcceptConflict,
                    ));
                }

                let raw = qt.get(quote_id.as_bytes())?.ok_or_else(|| {
                    ConflictableTransactionError::Abort(NoctisError::QuoteNotFound(
                        quote_id.to_string(),
                    ))
                })?;
                let mut quote: Quote = bincode::deserialize(&raw).map_err(abort_ser)?;

                if quote.status != QuoteStatus::Active {
                    return Err(ConflictableTransactionError::Abort(
                        NoctisError::AcceptConflict,
                    ));
                }

                request.status = RequestStatus::Filled;
                request.settlement_nullifier = Some(nullifier);
                rt.insert(
                    request_id.as_bytes().as_slice(),
                    bincode::serialize(&request).map_err(abort_ser)?,
                )?;

                quote.status = QuoteStatus::Accepted;
                qt.insert(
                    quote_id.as_bytes().as_slice(),
                    bincode::serialize(&quote).map_err(abort_ser)?,
                )?;

                let mut rejected = Vec::new();
                for sid in sibling_ids {
                    if sid == quote_id {
                        continue;
                    }
                    let Some(raw) = qt.get(sid.as_bytes())? else {
                        continue;
                    };
                    let mut sibling: Quote = bincode::deserialize(&raw).map_err(abort_ser)?;
                    if sibling.status == QuoteStatus::Active {
                        sibling.status = QuoteStatus::Rejected;
                        qt.insert(
                            sid.as_bytes().as_slice(),
                            bincode::serialize(&sibling).map_err(abort_ser)?,
                        )?;
                        rejected.push(*sid);
                    }
                }

                Ok(rejected)
            });

        match result {
            Ok(rejected) => Ok(rejected),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(NoctisError::Storage(e.to_string())),
        }
    }

    /// Transition a request to `cancelled`, atomically with respect to a
    /// racing acceptance. Aborts if the request is already terminal in a
    /// state cancellation cannot override (`filled` or `cancelled`).
    pub fn cancel_request_txn(&self, request_id: &RequestId) -> Result<QuoteRequest, NoctisError> {
        let result: Result<QuoteRequest, TransactionError<NoctisError>> =
            self.requests.transaction(|rt| {
                let abort_ser = |e: bincode::Error| {
                    ConflictableTransactionError::Abort(NoctisError::Serialization(e.to_string()))
                };

                let raw = rt.get(request_id.as_bytes())?.ok_or_else(|| {
                    ConflictableTransactionError::Abort(NoctisError::RequestNotFound(
                        request_id.to_string(),
                    ))
                })?;
                let mut request: QuoteRequest =
                    bincode::deserialize(&raw).map_err(abort_ser)?;

                match request.status {
                    RequestStatus::Filled | RequestStatus::Cancelled => {
                        return Err(ConflictableTransactionError::Abort(
                            NoctisError::RequestNotActive {
                                status: request.status.as_str(),
                            },
                        ));
                    }
                    RequestStatus::Active | RequestStatus::Expired => {}
                }

                request.status = RequestStatus::Cancelled;
                rt.insert(
                    request_id.as_bytes().as_slice(),
                    bincode::serialize(&request).map_err(abort_ser)?,
                )?;
                Ok(request)
            });

        match result {
            Ok(request) => Ok(request),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(NoctisError::Storage(e.to_string())),
        }
    }

    /// Compensate a fill whose settlement failed before any transfer: the
    /// request returns to `active` with no nullifier, the accepted quote and
    /// the quotes rejected in the same critical section return to `active`.
    pub fn rollback_accept_txn(
        &self,
        request_id: &RequestId,
        quote_id: &QuoteId,
        rejected_ids: &[QuoteId],
    ) -> Result<(), NoctisError> {
        let result: Result<(), TransactionError<NoctisError>> =
            (&self.requests, &self.quotes).transaction(|(rt, qt)| {
                let abort_ser = |e: bincode::Error| {
                    ConflictableTransactionError::Abort(NoctisError::Serialization(e.to_string()))
                };

                if let Some(raw) = rt.get(request_id.as_bytes())? {
                    let mut request: QuoteRequest =
                        bincode::deserialize(&raw).map_err(abort_ser)?;
                    request.status = RequestStatus::Active;
                    request.settlement_nullifier = None;
                    rt.insert(
                        request_id.as_bytes().as_slice(),
                        bincode::serialize(&request).map_err(abort_ser)?,
                    )?;
                }

                for qid in std::iter::once(quote_id).chain(rejected_ids.iter()) {
                    if let Some(raw) = qt.get(qid.as_bytes())? {
                        let mut quote: Quote = bincode::deserialize(&raw).map_err(abort_ser)?;
                        quote.status = QuoteStatus::Active;
                        qt.insert(
                            qid.as_bytes().as_slice(),
                            bincode::serialize(&quote).map_err(abort_ser)?,
                        )?;
                    }
                }

                Ok(())
            });

        match result {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(NoctisError::Storage(e.to_string())),
        }
    }
}
