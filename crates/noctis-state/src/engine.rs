//! The RFQ state machine: quote-request lifecycle, quote submission,
//! acceptance, and lazy expiry.
//!
//! Every authorization is a one-time WOTS+ signature over a canonical
//! message; identity is never inferred from keys. Acceptance commits the
//! `filled` transition in a single database transaction before any vault
//! call, then drives the settlement coordinator through the injected seam.

use std::sync::Arc;

use tracing::{error, info, warn};

use noctis_core::constants::{
    MAX_REQUEST_TTL_MS, MSG_PREFIX_ACCEPT_QUOTE, MSG_PREFIX_CANCEL_REQUEST,
    MSG_PREFIX_CREATE_REQUEST, MSG_PREFIX_SUBMIT_QUOTE,
};
use noctis_core::error::NoctisError;
use noctis_core::ledger::{OperationKind, UsedSignature};
use noctis_core::request::{Quote, QuoteRequest, QuoteStatus, RequestStatus};
use noctis_core::settlement::{
    BalanceSource, PartyDeposit, SettlementDriver, SettlementPlan, SettlementRecord,
};
use noctis_core::types::{
    Amount, AssetPair, ChainId, Commitment, Direction, NullifierHash, QuoteId, RequestId,
    SettlementNullifier, StealthAddress, TimestampMs, WotsPublicKey, WotsSignature,
};
use noctis_crypto::stealth::{derive_stealth_address, fingerprint, generate_nullifier};

use crate::db::{SignatureReservation, StateDb};
use crate::ledger::NullifierLedger;
use crate::whitelist::WhitelistGate;

// ── Operation inputs / outputs ───────────────────────────────────────────────

pub struct CreateRequestParams {
    pub asset_pair: AssetPair,
    pub direction: Direction,
    pub amount: Amount,
    /// Client-chosen time-to-live in milliseconds; the server derives
    /// `expires_at = now + timeout_ms`.
    pub timeout_ms: i64,
    pub signature: WotsSignature,
    pub public_key: WotsPublicKey,
    /// The exact byte string the taker signed. Must be the canonical
    /// creation message for these parameters.
    pub signed_message: String,
    pub commitment: Option<Commitment>,
    pub chain_id: Option<ChainId>,
}

#[derive(Debug)]
pub struct CreatedRequest {
    pub request_id: RequestId,
    pub stealth_address: StealthAddress,
    pub expires_at: TimestampMs,
}

pub struct SubmitQuoteParams {
    pub request_id: RequestId,
    /// Total price in quote-token smallest units.
    pub price: Amount,
    pub expires_at: TimestampMs,
    pub signature: WotsSignature,
    pub public_key: WotsPublicKey,
    pub maker_settlement_address: String,
    pub maker_commitment: Option<Commitment>,
    pub maker_nullifier_hash: Option<NullifierHash>,
    pub chain_id: Option<ChainId>,
}

pub struct AcceptQuoteParams {
    pub quote_id: QuoteId,
    pub signature: WotsSignature,
    pub public_key: WotsPublicKey,
    pub chain_id: ChainId,
    pub taker_commitment: Commitment,
    pub taker_address: String,
    pub taker_nullifier_hash: NullifierHash,
    /// Default to the values stored with the quote when absent.
    pub maker_commitment: Option<Commitment>,
    pub maker_nullifier_hash: Option<NullifierHash>,
}

#[derive(Debug)]
pub struct AcceptOutcome {
    pub quote_id: QuoteId,
    pub request_id: RequestId,
    pub settlement_nullifier: SettlementNullifier,
    pub record: SettlementRecord,
}

// ── RfqEngine ────────────────────────────────────────────────────────────────

pub struct RfqEngine {
    db: Arc<StateDb>,
    ledger: NullifierLedger,
    whitelist: WhitelistGate,
    settlement: Arc<dyn SettlementDriver>,
    /// Vault balance pre-checks; `None` disables them.
    balance: Option<Arc<dyn BalanceSource>>,
}

impl RfqEngine {
    pub fn new(
        db: Arc<StateDb>,
        ledger: NullifierLedger,
        whitelist: WhitelistGate,
        settlement: Arc<dyn SettlementDriver>,
        balance: Option<Arc<dyn BalanceSource>>,
    ) -> Self {
        Self {
            db,
            ledger,
            whitelist,
            settlement,
            balance,
        }
    }

    pub fn ledger(&self) -> &NullifierLedger {
        &self.ledger
    }

    pub fn whitelist(&self) -> &WhitelistGate {
        &self.whitelist
    }

    // ── Shared helpers ───────────────────────────────────────────────────────

    /// Verify a one-time signature over `message` and consume it for
    /// `operation`. The signature hash is only persisted on a valid
    /// signature; reuse of any prior hash is rejected, whatever the
    /// operation.
    fn verify_and_reserve(
        &self,
        message: &[u8],
        signature: &WotsSignature,
        public_key: &WotsPublicKey,
        operation: OperationKind,
        now: TimestampMs,
    ) -> Result<(), NoctisError> {
        let verification = noctis_crypto::verify(message, &signature.0, &public_key.0)?;
        if !verification.valid {
            return Err(NoctisError::SignatureInvalid);
        }
        let reservation = self.db.reserve_signature(&UsedSignature {
            signature_hash: verification.signature_hash,
            used_at: now,
            operation,
            public_key: public_key.clone(),
        })?;
        if reservation == SignatureReservation::Reused {
            return Err(NoctisError::SignatureReused);
        }
        Ok(())
    }

    /// Lazily expire a request on read. Idempotent.
    fn lazy_expire_request(
        &self,
        request: &mut QuoteRequest,
        now: TimestampMs,
    ) -> Result<(), NoctisError> {
        if request.status == RequestStatus::Active && request.is_expired(now) {
            request.status = RequestStatus::Expired;
            self.db.put_request(request)?;
        }
        Ok(())
    }

    /// Lazily expire the quotes of a request on read; returns the refreshed
    /// set.
    fn lazy_expire_quotes(
        &self,
        request_id: &RequestId,
        now: TimestampMs,
    ) -> Result<Vec<Quote>, NoctisError> {
        let mut quotes = self.db.quotes_for_request(request_id)?;
        for quote in &mut quotes {
            if quote.status == QuoteStatus::Active && quote.is_expired(now) {
                quote.status = QuoteStatus::Expired;
                self.db.put_quote(quote)?;
            }
        }
        Ok(quotes)
    }

    fn active_quote_count(
        &self,
        request_id: &RequestId,
        now: TimestampMs,
    ) -> Result<usize, NoctisError> {
        Ok(self
            .lazy_expire_quotes(request_id, now)?
            .iter()
            .filter(|q| q.status == QuoteStatus::Active)
            .count())
    }

    async fn check_balance(
        &self,
        commitment: &Commitment,
        chain_id: ChainId,
        need: Amount,
    ) -> Result<(), NoctisError> {
        let Some(source) = &self.balance else {
            return Ok(());
        };
        let have = source.available_balance(commitment, chain_id).await?;
        if have < need {
            return Err(NoctisError::InsufficientBalance(format!(
                "need {need}, have {have}"
            )));
        }
        Ok(())
    }

    // ── create_request ───────────────────────────────────────────────────────

    pub async fn create_request(
        &self,
        params: CreateRequestParams,
        now: TimestampMs,
    ) -> Result<CreatedRequest, NoctisError> {
        if params.amount == 0 {
            return Err(NoctisError::ZeroAmount);
        }
        if params.timeout_ms <= 0 || params.timeout_ms > MAX_REQUEST_TTL_MS {
            return Err(NoctisError::ExpiryOutOfRange);
        }
        let expires_at = now + params.timeout_ms;

        // The client-supplied message is the authorization binding; it is
        // verified byte-for-byte and required to be the canonical encoding
        // of the request's essential fields. The TTL is bound rather than
        // the absolute expiry so the client need not guess server time.
        let canonical = format!(
            "{}{}:{}:{}:{}",
            MSG_PREFIX_CREATE_REQUEST,
            params.asset_pair,
            params.direction,
            params.amount,
            params.timeout_ms,
        );
        if params.signed_message != canonical {
            return Err(NoctisError::NonCanonicalMessage {
                operation: "create_quote_request",
            });
        }
        self.verify_and_reserve(
            params.signed_message.as_bytes(),
            &params.signature,
            &params.public_key,
            OperationKind::CreateQuoteRequest,
            now,
        )?;

        if let (Some(commitment), Some(chain_id)) = (&params.commitment, params.chain_id) {
            self.check_balance(commitment, chain_id, params.amount).await?;
        }

        let request = QuoteRequest {
            request_id: RequestId::generate(),
            asset_pair: params.asset_pair,
            direction: params.direction,
            amount: params.amount,
            created_at: now,
            expires_at,
            stealth_address: derive_stealth_address(),
            taker_public_key: params.public_key,
            status: RequestStatus::Active,
            settlement_nullifier: None,
        };
        self.db.put_request(&request)?;

        info!(
            request_id = %request.request_id,
            pair = %request.asset_pair,
            direction = %request.direction,
            taker = %fingerprint(&request.taker_public_key),
            "quote request created"
        );
        Ok(CreatedRequest {
            request_id: request.request_id,
            stealth_address: request.stealth_address,
            expires_at: request.expires_at,
        })
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    /// Requests that are `active` and unexpired, newest first, each with its
    /// count of currently active quotes.
    pub fn list_active_requests(
        &self,
        now: TimestampMs,
    ) -> Result<Vec<(QuoteRequest, usize)>, NoctisError> {
        let mut out = Vec::new();
        for mut request in self.db.iter_requests()? {
            self.lazy_expire_request(&mut request, now)?;
            if request.status != RequestStatus::Active {
                continue;
            }
            let count = self.active_quote_count(&request.request_id, now)?;
            out.push((request, count));
        }
        out.sort_by(|a, b| b.0.created_at.cmp(&a.0.created_at));
        Ok(out)
    }

    pub fn get_request(
        &self,
        request_id: &RequestId,
        now: TimestampMs,
    ) -> Result<(QuoteRequest, usize), NoctisError> {
        let mut request = self
            .db
            .get_request(request_id)?
            .ok_or_else(|| NoctisError::RequestNotFound(request_id.to_string()))?;
        self.lazy_expire_request(&mut request, now)?;
        let count = self.active_quote_count(request_id, now)?;
        Ok((request, count))
    }

    /// Quotes for a request with lazy expiry applied; rows that expired are
    /// dropped from the listing, terminal accepted/rejected rows remain.
    pub fn list_quotes(
        &self,
        request_id: &RequestId,
        now: TimestampMs,
    ) -> Result<Vec<Quote>, NoctisError> {
        if self.db.get_request(request_id)?.is_none() {
            return Err(NoctisError::RequestNotFound(request_id.to_string()));
        }
        Ok(self
            .lazy_expire_quotes(request_id, now)?
            .into_iter()
            .filter(|q| q.status != QuoteStatus::Expired)
            .collect())
    }

    // ── cancel_request ───────────────────────────────────────────────────────

    /// Authorization is knowledge of the request id plus a fresh one-time
    /// signature: the signing key is deliberately NOT required to equal the
    /// taker's creation key, which is one-time and unlinkable.
    pub fn cancel_request(
        &self,
        request_id: &RequestId,
        signature: &WotsSignature,
        public_key: &WotsPublicKey,
        now: TimestampMs,
    ) -> Result<QuoteRequest, NoctisError> {
        // Existence and state pre-check before burning the signature.
        let request = self
            .db
            .get_request(request_id)?
            .ok_or_else(|| NoctisError::RequestNotFound(request_id.to_string()))?;
        if matches!(request.status, RequestStatus::Filled | RequestStatus::Cancelled) {
            return Err(NoctisError::RequestNotActive {
                status: request.status.as_str(),
            });
        }

        let canonical = format!("{}{}", MSG_PREFIX_CANCEL_REQUEST, request_id);
        self.verify_and_reserve(
            canonical.as_bytes(),
            signature,
            public_key,
            OperationKind::CancelQuoteRequest,
            now,
        )?;

        let cancelled = self.db.cancel_request_txn(request_id)?;
        info!(request_id = %request_id, "quote request cancelled");
        Ok(cancelled)
    }

    // ── submit_quote ─────────────────────────────────────────────────────────

    pub async fn submit_quote(
        &self,
        params: SubmitQuoteParams,
        now: TimestampMs,
    ) -> Result<Quote, NoctisError> {
        if !self.whitelist.is_whitelisted(&params.public_key)? {
            return Err(NoctisError::NotWhitelisted);
        }

        let mut request = self
            .db
            .get_request(&params.request_id)?
            .ok_or_else(|| NoctisError::RequestNotFound(params.request_id.to_string()))?;
        self.lazy_expire_request(&mut request, now)?;
        if request.status != RequestStatus::Active {
            return Err(NoctisError::RequestNotActive {
                status: request.status.as_str(),
            });
        }

        if params.price == 0 {
            return Err(NoctisError::ZeroAmount);
        }
        if params.expires_at <= now {
            return Err(NoctisError::ExpiryOutOfRange);
        }
        if params.expires_at > request.expires_at {
            return Err(NoctisError::QuoteExpiryBeyondRequest);
        }

        let canonical = format!(
            "{}{}:{}:{}",
            MSG_PREFIX_SUBMIT_QUOTE, params.request_id, params.price, params.expires_at,
        );
        self.verify_and_reserve(
            canonical.as_bytes(),
            &params.signature,
            &params.public_key,
            OperationKind::SubmitQuote,
            now,
        )?;

        if let Some(hash) = &params.maker_nullifier_hash {
            if let Some(row) = self.ledger.check_nullifier_used(hash)? {
                return Err(NoctisError::NullifierAlreadyUsed {
                    status: row.status.as_str(),
                });
            }
        }
        if let Some(commitment) = &params.maker_commitment {
            if self.ledger.check_commitment_used(commitment)?.is_some() {
                return Err(NoctisError::CommitmentInUse);
            }
        }

        // The maker's side of the trade: asset delivery on a buy request,
        // quote-token payment on a sell.
        if let (Some(commitment), Some(chain_id)) = (&params.maker_commitment, params.chain_id) {
            let need = match request.direction {
                Direction::Buy => request.amount,
                Direction::Sell => params.price,
            };
            self.check_balance(commitment, chain_id, need).await?;
        }

        let quote = Quote {
            quote_id: QuoteId::generate(),
            request_id: params.request_id,
            price: params.price,
            maker_public_key: params.public_key,
            maker_settlement_address: params.maker_settlement_address,
            maker_commitment: params.maker_commitment,
            maker_nullifier_hash: params.maker_nullifier_hash,
            created_at: now,
            expires_at: params.expires_at,
            status: QuoteStatus::Active,
        };
        self.db.put_quote(&quote)?;

        info!(
            quote_id = %quote.quote_id,
            request_id = %quote.request_id,
            maker = %fingerprint(&quote.maker_public_key),
            "quote submitted"
        );
        Ok(quote)
    }

    // ── accept_quote ─────────────────────────────────────────────────────────

    pub async fn accept_quote(
        &self,
        params: AcceptQuoteParams,
        now: TimestampMs,
    ) -> Result<AcceptOutcome, NoctisError> {
        let mut quote = self
            .db
            .get_quote(&params.quote_id)?
            .ok_or_else(|| NoctisError::QuoteNotFound(params.quote_id.to_string()))?;
        if quote.status == QuoteStatus::Active && quote.is_expired(now) {
            quote.status = QuoteStatus::Expired;
            self.db.put_quote(&quote)?;
        }
        if quote.status != QuoteStatus::Active {
            return Err(NoctisError::QuoteNotActive {
                status: quote.status.as_str(),
            });
        }

        let mut request = self
            .db
            .get_request(&quote.request_id)?
            .ok_or_else(|| NoctisError::RequestNotFound(quote.request_id.to_string()))?;
        self.lazy_expire_request(&mut request, now)?;
        if request.status != RequestStatus::Active {
            return Err(NoctisError::RequestNotActive {
                status: request.status.as_str(),
            });
        }

        let canonical = format!("{}{}", MSG_PREFIX_ACCEPT_QUOTE, params.quote_id);
        self.verify_and_reserve(
            canonical.as_bytes(),
            &params.signature,
            &params.public_key,
            OperationKind::AcceptQuote,
            now,
        )?;

        // Maker deposit defaults to what the quote was submitted with.
        let maker_commitment = params
            .maker_commitment
            .or_else(|| quote.maker_commitment.clone())
            .ok_or(NoctisError::MissingField("marketMakerCommitment"))?;
        let maker_nullifier_hash = params
            .maker_nullifier_hash
            .or(quote.maker_nullifier_hash)
            .ok_or(NoctisError::MissingField("marketMakerNullifierHash"))?;

        // Locally recorded consumption, including rows pushed by the
        // external withdrawal flow, rejects before any vault contact.
        if let Some(row) = self.ledger.check_nullifier_used(&params.taker_nullifier_hash)? {
            return Err(NoctisError::NullifierAlreadyUsed {
                status: row.status.as_str(),
            });
        }

        let settlement_nullifier = generate_nullifier();
        let sibling_ids: Vec<QuoteId> = self
            .db
            .quotes_for_request(&quote.request_id)?
            .iter()
            .map(|q| q.quote_id)
            .collect();

        // Critical section: at most one acceptance per request wins this
        // compare-and-set; losers surface `conflict` and cause no vault
        // side effects.
        let rejected = self.db.accept_quote_txn(
            &quote.request_id,
            &params.quote_id,
            &sibling_ids,
            settlement_nullifier,
        )?;

        info!(
            request_id = %quote.request_id,
            quote_id = %params.quote_id,
            rejected = rejected.len(),
            "request filled; driving settlement"
        );

        let plan = SettlementPlan {
            request_id: quote.request_id,
            quote_id: params.quote_id,
            pair: request.asset_pair.clone(),
            direction: request.direction,
            base_amount: request.amount,
            price_total: quote.price,
            chain_id: params.chain_id,
            taker: PartyDeposit {
                commitment: params.taker_commitment,
                nullifier_hash: params.taker_nullifier_hash,
                address: params.taker_address,
            },
            maker: PartyDeposit {
                commitment: maker_commitment,
                nullifier_hash: maker_nullifier_hash,
                address: quote.maker_settlement_address.clone(),
            },
        };

        match self.settlement.execute(&plan).await {
            Ok(record) => Ok(AcceptOutcome {
                quote_id: params.quote_id,
                request_id: quote.request_id,
                settlement_nullifier,
                record,
            }),
            Err(failure) if failure.pre_transfer => {
                // Nothing moved: compensate the fill so the request can be
                // re-quoted and re-accepted.
                warn!(
                    request_id = %quote.request_id,
                    quote_id = %params.quote_id,
                    error = %failure.error,
                    "settlement refused pre-transfer; rolling acceptance back"
                );
                self.db
                    .rollback_accept_txn(&quote.request_id, &params.quote_id, &rejected)?;
                Err(failure.error)
            }
            Err(failure) => {
                // A transfer may have (or has) executed: the trade stays
                // filled and the failure is surfaced for reconciliation.
                error!(
                    request_id = %quote.request_id,
                    quote_id = %params.quote_id,
                    error = %failure.error,
                    "settlement failed after transfer; trade remains filled"
                );
                Err(failure.error)
            }
        }
    }
}
