use thiserror::Error;

/// Semantic error category, independent of wire codes. The RPC layer maps
/// kinds to HTTP statuses; components only ever speak kinds.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ErrorKind {
    Validation,
    SignatureInvalid,
    SignatureReused,
    NotWhitelisted,
    NotFound,
    StaleState,
    Conflict,
    NullifierUsed,
    InsufficientBalance,
    VaultUnavailable,
    SettlementPartial,
    Unauthorized,
    Internal,
}

impl ErrorKind {
    /// Stable snake_case code used in error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::SignatureInvalid => "signature_invalid",
            ErrorKind::SignatureReused => "signature_reused",
            ErrorKind::NotWhitelisted => "not_whitelisted",
            ErrorKind::NotFound => "not_found",
            ErrorKind::StaleState => "stale_state",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NullifierUsed => "nullifier_used",
            ErrorKind::InsufficientBalance => "insufficient_balance",
            ErrorKind::VaultUnavailable => "vault_unavailable",
            ErrorKind::SettlementPartial => "settlement_partial",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, Error)]
pub enum NoctisError {
    // ── Validation ───────────────────────────────────────────────────────────
    #[error("{what}: expected {expected} bytes, got {got}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("invalid hex in {0}")]
    BadHex(&'static str),

    #[error("invalid integer in {0}")]
    BadInteger(&'static str),

    #[error("invalid identifier in {0}")]
    BadIdentifier(&'static str),

    #[error("invalid asset pair: {0}")]
    BadAssetPair(String),

    #[error("invalid direction: {0}")]
    BadDirection(String),

    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("expiry must be in the future and within 24 hours")]
    ExpiryOutOfRange,

    #[error("quote expiry exceeds the parent request's expiry")]
    QuoteExpiryBeyondRequest,

    #[error("signed message is not in canonical form for {operation}")]
    NonCanonicalMessage { operation: &'static str },

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("message payload exceeds maximum of {max} bytes")]
    PayloadTooLarge { max: usize },

    // ── Authorization / signatures ───────────────────────────────────────────
    #[error("WOTS+ signature verification failed")]
    SignatureInvalid,

    #[error("one-time signature already used")]
    SignatureReused,

    #[error("market maker is not whitelisted")]
    NotWhitelisted,

    #[error("admin key missing or incorrect")]
    AdminUnauthorized,

    // ── Entity state ─────────────────────────────────────────────────────────
    #[error("quote request not found: {0}")]
    RequestNotFound(String),

    #[error("quote not found: {0}")]
    QuoteNotFound(String),

    #[error("quote request is {status}; operation requires an active request")]
    RequestNotActive { status: &'static str },

    #[error("quote is {status}; operation requires an active quote")]
    QuoteNotActive { status: &'static str },

    #[error("lost the acceptance race: request is no longer active")]
    AcceptConflict,

    // ── Nullifiers / commitments ─────────────────────────────────────────────
    #[error("nullifier already used ({status})")]
    NullifierAlreadyUsed { status: &'static str },

    #[error("commitment already backs an active or pending quote")]
    CommitmentInUse,

    // ── Vault ────────────────────────────────────────────────────────────────
    #[error("insufficient vault balance: {0}")]
    InsufficientBalance(String),

    #[error("privacy vault unavailable: {0}")]
    VaultUnavailable(String),

    #[error("vault rejected the request: {0}")]
    VaultValidation(String),

    // ── Settlement ───────────────────────────────────────────────────────────
    #[error(
        "settlement partial: payment leg {tx_hash_a} executed, asset leg unresolved after {attempts} attempts"
    )]
    SettlementPartial { tx_hash_a: String, attempts: u32 },

    // ── Serialization / storage ──────────────────────────────────────────────
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),

    // ── General ──────────────────────────────────────────────────────────────
    #[error("internal error: {0}")]
    Internal(String),
}

impl NoctisError {
    pub fn kind(&self) -> ErrorKind {
        use NoctisError::*;
        match self {
            LengthMismatch { .. }
            | BadHex(_)
            | BadInteger(_)
            | BadIdentifier(_)
            | BadAssetPair(_)
            | BadDirection(_)
            | ZeroAmount
            | ExpiryOutOfRange
            | QuoteExpiryBeyondRequest
            | NonCanonicalMessage { .. }
            | MissingField(_)
            | PayloadTooLarge { .. }
            | VaultValidation(_) => ErrorKind::Validation,
            SignatureInvalid => ErrorKind::SignatureInvalid,
            SignatureReused => ErrorKind::SignatureReused,
            NotWhitelisted => ErrorKind::NotWhitelisted,
            AdminUnauthorized => ErrorKind::Unauthorized,
            RequestNotFound(_) | QuoteNotFound(_) => ErrorKind::NotFound,
            RequestNotActive { .. } | QuoteNotActive { .. } => ErrorKind::StaleState,
            AcceptConflict => ErrorKind::Conflict,
            NullifierAlreadyUsed { .. } => ErrorKind::NullifierUsed,
            CommitmentInUse => ErrorKind::Conflict,
            InsufficientBalance(_) => ErrorKind::InsufficientBalance,
            VaultUnavailable(_) => ErrorKind::VaultUnavailable,
            SettlementPartial { .. } => ErrorKind::SettlementPartial,
            Serialization(_) | Storage(_) | Internal(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_stable_codes() {
        assert_eq!(NoctisError::SignatureReused.kind().code(), "signature_reused");
        assert_eq!(
            NoctisError::NullifierAlreadyUsed { status: "settled" }.kind().code(),
            "nullifier_used"
        );
        assert_eq!(NoctisError::AcceptConflict.kind().code(), "conflict");
        assert_eq!(
            NoctisError::Storage("io".into()).kind().code(),
            "internal"
        );
    }
}
