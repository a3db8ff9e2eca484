//! ─── Noctis Protocol Constants ──────────────────────────────────────────────
//!
//! A dark OTC venue: anonymous takers, competing makers, atomic two-legged
//! settlement against an external privacy vault.

// ── WOTS+ parameters ─────────────────────────────────────────────────────────
//
// n = 32 (SHA-256), w = 16: 64 message chains + 3 checksum chains = 67.

/// Hash output length (bytes).
pub const WOTS_N: usize = 32;

/// Winternitz parameter.
pub const WOTS_W: u32 = 16;

/// Message chains (256-bit digest, 4 bits per digit).
pub const WOTS_LEN1: usize = 64;

/// Checksum chains: max checksum 64 × 15 = 960 < 16³.
pub const WOTS_LEN2: usize = 3;

/// Total chains per key.
pub const WOTS_LEN: usize = WOTS_LEN1 + WOTS_LEN2;

/// Detached signature size: 67 × 32.
pub const WOTS_SIGNATURE_BYTES: usize = WOTS_LEN * WOTS_N;

/// Chain-end public-key core size: 67 × 32.
pub const WOTS_PK_CORE_BYTES: usize = WOTS_LEN * WOTS_N;

/// Full public key: core ∥ pub_seed (32) ∥ rand2 (32).
pub const WOTS_PUBLIC_KEY_BYTES: usize = WOTS_PK_CORE_BYTES + 2 * WOTS_N;

// ── Request lifecycle ────────────────────────────────────────────────────────

/// Longest a quote request may live: 24 hours.
pub const MAX_REQUEST_TTL_MS: i64 = 24 * 3600 * 1000;

// ── Canonical signed-message prefixes ────────────────────────────────────────
//
// Each operation is authorized by a one-time signature over a message in a
// fixed grammar. The grammar is versionless and chain-agnostic; fields are
// colon-separated decimal/lowercase-hex strings.

pub const MSG_PREFIX_CREATE_REQUEST: &str = "create_quote_request:";
pub const MSG_PREFIX_CANCEL_REQUEST: &str = "cancel_quote_request:";
pub const MSG_PREFIX_SUBMIT_QUOTE: &str = "submit_quote:";
pub const MSG_PREFIX_ACCEPT_QUOTE: &str = "accept_quote:";
pub const MSG_PREFIX_SEND_MESSAGE: &str = "send_message:";

// ── Settlement ───────────────────────────────────────────────────────────────

/// Bounded compensating retries of the maker→taker leg after the payment leg
/// has irreversibly executed. Exhaustion surfaces `settlement_partial`.
pub const LEG_B_MAX_RETRIES: u32 = 3;

// ── Vault client defaults ────────────────────────────────────────────────────

/// Per-request wall-clock deadline (ms).
pub const VAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Upper bound on total retry time for one logical call (ms).
pub const VAULT_RETRY_MAX_ELAPSED_MS: u64 = 30_000;

/// Consecutive failures that open the circuit breaker.
pub const VAULT_BREAKER_FAILURE_THRESHOLD: u32 = 5;

/// How long the breaker stays open before a half-open probe (ms).
pub const VAULT_BREAKER_COOLDOWN_MS: u64 = 15_000;

// ── API limits ───────────────────────────────────────────────────────────────

/// Maximum encrypted message payload accepted by the relay (bytes).
pub const MAX_MESSAGE_PAYLOAD_BYTES: usize = 16 * 1024;

/// Hard cap on list endpoints.
pub const MAX_LIST_RESULTS: usize = 500;
