use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Milliseconds since the Unix epoch (UTC).
pub type TimestampMs = i64;

/// Token amount in the smallest unit of its token. u128 comfortably covers
/// 18-decimal EVM tokens and 9-decimal Solana lamports.
pub type Amount = u128;

/// Numeric chain identifier of the settlement chain.
pub type ChainId = u64;

// ── RequestId ────────────────────────────────────────────────────────────────

/// Opaque 128-bit identifier of a quote request (UUID v4).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// The 16 raw bytes, used as the sled key.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::from_str(s).map(Self)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({})", &self.0.to_string()[..8])
    }
}

// ── QuoteId ──────────────────────────────────────────────────────────────────

/// Opaque 128-bit identifier of a quote (UUID v4).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuoteId(pub Uuid);

impl QuoteId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::from_str(s).map(Self)
    }
}

impl fmt::Display for QuoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for QuoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QuoteId({})", &self.0.to_string()[..8])
    }
}

// ── MessageId ────────────────────────────────────────────────────────────────

/// Identifier of a relayed message (UUID v4).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── WOTS+ key material ───────────────────────────────────────────────────────

/// WOTS+ public key: 2144 chain-end bytes ∥ 32-byte pub_seed ∥ 32-byte rand2
/// (2208 bytes total). Minted fresh per action; never reused.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WotsPublicKey(pub Vec<u8>);

impl WotsPublicKey {
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Debug for WotsPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WotsPublicKey({}b)", self.0.len())
    }
}

/// WOTS+ detached signature (2144 bytes: 67 chains × 32 bytes).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WotsSignature(pub Vec<u8>);

impl fmt::Debug for WotsSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WotsSignature({}b)", self.0.len())
    }
}

// ── SignatureHash ────────────────────────────────────────────────────────────

/// SHA-256 of the raw signature bytes. The anti-reuse key: WOTS+ is one-time,
/// so any repeat of this hash, across any operation, is hostile.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignatureHash(pub [u8; 32]);

impl SignatureHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for SignatureHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureHash({}…)", &self.to_hex()[..16])
    }
}

// ── NullifierHash ────────────────────────────────────────────────────────────

/// One-way image of a deposit-note nullifier, as produced client-side and
/// consumed by the vault. Exactly one use is ever honored.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NullifierHash(pub [u8; 32]);

impl NullifierHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Display for NullifierHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for NullifierHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NullifierHash({}…)", &self.to_hex()[..16])
    }
}

// ── Commitment ───────────────────────────────────────────────────────────────

/// Deposit-note commitment: a hiding binding of an amount held in the
/// external privacy vault. Opaque to the core.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Commitment(pub Vec<u8>);

impl Commitment {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        hex::decode(s).map(Self)
    }
}

impl fmt::Debug for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Commitment({}b)", self.0.len())
    }
}

// ── StealthAddress ───────────────────────────────────────────────────────────

/// One-time recipient identifier, unlinkable to either party's long-lived
/// identity. Routed to, never interpreted.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StealthAddress(pub [u8; 32]);

impl StealthAddress {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Display for StealthAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for StealthAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StealthAddress({}…)", &self.to_hex()[..16])
    }
}

// ── SettlementNullifier ──────────────────────────────────────────────────────

/// Fresh 256-bit random value minted when a request fills; recorded on the
/// request and blocks re-acceptance.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementNullifier(pub [u8; 32]);

impl SettlementNullifier {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for SettlementNullifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SettlementNullifier({}…)", &self.to_hex()[..16])
    }
}

// ── Direction ────────────────────────────────────────────────────────────────

/// Trade direction from the taker's point of view over the base token.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "buy",
            Direction::Sell => "sell",
        }
    }
}

impl FromStr for Direction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "buy" => Ok(Direction::Buy),
            "sell" => Ok(Direction::Sell),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── AssetPair ────────────────────────────────────────────────────────────────

/// A base/quote symbol pair, e.g. "SOL/USDC". Amounts are denominated in the
/// base token's smallest unit; prices (totals) in the quote token's.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct AssetPair {
    pub base: String,
    pub quote: String,
}

impl AssetPair {
    /// Parse "BASE/QUOTE". Both symbols must be non-empty and contain no
    /// further separator.
    pub fn parse(s: &str) -> Option<Self> {
        let (base, quote) = s.split_once('/')?;
        if base.is_empty() || quote.is_empty() || quote.contains('/') {
            return None;
        }
        Some(Self {
            base: base.to_string(),
            quote: quote.to_string(),
        })
    }
}

impl fmt::Display for AssetPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}
