use serde::{Deserialize, Serialize};

use noctis_core::message::Message;
use noctis_core::request::{Quote, QuoteRequest};

// ── Request bodies ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuoteRequestBody {
    pub asset_pair: String,
    pub direction: String,
    /// Base-token amount, decimal string in smallest units.
    pub amount: String,
    /// Requested time-to-live in milliseconds.
    pub timeout: i64,
    /// 4288 hex chars (2144 bytes).
    pub signature: String,
    /// 4416 hex chars (2208 bytes).
    pub public_key: String,
    /// The exact string the client signed.
    pub message: String,
    pub commitment: Option<String>,
    pub chain_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelQuoteRequestBody {
    pub signature: String,
    pub public_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitQuoteBody {
    pub quote_request_id: String,
    /// Total price, decimal string in quote-token smallest units.
    pub price: String,
    /// Absolute expiry, milliseconds since epoch.
    pub expiration_time: i64,
    pub signature: String,
    pub public_key: String,
    /// Chain-native settlement address of the maker.
    pub wallet_address: String,
    pub commitment: Option<String>,
    pub nullifier_hash: Option<String>,
    pub chain_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptQuoteBody {
    pub signature: String,
    pub public_key: String,
    pub taker_commitment: String,
    pub taker_address: String,
    pub taker_nullifier_hash: String,
    pub market_maker_commitment: Option<String>,
    pub market_maker_nullifier_hash: Option<String>,
    pub chain_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageBody {
    pub quote_request_id: String,
    pub recipient_stealth_address: String,
    /// Hex ciphertext; never decrypted server-side.
    pub encrypted_content: String,
    pub signature: String,
    pub public_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkNullifierUsedBody {
    pub nullifier_hash: String,
    pub quote_id: Option<String>,
    /// taker | maker | manual; defaults to manual (external withdrawal).
    pub entity_type: Option<String>,
    /// pending | settled | expired | cancelled; defaults to settled.
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhitelistBody {
    pub public_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesQuery {
    pub public_key: Option<String>,
}

// ── Response payloads ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedQuoteRequest {
    pub quote_request_id: String,
    pub stealth_address: String,
    /// Echo of the requested amount, kept for wire compatibility.
    pub commitment: String,
    pub expires_at: i64,
}

/// A quote request as listed to makers.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcQuoteRequest {
    pub quote_request_id: String,
    pub asset_pair: String,
    pub direction: String,
    pub amount: String,
    pub stealth_address: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub status: String,
    #[serde(rename = "quote_count")]
    pub quote_count: usize,
}

impl RpcQuoteRequest {
    pub fn from_entity(request: &QuoteRequest, quote_count: usize) -> Self {
        Self {
            quote_request_id: request.request_id.to_string(),
            asset_pair: request.asset_pair.to_string(),
            direction: request.direction.to_string(),
            amount: request.amount.to_string(),
            stealth_address: request.stealth_address.to_hex(),
            created_at: request.created_at,
            expires_at: request.expires_at,
            status: request.status.as_str().to_string(),
            quote_count,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedQuote {
    pub quote_id: String,
    /// Echo of the quoted total, kept for wire compatibility.
    pub price_commitment: String,
    pub expires_at: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcQuote {
    pub quote_id: String,
    pub price: String,
    pub market_maker_public_key: String,
    pub market_maker_address: String,
    pub market_maker_commitment: Option<String>,
    pub market_maker_nullifier_hash: Option<String>,
    pub expires_at: i64,
    pub status: String,
}

impl RpcQuote {
    pub fn from_entity(quote: &Quote) -> Self {
        Self {
            quote_id: quote.quote_id.to_string(),
            price: quote.price.to_string(),
            market_maker_public_key: quote.maker_public_key.to_hex(),
            market_maker_address: quote.maker_settlement_address.clone(),
            market_maker_commitment: quote.maker_commitment.as_ref().map(|c| c.to_hex()),
            market_maker_nullifier_hash: quote.maker_nullifier_hash.map(|h| h.to_hex()),
            expires_at: quote.expires_at,
            status: quote.status.as_str().to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedQuote {
    pub quote_id: String,
    pub quote_request_id: String,
    /// The freshly minted settlement nullifier recorded on the request.
    pub nullifier: String,
    /// Asset-leg transaction (maker → taker delivery).
    pub tx_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zk_compressed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_signature: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcMessage {
    pub message_id: String,
    pub quote_request_id: String,
    pub sender_public_key: String,
    pub recipient_stealth_address: String,
    pub encrypted_content: String,
    pub created_at: i64,
}

impl RpcMessage {
    pub fn from_entity(message: &Message) -> Self {
        Self {
            message_id: message.message_id.to_string(),
            quote_request_id: message.request_id.to_string(),
            sender_public_key: message.sender_public_key.to_hex(),
            recipient_stealth_address: message.recipient_stealth_address.to_hex(),
            encrypted_content: hex::encode(&message.encrypted_payload),
            created_at: message.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NullifierCheck {
    pub is_used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_at: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthInfo {
    pub status: String,
    pub version: String,
    pub whitelist_mode: String,
}
