//! REST surface of the RFQ core: a thin translator between wire shapes and
//! the state machine, ledger, and relay. No state-machine logic lives here.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use subtle::ConstantTimeEq;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use noctis_core::error::{ErrorKind, NoctisError};
use noctis_core::ledger::{NullifierStatus, Party};
use noctis_core::types::{
    Amount, Commitment, NullifierHash, QuoteId, RequestId, StealthAddress, WotsPublicKey,
    WotsSignature,
};
use noctis_state::{
    AcceptQuoteParams, CreateRequestParams, MessageRelay, RfqEngine, SendMessageParams,
    SubmitQuoteParams,
};

use crate::types::{
    AcceptQuoteBody, AcceptedQuote, CancelQuoteRequestBody, CreateQuoteRequestBody, CreatedQuote,
    CreatedQuoteRequest, HealthInfo, MarkNullifierUsedBody, MessagesQuery, NullifierCheck,
    RpcMessage, RpcQuote, RpcQuoteRequest, SendMessageBody, SubmitQuoteBody, WhitelistBody,
};

// ── Shared state ─────────────────────────────────────────────────────────────

pub struct ApiState {
    pub engine: Arc<RfqEngine>,
    pub relay: MessageRelay,
    /// Shared admin key; `None` disables every admin endpoint.
    pub admin_key: Option<String>,
}

type SharedState = Arc<ApiState>;

// ── Error mapping ────────────────────────────────────────────────────────────

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::SignatureInvalid | ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::NotWhitelisted => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::StaleState
        | ErrorKind::Conflict
        | ErrorKind::NullifierUsed
        | ErrorKind::SignatureReused => StatusCode::CONFLICT,
        ErrorKind::InsufficientBalance => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::VaultUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::SettlementPartial => StatusCode::MULTI_STATUS,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Wire error: every failure becomes the JSON error envelope with the
/// kind's stable code.
pub struct ApiError(NoctisError);

impl From<NoctisError> for ApiError {
    fn from(e: NoctisError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        if kind == ErrorKind::Internal {
            error!(error = %self.0, "internal error surfaced to API");
        }
        let body = serde_json::json!({
            "success": false,
            "error": {
                "code": kind.code(),
                "message": self.0.to_string(),
            }
        });
        (status_for(kind), Json(body)).into_response()
    }
}

fn ok<T: serde::Serialize>(data: T) -> Response {
    envelope(StatusCode::OK, data)
}

fn created<T: serde::Serialize>(data: T) -> Response {
    envelope(StatusCode::CREATED, data)
}

fn envelope<T: serde::Serialize>(status: StatusCode, data: T) -> Response {
    let body = serde_json::json!({ "success": true, "data": data });
    (status, Json(body)).into_response()
}

// ── Input parsing ────────────────────────────────────────────────────────────

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn parse_signature(s: &str) -> Result<WotsSignature, NoctisError> {
    hex::decode(s)
        .map(WotsSignature)
        .map_err(|_| NoctisError::BadHex("signature"))
}

fn parse_public_key(s: &str) -> Result<WotsPublicKey, NoctisError> {
    hex::decode(s)
        .map(WotsPublicKey)
        .map_err(|_| NoctisError::BadHex("publicKey"))
}

fn parse_amount(field: &'static str, s: &str) -> Result<Amount, NoctisError> {
    s.parse::<Amount>().map_err(|_| NoctisError::BadInteger(field))
}

fn parse_request_id(s: &str) -> Result<RequestId, NoctisError> {
    RequestId::parse(s).map_err(|_| NoctisError::BadIdentifier("quoteRequestId"))
}

fn parse_quote_id(s: &str) -> Result<QuoteId, NoctisError> {
    QuoteId::parse(s).map_err(|_| NoctisError::BadIdentifier("quoteId"))
}

fn parse_nullifier(field: &'static str, s: &str) -> Result<NullifierHash, NoctisError> {
    NullifierHash::from_hex(s).map_err(|_| NoctisError::BadHex(field))
}

fn parse_commitment(field: &'static str, s: &str) -> Result<Commitment, NoctisError> {
    let commitment = Commitment::from_hex(s).map_err(|_| NoctisError::BadHex(field))?;
    if commitment.0.is_empty() {
        return Err(NoctisError::MissingField(field));
    }
    Ok(commitment)
}

fn parse_stealth(s: &str) -> Result<StealthAddress, NoctisError> {
    StealthAddress::from_hex(s).map_err(|_| NoctisError::BadHex("recipientStealthAddress"))
}

fn require_admin(state: &ApiState, headers: &HeaderMap) -> Result<(), NoctisError> {
    let configured = state
        .admin_key
        .as_deref()
        .ok_or(NoctisError::AdminUnauthorized)?;
    let supplied = headers
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok())
        .ok_or(NoctisError::AdminUnauthorized)?;
    if supplied.as_bytes().ct_eq(configured.as_bytes()).into() {
        Ok(())
    } else {
        Err(NoctisError::AdminUnauthorized)
    }
}

// ── Router ───────────────────────────────────────────────────────────────────

pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/rfq/quote-request", post(create_quote_request))
        .route("/api/v1/rfq/quote-requests", get(list_quote_requests))
        .route("/api/v1/rfq/quote-request/:id", get(get_quote_request))
        .route("/api/v1/rfq/quote-request/:id/cancel", post(cancel_quote_request))
        .route("/api/v1/rfq/quote", post(submit_quote))
        .route("/api/v1/rfq/quote-request/:id/quotes", get(list_quotes))
        .route("/api/v1/rfq/quote/:id/accept", post(accept_quote))
        .route("/api/v1/rfq/message", post(send_message))
        .route("/api/v1/rfq/quote-request/:id/messages", get(get_messages))
        .route("/api/v1/rfq/used-nullifiers", get(used_nullifiers))
        .route("/api/v1/rfq/check-nullifier/:hash", get(check_nullifier))
        .route("/api/v1/rfq/mark-nullifier-used", post(mark_nullifier_used))
        .route("/admin/whitelist", post(whitelist_add).delete(whitelist_remove).get(whitelist_list))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until the process exits.
pub async fn serve(state: SharedState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "REST API listening");
    axum::serve(listener, app).await?;
    Ok(())
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health(State(state): State<SharedState>) -> Response {
    ok(HealthInfo {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        whitelist_mode: match state.engine.whitelist().mode() {
            noctis_core::config::WhitelistMode::Permissionless => "permissionless".into(),
            noctis_core::config::WhitelistMode::Permissioned => "permissioned".into(),
        },
    })
}

async fn create_quote_request(
    State(state): State<SharedState>,
    Json(body): Json<CreateQuoteRequestBody>,
) -> Result<Response, ApiError> {
    let asset_pair = noctis_core::types::AssetPair::parse(&body.asset_pair)
        .ok_or_else(|| NoctisError::BadAssetPair(body.asset_pair.clone()))?;
    let direction = body
        .direction
        .parse()
        .map_err(|_| NoctisError::BadDirection(body.direction.clone()))?;
    let amount = parse_amount("amount", &body.amount)?;

    let params = CreateRequestParams {
        asset_pair,
        direction,
        amount,
        timeout_ms: body.timeout,
        signature: parse_signature(&body.signature)?,
        public_key: parse_public_key(&body.public_key)?,
        signed_message: body.message,
        commitment: body
            .commitment
            .as_deref()
            .map(|c| parse_commitment("commitment", c))
            .transpose()?,
        chain_id: body.chain_id,
    };

    let result = state.engine.create_request(params, now_ms()).await?;
    Ok(created(CreatedQuoteRequest {
        quote_request_id: result.request_id.to_string(),
        stealth_address: result.stealth_address.to_hex(),
        commitment: amount.to_string(),
        expires_at: result.expires_at,
    }))
}

async fn list_quote_requests(State(state): State<SharedState>) -> Result<Response, ApiError> {
    let requests = state.engine.list_active_requests(now_ms())?;
    let list: Vec<RpcQuoteRequest> = requests
        .iter()
        .map(|(request, count)| RpcQuoteRequest::from_entity(request, *count))
        .collect();
    Ok(ok(serde_json::json!({ "quoteRequests": list })))
}

async fn get_quote_request(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let request_id = parse_request_id(&id)?;
    let (request, count) = state.engine.get_request(&request_id, now_ms())?;
    Ok(ok(RpcQuoteRequest::from_entity(&request, count)))
}

async fn cancel_quote_request(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(body): Json<CancelQuoteRequestBody>,
) -> Result<Response, ApiError> {
    let request_id = parse_request_id(&id)?;
    let signature = parse_signature(&body.signature)?;
    let public_key = parse_public_key(&body.public_key)?;
    let cancelled = state
        .engine
        .cancel_request(&request_id, &signature, &public_key, now_ms())?;
    Ok(ok(serde_json::json!({
        "quoteRequestId": cancelled.request_id.to_string(),
        "status": cancelled.status.as_str(),
    })))
}

async fn submit_quote(
    State(state): State<SharedState>,
    Json(body): Json<SubmitQuoteBody>,
) -> Result<Response, ApiError> {
    let params = SubmitQuoteParams {
        request_id: parse_request_id(&body.quote_request_id)?,
        price: parse_amount("price", &body.price)?,
        expires_at: body.expiration_time,
        signature: parse_signature(&body.signature)?,
        public_key: parse_public_key(&body.public_key)?,
        maker_settlement_address: body.wallet_address,
        maker_commitment: body
            .commitment
            .as_deref()
            .map(|c| parse_commitment("commitment", c))
            .transpose()?,
        maker_nullifier_hash: body
            .nullifier_hash
            .as_deref()
            .map(|h| parse_nullifier("nullifierHash", h))
            .transpose()?,
        chain_id: body.chain_id,
    };

    let quote = state.engine.submit_quote(params, now_ms()).await?;
    Ok(created(CreatedQuote {
        quote_id: quote.quote_id.to_string(),
        price_commitment: quote.price.to_string(),
        expires_at: quote.expires_at,
    }))
}

async fn list_quotes(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let request_id = parse_request_id(&id)?;
    let quotes = state.engine.list_quotes(&request_id, now_ms())?;
    let list: Vec<RpcQuote> = quotes.iter().map(RpcQuote::from_entity).collect();
    Ok(ok(serde_json::json!({ "quotes": list })))
}

async fn accept_quote(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(body): Json<AcceptQuoteBody>,
) -> Result<Response, ApiError> {
    let params = AcceptQuoteParams {
        quote_id: parse_quote_id(&id)?,
        signature: parse_signature(&body.signature)?,
        public_key: parse_public_key(&body.public_key)?,
        chain_id: body.chain_id,
        taker_commitment: parse_commitment("takerCommitment", &body.taker_commitment)?,
        taker_address: body.taker_address,
        taker_nullifier_hash: parse_nullifier("takerNullifierHash", &body.taker_nullifier_hash)?,
        maker_commitment: body
            .market_maker_commitment
            .as_deref()
            .map(|c| parse_commitment("marketMakerCommitment", c))
            .transpose()?,
        maker_nullifier_hash: body
            .market_maker_nullifier_hash
            .as_deref()
            .map(|h| parse_nullifier("marketMakerNullifierHash", h))
            .transpose()?,
    };

    let outcome = state.engine.accept_quote(params, now_ms()).await?;
    Ok(ok(AcceptedQuote {
        quote_id: outcome.quote_id.to_string(),
        quote_request_id: outcome.request_id.to_string(),
        nullifier: outcome.settlement_nullifier.to_hex(),
        tx_hash: outcome.record.asset.tx_hash,
        zk_compressed: outcome.record.asset.zk_compressed,
        compression_signature: outcome.record.asset.compression_signature,
    }))
}

async fn send_message(
    State(state): State<SharedState>,
    Json(body): Json<SendMessageBody>,
) -> Result<Response, ApiError> {
    let encrypted_payload =
        hex::decode(&body.encrypted_content).map_err(|_| NoctisError::BadHex("encryptedContent"))?;
    let params = SendMessageParams {
        request_id: parse_request_id(&body.quote_request_id)?,
        recipient_stealth_address: parse_stealth(&body.recipient_stealth_address)?,
        encrypted_payload,
        signature: parse_signature(&body.signature)?,
        public_key: parse_public_key(&body.public_key)?,
    };
    let message_id = state.relay.send_message(params, now_ms())?;
    Ok(created(serde_json::json!({ "messageId": message_id.to_string() })))
}

async fn get_messages(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<Response, ApiError> {
    let request_id = parse_request_id(&id)?;
    let requester = query
        .public_key
        .as_deref()
        .map(parse_public_key)
        .transpose()?
        .unwrap_or_else(|| WotsPublicKey(Vec::new()));
    let messages = state.relay.get_messages(&request_id, &requester)?;
    let list: Vec<RpcMessage> = messages.iter().map(RpcMessage::from_entity).collect();
    Ok(ok(serde_json::json!({ "messages": list })))
}

// ── Nullifier ledger surface ─────────────────────────────────────────────────

async fn used_nullifiers(State(state): State<SharedState>) -> Result<Response, ApiError> {
    let rows = state.engine.ledger().list_consumed_nullifiers()?;
    let hashes: Vec<String> = rows.iter().map(|r| r.nullifier_hash.to_hex()).collect();
    Ok(ok(serde_json::json!({ "usedNullifiers": hashes })))
}

async fn check_nullifier(
    State(state): State<SharedState>,
    Path(hash): Path<String>,
) -> Result<Response, ApiError> {
    let hash = parse_nullifier("nullifierHash", &hash)?;
    let row = state.engine.ledger().check_nullifier_used(&hash)?;
    let payload = match row {
        Some(row) => NullifierCheck {
            is_used: true,
            quote_id: row.quote_id.map(|q| q.to_string()),
            entity_type: Some(row.party.as_str().to_string()),
            status: Some(row.status.as_str().to_string()),
            used_at: Some(row.used_at),
        },
        None => NullifierCheck {
            is_used: false,
            quote_id: None,
            entity_type: None,
            status: None,
            used_at: None,
        },
    };
    Ok(ok(payload))
}

async fn mark_nullifier_used(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(body): Json<MarkNullifierUsedBody>,
) -> Result<Response, ApiError> {
    require_admin(&state, &headers)?;

    let hash = parse_nullifier("nullifierHash", &body.nullifier_hash)?;
    let quote_id = body
        .quote_id
        .as_deref()
        .map(parse_quote_id)
        .transpose()?;
    let party = match body.entity_type.as_deref() {
        None => Party::Manual,
        Some(s) => Party::from_str_opt(s).ok_or(NoctisError::BadIdentifier("entityType"))?,
    };
    let status = match body.status.as_deref() {
        None | Some("settled") => NullifierStatus::Settled,
        Some("pending") => NullifierStatus::Pending,
        Some("expired") => NullifierStatus::Expired,
        Some("cancelled") => NullifierStatus::Cancelled,
        Some(_) => return Err(NoctisError::BadIdentifier("status").into()),
    };

    state
        .engine
        .ledger()
        .mark_nullifier_used(hash, quote_id, party, status, now_ms())?;
    Ok(created(serde_json::json!({ "nullifierHash": hash.to_hex() })))
}

// ── Admin whitelist ──────────────────────────────────────────────────────────

async fn whitelist_add(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(body): Json<WhitelistBody>,
) -> Result<Response, ApiError> {
    require_admin(&state, &headers)?;
    let public_key = parse_public_key(&body.public_key)?;
    state.engine.whitelist().add(&public_key)?;
    Ok(ok(serde_json::json!({ "added": true })))
}

async fn whitelist_remove(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(body): Json<WhitelistBody>,
) -> Result<Response, ApiError> {
    require_admin(&state, &headers)?;
    let public_key = parse_public_key(&body.public_key)?;
    let removed = state.engine.whitelist().remove(&public_key)?;
    Ok(ok(serde_json::json!({ "removed": removed })))
}

async fn whitelist_list(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    require_admin(&state, &headers)?;
    let ids = state.engine.whitelist().list_ids()?;
    Ok(ok(serde_json::json!({ "whitelist": ids })))
}
