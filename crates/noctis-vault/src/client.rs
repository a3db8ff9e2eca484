use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use noctis_core::config::VaultConfig;
use noctis_core::error::NoctisError;
use noctis_core::settlement::{BalanceSource, LegReceipt, SettlementLeg};
use noctis_core::types::{Amount, ChainId, Commitment};

use crate::breaker::CircuitBreaker;

// ── Error categorization ─────────────────────────────────────────────────────

/// Failure categories for vault calls. Only `Transient` is ever retried.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum VaultErrorCategory {
    Transient,
    Validation,
    InsufficientBalance,
    NullifierUsedExternally,
    Unknown,
}

/// Failure of a logical vault call.
///
/// The variants encode what the settlement coordinator needs to know about
/// transfer certainty: `CircuitOpen` and `Rejected` mean the vault
/// definitively executed nothing; `Exhausted` means retries timed out and an
/// attempt may or may not have landed.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("vault circuit breaker open for {endpoint}")]
    CircuitOpen { endpoint: &'static str },

    #[error("vault {endpoint} unavailable after retries: {message}")]
    Exhausted {
        endpoint: &'static str,
        message: String,
    },

    #[error("vault rejected {endpoint}: {message}")]
    Rejected {
        endpoint: &'static str,
        category: VaultErrorCategory,
        message: String,
    },
}

impl VaultError {
    /// Whether it is certain that no transfer executed.
    pub fn is_pre_transfer(&self) -> bool {
        match self {
            VaultError::CircuitOpen { .. } | VaultError::Rejected { .. } => true,
            VaultError::Exhausted { .. } => false,
        }
    }

    pub fn into_noctis(self) -> NoctisError {
        match self {
            VaultError::CircuitOpen { endpoint } => {
                NoctisError::VaultUnavailable(format!("circuit open for {endpoint}"))
            }
            VaultError::Exhausted { message, .. } => NoctisError::VaultUnavailable(message),
            VaultError::Rejected {
                category, message, ..
            } => match category {
                VaultErrorCategory::InsufficientBalance => {
                    NoctisError::InsufficientBalance(message)
                }
                VaultErrorCategory::NullifierUsedExternally => {
                    NoctisError::NullifierAlreadyUsed { status: "settled" }
                }
                VaultErrorCategory::Validation => NoctisError::VaultValidation(message),
                VaultErrorCategory::Transient | VaultErrorCategory::Unknown => {
                    NoctisError::Internal(message)
                }
            },
        }
    }
}

/// Map an HTTP status plus the vault's error code to a category. 5xx is
/// transient; 4xx is interpreted from the body's code.
pub fn categorize(status: u16, error_code: Option<&str>) -> VaultErrorCategory {
    if status >= 500 {
        return VaultErrorCategory::Transient;
    }
    match error_code {
        Some("insufficient_balance") => VaultErrorCategory::InsufficientBalance,
        Some("nullifier_used") | Some("nullifier_used_externally") => {
            VaultErrorCategory::NullifierUsedExternally
        }
        Some(_) => VaultErrorCategory::Validation,
        None if (400..500).contains(&status) => VaultErrorCategory::Validation,
        None => VaultErrorCategory::Unknown,
    }
}

// ── Wire shapes ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BalanceRequest<'a> {
    commitment: &'a str,
    chain_id: ChainId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceData {
    /// Spendable amount the vault discloses for this commitment, as a
    /// decimal string.
    available: String,
    encrypted_summary: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SettleRequest<'a> {
    from_commitment: &'a str,
    from_nullifier: &'a str,
    to_address: &'a str,
    amount: String,
    token: &'a str,
    chain_id: ChainId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettleData {
    tx_hash: String,
    zk_compressed: Option<bool>,
    compression_signature: Option<String>,
}

#[derive(Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    error: Option<EnvelopeError>,
}

#[derive(Deserialize)]
struct EnvelopeError {
    code: String,
    message: Option<String>,
}

/// The vault's view of a deposit-note balance.
#[derive(Clone, Debug)]
pub struct VaultBalance {
    pub available: Amount,
    pub encrypted_summary: Option<String>,
}

// ── Client ───────────────────────────────────────────────────────────────────

enum Attempt {
    Transient(String),
    Definitive(VaultErrorCategory, String),
}

/// Async client to the external privacy vault relayer.
///
/// Policy per call: bounded wall-clock timeout, exponential backoff with
/// jitter on transient failures only, and a per-endpoint circuit breaker
/// that fails fast while the vault is misbehaving.
pub struct VaultClient {
    http: reqwest::Client,
    base_url: String,
    retry_max_elapsed: Duration,
    balance_breaker: CircuitBreaker,
    settle_breaker: CircuitBreaker,
}

impl VaultClient {
    pub fn new(config: &VaultConfig) -> Result<Self, NoctisError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| NoctisError::Internal(format!("building vault http client: {e}")))?;
        let cooldown = Duration::from_millis(config.breaker_cooldown_ms);
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry_max_elapsed: Duration::from_millis(config.retry_max_elapsed_ms),
            balance_breaker: CircuitBreaker::new(config.breaker_failure_threshold, cooldown),
            settle_breaker: CircuitBreaker::new(config.breaker_failure_threshold, cooldown),
        })
    }

    /// Disclosed spendable balance for a deposit-note commitment.
    pub async fn query_balance(
        &self,
        commitment: &Commitment,
        chain_id: ChainId,
    ) -> Result<VaultBalance, VaultError> {
        let commitment_hex = commitment.to_hex();
        let body = BalanceRequest {
            commitment: &commitment_hex,
            chain_id,
        };
        let data: BalanceData = self
            .call("balance", &self.balance_breaker, "/api/v1/vault/balance", &body)
            .await?;
        let available = data.available.parse::<Amount>().map_err(|_| {
            VaultError::Rejected {
                endpoint: "balance",
                category: VaultErrorCategory::Unknown,
                message: format!("unparseable balance: {}", data.available),
            }
        })?;
        Ok(VaultBalance {
            available,
            encrypted_summary: data.encrypted_summary,
        })
    }

    /// Execute one settlement leg. Idempotent at the vault by
    /// `leg.from_nullifier`: re-submitting the same leg cannot double-move
    /// funds.
    pub async fn execute_settlement_leg(
        &self,
        leg: &SettlementLeg,
    ) -> Result<LegReceipt, VaultError> {
        let from_commitment = leg.from_commitment.to_hex();
        let from_nullifier = leg.from_nullifier.to_hex();
        let body = SettleRequest {
            from_commitment: &from_commitment,
            from_nullifier: &from_nullifier,
            to_address: &leg.to_address,
            amount: leg.amount.to_string(),
            token: &leg.token,
            chain_id: leg.chain_id,
        };
        let data: SettleData = self
            .call("settle", &self.settle_breaker, "/api/v1/vault/settle", &body)
            .await?;
        Ok(LegReceipt {
            tx_hash: data.tx_hash,
            zk_compressed: data.zk_compressed,
            compression_signature: data.compression_signature,
        })
    }

    async fn call<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &'static str,
        breaker: &CircuitBreaker,
        path: &str,
        body: &B,
    ) -> Result<T, VaultError> {
        if !breaker.allow() {
            return Err(VaultError::CircuitOpen { endpoint });
        }

        let url = format!("{}{}", self.base_url, path);
        let policy = ExponentialBackoff {
            max_elapsed_time: Some(self.retry_max_elapsed),
            ..ExponentialBackoff::default()
        };

        let outcome = backoff::future::retry(policy, || async {
            match self.attempt::<B, T>(&url, body).await {
                Ok(v) => Ok(v),
                Err(Attempt::Transient(msg)) => {
                    debug!(endpoint, error = %msg, "transient vault failure; backing off");
                    Err(backoff::Error::transient(Attempt::Transient(msg)))
                }
                Err(definitive) => Err(backoff::Error::permanent(definitive)),
            }
        })
        .await;

        match outcome {
            Ok(v) => {
                breaker.record_success();
                Ok(v)
            }
            Err(Attempt::Transient(message)) => {
                breaker.record_failure();
                warn!(endpoint, error = %message, "vault call exhausted retries");
                Err(VaultError::Exhausted { endpoint, message })
            }
            Err(Attempt::Definitive(category, message)) => {
                // The vault answered; the service itself is healthy.
                breaker.record_success();
                Err(VaultError::Rejected {
                    endpoint,
                    category,
                    message,
                })
            }
        }
    }

    async fn attempt<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, Attempt> {
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| Attempt::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(Attempt::Transient(format!("vault returned {status}")));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| Attempt::Transient(format!("reading vault response: {e}")))?;

        if status.is_success() && envelope.success {
            return envelope.data.ok_or_else(|| {
                Attempt::Definitive(
                    VaultErrorCategory::Unknown,
                    "success envelope without data".into(),
                )
            });
        }

        let (code, message) = match envelope.error {
            Some(e) => {
                let msg = e.message.unwrap_or_else(|| e.code.clone());
                (Some(e.code), msg)
            }
            None => (None, format!("vault returned {status}")),
        };
        Err(Attempt::Definitive(
            categorize(status.as_u16(), code.as_deref()),
            message,
        ))
    }
}

#[async_trait]
impl BalanceSource for VaultClient {
    async fn available_balance(
        &self,
        commitment: &Commitment,
        chain_id: ChainId,
    ) -> Result<Amount, NoctisError> {
        self.query_balance(commitment, chain_id)
            .await
            .map(|b| b.available)
            .map_err(VaultError::into_noctis)
    }
}
