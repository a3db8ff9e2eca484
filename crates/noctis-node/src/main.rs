//! noctis-node — the dark OTC RFQ service binary.
//!
//! Startup sequence:
//!   1. Open (or initialise) the state database
//!   2. Build the vault client, settlement coordinator, and RFQ engine
//!   3. Serve the REST API until the process is stopped
//!
//! All funds movement happens at the external privacy vault; this process
//! only authorizes settlement legs and keeps the shared nullifier ledger.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use noctis_core::config::{NodeConfig, VaultConfig, WhitelistMode};
use noctis_core::constants::{
    VAULT_BREAKER_COOLDOWN_MS, VAULT_BREAKER_FAILURE_THRESHOLD, VAULT_REQUEST_TIMEOUT_MS,
    VAULT_RETRY_MAX_ELAPSED_MS,
};
use noctis_core::settlement::{BalanceSource, SettlementDriver};
use noctis_rpc::ApiState;
use noctis_settlement::{SettlementCoordinator, SettlementVault};
use noctis_state::{MessageRelay, NullifierLedger, RfqEngine, StateDb, WhitelistGate};
use noctis_vault::VaultClient;

#[derive(Parser, Debug)]
#[command(
    name = "noctis-node",
    version,
    about = "Noctis — privacy-preserving RFQ / dark OTC trading core"
)]
struct Args {
    /// Directory for the persistent state database.
    #[arg(long, default_value = "~/.noctis/data")]
    data_dir: PathBuf,

    /// REST listen address.
    #[arg(long, default_value = "127.0.0.1:9030")]
    rpc_addr: SocketAddr,

    /// Maker admission mode: permissionless | permissioned.
    #[arg(long, default_value = "permissionless", value_parser = parse_whitelist_mode)]
    whitelist_mode: WhitelistMode,

    /// Shared admin key for whitelist and ledger back-channel endpoints.
    /// Omitting it disables all admin endpoints.
    #[arg(long, env = "NOCTIS_ADMIN_KEY")]
    admin_key: Option<String>,

    /// Base URL of the external privacy vault relayer.
    #[arg(long, default_value = "http://127.0.0.1:9040")]
    vault_url: String,

    /// Per-request vault deadline (ms).
    #[arg(long, default_value_t = VAULT_REQUEST_TIMEOUT_MS)]
    vault_timeout_ms: u64,

    /// Total retry budget per vault call (ms).
    #[arg(long, default_value_t = VAULT_RETRY_MAX_ELAPSED_MS)]
    vault_retry_max_elapsed_ms: u64,

    /// Skip vault balance pre-checks at request creation and quote
    /// submission (settlement legs are unaffected).
    #[arg(long)]
    disable_balance_checks: bool,
}

fn parse_whitelist_mode(s: &str) -> Result<WhitelistMode, String> {
    match s {
        "permissionless" => Ok(WhitelistMode::Permissionless),
        "permissioned" => Ok(WhitelistMode::Permissioned),
        other => Err(format!("unknown whitelist mode: {other}")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,noctis=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    info!("Noctis node starting");

    let config = NodeConfig {
        rpc_addr: args.rpc_addr,
        data_dir: expand_tilde(&args.data_dir),
        whitelist_mode: args.whitelist_mode,
        admin_key: args.admin_key,
        vault: VaultConfig {
            base_url: args.vault_url,
            request_timeout_ms: args.vault_timeout_ms,
            retry_max_elapsed_ms: args.vault_retry_max_elapsed_ms,
            breaker_failure_threshold: VAULT_BREAKER_FAILURE_THRESHOLD,
            breaker_cooldown_ms: VAULT_BREAKER_COOLDOWN_MS,
        },
    };

    // ── State database ────────────────────────────────────────────────────────
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;
    let db = Arc::new(StateDb::open(&config.data_dir).context("opening state database")?);
    info!(schema = db.schema_version(), "state database open");

    // ── Components ────────────────────────────────────────────────────────────
    let ledger = NullifierLedger::new(Arc::clone(&db));
    let whitelist = WhitelistGate::new(config.whitelist_mode, Arc::clone(&db));
    let vault =
        Arc::new(VaultClient::new(&config.vault).context("building vault client")?);

    let coordinator: Arc<dyn SettlementDriver> = Arc::new(SettlementCoordinator::new(
        Arc::clone(&vault) as Arc<dyn SettlementVault>,
        ledger.clone(),
    ));
    let balance: Option<Arc<dyn BalanceSource>> = if args.disable_balance_checks {
        None
    } else {
        Some(Arc::clone(&vault) as Arc<dyn BalanceSource>)
    };

    let engine = Arc::new(RfqEngine::new(
        Arc::clone(&db),
        ledger,
        whitelist,
        coordinator,
        balance,
    ));
    let relay = MessageRelay::new(Arc::clone(&db));

    // ── REST API ──────────────────────────────────────────────────────────────
    let state = Arc::new(ApiState {
        engine,
        relay,
        admin_key: config.admin_key.clone(),
    });

    info!(
        mode = ?config.whitelist_mode,
        vault = %config.vault.base_url,
        "node ready"
    );
    noctis_rpc::serve(state, config.rpc_addr).await
}

/// Expand a leading `~` to the user's home directory (`HOME` or `USERPROFILE`).
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
