//! End-to-end smoke tests for noctis-node.
//!
//! Starts the real node binary against an in-process mock privacy vault,
//! then drives the full RFQ lifecycle over HTTP: request → quote → accept →
//! two settlement legs, plus replay, cancellation, and nullifier collision
//! behavior.
//!
//! Run with:
//!   cargo test -p noctis-node --test smoke

use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use noctis_crypto::WotsKeyPair;

const ADMIN_KEY: &str = "smoke-admin-key";

// ── Node lifecycle ────────────────────────────────────────────────────────────

struct NodeGuard {
    child: Child,
    data_dir: PathBuf,
}

impl Drop for NodeGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.data_dir);
    }
}

/// Find a free TCP port on loopback.
fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

// ── Mock privacy vault ────────────────────────────────────────────────────────

#[derive(Default)]
struct MockVault {
    settles: Mutex<Vec<serde_json::Value>>,
}

impl MockVault {
    fn settle_count(&self) -> usize {
        self.settles.lock().unwrap().len()
    }

    fn settle_bodies(&self) -> Vec<serde_json::Value> {
        self.settles.lock().unwrap().clone()
    }
}

async fn mock_balance() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "data": { "available": "1000000000000", "encryptedSummary": null }
    }))
}

async fn mock_settle(
    State(vault): State<Arc<MockVault>>,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    let mut settles = vault.settles.lock().unwrap();
    settles.push(body);
    let n = settles.len();
    Json(serde_json::json!({
        "success": true,
        "data": {
            "txHash": format!("0xleg{n}"),
            "zkCompressed": true,
            "compressionSignature": "csig"
        }
    }))
}

/// Serve the mock vault on a free loopback port; returns its base URL.
async fn spawn_mock_vault() -> (String, Arc<MockVault>) {
    let vault = Arc::new(MockVault::default());
    let app = Router::new()
        .route("/api/v1/vault/balance", post(mock_balance))
        .route("/api/v1/vault/settle", post(mock_settle))
        .with_state(Arc::clone(&vault));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), vault)
}

// ── Node + HTTP helpers ───────────────────────────────────────────────────────

fn spawn_node(tag: &str, vault_url: &str) -> (NodeGuard, String) {
    let data_dir = std::env::temp_dir().join(format!("noctis_e2e_{tag}_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&data_dir);

    let rpc_port = free_port();
    let rpc_url = format!("http://127.0.0.1:{rpc_port}");

    let node_bin = env!("CARGO_BIN_EXE_noctis-node");
    let child = Command::new(node_bin)
        .args([
            "--data-dir", data_dir.to_str().unwrap(),
            "--rpc-addr", &format!("127.0.0.1:{rpc_port}"),
            "--vault-url", vault_url,
            "--admin-key", ADMIN_KEY,
            "--vault-timeout-ms", "2000",
            "--vault-retry-max-elapsed-ms", "3000",
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn noctis-node");

    (NodeGuard { child, data_dir }, rpc_url)
}

/// Poll until the REST API responds or the timeout elapses.
async fn wait_for_api(client: &reqwest::Client, base: &str, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Ok(resp) = client.get(format!("{base}/api/v1/health")).send().await {
            if resp.status().is_success() {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    false
}

async fn post_json(
    client: &reqwest::Client,
    url: &str,
    body: serde_json::Value,
) -> (u16, serde_json::Value) {
    let resp = client.post(url).json(&body).send().await.expect("POST failed");
    let status = resp.status().as_u16();
    let json = resp.json().await.expect("parse response JSON");
    (status, json)
}

async fn get_json(client: &reqwest::Client, url: &str) -> (u16, serde_json::Value) {
    let resp = client.get(url).send().await.expect("GET failed");
    let status = resp.status().as_u16();
    let json = resp.json().await.expect("parse response JSON");
    (status, json)
}

// ── Signed request builders ───────────────────────────────────────────────────

fn create_request_body(kp: &WotsKeyPair) -> serde_json::Value {
    let message = "create_quote_request:SOL/USDC:buy:2000000000:3600000";
    let signature = kp.sign(message.as_bytes());
    serde_json::json!({
        "assetPair": "SOL/USDC",
        "direction": "buy",
        "amount": "2000000000",
        "timeout": 3_600_000,
        "signature": hex::encode(&signature.0),
        "publicKey": kp.public_key.to_hex(),
        "message": message,
    })
}

fn submit_quote_body(request_id: &str, kp: &WotsKeyPair, nullifier: [u8; 32]) -> serde_json::Value {
    let expiration = now_ms() + 1_800_000;
    let message = format!("submit_quote:{request_id}:300000000:{expiration}");
    let signature = kp.sign(message.as_bytes());
    serde_json::json!({
        "quoteRequestId": request_id,
        "price": "300000000",
        "expirationTime": expiration,
        "signature": hex::encode(&signature.0),
        "publicKey": kp.public_key.to_hex(),
        "walletAddress": "maker-wallet",
        "commitment": hex::encode([0xbb; 32]),
        "nullifierHash": hex::encode(nullifier),
        "chainId": 900,
    })
}

fn accept_quote_body(quote_id: &str, kp: &WotsKeyPair, taker_nullifier: [u8; 32]) -> serde_json::Value {
    let message = format!("accept_quote:{quote_id}");
    let signature = kp.sign(message.as_bytes());
    serde_json::json!({
        "signature": hex::encode(&signature.0),
        "publicKey": kp.public_key.to_hex(),
        "takerCommitment": hex::encode([0xcc; 32]),
        "takerAddress": "taker-wallet",
        "takerNullifierHash": hex::encode(taker_nullifier),
        "chainId": 900,
    })
}

// ── Smoke: full lifecycle ─────────────────────────────────────────────────────

#[tokio::test]
async fn smoke_rfq_lifecycle() {
    let (vault_url, vault) = spawn_mock_vault().await;
    let (_node, base) = spawn_node("lifecycle", &vault_url);

    let http = reqwest::Client::new();
    assert!(
        wait_for_api(&http, &base, Duration::from_secs(20)).await,
        "noctis-node did not become ready within 20 seconds"
    );

    // ── 1. Taker creates a buy request for 2 SOL ──────────────────────────────
    let taker = WotsKeyPair::generate();
    let body = create_request_body(&taker);
    let (status, resp) = post_json(&http, &format!("{base}/api/v1/rfq/quote-request"), body.clone()).await;
    assert_eq!(status, 201, "create failed: {resp}");
    let request_id = resp["data"]["quoteRequestId"].as_str().unwrap().to_string();
    let stealth = resp["data"]["stealthAddress"].as_str().unwrap().to_string();
    assert_eq!(resp["data"]["commitment"], "2000000000");

    // ── 2. Replaying the exact same signed body is signature reuse ────────────
    let (status, resp) = post_json(&http, &format!("{base}/api/v1/rfq/quote-request"), body).await;
    assert_eq!(status, 409);
    assert_eq!(resp["error"]["code"], "signature_reused");

    // ── 3. The request lists as active with no quotes yet ─────────────────────
    let (_, resp) = get_json(&http, &format!("{base}/api/v1/rfq/quote-requests")).await;
    let listed = resp["data"]["quoteRequests"].as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["quoteRequestId"], request_id.as_str());
    assert_eq!(listed[0]["quote_count"], 0);

    // ── 4. Maker quotes 300 USDC total ────────────────────────────────────────
    let maker = WotsKeyPair::generate();
    let (status, resp) = post_json(
        &http,
        &format!("{base}/api/v1/rfq/quote"),
        submit_quote_body(&request_id, &maker, [0x21; 32]),
    )
    .await;
    assert_eq!(status, 201, "quote failed: {resp}");
    let quote_id = resp["data"]["quoteId"].as_str().unwrap().to_string();
    assert_eq!(resp["data"]["priceCommitment"], "300000000");

    let (_, resp) = get_json(
        &http,
        &format!("{base}/api/v1/rfq/quote-request/{request_id}/quotes"),
    )
    .await;
    assert_eq!(resp["data"]["quotes"].as_array().unwrap().len(), 1);

    // ── 5. A second taker keypair accepts; both legs settle ───────────────────
    let accept_kp = WotsKeyPair::generate();
    let (status, resp) = post_json(
        &http,
        &format!("{base}/api/v1/rfq/quote/{quote_id}/accept"),
        accept_quote_body(&quote_id, &accept_kp, [0x31; 32]),
    )
    .await;
    assert_eq!(status, 200, "accept failed: {resp}");
    assert_eq!(resp["data"]["quoteRequestId"], request_id.as_str());
    assert!(resp["data"]["nullifier"].as_str().unwrap().len() == 64);
    assert_eq!(resp["data"]["txHash"], "0xleg2");

    let legs = vault.settle_bodies();
    assert_eq!(legs.len(), 2, "exactly two settlement legs");
    // Leg (a): taker pays the 300 USDC total to the maker.
    assert_eq!(legs[0]["amount"], "300000000");
    assert_eq!(legs[0]["token"], "USDC");
    assert_eq!(legs[0]["toAddress"], "maker-wallet");
    // Leg (b): maker delivers the 2 SOL to the taker.
    assert_eq!(legs[1]["amount"], "2000000000");
    assert_eq!(legs[1]["token"], "SOL");
    assert_eq!(legs[1]["toAddress"], "taker-wallet");

    let (_, resp) = get_json(&http, &format!("{base}/api/v1/rfq/quote-request/{request_id}")).await;
    assert_eq!(resp["data"]["status"], "filled");

    // ── 6. Cancel after fill is stale ─────────────────────────────────────────
    let cancel_kp = WotsKeyPair::generate();
    let cancel_message = format!("cancel_quote_request:{request_id}");
    let (status, resp) = post_json(
        &http,
        &format!("{base}/api/v1/rfq/quote-request/{request_id}/cancel"),
        serde_json::json!({
            "signature": hex::encode(&cancel_kp.sign(cancel_message.as_bytes()).0),
            "publicKey": cancel_kp.public_key.to_hex(),
        }),
    )
    .await;
    assert_eq!(status, 409);
    assert_eq!(resp["error"]["code"], "stale_state");

    // ── 7. Nullifier surfaces on the shared ledger ────────────────────────────
    let taker_nullifier = hex::encode([0x31; 32]);
    let (_, resp) = get_json(
        &http,
        &format!("{base}/api/v1/rfq/check-nullifier/{taker_nullifier}"),
    )
    .await;
    assert_eq!(resp["data"]["isUsed"], true);
    assert_eq!(resp["data"]["status"], "settled");

    let (_, resp) = get_json(&http, &format!("{base}/api/v1/rfq/used-nullifiers")).await;
    let used = resp["data"]["usedNullifiers"].as_array().unwrap();
    assert!(used.iter().any(|h| h == &serde_json::json!(taker_nullifier)));

    // ── 8. External withdrawal blocks a later acceptance (S4) ─────────────────
    let external = [0x55u8; 32];
    let (status, _) = post_json(
        &http,
        &format!("{base}/api/v1/rfq/mark-nullifier-used"),
        serde_json::json!({ "nullifierHash": hex::encode(external) }),
    )
    .await;
    // Without the admin header the back-channel is refused.
    assert_eq!(status, 401);

    let resp = http
        .post(format!("{base}/api/v1/rfq/mark-nullifier-used"))
        .header("x-admin-key", ADMIN_KEY)
        .json(&serde_json::json!({ "nullifierHash": hex::encode(external) }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 201);

    let (status, resp) = post_json(
        &http,
        &format!("{base}/api/v1/rfq/quote-request"),
        create_request_body(&WotsKeyPair::generate()),
    )
    .await;
    assert_eq!(status, 201, "second request failed: {resp}");
    let request2 = resp["data"]["quoteRequestId"].as_str().unwrap().to_string();
    let (_, resp) = post_json(
        &http,
        &format!("{base}/api/v1/rfq/quote"),
        submit_quote_body(&request2, &WotsKeyPair::generate(), [0x61; 32]),
    )
    .await;
    let quote2 = resp["data"]["quoteId"].as_str().unwrap().to_string();

    let settles_before = vault.settle_count();
    let (status, resp) = post_json(
        &http,
        &format!("{base}/api/v1/rfq/quote/{quote2}/accept"),
        accept_quote_body(&quote2, &WotsKeyPair::generate(), external),
    )
    .await;
    assert_eq!(status, 409);
    assert_eq!(resp["error"]["code"], "nullifier_used");
    // The vault was never contacted for the blocked acceptance.
    assert_eq!(vault.settle_count(), settles_before);

    // ── 9. Encrypted messaging rides alongside ────────────────────────────────
    let sender = WotsKeyPair::generate();
    let payload_hex = hex::encode(b"nacl-box ciphertext bytes");
    let message = format!("send_message:{request_id}:{stealth}:{payload_hex}");
    let (status, resp) = post_json(
        &http,
        &format!("{base}/api/v1/rfq/message"),
        serde_json::json!({
            "quoteRequestId": request_id,
            "recipientStealthAddress": stealth,
            "encryptedContent": payload_hex,
            "signature": hex::encode(&sender.sign(message.as_bytes()).0),
            "publicKey": sender.public_key.to_hex(),
        }),
    )
    .await;
    assert_eq!(status, 201, "message failed: {resp}");

    let (_, resp) = get_json(
        &http,
        &format!(
            "{base}/api/v1/rfq/quote-request/{request_id}/messages?publicKey={}",
            sender.public_key.to_hex()
        ),
    )
    .await;
    let messages = resp["data"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["encryptedContent"], payload_hex.as_str());
}

// ── Smoke: concurrent double-accept ───────────────────────────────────────────

#[tokio::test]
async fn smoke_concurrent_accept_settles_once() {
    let (vault_url, vault) = spawn_mock_vault().await;
    let (_node, base) = spawn_node("race", &vault_url);

    let http = reqwest::Client::new();
    assert!(wait_for_api(&http, &base, Duration::from_secs(20)).await);

    let (_, resp) = post_json(
        &http,
        &format!("{base}/api/v1/rfq/quote-request"),
        create_request_body(&WotsKeyPair::generate()),
    )
    .await;
    let request_id = resp["data"]["quoteRequestId"].as_str().unwrap().to_string();
    let (_, resp) = post_json(
        &http,
        &format!("{base}/api/v1/rfq/quote"),
        submit_quote_body(&request_id, &WotsKeyPair::generate(), [0x71; 32]),
    )
    .await;
    let quote_id = resp["data"]["quoteId"].as_str().unwrap().to_string();

    let url = format!("{base}/api/v1/rfq/quote/{quote_id}/accept");
    let a = post_json(&http, &url, accept_quote_body(&quote_id, &WotsKeyPair::generate(), [0x81; 32]));
    let b = post_json(&http, &url, accept_quote_body(&quote_id, &WotsKeyPair::generate(), [0x82; 32]));
    let ((status_a, resp_a), (status_b, resp_b)) = tokio::join!(a, b);

    let statuses = [status_a, status_b];
    assert!(
        statuses.contains(&200),
        "one acceptance must succeed: {resp_a} / {resp_b}"
    );
    assert!(
        statuses.contains(&409),
        "the other must lose the race: {resp_a} / {resp_b}"
    );
    let loser = if status_a == 409 { &resp_a } else { &resp_b };
    assert_eq!(loser["error"]["code"], "conflict");

    // Exactly one settlement: two legs, no more.
    assert_eq!(vault.settle_count(), 2);
}
