pub mod coordinator;

pub use coordinator::{plan_legs, SettlementCoordinator, SettlementVault};

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use noctis_core::error::ErrorKind;
    use noctis_core::ledger::{CommitmentStatus, NullifierStatus, Party};
    use noctis_core::settlement::{
        LegReceipt, PartyDeposit, SettlementDriver, SettlementLeg, SettlementPlan,
    };
    use noctis_core::types::{
        AssetPair, Commitment, Direction, NullifierHash, QuoteId, RequestId,
    };
    use noctis_state::{NullifierLedger, StateDb};
    use noctis_vault::{VaultError, VaultErrorCategory};

    use crate::coordinator::{plan_legs, SettlementCoordinator, SettlementVault};

    // ── Harness ──────────────────────────────────────────────────────────────

    struct TempDb {
        path: PathBuf,
    }

    impl TempDb {
        fn open(tag: &str) -> (Arc<StateDb>, Self) {
            let path = std::env::temp_dir().join(format!(
                "noctis_settlement_{}_{}_{}",
                tag,
                std::process::id(),
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap()
                    .subsec_nanos()
            ));
            (Arc::new(StateDb::open(&path).unwrap()), Self { path })
        }
    }

    impl Drop for TempDb {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }

    /// Scripted vault: pops one result per leg call, recording each leg.
    struct ScriptedVault {
        results: Mutex<Vec<Result<LegReceipt, VaultError>>>,
        legs: Mutex<Vec<SettlementLeg>>,
    }

    impl ScriptedVault {
        fn new(results: Vec<Result<LegReceipt, VaultError>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results),
                legs: Mutex::new(Vec::new()),
            })
        }

        fn receipt(tx: &str) -> LegReceipt {
            LegReceipt {
                tx_hash: tx.into(),
                zk_compressed: Some(true),
                compression_signature: Some("csig".into()),
            }
        }

        fn legs(&self) -> Vec<SettlementLeg> {
            self.legs.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SettlementVault for ScriptedVault {
        async fn execute_settlement_leg(
            &self,
            leg: &SettlementLeg,
        ) -> Result<LegReceipt, VaultError> {
            self.legs.lock().unwrap().push(leg.clone());
            self.results.lock().unwrap().remove(0)
        }
    }

    fn plan(direction: Direction) -> SettlementPlan {
        SettlementPlan {
            request_id: RequestId::generate(),
            quote_id: QuoteId::generate(),
            pair: AssetPair::parse("SOL/USDC").unwrap(),
            direction,
            base_amount: 2_000_000_000,
            price_total: 300_000_000,
            chain_id: 900,
            taker: PartyDeposit {
                commitment: Commitment(vec![0x11; 32]),
                nullifier_hash: NullifierHash([0x22; 32]),
                address: "taker-addr".into(),
            },
            maker: PartyDeposit {
                commitment: Commitment(vec![0x33; 32]),
                nullifier_hash: NullifierHash([0x44; 32]),
                address: "maker-addr".into(),
            },
        }
    }

    fn transient() -> VaultError {
        VaultError::Exhausted {
            endpoint: "settle",
            message: "503 twice".into(),
        }
    }

    // ── Direction mapping ────────────────────────────────────────────────────

    #[test]
    fn buy_maps_payment_to_quote_token_and_asset_to_base() {
        let p = plan(Direction::Buy);
        let (payment, asset) = plan_legs(&p);

        // Taker pays the quoted total in USDC to the maker…
        assert_eq!(payment.amount, 300_000_000);
        assert_eq!(payment.token, "USDC");
        assert_eq!(payment.to_address, "maker-addr");
        assert_eq!(payment.from_nullifier, p.taker.nullifier_hash);

        // …and receives the requested SOL amount.
        assert_eq!(asset.amount, 2_000_000_000);
        assert_eq!(asset.token, "SOL");
        assert_eq!(asset.to_address, "taker-addr");
        assert_eq!(asset.from_nullifier, p.maker.nullifier_hash);
    }

    #[test]
    fn sell_mirrors_the_mapping() {
        let p = plan(Direction::Sell);
        let (payment, asset) = plan_legs(&p);
        assert_eq!((payment.amount, payment.token.as_str()), (2_000_000_000, "SOL"));
        assert_eq!((asset.amount, asset.token.as_str()), (300_000_000, "USDC"));
    }

    #[test]
    fn direction_mapping_is_invertible() {
        // For any direction, the taker's outflow plus inflow together cover
        // exactly the base amount and the quote total, once each.
        for direction in [Direction::Buy, Direction::Sell] {
            let p = plan(direction);
            let (payment, asset) = plan_legs(&p);
            let mut sides = vec![
                (payment.amount, payment.token.clone()),
                (asset.amount, asset.token.clone()),
            ];
            sides.sort();
            assert_eq!(
                sides,
                vec![
                    (300_000_000, "USDC".to_string()),
                    (2_000_000_000, "SOL".to_string()),
                ]
            );
        }
    }

    // ── Coordinator ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn success_settles_all_reservations() {
        let (db, _guard) = TempDb::open("success");
        let ledger = NullifierLedger::new(db);
        let vault = ScriptedVault::new(vec![
            Ok(ScriptedVault::receipt("0xpay")),
            Ok(ScriptedVault::receipt("0xasset")),
        ]);
        let coordinator =
            SettlementCoordinator::new(Arc::clone(&vault) as Arc<dyn SettlementVault>, ledger.clone());

        let p = plan(Direction::Buy);
        let record = coordinator.execute(&p).await.unwrap();
        assert_eq!(record.payment.tx_hash, "0xpay");
        assert_eq!(record.asset.tx_hash, "0xasset");

        // Legs were issued strictly payment-first.
        let legs = vault.legs();
        assert_eq!(legs.len(), 2);
        assert_eq!(legs[0].to_address, "maker-addr");
        assert_eq!(legs[1].to_address, "taker-addr");

        for hash in [p.taker.nullifier_hash, p.maker.nullifier_hash] {
            let row = ledger.check_nullifier_used(&hash).unwrap().unwrap();
            assert_eq!(row.status, NullifierStatus::Settled);
        }
        // Settled commitments no longer block new quotes.
        assert!(ledger.check_commitment_used(&p.taker.commitment).unwrap().is_none());
        assert!(ledger.check_commitment_used(&p.maker.commitment).unwrap().is_none());
    }

    #[tokio::test]
    async fn reserved_nullifier_conflict_aborts_before_any_vault_call() {
        let (db, _guard) = TempDb::open("conflict");
        let ledger = NullifierLedger::new(db);
        let vault = ScriptedVault::new(vec![]);
        let coordinator =
            SettlementCoordinator::new(Arc::clone(&vault) as Arc<dyn SettlementVault>, ledger.clone());

        let p = plan(Direction::Buy);
        ledger.mark_external_nullifier_used(p.maker.nullifier_hash, 1).unwrap();

        let failure = coordinator.execute(&p).await.unwrap_err();
        assert!(failure.pre_transfer);
        assert_eq!(failure.error.kind(), ErrorKind::NullifierUsed);
        assert!(vault.legs().is_empty());

        // The taker reservation taken before the conflict was unwound.
        let row = ledger.check_nullifier_used(&p.taker.nullifier_hash).unwrap().unwrap();
        assert_eq!(row.status, NullifierStatus::Cancelled);
    }

    #[tokio::test]
    async fn payment_leg_rejection_releases_everything() {
        let (db, _guard) = TempDb::open("leg_a_reject");
        let ledger = NullifierLedger::new(db);
        let vault = ScriptedVault::new(vec![Err(VaultError::Rejected {
            endpoint: "settle",
            category: VaultErrorCategory::InsufficientBalance,
            message: "note too small".into(),
        })]);
        let coordinator =
            SettlementCoordinator::new(Arc::clone(&vault) as Arc<dyn SettlementVault>, ledger.clone());

        let p = plan(Direction::Buy);
        let failure = coordinator.execute(&p).await.unwrap_err();
        assert!(failure.pre_transfer);
        assert_eq!(failure.error.kind(), ErrorKind::InsufficientBalance);

        for hash in [p.taker.nullifier_hash, p.maker.nullifier_hash] {
            let row = ledger.check_nullifier_used(&hash).unwrap().unwrap();
            assert_eq!(row.status, NullifierStatus::Cancelled);
        }
    }

    #[tokio::test]
    async fn payment_leg_timeout_is_ambiguous() {
        let (db, _guard) = TempDb::open("leg_a_timeout");
        let ledger = NullifierLedger::new(db);
        let vault = ScriptedVault::new(vec![Err(transient())]);
        let coordinator =
            SettlementCoordinator::new(Arc::clone(&vault) as Arc<dyn SettlementVault>, ledger);

        let failure = coordinator.execute(&plan(Direction::Buy)).await.unwrap_err();
        assert!(!failure.pre_transfer);
        assert_eq!(failure.error.kind(), ErrorKind::VaultUnavailable);
    }

    #[tokio::test]
    async fn asset_leg_retries_through_transients_then_settles() {
        let (db, _guard) = TempDb::open("leg_b_retry");
        let ledger = NullifierLedger::new(db);
        let vault = ScriptedVault::new(vec![
            Ok(ScriptedVault::receipt("0xpay")),
            Err(transient()),
            Err(transient()),
            Ok(ScriptedVault::receipt("0xasset")),
        ]);
        let coordinator =
            SettlementCoordinator::new(Arc::clone(&vault) as Arc<dyn SettlementVault>, ledger.clone());

        let p = plan(Direction::Buy);
        let record = coordinator.execute(&p).await.unwrap();
        assert_eq!(record.payment.tx_hash, "0xpay");
        assert_eq!(record.asset.tx_hash, "0xasset");

        // One payment leg plus three asset attempts; no duplicate rows.
        assert_eq!(vault.legs().len(), 4);
        let consumed = ledger.list_consumed_nullifiers().unwrap();
        assert_eq!(consumed.len(), 2);
        assert!(consumed.iter().all(|r| r.status == NullifierStatus::Settled));
    }

    #[tokio::test]
    async fn asset_leg_exhaustion_surfaces_settlement_partial() {
        let (db, _guard) = TempDb::open("leg_b_partial");
        let ledger = NullifierLedger::new(db);
        let vault = ScriptedVault::new(vec![
            Ok(ScriptedVault::receipt("0xpay")),
            Err(transient()),
            Err(transient()),
            Err(transient()),
        ]);
        let coordinator =
            SettlementCoordinator::new(Arc::clone(&vault) as Arc<dyn SettlementVault>, ledger.clone())
                .with_retries(2);

        let p = plan(Direction::Buy);
        let failure = coordinator.execute(&p).await.unwrap_err();
        assert!(!failure.pre_transfer);
        assert_eq!(failure.error.kind(), ErrorKind::SettlementPartial);

        // Funds moved on the payment leg: taker settled, maker still pending
        // for operator reconciliation.
        let taker = ledger.check_nullifier_used(&p.taker.nullifier_hash).unwrap().unwrap();
        assert_eq!(taker.status, NullifierStatus::Settled);
        let maker = ledger.check_nullifier_used(&p.maker.nullifier_hash).unwrap().unwrap();
        assert_eq!(maker.status, NullifierStatus::Pending);

        let taker_commitment = ledger
            .check_commitment_used(&p.taker.commitment)
            .unwrap();
        assert!(taker_commitment.is_none(), "settled commitment stops blocking");
        let maker_commitment = ledger
            .check_commitment_used(&p.maker.commitment)
            .unwrap()
            .unwrap();
        assert_eq!(maker_commitment.status, CommitmentStatus::Active);
        assert_eq!(maker_commitment.party, Party::Maker);
    }
}
