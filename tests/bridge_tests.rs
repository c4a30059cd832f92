// Bridge coordinator tests
// Quorum counting, replay protection, payout exactly-once, stalls and reloads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use std::sync::atomic::AtomicBool;
use tessera::{
    bridge::{BridgeEvent, BridgeTxState, ValidationOutcome},
    config::{self, LedgerConfig},
    coordinator::{BridgeCoordinator, PayoutInstruction, TransferRequest},
    crypto::{Dilithium3, Hash, Keypair},
    error::BridgeError,
    ledger::{Ledger, TxState},
    rpc::{ChainRpc, LedgerRpc, SimulatedChain},
    storage::{MemoryStore, RecordStore, CF_BRIDGE_TX},
    transaction::Transaction,
    validator::{LocalValidator, ValidatorNode, ValidatorRegistry},
    BridgeTransaction, Miner,
};

const TOKEN: &str = "test-admin-token";

struct Fixture {
    coord: Arc<BridgeCoordinator>,
    source: Arc<SimulatedChain>,
    target: Arc<SimulatedChain>,
    validators: Vec<Arc<LocalValidator>>,
    clock: Arc<AtomicU64>,
}

fn bridge_config() -> config::Bridge {
    config::Bridge {
        required_confirmations: 3,
        validator_threshold: 3,
        admin_token: Some(TOKEN.into()),
        ..config::Bridge::default()
    }
}

fn registry(cfg: &config::Bridge, store: Arc<dyn RecordStore>) -> Arc<ValidatorRegistry> {
    Arc::new(ValidatorRegistry::open(&cfg.bridge_id, cfg.admin_token.clone(), Arc::new(Dilithium3), store).expect("registry"))
}

/// Coordinator over simulated chains with `names` registered as validators.
/// With `attach` the validators also sign on their own when asked.
fn fixture_with(cfg: config::Bridge, store: Arc<dyn RecordStore>, names: &[&str], attach: bool) -> Fixture {
    let reg = registry(&cfg, store.clone());
    let validators: Vec<Arc<LocalValidator>> = names
        .iter()
        .map(|n| Arc::new(LocalValidator::new(n, Arc::new(Dilithium3))))
        .collect();
    for v in &validators {
        reg.add_validator(TOKEN, v.id(), v.public_key(), &cfg.target_network).expect("add validator");
    }
    let source = SimulatedChain::shared("source");
    let target = SimulatedChain::shared("target");
    let clock = Arc::new(AtomicU64::new(1_000));
    let c = clock.clone();
    let mut coord = BridgeCoordinator::open(&cfg, source.clone(), target.clone(), reg, store)
        .expect("coordinator")
        .with_clock(Arc::new(move || c.load(Ordering::SeqCst)))
        .with_poll_interval(Duration::from_millis(10));
    if attach {
        let nodes: Vec<Arc<dyn ValidatorNode>> = validators.iter().map(|v| v.clone() as Arc<dyn ValidatorNode>).collect();
        coord = coord.with_validators(nodes);
    }
    Fixture { coord: Arc::new(coord), source, target, validators, clock }
}

fn fixture() -> Fixture {
    fixture_with(bridge_config(), MemoryStore::shared(), &["A", "B", "C", "D"], false)
}

fn request(amount: u64) -> TransferRequest {
    TransferRequest {
        source_address: "tsr1-alice".into(),
        target_address: "0xbob".into(),
        amount,
        token_symbol: "TSR".into(),
    }
}

/// Initiate a transfer and lock funds for it on the source chain.
async fn locked(f: &Fixture, amount: u64) -> (BridgeTransaction, Hash) {
    let tx = f.coord.initiate(request(amount)).expect("initiate");
    let hash = f.source.submit_raw_transaction(tx.id.as_bytes()).await.expect("lock funds");
    f.coord.record_source_tx(&tx.id, hash).await.expect("record source tx");
    (tx, hash)
}

/// Initiate, lock and confirm on the source chain.
async fn confirmed(f: &Fixture, amount: u64) -> BridgeTransaction {
    let (tx, _) = locked(f, amount).await;
    f.source.advance_blocks(2);
    f.coord.poll_source(&tx.id).await.expect("poll");
    assert_eq!(f.coord.status_of(&tx.id).await.unwrap(), BridgeTxState::SourceConfirmed);
    f.coord.get(&tx.id).await.unwrap()
}

async fn sign(f: &Fixture, id: &str, who: usize) -> Result<ValidationOutcome, BridgeError> {
    let tx = f.coord.get(id).await.unwrap();
    let message = tx.canonical_message().unwrap();
    let v = &f.validators[who];
    f.coord.submit_signature(id, v.id(), v.sign(&message).unwrap()).await
}

async fn validated(f: &Fixture, amount: u64) -> BridgeTransaction {
    let tx = confirmed(f, amount).await;
    for who in 0..3 {
        sign(f, &tx.id, who).await.expect("signature");
    }
    assert_eq!(f.coord.status_of(&tx.id).await.unwrap(), BridgeTxState::Validated);
    tx
}

#[tokio::test]
async fn test_initiate_computes_fee_and_rejects_bad_amounts() {
    let f = fixture();
    let tx = f.coord.initiate(request(10_000)).expect("initiate");
    assert_eq!(tx.status, BridgeTxState::Initiated);
    assert_eq!(tx.fee, 10, "0.1 % of 10_000");
    assert_eq!(tx.payout_amount(), 9_990);

    assert!(matches!(f.coord.initiate(request(0)), Err(BridgeError::AmountOutOfRange { .. })));
    assert!(matches!(f.coord.initiate(request(1_000_001)), Err(BridgeError::AmountOutOfRange { .. })));
    let mut missing = request(10);
    missing.target_address.clear();
    assert!(matches!(f.coord.initiate(missing), Err(BridgeError::InvalidRequest(_))));
}

#[tokio::test]
async fn test_source_confirmation_threshold() {
    let f = fixture();
    let (tx, _) = locked(&f, 500).await;
    f.coord.poll_source(&tx.id).await.unwrap();
    let seen = f.coord.get(&tx.id).await.unwrap();
    assert_eq!(seen.status, BridgeTxState::PendingSourceConfirmation);
    assert_eq!(seen.source_confirmations, 1);

    f.source.advance_blocks(1);
    f.coord.poll_source(&tx.id).await.unwrap();
    assert_eq!(f.coord.status_of(&tx.id).await.unwrap(), BridgeTxState::PendingSourceConfirmation);

    f.source.advance_blocks(1);
    f.coord.poll_source(&tx.id).await.unwrap();
    assert_eq!(f.coord.status_of(&tx.id).await.unwrap(), BridgeTxState::SourceConfirmed);
}

#[tokio::test]
async fn test_security_level_raises_required_depth() {
    let cfg = config::Bridge { security_level: tessera::SecurityLevel::Maximum, ..bridge_config() };
    let f = fixture_with(cfg, MemoryStore::shared(), &["A", "B", "C"], false);
    assert_eq!(f.coord.config().effective_confirmations(), 6);

    let (tx, _) = locked(&f, 500).await;
    f.source.advance_blocks(4);
    f.coord.poll_source(&tx.id).await.unwrap();
    assert_eq!(f.coord.status_of(&tx.id).await.unwrap(), BridgeTxState::PendingSourceConfirmation);
    f.source.advance_blocks(1);
    f.coord.poll_source(&tx.id).await.unwrap();
    assert_eq!(f.coord.status_of(&tx.id).await.unwrap(), BridgeTxState::SourceConfirmed);
}

#[tokio::test]
async fn test_quorum_counts_distinct_validators() {
    let f = fixture();
    let tx = confirmed(&f, 1_000).await;

    assert_eq!(sign(&f, &tx.id, 0).await.unwrap(), ValidationOutcome::Counted { distinct: 1 });
    assert_eq!(f.coord.status_of(&tx.id).await.unwrap(), BridgeTxState::PendingValidation);
    assert_eq!(sign(&f, &tx.id, 1).await.unwrap(), ValidationOutcome::Counted { distinct: 2 });
    assert_eq!(sign(&f, &tx.id, 0).await.unwrap(), ValidationOutcome::Duplicate);
    assert_eq!(f.coord.status_of(&tx.id).await.unwrap(), BridgeTxState::PendingValidation);
    assert_eq!(sign(&f, &tx.id, 2).await.unwrap(), ValidationOutcome::QuorumReached { distinct: 3 });
    assert_eq!(f.coord.status_of(&tx.id).await.unwrap(), BridgeTxState::Validated);

    // Late signer after quorum changes nothing.
    assert!(sign(&f, &tx.id, 3).await.is_err());
    assert_eq!(f.coord.get(&tx.id).await.unwrap().validations.len(), 3);
}

#[tokio::test]
async fn test_bad_and_unknown_signatures_are_discarded() {
    let f = fixture();
    let tx = confirmed(&f, 1_000).await;
    sign(&f, &tx.id, 0).await.unwrap();
    let mut events = f.coord.subscribe();

    let wrong_message = f.validators[1].sign(&[7u8; 32]).unwrap();
    assert!(matches!(
        f.coord.submit_signature(&tx.id, "B", wrong_message).await,
        Err(BridgeError::VerificationFailure(_))
    ));
    let stranger = LocalValidator::new("Z", Arc::new(Dilithium3));
    let message = tx.canonical_message().unwrap();
    assert!(matches!(
        f.coord.submit_signature(&tx.id, "Z", stranger.sign(&message).unwrap()).await,
        Err(BridgeError::UnknownValidator(_))
    ));

    let after = f.coord.get(&tx.id).await.unwrap();
    assert_eq!(after.status, BridgeTxState::PendingValidation);
    assert_eq!(after.validations.len(), 1);
    assert!(f.coord.registry().get("B").unwrap().reputation < 0.5);
    assert!(matches!(events.try_recv(), Ok(BridgeEvent::SignatureRejected { .. })));

    // B can still sign properly afterwards.
    assert_eq!(sign(&f, &tx.id, 1).await.unwrap(), ValidationOutcome::Counted { distinct: 2 });
}

#[tokio::test]
async fn test_inactive_validator_is_not_counted() {
    let f = fixture();
    let tx = confirmed(&f, 1_000).await;
    f.coord.registry().set_active(TOKEN, "A", false).unwrap();
    assert!(matches!(sign(&f, &tx.id, 0).await, Err(BridgeError::VerificationFailure(_))));
    f.coord.registry().set_active(TOKEN, "A", true).unwrap();
    assert_eq!(sign(&f, &tx.id, 0).await.unwrap(), ValidationOutcome::Counted { distinct: 1 });
}

#[tokio::test]
async fn test_source_replay_is_rejected() {
    let f = fixture();
    let (first, hash) = locked(&f, 700).await;
    let mut events = f.coord.subscribe();

    let second = f.coord.initiate(request(700)).unwrap();
    match f.coord.record_source_tx(&second.id, hash).await {
        Err(BridgeError::SourceTxReplayed { existing, .. }) => assert_eq!(existing, first.id),
        other => panic!("expected replay rejection, got {other:?}"),
    }
    assert_eq!(f.coord.status_of(&second.id).await.unwrap(), BridgeTxState::Initiated);
    assert!(matches!(events.try_recv(), Ok(BridgeEvent::ReplayRejected { .. })));

    // Re-recording on the owner is idempotent.
    f.coord.record_source_tx(&first.id, hash).await.expect("idempotent");
}

#[tokio::test]
async fn test_failed_source_receipt_fails_transfer() {
    let f = fixture();
    let (tx, hash) = locked(&f, 700).await;
    f.source.revert(&hash);
    f.coord.poll_source(&tx.id).await.unwrap();
    let failed = f.coord.get(&tx.id).await.unwrap();
    assert_eq!(failed.status, BridgeTxState::Failed);
    assert!(failed.completed_at.is_some());
    assert!(failed.last_error.is_some());
}

#[tokio::test]
async fn test_unreachable_network_is_retried_in_place() {
    let f = fixture();
    let (tx, _) = locked(&f, 700).await;
    f.source.advance_blocks(2);
    f.source.set_available(false);

    let err = f.coord.poll_source(&tx.id).await.expect_err("source is down");
    assert!(err.is_retryable());
    assert_eq!(f.coord.status_of(&tx.id).await.unwrap(), BridgeTxState::PendingSourceConfirmation);

    f.source.set_available(true);
    f.coord.poll_source(&tx.id).await.unwrap();
    assert_eq!(f.coord.status_of(&tx.id).await.unwrap(), BridgeTxState::SourceConfirmed);
}

#[tokio::test]
async fn test_payout_happens_exactly_once() {
    let f = fixture();
    let tx = validated(&f, 2_000).await;

    let (a, b) = futures::join!(f.coord.execute_payout(&tx.id), f.coord.execute_payout(&tx.id));
    let paid: Vec<Hash> = [a.unwrap(), b.unwrap()].into_iter().flatten().collect();
    assert_eq!(paid.len(), 1);
    assert_eq!(f.target.submission_count(), 1);

    let done = f.coord.get(&tx.id).await.unwrap();
    assert_eq!(done.status, BridgeTxState::Completed);
    assert_eq!(done.target_tx_hash, Some(paid[0]));
    assert_eq!(f.coord.execute_payout(&tx.id).await.unwrap(), None);
    assert_eq!(f.target.submission_count(), 1);

    let status = f.coord.status().await.unwrap();
    assert_eq!(status.completed, 1);
    assert_eq!(status.total_bridged, 1_998);
    assert_eq!(status.fees_collected, 2);
}

#[tokio::test]
async fn test_payout_retries_then_completes() {
    let f = fixture();
    let tx = validated(&f, 2_000).await;
    f.target.set_available(false);

    let err = f.coord.execute_payout(&tx.id).await.expect_err("target is down");
    assert!(err.is_retryable());
    let waiting = f.coord.get(&tx.id).await.unwrap();
    assert_eq!(waiting.status, BridgeTxState::Validated);
    assert!(waiting.last_error.is_some());

    f.target.set_available(true);
    assert!(f.coord.execute_payout(&tx.id).await.unwrap().is_some());
    assert_eq!(f.coord.status_of(&tx.id).await.unwrap(), BridgeTxState::Completed);
}

#[tokio::test]
async fn test_rejected_payout_fails_transfer() {
    let f = fixture();
    let tx = validated(&f, 2_000).await;
    f.target.reject_submissions_where(|payload| {
        PayoutInstruction::decode(payload).map(|p| p.target_address == "0xbob").unwrap_or(false)
    });
    assert!(matches!(f.coord.execute_payout(&tx.id).await, Err(BridgeError::InvalidRequest(_))));
    assert_eq!(f.coord.status_of(&tx.id).await.unwrap(), BridgeTxState::Failed);
    assert_eq!(f.target.submission_count(), 0);
}

#[tokio::test]
async fn test_removed_validator_signature_still_audits() {
    let f = fixture();
    let tx = validated(&f, 2_000).await;
    f.coord.registry().remove_validator(TOKEN, "A").expect("remove");
    assert!(f.coord.registry().get("A").is_none());
    assert!(f.coord.execute_payout(&tx.id).await.unwrap().is_some());
    assert_eq!(f.coord.status_of(&tx.id).await.unwrap(), BridgeTxState::Completed);
}

#[tokio::test]
async fn test_stalled_transfers_are_reported_not_failed() {
    let f = fixture();
    let tx = f.coord.initiate(request(300)).unwrap();
    let mut events = f.coord.subscribe();

    f.clock.store(1_000 + 3_599, Ordering::SeqCst);
    assert!(f.coord.stalled().await.is_empty());

    f.clock.store(1_000 + 3_600, Ordering::SeqCst);
    let stalls = f.coord.stalled().await;
    assert_eq!(stalls.len(), 1);
    match &stalls[0] {
        BridgeError::Timeout { id, state, stalled_for_secs } => {
            assert_eq!(id, &tx.id);
            assert_eq!(*state, BridgeTxState::Initiated);
            assert_eq!(*stalled_for_secs, 3_600);
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
    assert!(matches!(events.try_recv(), Ok(BridgeEvent::Stalled { .. })));
    assert_eq!(f.coord.status_of(&tx.id).await.unwrap(), BridgeTxState::Initiated);
}

#[tokio::test]
async fn test_admin_operations_require_token() {
    let f = fixture();
    let tx = f.coord.initiate(request(300)).unwrap();
    assert!(matches!(f.coord.fail_transfer("nope", &tx.id, "manual").await, Err(BridgeError::Unauthorized)));
    assert!(matches!(
        f.coord.registry().add_validator("nope", "E", vec![1, 2, 3], "evm"),
        Err(BridgeError::Unauthorized)
    ));
    f.coord.fail_transfer(TOKEN, &tx.id, "manual").await.expect("authorized");
    assert_eq!(f.coord.status_of(&tx.id).await.unwrap(), BridgeTxState::Failed);
    assert!(matches!(
        f.coord.fail_transfer(TOKEN, &tx.id, "again").await,
        Err(BridgeError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_archived_transfer_keeps_its_source_claim() {
    let f = fixture();
    let (pending, _) = locked(&f, 400).await;
    assert!(matches!(f.coord.archive(&pending.id).await, Err(BridgeError::InvalidRequest(_))));

    let tx = validated(&f, 400).await;
    f.coord.execute_payout(&tx.id).await.unwrap();
    let hash = f.coord.get(&tx.id).await.unwrap().source_tx_hash.unwrap();
    f.coord.archive(&tx.id).await.expect("archive");

    assert!(f.coord.get(&tx.id).await.is_none());
    let archived = f.coord.archived(&tx.id).unwrap().expect("archived record");
    assert_eq!(archived.status, BridgeTxState::Completed);

    let again = f.coord.initiate(request(400)).unwrap();
    assert!(matches!(
        f.coord.record_source_tx(&again.id, hash).await,
        Err(BridgeError::SourceTxReplayed { .. })
    ));
    let status = f.coord.status().await.unwrap();
    assert_eq!(status.archived, 1);
    assert_eq!(status.completed, 1);
    assert!(f.coord.completed_source_hashes_unique().await.unwrap());
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let store = MemoryStore::shared();
    let cfg = bridge_config();
    let (id, hash) = {
        let f = fixture_with(cfg.clone(), store.clone(), &["A", "B", "C"], false);
        assert_eq!(f.coord.config_version(), 1);
        let tx = confirmed(&f, 900).await;
        sign(&f, &tx.id, 0).await.unwrap();
        (tx.id.clone(), f.coord.get(&tx.id).await.unwrap().source_tx_hash.unwrap())
    };

    let reg = registry(&cfg, store.clone());
    assert_eq!(reg.list().len(), 3);
    let coord = BridgeCoordinator::open(&cfg, SimulatedChain::shared("s"), SimulatedChain::shared("t"), reg.clone(), store.clone())
        .expect("reopen");
    assert_eq!(coord.config_version(), 1);
    let tx = coord.get(&id).await.expect("transfer reloaded");
    assert_eq!(tx.status, BridgeTxState::PendingValidation);
    assert_eq!(tx.validations.len(), 1);

    let other = coord.initiate(request(900)).unwrap();
    assert!(matches!(coord.record_source_tx(&other.id, hash).await, Err(BridgeError::SourceTxReplayed { .. })));

    let changed = config::Bridge { validator_threshold: 2, ..cfg };
    let coord = BridgeCoordinator::open(&changed, SimulatedChain::shared("s"), SimulatedChain::shared("t"), reg, store)
        .expect("reopen with new config");
    assert_eq!(coord.config_version(), 2);
}

#[tokio::test]
async fn test_monitor_drives_transfer_to_completion() {
    let f = fixture_with(bridge_config(), MemoryStore::shared(), &["A", "B", "C"], true);
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let monitor = f.coord.clone().spawn_monitor(shutdown_tx.subscribe());

    let (tx, _) = locked(&f, 5_000).await;
    f.source.advance_blocks(2);

    tokio::time::timeout(Duration::from_secs(10), async {
        while f.coord.status_of(&tx.id).await.unwrap() != BridgeTxState::Completed {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("transfer never completed");

    let _ = shutdown_tx.send(());
    tokio::time::timeout(Duration::from_secs(5), monitor).await.expect("monitor ignored shutdown").expect("join");

    let done = f.coord.get(&tx.id).await.unwrap();
    assert_eq!(done.validations.len(), 3);
    assert_eq!(f.target.submission_count(), 1);
    let payload = PayoutInstruction {
        bridge_tx_id: done.id.clone(),
        source_tx_hash: done.source_tx_hash.unwrap(),
        target_address: done.target_address.clone(),
        amount: done.payout_amount(),
        token_symbol: done.token_symbol.clone(),
    };
    assert_eq!(done.target_tx_hash, Some(tessera::blake3_hash(&payload.encode().unwrap())));
}

#[tokio::test]
async fn test_concurrent_signatures_count_each_validator_once() {
    let f = fixture();
    let tx = confirmed(&f, 1_000).await;

    let (a1, a2, b) = futures::join!(sign(&f, &tx.id, 0), sign(&f, &tx.id, 0), sign(&f, &tx.id, 1));
    let outcomes = [a1.unwrap(), a2.unwrap(), b.unwrap()];
    let duplicates = outcomes.iter().filter(|o| **o == ValidationOutcome::Duplicate).count();
    assert_eq!(duplicates, 1, "outcomes: {outcomes:?}");
    let mut counted: Vec<usize> = outcomes
        .iter()
        .filter_map(|o| match o {
            ValidationOutcome::Counted { distinct } => Some(*distinct),
            _ => None,
        })
        .collect();
    counted.sort_unstable();
    assert_eq!(counted, vec![1, 2]);

    let after = f.coord.get(&tx.id).await.unwrap();
    assert_eq!(after.validations.len(), 2);
    assert_eq!(after.status, BridgeTxState::PendingValidation);
}

/// Memory store whose transfer writes can be made to fail.
struct FlakyStore {
    inner: MemoryStore,
    fail_transfers: AtomicBool,
}

impl RecordStore for FlakyStore {
    fn put_raw(&self, cf: &str, key: &[u8], value: &[u8]) -> anyhow::Result<()> {
        if cf == CF_BRIDGE_TX && self.fail_transfers.load(Ordering::SeqCst) {
            anyhow::bail!("disk full");
        }
        self.inner.put_raw(cf, key, value)
    }

    fn get_raw(&self, cf: &str, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        self.inner.get_raw(cf, key)
    }

    fn delete(&self, cf: &str, key: &[u8]) -> anyhow::Result<()> {
        self.inner.delete(cf, key)
    }

    fn scan(&self, cf: &str) -> anyhow::Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.inner.scan(cf)
    }
}

#[tokio::test]
async fn test_collect_signatures_surfaces_persist_failure() {
    let store = Arc::new(FlakyStore { inner: MemoryStore::new(), fail_transfers: AtomicBool::new(false) });
    let f = fixture_with(bridge_config(), store.clone(), &["A", "B", "C"], true);
    let tx = confirmed(&f, 1_000).await;
    sign(&f, &tx.id, 0).await.expect("first signature");

    store.fail_transfers.store(true, Ordering::SeqCst);
    assert!(matches!(f.coord.collect_signatures(&tx.id).await, Err(BridgeError::Storage(_))));
    let stuck = f.coord.get(&tx.id).await.unwrap();
    assert_eq!(stuck.validations.len(), 1, "unpersisted signature is not kept");
    assert_eq!(stuck.status, BridgeTxState::PendingValidation);

    store.fail_transfers.store(false, Ordering::SeqCst);
    assert_eq!(f.coord.collect_signatures(&tx.id).await.unwrap(), 3);
    assert_eq!(f.coord.status_of(&tx.id).await.unwrap(), BridgeTxState::Validated);
}

#[tokio::test]
async fn test_evicted_ledger_lock_keeps_transfer_pending() {
    let ledger_cfg = LedgerConfig { initial_difficulty: 1, difficulty_adjustment_interval: 1_000, ..LedgerConfig::default() };
    let ledger = Arc::new(Ledger::in_memory(ledger_cfg).expect("ledger"));
    let m = Arc::new(Miner::new(2, 256));
    let alice = Keypair::generate();
    let vault = Keypair::generate();
    let miner_addr = Keypair::generate().address();

    let cfg = bridge_config();
    let store = MemoryStore::shared();
    let source: Arc<dyn ChainRpc> = Arc::new(LedgerRpc::new("tessera", ledger.clone()));
    let coord = BridgeCoordinator::open(&cfg, source.clone(), SimulatedChain::shared("target"), registry(&cfg, store.clone()), store)
        .expect("coordinator");

    // Alice locks funds she does not have yet.
    let lock = Transaction::new_signed(&alice, &Dilithium3, vault.address(), 1_000, 0, tessera::unix_now(), 1)
        .expect("sign lock");
    let payload = bincode::serialize(&lock).unwrap();
    let bridge_tx = coord.initiate(request(1_000)).expect("initiate");
    let hash = source.submit_raw_transaction(&payload).await.expect("submit lock");
    coord.record_source_tx(&bridge_tx.id, hash).await.expect("record");

    ledger.mine_block(&m, miner_addr).await.unwrap().expect("solved");
    assert_eq!(ledger.transaction_status(&hash), Some(TxState::Failed));
    coord.poll_source(&bridge_tx.id).await.unwrap();
    assert_eq!(coord.status_of(&bridge_tx.id).await.unwrap(), BridgeTxState::PendingSourceConfirmation);

    // Funded and resubmitted, the very same lock confirms.
    for _ in 0..20 {
        ledger.mine_block(&m, alice.address()).await.unwrap();
    }
    assert_eq!(source.submit_raw_transaction(&payload).await.expect("resubmit"), hash);
    for _ in 0..3 {
        ledger.mine_block(&m, miner_addr).await.unwrap();
    }
    assert_eq!(ledger.confirmations(&hash), Some(3));
    assert_eq!(ledger.balance_of(&vault.address()), 1_000);

    coord.poll_source(&bridge_tx.id).await.unwrap();
    assert_eq!(coord.status_of(&bridge_tx.id).await.unwrap(), BridgeTxState::SourceConfirmed);
}
