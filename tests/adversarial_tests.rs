// ADVERSARIAL bridge tests
// Entangled transfer pairs and replay probes driven through the harness.

use std::collections::HashSet;
use std::sync::Arc;
use tessera::{
    config,
    coordinator::{BridgeCoordinator, PayoutInstruction},
    crypto::Dilithium3,
    harness::{entangled_pairs, FindingKind, Harness, HarnessConfig, Severity},
    rpc::SimulatedChain,
    storage::MemoryStore,
    validator::{LocalValidator, ValidatorNode, ValidatorRegistry},
    BridgeTxState,
};

const TOKEN: &str = "harness-admin";

fn harness_setup(target: Arc<SimulatedChain>) -> (Arc<BridgeCoordinator>, Arc<SimulatedChain>) {
    let cfg = config::Bridge {
        required_confirmations: 2,
        validator_threshold: 3,
        admin_token: Some(TOKEN.into()),
        ..config::Bridge::default()
    };
    let store = MemoryStore::shared();
    let registry = Arc::new(
        ValidatorRegistry::open(&cfg.bridge_id, cfg.admin_token.clone(), Arc::new(Dilithium3), store.clone())
            .expect("registry"),
    );
    let mut nodes: Vec<Arc<dyn ValidatorNode>> = Vec::new();
    for name in ["v1", "v2", "v3"] {
        let v = LocalValidator::new(name, Arc::new(Dilithium3));
        registry.add_validator(TOKEN, name, v.public_key(), "evm").expect("add validator");
        nodes.push(Arc::new(v));
    }
    let source = SimulatedChain::shared("source");
    let coord = BridgeCoordinator::open(&cfg, source.clone(), target, registry, store)
        .expect("coordinator")
        .with_validators(nodes);
    (Arc::new(coord), source)
}

fn harness_config() -> HarnessConfig {
    HarnessConfig { qubits: 2, iterations: 2, admin_token: Some(TOKEN.into()), ..HarnessConfig::default() }
}

#[tokio::test]
async fn test_honest_bridge_scores_full_resistance() {
    println!("🧪 Running entangled pairs against an honest bridge...");
    let target = SimulatedChain::shared("target");
    let (coord, source) = harness_setup(target.clone());
    let report = Harness::new(coord.clone(), source, harness_config()).run().await.expect("harness");

    assert!(report.findings.is_empty(), "unexpected findings: {:?}", report.findings);
    assert_eq!(report.resistance_score, 1.0);
    assert_eq!(report.pairs_probed, 4, "two pairs over two iterations");
    assert_eq!(report.transfers_executed, 8);
    assert!(report.replay_probes >= 2);

    let completed = coord.list().await.into_iter().filter(|t| t.status == BridgeTxState::Completed).count();
    assert_eq!(completed, 8);
    assert_eq!(target.submission_count(), 8, "one payout per completed transfer");
    assert!(coord.completed_source_hashes_unique().await.unwrap());
    println!("✅ no findings, score {:.2}", report.resistance_score);
}

#[tokio::test]
async fn test_one_sided_payout_failure_breaks_entanglement() {
    println!("🧪 Rejecting payouts in one direction only...");
    let target = SimulatedChain::shared("target");
    let pairs = entangled_pairs(2, HarnessConfig::default().seed);
    let y_side: HashSet<String> = pairs.iter().map(|(_, y)| y.clone()).collect();
    target.reject_submissions_where(move |payload| {
        PayoutInstruction::decode(payload).map(|p| y_side.contains(&p.target_address)).unwrap_or(false)
    });

    let (coord, source) = harness_setup(target);
    let report = Harness::new(coord.clone(), source, harness_config()).run().await.expect("harness");

    assert!(report.has(FindingKind::EntanglementBreakage));
    assert!(!report.has(FindingKind::DoubleCompletion));
    assert!(report.resistance_score < 1.0);

    let breakage: Vec<_> = report.findings.iter().filter(|f| f.kind == FindingKind::EntanglementBreakage).collect();
    assert_eq!(breakage.len(), report.pairs_probed);
    for finding in breakage {
        assert_eq!(finding.severity, Severity::High, "both halves ended, just differently");
        assert_eq!(finding.transaction_ids.len(), 2);
        let states: HashSet<BridgeTxState> = {
            let mut out = HashSet::new();
            for id in &finding.transaction_ids {
                out.insert(coord.status_of(id).await.expect("known transfer"));
            }
            out
        };
        assert_eq!(states, HashSet::from([BridgeTxState::Completed, BridgeTxState::Failed]));
    }
    println!("✅ {} breakages reported", report.pairs_probed);
}

#[tokio::test]
async fn test_replayed_source_never_completes_twice() {
    let target = SimulatedChain::shared("target");
    let (coord, source) = harness_setup(target);
    let cfg = HarnessConfig { qubits: 1, iterations: 3, ..harness_config() };
    let report = Harness::new(coord.clone(), source, cfg).run().await.expect("harness");

    assert!(report.replay_probes >= 3);
    assert!(!report.has(FindingKind::DoubleCompletion));
    let probes_failed = coord
        .list()
        .await
        .into_iter()
        .filter(|t| t.status == BridgeTxState::Failed && t.source_tx_hash.is_none())
        .count();
    assert_eq!(probes_failed, report.replay_probes, "each probe copy is failed by the operator hook");
}
