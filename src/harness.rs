// harness.rs
// Adversarial driver for the bridge: entangled transfer pairs, replay probes,
// and the checks that turn their outcomes into findings.

use std::collections::HashMap;
use std::sync::Arc;
use futures::future::join_all;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Serialize, Deserialize};
use tracing::{debug, info, warn};

use crate::bridge::{BridgeTransaction, BridgeTxState};
use crate::coordinator::{BridgeCoordinator, TransferRequest};
use crate::crypto::{self, Hash};
use crate::error::BridgeError;
use crate::rpc::{ChainRpc, SimulatedChain};

/// Pipeline passes a single transfer gets before it is judged.
const MAX_ROUNDS: usize = 16;

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// `2^qubits` synthetic addresses are generated. Only a size dial.
    pub qubits: u32,
    pub iterations: usize,
    pub seed: u64,
    pub min_amount: u64,
    pub max_amount: u64,
    pub token_symbol: String,
    /// When set, transfers opened by replay probes are failed afterwards.
    pub admin_token: Option<String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            qubits: 3,
            iterations: 4,
            seed: 7,
            min_amount: 100,
            max_amount: 10_000,
            token_symbol: "TSR".into(),
            admin_token: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FindingKind {
    DoubleCompletion,
    EntanglementBreakage,
    StateDesync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn weight(self) -> f64 {
        match self {
            Severity::Low => 0.1,
            Severity::Medium => 0.25,
            Severity::High => 0.5,
            Severity::Critical => 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub severity: Severity,
    pub transaction_ids: Vec<String>,
    pub detail: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarnessReport {
    pub findings: Vec<Finding>,
    pub transfers_executed: usize,
    pub pairs_probed: usize,
    pub replay_probes: usize,
    /// 1.0 means nothing was found; each finding subtracts its weight per probe.
    pub resistance_score: f64,
}

impl HarnessReport {
    pub fn has(&self, kind: FindingKind) -> bool {
        self.findings.iter().any(|f| f.kind == kind)
    }
}

/// `2^qubits` deterministic addresses, paired as (0,1), (2,3), ...
pub fn entangled_pairs(qubits: u32, seed: u64) -> Vec<(String, String)> {
    let count = 1usize << qubits.clamp(1, 16);
    let addresses: Vec<String> = (0..count as u64)
        .map(|i| hex::encode(crypto::blake3_hash_parts(&[&b"harness"[..], &seed.to_le_bytes(), &i.to_le_bytes()])))
        .collect();
    addresses.chunks(2).map(|p| (p[0].clone(), p[1].clone())).collect()
}

pub struct Harness {
    coordinator: Arc<BridgeCoordinator>,
    source: Arc<SimulatedChain>,
    cfg: HarnessConfig,
}

impl Harness {
    /// `source` must be the chain the coordinator reads source receipts from.
    pub fn new(coordinator: Arc<BridgeCoordinator>, source: Arc<SimulatedChain>, cfg: HarnessConfig) -> Self {
        Self { coordinator, source, cfg }
    }

    /// Initiate, fund on the source chain and drive one transfer until it is
    /// terminal or out of rounds.
    async fn drive(&self, source_address: &str, target_address: &str, amount: u64) -> Result<BridgeTransaction, BridgeError> {
        let tx = self.coordinator.initiate(TransferRequest {
            source_address: source_address.to_string(),
            target_address: target_address.to_string(),
            amount,
            token_symbol: self.cfg.token_symbol.clone(),
        })?;
        let mut payload = tx.id.as_bytes().to_vec();
        payload.extend_from_slice(&amount.to_le_bytes());
        let source_hash = self.source.submit_raw_transaction(&payload).await?;
        self.coordinator.record_source_tx(&tx.id, source_hash).await?;
        self.source.advance_blocks(self.coordinator.config().effective_confirmations());

        for _ in 0..MAX_ROUNDS {
            match self.coordinator.advance(&tx.id).await {
                Ok(state) if state.is_terminal() => break,
                Ok(_) => {}
                Err(e) if e.is_retryable() => debug!(bridge_tx = %tx.id, "retrying after {}", e),
                Err(e) => {
                    debug!(bridge_tx = %tx.id, "pipeline error: {}", e);
                    if self.coordinator.status_of(&tx.id).await?.is_terminal() {
                        break;
                    }
                }
            }
        }
        self.coordinator
            .get(&tx.id)
            .await
            .ok_or_else(|| BridgeError::NotFound(tx.id.clone()))
    }

    /// Try to bind an already-claimed source hash to a fresh transfer.
    async fn replay_probe(&self, victim: &BridgeTransaction, findings: &mut Vec<Finding>) -> Result<(), BridgeError> {
        let Some(hash) = victim.source_tx_hash else { return Ok(()) };
        let copy = self.coordinator.initiate(TransferRequest {
            source_address: victim.source_address.clone(),
            target_address: victim.target_address.clone(),
            amount: victim.amount,
            token_symbol: victim.token_symbol.clone(),
        })?;
        match self.coordinator.record_source_tx(&copy.id, hash).await {
            Err(BridgeError::SourceTxReplayed { .. }) => {}
            Ok(()) => findings.push(Finding {
                kind: FindingKind::DoubleCompletion,
                severity: Severity::Critical,
                transaction_ids: vec![victim.id.clone(), copy.id.clone()],
                detail: format!("source tx {} accepted by a second transfer", hex::encode(hash)),
            }),
            Err(e) => return Err(e),
        }
        if let Some(token) = &self.cfg.admin_token {
            let _ = self.coordinator.fail_transfer(token, &copy.id, "replay probe").await;
        }
        Ok(())
    }

    pub async fn run(&self) -> Result<HarnessReport, BridgeError> {
        let pairs = entangled_pairs(self.cfg.qubits, self.cfg.seed);
        let mut rng = StdRng::seed_from_u64(self.cfg.seed);
        let (lo, hi) = (self.cfg.min_amount, self.cfg.max_amount.max(self.cfg.min_amount));
        let mut report = HarnessReport::default();
        info!(pairs = pairs.len(), iterations = self.cfg.iterations, "harness started");

        for iteration in 0..self.cfg.iterations {
            let amount = rng.gen_range(lo..=hi);
            let outcomes = join_all(pairs.iter().map(|(x, y)| async move {
                let (a, b) = futures::join!(self.drive(x, y, amount), self.drive(y, x, amount));
                (a, b)
            }))
            .await;

            for (a, b) in outcomes {
                let (a, b) = (a?, b?);
                report.transfers_executed += 2;
                report.pairs_probed += 1;
                check_pair(&a, &b, &mut report.findings);
                check_consistency(&a, self.coordinator.config().validator_threshold, &mut report.findings);
                check_consistency(&b, self.coordinator.config().validator_threshold, &mut report.findings);
                if iteration == 0 || a.status == BridgeTxState::Completed {
                    self.replay_probe(&a, &mut report.findings).await?;
                    report.replay_probes += 1;
                }
            }
        }

        let everything = self.coordinator.list().await;
        check_double_completion(&everything, &mut report.findings);
        if !self.coordinator.completed_source_hashes_unique().await? && !report.has(FindingKind::DoubleCompletion) {
            report.findings.push(Finding {
                kind: FindingKind::DoubleCompletion,
                severity: Severity::Critical,
                transaction_ids: Vec::new(),
                detail: "archived transfers share a source hash".into(),
            });
        }

        report.resistance_score = resistance_score(&report.findings, report.pairs_probed + report.replay_probes);
        for f in &report.findings {
            warn!(kind = ?f.kind, severity = ?f.severity, ids = ?f.transaction_ids, "{}", f.detail);
        }
        info!(score = report.resistance_score, findings = report.findings.len(), "harness finished");
        Ok(report)
    }
}

/// Both halves of an entangled pair must end in the same terminal state.
pub fn check_pair(a: &BridgeTransaction, b: &BridgeTransaction, findings: &mut Vec<Finding>) {
    if a.status == b.status && a.status.is_terminal() {
        return;
    }
    let severity = if a.status.is_terminal() && b.status.is_terminal() { Severity::High } else { Severity::Medium };
    findings.push(Finding {
        kind: FindingKind::EntanglementBreakage,
        severity,
        transaction_ids: vec![a.id.clone(), b.id.clone()],
        detail: format!("symmetric transfers ended {} and {}", a.status, b.status),
    });
}

/// A record's fields must agree with the state it claims to be in.
pub fn check_consistency(tx: &BridgeTransaction, threshold: usize, findings: &mut Vec<Finding>) {
    let problem = match tx.status {
        BridgeTxState::Completed if tx.target_tx_hash.is_none() => Some("completed without a target transaction"),
        BridgeTxState::Validated | BridgeTxState::Completed if tx.validations.len() < threshold => {
            Some("validated below the signature threshold")
        }
        BridgeTxState::Initiated if tx.source_tx_hash.is_some() => Some("source hash recorded while still initiated"),
        s if s != BridgeTxState::Initiated && tx.source_tx_hash.is_none() => Some("advanced without a source transaction"),
        _ => None,
    };
    if let Some(problem) = problem {
        findings.push(Finding {
            kind: FindingKind::StateDesync,
            severity: Severity::High,
            transaction_ids: vec![tx.id.clone()],
            detail: problem.to_string(),
        });
    }
}

/// No source hash may back more than one completed transfer.
pub fn check_double_completion(transfers: &[BridgeTransaction], findings: &mut Vec<Finding>) {
    let mut by_source: HashMap<Hash, Vec<String>> = HashMap::new();
    for tx in transfers.iter().filter(|t| t.status == BridgeTxState::Completed) {
        if let Some(hash) = tx.source_tx_hash {
            by_source.entry(hash).or_default().push(tx.id.clone());
        }
    }
    for (hash, ids) in by_source {
        if ids.len() > 1 {
            findings.push(Finding {
                kind: FindingKind::DoubleCompletion,
                severity: Severity::Critical,
                transaction_ids: ids,
                detail: format!("source tx {} completed more than once", hex::encode(hash)),
            });
        }
    }
}

pub fn resistance_score(findings: &[Finding], probes: usize) -> f64 {
    if probes == 0 {
        return if findings.is_empty() { 1.0 } else { 0.0 };
    }
    let penalty: f64 = findings.iter().map(|f| f.severity.weight()).sum();
    (1.0 - penalty / probes as f64).clamp(0.0, 1.0)
}
