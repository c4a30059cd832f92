use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Serialize, Deserialize};
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tokio::{task, time::{self, Duration}};
use tracing::{debug, info, warn};

use crate::bridge::{
    BridgeConfig, BridgeEvent, BridgeStatus, BridgeTransaction, BridgeTxState, ValidationOutcome,
};
use crate::crypto::Hash;
use crate::error::BridgeError;
use crate::events::EventBus;
use crate::metrics;
use crate::rpc::ChainRpc;
use crate::storage::{RecordStore, RecordStoreExt, CF_BRIDGE_ARCHIVE, CF_BRIDGE_CLAIMS, CF_BRIDGE_CONFIG, CF_BRIDGE_TX};
use crate::validator::{ValidatorNode, ValidatorRegistry};

/// Seconds since the epoch; injectable so stall handling can be exercised.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub source_address: String,
    pub target_address: String,
    pub amount: u64,
    pub token_symbol: String,
}

/// Payload submitted to the target network for a validated transfer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PayoutInstruction {
    pub bridge_tx_id: String,
    pub source_tx_hash: Hash,
    pub target_address: String,
    pub amount: u64,
    pub token_symbol: String,
}

impl PayoutInstruction {
    pub fn encode(&self) -> Result<Vec<u8>, BridgeError> {
        bincode::serialize(self).map_err(|e| BridgeError::InvalidRequest(format!("cannot encode payout: {e}")))
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        bincode::deserialize(bytes).ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigVersion {
    version: u32,
    config: BridgeConfig,
}

type Slot = Arc<AsyncMutex<BridgeTransaction>>;

/// Drives bridge transfers from initiation to payout.
///
/// Each transfer sits behind its own async lock; every transition is applied
/// to a copy, persisted, and only then made visible. Transfers with different
/// ids never contend.
pub struct BridgeCoordinator {
    bridge_id: String,
    source_network: String,
    target_network: String,
    config: BridgeConfig,
    config_version: u32,
    poll_interval: Duration,
    source: Arc<dyn ChainRpc>,
    target: Arc<dyn ChainRpc>,
    registry: Arc<ValidatorRegistry>,
    validators: Vec<Arc<dyn ValidatorNode>>,
    transfers: RwLock<HashMap<String, Slot>>,
    /// Source tx hash -> the one transfer allowed to use it.
    source_claims: Mutex<HashMap<Hash, String>>,
    payouts_in_flight: Mutex<HashSet<String>>,
    store: Arc<dyn RecordStore>,
    events: EventBus<BridgeEvent>,
    clock: Clock,
}

fn claim_key(bridge_id: &str, hash: &Hash) -> Vec<u8> {
    format!("{bridge_id}/{}", hex::encode(hash)).into_bytes()
}

fn storage_err(e: anyhow::Error) -> BridgeError {
    BridgeError::Storage(e.to_string())
}

fn rpc<T>(r: Result<T, BridgeError>) -> Result<T, BridgeError> {
    if let Err(e) = &r {
        if e.is_retryable() {
            metrics::BRIDGE_RPC_ERRORS.inc();
        }
    }
    r
}

impl BridgeCoordinator {
    /// Reload persisted transfers and claims for `cfg.bridge_id` and record
    /// the effective configuration version.
    pub fn open(
        cfg: &crate::config::Bridge,
        source: Arc<dyn ChainRpc>,
        target: Arc<dyn ChainRpc>,
        registry: Arc<ValidatorRegistry>,
        store: Arc<dyn RecordStore>,
    ) -> Result<Self> {
        let bridge_id = cfg.bridge_id.clone();
        let config = cfg.bridge_config();

        let config_version = match store.get::<ConfigVersion>(CF_BRIDGE_CONFIG, bridge_id.as_bytes())? {
            Some(stored) if stored.config == config => stored.version,
            previous => {
                let version = previous.map_or(1, |p| p.version + 1);
                store
                    .put(CF_BRIDGE_CONFIG, bridge_id.as_bytes(), &ConfigVersion { version, config: config.clone() })
                    .context("could not persist bridge configuration")?;
                info!(bridge = %bridge_id, version, "bridge configuration recorded");
                version
            }
        };

        let mut transfers = HashMap::new();
        for tx in store.scan_values::<BridgeTransaction>(CF_BRIDGE_TX)? {
            if tx.bridge_id == bridge_id {
                transfers.insert(tx.id.clone(), Arc::new(AsyncMutex::new(tx)));
            }
        }
        let prefix = format!("{bridge_id}/").into_bytes();
        let mut claims = HashMap::new();
        for (key, _) in store.scan(CF_BRIDGE_CLAIMS)? {
            if !key.starts_with(&prefix) {
                continue;
            }
            let Some(owner) = store.get::<String>(CF_BRIDGE_CLAIMS, &key)? else { continue };
            let hash: Hash = hex::decode(&key[prefix.len()..])
                .ok()
                .and_then(|b| b.try_into().ok())
                .context("malformed source claim key")?;
            claims.insert(hash, owner);
        }
        if !transfers.is_empty() {
            info!(bridge = %bridge_id, transfers = transfers.len(), claims = claims.len(), "bridge state loaded");
        }

        Ok(Self {
            bridge_id,
            source_network: cfg.source_network.clone(),
            target_network: cfg.target_network.clone(),
            config,
            config_version,
            poll_interval: Duration::from_secs(cfg.poll_interval_secs.max(1)),
            source,
            target,
            registry,
            validators: Vec::new(),
            transfers: RwLock::new(transfers),
            source_claims: Mutex::new(claims),
            payouts_in_flight: Mutex::new(HashSet::new()),
            store,
            events: EventBus::new(),
            clock: Arc::new(crate::unix_now),
        })
    }

    pub fn with_validators(mut self, validators: Vec<Arc<dyn ValidatorNode>>) -> Self {
        self.validators = validators;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn bridge_id(&self) -> &str {
        &self.bridge_id
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn config_version(&self) -> u32 {
        self.config_version
    }

    pub fn registry(&self) -> &Arc<ValidatorRegistry> {
        &self.registry
    }

    pub fn source(&self) -> &Arc<dyn ChainRpc> {
        &self.source
    }

    pub fn target(&self) -> &Arc<dyn ChainRpc> {
        &self.target
    }

    /// Events published after this call, in order, none dropped.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<BridgeEvent> {
        self.events.subscribe()
    }

    fn now(&self) -> u64 {
        (self.clock)()
    }

    fn slot(&self, id: &str) -> Result<Slot, BridgeError> {
        self.transfers
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(id.to_string()))
    }

    fn slots(&self) -> Vec<Slot> {
        self.transfers.read().values().cloned().collect()
    }

    fn persist(&self, tx: &BridgeTransaction) -> Result<(), BridgeError> {
        self.store.put(CF_BRIDGE_TX, tx.id.as_bytes(), tx).map_err(storage_err)
    }

    /// Persist `next`, then publish it as the transfer's state.
    fn commit(&self, current: &mut BridgeTransaction, next: BridgeTransaction) -> Result<(), BridgeError> {
        self.persist(&next)?;
        let (from, to) = (current.status, next.status);
        *current = next;
        if from != to {
            info!(bridge_tx = %current.id, %from, %to, "transfer advanced");
            match to {
                BridgeTxState::Completed => metrics::BRIDGE_COMPLETED.inc(),
                BridgeTxState::Failed => metrics::BRIDGE_FAILED.inc(),
                _ => {}
            }
            self.events.publish(BridgeEvent::StateChanged { id: current.id.clone(), from, to });
        }
        Ok(())
    }

    pub fn initiate(&self, req: TransferRequest) -> Result<BridgeTransaction, BridgeError> {
        self.config.check_amount(req.amount)?;
        if req.source_address.is_empty() || req.target_address.is_empty() {
            return Err(BridgeError::InvalidRequest("source and target addresses are required".into()));
        }
        let tx = BridgeTransaction::new(
            &self.bridge_id,
            &self.source_network,
            &self.target_network,
            &req.source_address,
            &req.target_address,
            req.amount,
            self.config.fee_for(req.amount),
            &req.token_symbol,
            self.now(),
        );
        self.persist(&tx)?;
        self.transfers.write().insert(tx.id.clone(), Arc::new(AsyncMutex::new(tx.clone())));
        metrics::BRIDGE_INITIATED.inc();
        info!(bridge_tx = %tx.id, amount = tx.amount, target = %tx.target_address, "transfer initiated");
        Ok(tx)
    }

    /// Bind a source-chain transaction to a transfer. A hash already bound to
    /// another transfer, archived or not, is refused.
    pub async fn record_source_tx(&self, id: &str, hash: Hash) -> Result<(), BridgeError> {
        let slot = self.slot(id)?;
        let mut tx = slot.lock().await;
        let mut claims = self.source_claims.lock();
        if let Some(owner) = claims.get(&hash) {
            if owner == id && tx.source_tx_hash == Some(hash) {
                return Ok(());
            }
            metrics::BRIDGE_REPLAY_ATTEMPTS.inc();
            warn!(bridge_tx = id, owner = %owner, "source transaction replay refused");
            let err = BridgeError::SourceTxReplayed { hash: hex::encode(hash), existing: owner.clone() };
            self.events.publish(BridgeEvent::ReplayRejected {
                source_tx_hash: hex::encode(hash),
                existing: owner.clone(),
            });
            return Err(err);
        }
        let mut next = tx.clone();
        next.record_source_tx(hash, self.now())?;
        self.store
            .put(CF_BRIDGE_CLAIMS, &claim_key(&self.bridge_id, &hash), &id.to_string())
            .map_err(storage_err)?;
        claims.insert(hash, id.to_string());
        drop(claims);
        self.commit(&mut tx, next)
    }

    /// Check the source receipt of one transfer awaiting confirmations.
    pub async fn poll_source(&self, id: &str) -> Result<(), BridgeError> {
        let slot = self.slot(id)?;
        let hash = {
            let tx = slot.lock().await;
            if tx.status != BridgeTxState::PendingSourceConfirmation {
                return Ok(());
            }
            tx.source_tx_hash
                .ok_or_else(|| BridgeError::InvalidRequest(format!("transfer {id} has no source transaction")))?
        };
        let Some(receipt) = rpc(self.source.get_transaction_receipt(&hash).await)? else {
            debug!(bridge_tx = id, "source transaction not yet included");
            return Ok(());
        };

        let mut tx = slot.lock().await;
        if tx.status != BridgeTxState::PendingSourceConfirmation {
            return Ok(());
        }
        let now = self.now();
        let mut next = tx.clone();
        if receipt.success {
            next.observe_confirmations(receipt.confirmations, self.config.effective_confirmations(), now)?;
        } else {
            next.fail("source transaction failed on chain", now)?;
        }
        if next != *tx {
            self.commit(&mut tx, next)?;
        }
        Ok(())
    }

    /// Poll every transfer awaiting source confirmations.
    pub async fn poll_source_confirmations(&self) -> Result<(), BridgeError> {
        let ids = self.ids_in(&[BridgeTxState::PendingSourceConfirmation]).await;
        let mut first_err = None;
        for id in ids {
            if let Err(e) = self.poll_source(&id).await {
                warn!(bridge_tx = %id, "source poll failed: {}", e);
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn count_signature(
        &self,
        tx: &mut BridgeTransaction,
        validator_id: &str,
        message: &Hash,
        signature: Vec<u8>,
    ) -> Result<ValidationOutcome, BridgeError> {
        if tx.has_validation_from(validator_id) {
            return Ok(ValidationOutcome::Duplicate);
        }
        let now = self.now();
        let sig = match self.registry.verify_signature(validator_id, message, &signature, now) {
            Ok(sig) => sig,
            Err(e) => {
                warn!(bridge_tx = %tx.id, validator = validator_id, "signature discarded: {}", e);
                self.events.publish(BridgeEvent::SignatureRejected {
                    id: tx.id.clone(),
                    validator_id: validator_id.to_string(),
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };
        let mut next = tx.clone();
        let outcome = next.add_validation(sig, self.config.validator_threshold, now)?;
        self.commit(tx, next)?;
        debug!(bridge_tx = %tx.id, validator = validator_id, ?outcome, "signature counted");
        Ok(outcome)
    }

    fn open_validation(&self, tx: &mut BridgeTransaction) -> Result<(), BridgeError> {
        if tx.status == BridgeTxState::SourceConfirmed {
            let mut next = tx.clone();
            next.begin_validation(self.now())?;
            self.commit(tx, next)?;
        }
        Ok(())
    }

    /// Accept a signature delivered by a validator. Signing twice is a no-op;
    /// a bad signature is discarded and the transfer keeps waiting.
    pub async fn submit_signature(
        &self,
        id: &str,
        validator_id: &str,
        signature: Vec<u8>,
    ) -> Result<ValidationOutcome, BridgeError> {
        let slot = self.slot(id)?;
        let mut tx = slot.lock().await;
        self.open_validation(&mut tx)?;
        if tx.has_validation_from(validator_id) {
            return Ok(ValidationOutcome::Duplicate);
        }
        if tx.status != BridgeTxState::PendingValidation {
            return Err(BridgeError::InvalidTransition { from: tx.status, to: BridgeTxState::Validated });
        }
        let message = tx.canonical_message()?;
        self.count_signature(&mut tx, validator_id, &message, signature)
    }

    /// Ask the attached validator nodes to sign until quorum is reached.
    /// Holds the transfer's lock throughout, so counting is serialized per id.
    pub async fn collect_signatures(&self, id: &str) -> Result<usize, BridgeError> {
        let slot = self.slot(id)?;
        let mut tx = slot.lock().await;
        self.open_validation(&mut tx)?;
        if tx.status != BridgeTxState::PendingValidation {
            return Ok(tx.validations.len());
        }
        let message = tx.canonical_message()?;
        for node in &self.validators {
            if tx.status != BridgeTxState::PendingValidation {
                break;
            }
            if tx.has_validation_from(node.id()) {
                continue;
            }
            match node.sign_attestation(&message).await {
                Ok(signature) => match self.count_signature(&mut tx, node.id(), &message, signature) {
                    // Already logged and published; the next node may still sign.
                    Ok(_) | Err(BridgeError::VerificationFailure(_)) | Err(BridgeError::UnknownValidator(_)) => {}
                    Err(e) => return Err(e),
                },
                Err(e) => warn!(bridge_tx = id, validator = node.id(), "validator did not sign: {}", e),
            }
        }
        Ok(tx.validations.len())
    }

    fn settle_payout(
        &self,
        tx: &mut BridgeTransaction,
        submitted: Result<Hash, BridgeError>,
    ) -> Result<Option<Hash>, BridgeError> {
        let now = self.now();
        match submitted {
            Ok(hash) => {
                let mut next = tx.clone();
                next.record_target_tx(hash, now)?;
                self.commit(tx, next)?;
                Ok(Some(hash))
            }
            Err(e) if e.is_retryable() => {
                let mut next = tx.clone();
                next.last_error = Some(e.to_string());
                self.commit(tx, next)?;
                Err(e)
            }
            Err(e) => {
                let mut next = tx.clone();
                next.fail(format!("payout rejected: {e}"), now)?;
                self.commit(tx, next)?;
                Err(e)
            }
        }
    }

    /// Submit the payout of a validated transfer exactly once. The transfer is
    /// claimed before submission; a failed submission releases the claim.
    pub async fn execute_payout(&self, id: &str) -> Result<Option<Hash>, BridgeError> {
        let slot = self.slot(id)?;
        let payload = {
            let tx = slot.lock().await;
            if tx.status != BridgeTxState::Validated {
                return Ok(None);
            }
            let message = tx.canonical_message()?;
            let audited = tx.validations.iter().filter(|s| self.registry.audit_signature(s, &message)).count();
            if audited < self.config.validator_threshold {
                return Err(BridgeError::VerificationFailure(format!(
                    "{audited} of {} counted signatures audit cleanly",
                    self.config.validator_threshold
                )));
            }
            let instruction = PayoutInstruction {
                bridge_tx_id: tx.id.clone(),
                source_tx_hash: tx.source_tx_hash.unwrap_or_default(),
                target_address: tx.target_address.clone(),
                amount: tx.payout_amount(),
                token_symbol: tx.token_symbol.clone(),
            };
            let payload = instruction.encode()?;
            if !self.payouts_in_flight.lock().insert(tx.id.clone()) {
                return Ok(None);
            }
            payload
        };

        let submitted = rpc(self.target.submit_raw_transaction(&payload).await);
        let mut tx = slot.lock().await;
        let outcome = self.settle_payout(&mut tx, submitted);
        self.payouts_in_flight.lock().remove(id);
        outcome
    }

    /// Execute every validated transfer's payout.
    pub async fn execute_validated(&self) -> Result<usize, BridgeError> {
        let mut done = 0;
        let mut first_err = None;
        for id in self.ids_in(&[BridgeTxState::Validated]).await {
            match self.execute_payout(&id).await {
                Ok(Some(_)) => done += 1,
                Ok(None) => {}
                Err(e) => {
                    warn!(bridge_tx = %id, "payout failed: {}", e);
                    if e.is_retryable() {
                        first_err.get_or_insert(e);
                    }
                }
            }
        }
        first_err.map_or(Ok(done), Err)
    }

    /// One pass of the pipeline for a single transfer.
    pub async fn advance(&self, id: &str) -> Result<BridgeTxState, BridgeError> {
        if self.status_of(id).await? == BridgeTxState::PendingSourceConfirmation {
            self.poll_source(id).await?;
        }
        if matches!(
            self.status_of(id).await?,
            BridgeTxState::SourceConfirmed | BridgeTxState::PendingValidation
        ) {
            self.collect_signatures(id).await?;
        }
        if self.status_of(id).await? == BridgeTxState::Validated {
            self.execute_payout(id).await?;
        }
        self.status_of(id).await
    }

    /// Advance every active transfer once and report stalls. Returns the first
    /// retryable error so the monitor can back off.
    pub async fn tick(&self) -> Result<(), BridgeError> {
        let ids = self.ids_in(&[
            BridgeTxState::PendingSourceConfirmation,
            BridgeTxState::SourceConfirmed,
            BridgeTxState::PendingValidation,
            BridgeTxState::Validated,
        ])
        .await;
        let mut first_err = None;
        for id in ids {
            if let Err(e) = self.advance(&id).await {
                if e.is_retryable() {
                    first_err.get_or_insert(e);
                } else {
                    debug!(bridge_tx = %id, "transfer did not advance: {}", e);
                }
            }
        }
        for stall in self.stalled().await {
            warn!("{}", stall);
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Periodic monitor. Shutdown is only observed between ticks, so a
    /// transition in progress always finishes first.
    pub fn spawn_monitor(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> task::JoinHandle<()> {
        task::spawn(async move {
            let mut consecutive_failures = 0u32;
            info!(bridge = %self.bridge_id, "bridge monitor started");
            loop {
                match self.tick().await {
                    Ok(()) => consecutive_failures = 0,
                    Err(e) => {
                        consecutive_failures += 1;
                        warn!(attempt = consecutive_failures, "bridge tick failed: {}", e);
                    }
                }
                let delay = if consecutive_failures == 0 {
                    self.poll_interval
                } else {
                    Duration::from_secs(2u64.pow(consecutive_failures.min(6))).max(self.poll_interval)
                };
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!(bridge = %self.bridge_id, "bridge monitor stopped");
                        return;
                    }
                    _ = time::sleep(delay) => {}
                }
            }
        })
    }

    /// Transfers idle past the stall timeout. They are reported, never failed.
    pub async fn stalled(&self) -> Vec<BridgeError> {
        let now = self.now();
        let mut out = Vec::new();
        for slot in self.slots() {
            let tx = slot.lock().await;
            let idle = tx.idle_for(now);
            if tx.status.is_terminal() || idle < self.config.stall_timeout_secs {
                continue;
            }
            self.events.publish(BridgeEvent::Stalled {
                id: tx.id.clone(),
                state: tx.status,
                stalled_for_secs: idle,
            });
            out.push(BridgeError::Timeout { id: tx.id.clone(), state: tx.status, stalled_for_secs: idle });
        }
        metrics::BRIDGE_STALLED.set(out.len() as i64);
        out
    }

    /// Operator policy hook: fail a transfer by hand.
    pub async fn fail_transfer(&self, admin_token: &str, id: &str, reason: &str) -> Result<(), BridgeError> {
        self.registry.authorize(admin_token)?;
        let slot = self.slot(id)?;
        let mut tx = slot.lock().await;
        if self.payouts_in_flight.lock().contains(id) {
            return Err(BridgeError::InvalidRequest(format!("payout for {id} is in flight")));
        }
        let mut next = tx.clone();
        next.fail(reason, self.now())?;
        self.commit(&mut tx, next)
    }

    /// Move a finished transfer out of the active set. Its source claim stays.
    pub async fn archive(&self, id: &str) -> Result<(), BridgeError> {
        let slot = self.slot(id)?;
        let tx = slot.lock().await;
        if !tx.status.is_terminal() {
            return Err(BridgeError::InvalidRequest(format!("transfer {id} is still {}", tx.status)));
        }
        self.store.put(CF_BRIDGE_ARCHIVE, id.as_bytes(), &*tx).map_err(storage_err)?;
        self.store.delete(CF_BRIDGE_TX, id.as_bytes()).map_err(storage_err)?;
        self.transfers.write().remove(id);
        info!(bridge_tx = id, status = %tx.status, "transfer archived");
        Ok(())
    }

    pub fn archived(&self, id: &str) -> Result<Option<BridgeTransaction>, BridgeError> {
        self.store.get(CF_BRIDGE_ARCHIVE, id.as_bytes()).map_err(storage_err)
    }

    fn archived_all(&self) -> Result<Vec<BridgeTransaction>, BridgeError> {
        Ok(self
            .store
            .scan_values::<BridgeTransaction>(CF_BRIDGE_ARCHIVE)
            .map_err(storage_err)?
            .into_iter()
            .filter(|t| t.bridge_id == self.bridge_id)
            .collect())
    }

    pub async fn get(&self, id: &str) -> Option<BridgeTransaction> {
        let slot = self.slot(id).ok()?;
        let tx = slot.lock().await;
        Some(tx.clone())
    }

    pub async fn status_of(&self, id: &str) -> Result<BridgeTxState, BridgeError> {
        let slot = self.slot(id)?;
        let tx = slot.lock().await;
        Ok(tx.status)
    }

    async fn ids_in(&self, states: &[BridgeTxState]) -> Vec<String> {
        let mut out = Vec::new();
        for slot in self.slots() {
            let tx = slot.lock().await;
            if states.contains(&tx.status) {
                out.push(tx.id.clone());
            }
        }
        out
    }

    /// Active transfers, oldest first.
    pub async fn list(&self) -> Vec<BridgeTransaction> {
        let mut out = Vec::new();
        for slot in self.slots() {
            out.push(slot.lock().await.clone());
        }
        out.sort_by(|a, b| a.initiated_at.cmp(&b.initiated_at).then_with(|| a.id.cmp(&b.id)));
        out
    }

    pub async fn status(&self) -> Result<BridgeStatus, BridgeError> {
        let archived = self.archived_all()?;
        let mut st = BridgeStatus {
            bridge_id: self.bridge_id.clone(),
            config_version: self.config_version,
            archived: archived.len(),
            ..BridgeStatus::default()
        };
        let active = self.list().await;
        st.active = active.len();
        for tx in active.iter().chain(archived.iter()) {
            match tx.status {
                BridgeTxState::Completed => {
                    st.completed += 1;
                    st.total_bridged = st.total_bridged.saturating_add(tx.payout_amount());
                    st.fees_collected = st.fees_collected.saturating_add(tx.fee);
                }
                BridgeTxState::Failed => st.failed += 1,
                _ => st.in_flight += 1,
            }
        }
        Ok(st)
    }

    /// No two completed transfers, active or archived, share a source hash.
    pub async fn completed_source_hashes_unique(&self) -> Result<bool, BridgeError> {
        let mut seen = HashSet::new();
        let archived = self.archived_all()?;
        for tx in self.list().await.iter().chain(archived.iter()) {
            if tx.status != BridgeTxState::Completed {
                continue;
            }
            if let Some(hash) = tx.source_tx_hash {
                if !seen.insert(hash) {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}
