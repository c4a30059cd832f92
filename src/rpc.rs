use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use parking_lot::{Mutex, RwLock};
use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::crypto::{self, Hash};
use crate::error::BridgeError;
use crate::ledger::{Ledger, TxState};
use crate::transaction::Transaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub confirmations: u64,
    pub success: bool,
}

/// Read/submit surface of one external network. Every failure to reach the
/// network is reported as [`BridgeError::NetworkUnavailable`].
#[async_trait::async_trait]
pub trait ChainRpc: Send + Sync {
    fn network(&self) -> &str;
    async fn get_block_height(&self) -> Result<u64, BridgeError>;
    /// `None` while the transaction is unknown or not yet included.
    async fn get_transaction_receipt(&self, hash: &Hash) -> Result<Option<Receipt>, BridgeError>;
    async fn submit_raw_transaction(&self, payload: &[u8]) -> Result<Hash, BridgeError>;
    /// Deployed code at `address`; empty for plain accounts.
    async fn get_code(&self, address: &str) -> Result<Vec<u8>, BridgeError>;
}

type SubmitFilter = Box<dyn Fn(&[u8]) -> bool + Send + Sync>;

#[derive(Default)]
struct SimState {
    height: u64,
    included: HashMap<Hash, u64>,
    reverted: HashSet<Hash>,
    code: HashMap<String, Vec<u8>>,
    submissions: u64,
}

/// In-memory external network. Each accepted submission is mined into its own
/// block; resubmitting the same payload returns the original hash.
pub struct SimulatedChain {
    name: String,
    state: RwLock<SimState>,
    available: RwLock<bool>,
    reject: Mutex<Option<SubmitFilter>>,
}

impl SimulatedChain {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: RwLock::new(SimState::default()),
            available: RwLock::new(true),
            reject: Mutex::new(None),
        }
    }

    pub fn shared(name: &str) -> Arc<Self> {
        Arc::new(Self::new(name))
    }

    pub fn set_available(&self, up: bool) {
        *self.available.write() = up;
    }

    pub fn advance_blocks(&self, n: u64) {
        self.state.write().height += n;
    }

    pub fn height(&self) -> u64 {
        self.state.read().height
    }

    /// Make the receipt of an included transaction report failure.
    pub fn revert(&self, hash: &Hash) {
        self.state.write().reverted.insert(*hash);
    }

    pub fn deploy_code(&self, address: &str, code: Vec<u8>) {
        self.state.write().code.insert(address.to_string(), code);
    }

    /// Refuse submissions for which `f` returns true.
    pub fn reject_submissions_where(&self, f: impl Fn(&[u8]) -> bool + Send + Sync + 'static) {
        *self.reject.lock() = Some(Box::new(f));
    }

    /// Distinct payloads accepted so far.
    pub fn submission_count(&self) -> u64 {
        self.state.read().submissions
    }

    fn ensure_up(&self) -> Result<(), BridgeError> {
        if *self.available.read() {
            Ok(())
        } else {
            Err(BridgeError::NetworkUnavailable(format!("{} rpc unreachable", self.name)))
        }
    }
}

#[async_trait::async_trait]
impl ChainRpc for SimulatedChain {
    fn network(&self) -> &str {
        &self.name
    }

    async fn get_block_height(&self) -> Result<u64, BridgeError> {
        self.ensure_up()?;
        Ok(self.state.read().height)
    }

    async fn get_transaction_receipt(&self, hash: &Hash) -> Result<Option<Receipt>, BridgeError> {
        self.ensure_up()?;
        let st = self.state.read();
        Ok(st.included.get(hash).map(|at| Receipt {
            confirmations: st.height.saturating_sub(*at) + 1,
            success: !st.reverted.contains(hash),
        }))
    }

    async fn submit_raw_transaction(&self, payload: &[u8]) -> Result<Hash, BridgeError> {
        self.ensure_up()?;
        if let Some(f) = self.reject.lock().as_ref() {
            if f(payload) {
                return Err(BridgeError::InvalidRequest(format!("{} rejected the transaction", self.name)));
            }
        }
        let hash = crypto::blake3_hash(payload);
        let mut st = self.state.write();
        if !st.included.contains_key(&hash) {
            st.height += 1;
            let at = st.height;
            st.included.insert(hash, at);
            st.submissions += 1;
            debug!(network = %self.name, height = at, "simulated transaction included");
        }
        Ok(hash)
    }

    async fn get_code(&self, address: &str) -> Result<Vec<u8>, BridgeError> {
        self.ensure_up()?;
        Ok(self.state.read().code.get(address).cloned().unwrap_or_default())
    }
}

/// The local ledger seen through the bridge's RPC surface. Payloads are
/// bincode-encoded signed [`Transaction`]s.
pub struct LedgerRpc {
    name: String,
    ledger: Arc<Ledger>,
}

impl LedgerRpc {
    pub fn new(name: &str, ledger: Arc<Ledger>) -> Self {
        Self { name: name.to_string(), ledger }
    }
}

#[async_trait::async_trait]
impl ChainRpc for LedgerRpc {
    fn network(&self) -> &str {
        &self.name
    }

    async fn get_block_height(&self) -> Result<u64, BridgeError> {
        Ok(self.ledger.height())
    }

    /// An evicted transaction reads as not yet included: the same signed
    /// transfer can be resubmitted and still confirm later.
    async fn get_transaction_receipt(&self, hash: &Hash) -> Result<Option<Receipt>, BridgeError> {
        Ok(match self.ledger.transaction_status(hash) {
            Some(TxState::Confirmed { confirmations }) => Some(Receipt { confirmations, success: true }),
            Some(TxState::Failed) | Some(TxState::Pending) | None => None,
        })
    }

    async fn submit_raw_transaction(&self, payload: &[u8]) -> Result<Hash, BridgeError> {
        let tx: Transaction = bincode::deserialize(payload)
            .map_err(|e| BridgeError::InvalidRequest(format!("undecodable transaction: {e}")))?;
        self.ledger
            .submit_transaction(tx)
            .map_err(|e| BridgeError::InvalidRequest(e.to_string()))
    }

    async fn get_code(&self, _address: &str) -> Result<Vec<u8>, BridgeError> {
        Ok(Vec::new())
    }
}
