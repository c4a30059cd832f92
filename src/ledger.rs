use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use anyhow::{Context, Result};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::block::Block;
use crate::config::LedgerConfig;
use crate::consensus::Schedule;
use crate::crypto::{Address, Amount, Hash, SignatureScheme};
use crate::error::{BlockRejection, ChainError, TxRejection};
use crate::events::EventBus;
use crate::metrics;
use crate::miner::{Miner, MiningOutcome};
use crate::pool::TransactionPool;
use crate::storage::{RecordStore, RecordStoreExt, CF_BLOCK};
use crate::transaction::{Transaction, TxStatus};

/// Where a transaction stands, as seen by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Pending,
    Confirmed { confirmations: u64 },
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    BlockAppended { index: u64, hash: Hash, transactions: usize },
    TransactionAccepted { id: Hash },
    DifficultyAdjusted { height: u64, from: u32, to: u32 },
}

#[derive(Default)]
struct ChainState {
    blocks: Vec<Block>,
    balances: HashMap<Address, Amount>,
    /// Transaction id -> index of the block that confirmed it.
    confirmed: HashMap<Hash, u64>,
    failed: HashSet<Hash>,
    /// Difficulty the next block must carry.
    difficulty: u32,
}

/// Balance changes a block would make, layered over the committed table.
struct BalanceOverlay<'a> {
    base: &'a HashMap<Address, Amount>,
    changed: HashMap<Address, Amount>,
}

impl<'a> BalanceOverlay<'a> {
    fn new(base: &'a HashMap<Address, Amount>) -> Self {
        Self { base, changed: HashMap::new() }
    }

    fn get(&self, a: &Address) -> Amount {
        self.changed.get(a).or_else(|| self.base.get(a)).copied().unwrap_or(0)
    }

    fn debit(&mut self, a: &Address, amount: Amount) -> bool {
        let have = self.get(a);
        match have.checked_sub(amount) {
            Some(left) => {
                self.changed.insert(*a, left);
                true
            }
            None => false,
        }
    }

    fn credit(&mut self, a: &Address, amount: Amount) {
        let next = self.get(a).saturating_add(amount);
        self.changed.insert(*a, next);
    }
}

fn check_genesis(genesis: &Block) -> Result<(), BlockRejection> {
    if genesis.index != 0 {
        return Err(BlockRejection::BadIndex { expected: 0, got: genesis.index });
    }
    if genesis.previous_hash != crate::crypto::ZERO_HASH {
        return Err(BlockRejection::BadPreviousHash);
    }
    if genesis.hash != genesis.compute_hash() {
        return Err(BlockRejection::HashMismatch);
    }
    if genesis.merkle_root != Block::merkle_root_of(&genesis.transactions) {
        return Err(BlockRejection::BadMerkleRoot);
    }
    if !genesis.transactions.is_empty() || genesis.reward != 0 {
        return Err(BlockRejection::BadReward("genesis issues nothing".into()));
    }
    Ok(())
}

/// Every rule a block must pass to extend `prefix`. On success returns the
/// balance entries the block changes.
fn check_successor(
    prefix: &[Block],
    block: &Block,
    cfg: &LedgerConfig,
    scheme: &dyn SignatureScheme,
    balances: &HashMap<Address, Amount>,
    confirmed: &HashMap<Hash, u64>,
    now: u64,
) -> Result<HashMap<Address, Amount>, BlockRejection> {
    let Some(tip) = prefix.last() else {
        return Err(BlockRejection::BadIndex { expected: 0, got: block.index });
    };
    if block.index != tip.index + 1 {
        return Err(BlockRejection::BadIndex { expected: tip.index + 1, got: block.index });
    }
    if block.previous_hash != tip.hash {
        return Err(BlockRejection::BadPreviousHash);
    }
    if block.hash != block.compute_hash() {
        return Err(BlockRejection::HashMismatch);
    }
    let expected = Schedule::from(cfg).difficulty_after(prefix);
    if block.difficulty != expected {
        return Err(BlockRejection::WrongDifficulty { expected, got: block.difficulty });
    }
    if !Block::meets_difficulty(&block.hash, block.difficulty) {
        return Err(BlockRejection::DifficultyNotMet);
    }
    if block.merkle_root != Block::merkle_root_of(&block.transactions) {
        return Err(BlockRejection::BadMerkleRoot);
    }
    if block.timestamp < tip.timestamp || block.timestamp > now.saturating_add(cfg.max_future_block_time) {
        return Err(BlockRejection::BadTimestamp);
    }
    if block.reward != cfg.block_reward {
        return Err(BlockRejection::BadReward(format!(
            "block claims {} but the reward is {}",
            block.reward, cfg.block_reward
        )));
    }
    let Some((reward_tx, user_txs)) = block.transactions.split_first() else {
        return Err(BlockRejection::BadReward("missing reward transaction".into()));
    };
    if !reward_tx.is_reward() {
        return Err(BlockRejection::BadReward("first transaction must be the reward".into()));
    }
    if user_txs.len() > cfg.max_transactions_per_block {
        return Err(BlockRejection::TooManyTransactions {
            max: cfg.max_transactions_per_block,
            got: user_txs.len(),
        });
    }

    let mut overlay = BalanceOverlay::new(balances);
    let mut seen: HashSet<Hash> = HashSet::with_capacity(block.transactions.len());
    for (i, tx) in block.transactions.iter().enumerate() {
        let reject = |reason| BlockRejection::InvalidTransaction { index: i, reason };
        if i > 0 && tx.is_reward() {
            return Err(reject(TxRejection::UnexpectedReward));
        }
        tx.check_well_formed(scheme).map_err(reject)?;
        if confirmed.contains_key(&tx.id) {
            return Err(reject(TxRejection::AlreadyConfirmed));
        }
        if !seen.insert(tx.id) {
            return Err(reject(TxRejection::Duplicate));
        }
        if let Some(from) = &tx.from {
            let debit = tx.total_debit().ok_or_else(|| reject(TxRejection::InsufficientBalance))?;
            if !overlay.debit(from, debit) {
                return Err(reject(TxRejection::InsufficientBalance));
            }
            overlay.credit(&tx.to, tx.amount);
        }
    }

    // The reward is credited after user transfers so a miner cannot spend
    // it inside the block that issues it.
    let owed = block
        .reward
        .checked_add(block.fees())
        .ok_or_else(|| BlockRejection::BadReward("reward overflows".into()))?;
    if reward_tx.amount != owed || reward_tx.fee != 0 {
        return Err(BlockRejection::BadReward(format!(
            "reward transaction pays {} but {} is owed",
            reward_tx.amount, owed
        )));
    }
    if reward_tx.to != block.miner || reward_tx.nonce != block.index {
        return Err(BlockRejection::BadReward("reward transaction does not match the block".into()));
    }
    overlay.credit(&reward_tx.to, reward_tx.amount);
    Ok(overlay.changed)
}

/// Replays `chain` from genesis and checks every block against its prefix.
/// An empty chain is trivially valid.
pub fn validate_chain(
    chain: &[Block],
    cfg: &LedgerConfig,
    scheme: &dyn SignatureScheme,
) -> Result<(), ChainError> {
    replay(chain, cfg, scheme).map(|_| ())
}

fn replay(chain: &[Block], cfg: &LedgerConfig, scheme: &dyn SignatureScheme) -> Result<ChainState, ChainError> {
    let mut st = ChainState { difficulty: Schedule::from(cfg).initial_difficulty, ..ChainState::default() };
    let Some(genesis) = chain.first() else {
        return Ok(st);
    };
    check_genesis(genesis)?;
    let now = crate::unix_now();
    for i in 1..chain.len() {
        let block = &chain[i];
        let changed = check_successor(&chain[..i], block, cfg, scheme, &st.balances, &st.confirmed, now)?;
        st.balances.extend(changed);
        for tx in &block.transactions {
            st.confirmed.insert(tx.id, block.index);
        }
    }
    st.blocks = chain.to_vec();
    st.difficulty = Schedule::from(cfg).difficulty_after(chain);
    Ok(st)
}

/// Block store, pool and balance table behind one handle.
///
/// Appends are exclusive writers on the chain; balance and status queries are
/// concurrent readers. The pool has its own lock, always taken after the chain's.
pub struct Ledger {
    cfg: LedgerConfig,
    schedule: Schedule,
    chain: RwLock<ChainState>,
    pool: TransactionPool,
    scheme: Arc<dyn SignatureScheme>,
    store: Arc<dyn RecordStore>,
    events: EventBus<LedgerEvent>,
}

impl Ledger {
    /// Load and fully validate the stored chain, or create genesis when the
    /// store is empty.
    pub fn open(cfg: LedgerConfig, scheme: Arc<dyn SignatureScheme>, store: Arc<dyn RecordStore>) -> Result<Self> {
        cfg.validate()?;
        let schedule = Schedule::from(&cfg);
        let stored: Vec<Block> = store.scan_values(CF_BLOCK).context("could not read stored blocks")?;
        let state = if stored.is_empty() {
            let genesis = Block::genesis(crate::unix_now(), schedule.initial_difficulty);
            store
                .put(CF_BLOCK, &genesis.index.to_be_bytes(), &genesis)
                .context("could not persist genesis block")?;
            info!(hash = %hex::encode(genesis.hash), difficulty = genesis.difficulty, "genesis block created");
            ChainState { blocks: vec![genesis], difficulty: schedule.initial_difficulty, ..ChainState::default() }
        } else {
            let st = replay(&stored, &cfg, scheme.as_ref()).context("stored chain failed validation")?;
            info!(height = st.blocks.len() - 1, "chain loaded");
            st
        };
        metrics::CHAIN_HEIGHT.set(state.blocks.len() as i64 - 1);
        metrics::DIFFICULTY.set(state.difficulty as i64);
        Ok(Self {
            cfg,
            schedule,
            chain: RwLock::new(state),
            pool: TransactionPool::new(),
            scheme,
            store,
            events: EventBus::new(),
        })
    }

    /// Throwaway ledger over a [`MemoryStore`](crate::storage::MemoryStore) with Dilithium3 keys.
    pub fn in_memory(cfg: LedgerConfig) -> Result<Self> {
        Self::open(cfg, Arc::new(crate::crypto::Dilithium3), crate::storage::MemoryStore::shared())
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.cfg
    }

    pub fn scheme(&self) -> Arc<dyn SignatureScheme> {
        self.scheme.clone()
    }

    pub fn pool(&self) -> &TransactionPool {
        &self.pool
    }

    /// Events published after this call, in order, none dropped.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<LedgerEvent> {
        self.events.subscribe()
    }

    pub fn append_block(&self, block: Block) -> Result<(), ChainError> {
        let mut st = self.chain.write();
        let changed = match check_successor(
            &st.blocks,
            &block,
            &self.cfg,
            self.scheme.as_ref(),
            &st.balances,
            &st.confirmed,
            crate::unix_now(),
        ) {
            Ok(c) => c,
            Err(reason) => {
                metrics::BLOCKS_REJECTED.inc();
                warn!(index = block.index, %reason, "block rejected");
                return Err(reason.into());
            }
        };
        self.store
            .put(CF_BLOCK, &block.index.to_be_bytes(), &block)
            .map_err(|e| ChainError::Storage(e.to_string()))?;

        let ids: Vec<Hash> = block.transactions.iter().map(|t| t.id).collect();
        st.balances.extend(changed);
        for id in &ids {
            st.confirmed.insert(*id, block.index);
            st.failed.remove(id);
        }
        let (index, hash, count) = (block.index, block.hash, block.transactions.len());
        st.blocks.push(block);
        let previous = st.difficulty;
        st.difficulty = self.schedule.difficulty_after(&st.blocks);
        self.pool.remove(&ids);

        metrics::BLOCKS_APPENDED.inc();
        metrics::CHAIN_HEIGHT.set(index as i64);
        metrics::DIFFICULTY.set(st.difficulty as i64);
        info!(height = index, hash = %hex::encode(hash), txs = count, "block appended");
        self.events.publish(LedgerEvent::BlockAppended { index, hash, transactions: count });
        if previous != st.difficulty {
            info!(height = index, from = previous, to = st.difficulty, "difficulty adjusted");
            self.events.publish(LedgerEvent::DifficultyAdjusted { height: index, from: previous, to: st.difficulty });
        }
        Ok(())
    }

    pub fn is_chain_valid(&self) -> bool {
        let blocks = self.blocks();
        match validate_chain(&blocks, &self.cfg, self.scheme.as_ref()) {
            Ok(()) => true,
            Err(e) => {
                warn!("chain audit failed: {}", e);
                false
            }
        }
    }

    pub fn balance_of(&self, address: &Address) -> Amount {
        self.chain.read().balances.get(address).copied().unwrap_or(0)
    }

    /// Sum of every balance; equals the rewards issued on a valid chain.
    pub fn total_supply(&self) -> Amount {
        self.chain.read().balances.values().fold(0u64, |acc, b| acc.saturating_add(*b))
    }

    /// Recompute the difficulty the next block must carry from the chain
    /// itself and return it.
    pub fn adjust_difficulty(&self) -> u32 {
        let mut st = self.chain.write();
        let next = self.schedule.difficulty_after(&st.blocks);
        if next != st.difficulty {
            debug!(from = st.difficulty, to = next, "difficulty recomputed");
            st.difficulty = next;
            metrics::DIFFICULTY.set(next as i64);
        }
        next
    }

    pub fn difficulty(&self) -> u32 {
        self.chain.read().difficulty
    }

    fn admit(&self, tx: &mut Transaction) -> Result<Hash, TxRejection> {
        if tx.is_reward() {
            return Err(TxRejection::UnexpectedReward);
        }
        tx.check_well_formed(self.scheme.as_ref())?;
        tx.status = TxStatus::Pending;
        // Holding the chain read lock keeps an append from confirming this id
        // between the check and the insert.
        let st = self.chain.read();
        if st.confirmed.contains_key(&tx.id) {
            return Err(TxRejection::AlreadyConfirmed);
        }
        self.pool.insert(tx.clone())?;
        Ok(tx.id)
    }

    /// Admit a signed transfer into the pool.
    pub fn submit_transaction(&self, mut tx: Transaction) -> Result<Hash, ChainError> {
        match self.admit(&mut tx) {
            Ok(id) => {
                self.chain.write().failed.remove(&id);
                metrics::TX_ADMITTED.inc();
                debug!(id = %hex::encode(id), "transaction admitted");
                self.events.publish(LedgerEvent::TransactionAccepted { id });
                Ok(id)
            }
            Err(reason) => {
                metrics::TX_REJECTED.inc();
                debug!(id = %hex::encode(tx.id), %reason, "transaction rejected");
                Err(reason.into())
            }
        }
    }

    /// Unsolved block paying `miner`: highest-fee affordable transactions
    /// first, up to the per-block limit.
    ///
    /// A transfer that only becomes affordable through another transfer in
    /// the same block is retried after each pass that picked something.
    /// Whatever is still unaffordable stays pooled while pending credits could
    /// still cover it; otherwise it is evicted and marked failed.
    pub fn block_template(&self, miner: Address) -> Block {
        let pending = self.pool.select_all();
        let (template, evicted) = {
            let st = self.chain.read();
            let Some(tip) = st.blocks.last() else {
                // open() always installs genesis.
                return Block::genesis(crate::unix_now(), self.schedule.initial_difficulty);
            };
            let limit = self.cfg.max_transactions_per_block;
            let mut overlay = BalanceOverlay::new(&st.balances);
            let mut picked = Vec::new();
            let mut evicted = Vec::new();
            let mut queue = Vec::with_capacity(pending.len());
            for tx in &pending {
                if st.confirmed.contains_key(&tx.id) {
                    evicted.push((tx.id, false));
                } else if tx.from.is_some() {
                    queue.push(tx.clone());
                }
            }

            let mut deferred = Vec::new();
            loop {
                let before = picked.len();
                for mut tx in queue.drain(..) {
                    let Some(from) = tx.from else { continue };
                    let fits = picked.len() < limit
                        && tx.total_debit().map(|d| overlay.debit(&from, d)).unwrap_or(false);
                    if fits {
                        overlay.credit(&tx.to, tx.amount);
                        tx.status = TxStatus::Confirmed;
                        picked.push(tx);
                    } else {
                        deferred.push(tx);
                    }
                }
                if picked.len() == before || picked.len() >= limit || deferred.is_empty() {
                    break;
                }
                queue = std::mem::take(&mut deferred);
            }

            if picked.len() < limit {
                // Best case for each sender: committed balance plus every
                // credit still pending anywhere in the pool.
                let mut reachable: HashMap<Address, Amount> = HashMap::new();
                for tx in &pending {
                    if tx.from.is_some() && !st.confirmed.contains_key(&tx.id) {
                        let e = reachable.entry(tx.to).or_insert(0);
                        *e = e.saturating_add(tx.amount);
                    }
                }
                for tx in &deferred {
                    let Some(from) = tx.from else { continue };
                    let ceiling = st.balances.get(&from).copied().unwrap_or(0)
                        .saturating_add(reachable.get(&from).copied().unwrap_or(0));
                    if tx.total_debit().map_or(true, |d| d > ceiling) {
                        evicted.push((tx.id, true));
                    }
                }
            }

            let index = tip.index + 1;
            let timestamp = crate::unix_now().max(tip.timestamp);
            let fees = picked.iter().fold(0u64, |acc, t| acc.saturating_add(t.fee));
            let mut reward = Transaction::reward(miner, self.cfg.block_reward.saturating_add(fees), timestamp, index);
            reward.status = TxStatus::Confirmed;
            let mut txs = Vec::with_capacity(picked.len() + 1);
            txs.push(reward);
            txs.extend(picked);
            let template = Block::template(index, timestamp, tip.hash, st.difficulty, miner, self.cfg.block_reward, txs);
            (template, evicted)
        };

        if !evicted.is_empty() {
            let ids: Vec<Hash> = evicted.iter().map(|(id, _)| *id).collect();
            self.pool.remove(&ids);
            let mut st = self.chain.write();
            for (id, failed) in evicted {
                if failed {
                    debug!(id = %hex::encode(id), "evicting unaffordable transaction");
                    st.failed.insert(id);
                }
            }
        }
        template
    }

    /// Assemble, solve and append one block. `Ok(None)` when the search was stopped.
    pub async fn mine_block(&self, miner: &Arc<Miner>, reward_to: Address) -> Result<Option<Block>> {
        let template = self.block_template(reward_to);
        match miner.start(template).await? {
            MiningOutcome::Solved(block) => {
                self.append_block(block.clone())?;
                Ok(Some(block))
            }
            MiningOutcome::Stopped => Ok(None),
        }
    }

    pub fn transaction_status(&self, id: &Hash) -> Option<TxState> {
        {
            let st = self.chain.read();
            if let Some(index) = st.confirmed.get(id) {
                let confirmations = (st.blocks.len() as u64).saturating_sub(*index);
                return Some(TxState::Confirmed { confirmations });
            }
            if st.failed.contains(id) {
                return Some(TxState::Failed);
            }
        }
        self.pool.contains(id).then_some(TxState::Pending)
    }

    /// Blocks on top of the confirming block, counting that block itself.
    pub fn confirmations(&self, id: &Hash) -> Option<u64> {
        match self.transaction_status(id) {
            Some(TxState::Confirmed { confirmations }) => Some(confirmations),
            _ => None,
        }
    }

    pub fn blocks(&self) -> Vec<Block> {
        self.chain.read().blocks.clone()
    }

    pub fn block(&self, index: u64) -> Option<Block> {
        self.chain.read().blocks.get(index as usize).cloned()
    }

    pub fn tip(&self) -> Option<Block> {
        self.chain.read().blocks.last().cloned()
    }

    /// Index of the tip block.
    pub fn height(&self) -> u64 {
        self.chain.read().blocks.last().map(|b| b.index).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.chain.read().blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }
}
