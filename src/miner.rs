use crate::{block::Block, crypto, ledger::{Ledger, LedgerEvent}, metrics};
use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast::Receiver;
use tokio::{task, time::{self, Duration}};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinerState {
    Idle,
    Running,
}

/// Result of one search. Being stopped is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiningOutcome {
    Solved(Block),
    Stopped,
}

/// Proof-of-work search over a block template.
///
/// Worker `i` of `n` tries nonces `i, i + n, i + 2n, ...` so no two workers
/// hash the same header. The first solution stops every worker; a stop request
/// is honoured within one batch of hash attempts.
pub struct Miner {
    threads: usize,
    batch_size: u64,
    cancel: Mutex<Arc<AtomicBool>>,
    running: AtomicBool,
}

impl Miner {
    pub fn new(threads: usize, batch_size: u64) -> Self {
        Self {
            threads: threads.max(1),
            batch_size: batch_size.max(1),
            cancel: Mutex::new(Arc::new(AtomicBool::new(false))),
            running: AtomicBool::new(false),
        }
    }

    pub fn from_config(cfg: &crate::config::Mining) -> Self {
        Self::new(cfg.threads, cfg.batch_size)
    }

    pub fn state(&self) -> MinerState {
        if self.running.load(Ordering::Acquire) {
            MinerState::Running
        } else {
            MinerState::Idle
        }
    }

    /// Ask the current search to give up. Workers notice at their next batch boundary.
    pub fn stop(&self) {
        self.cancel.lock().store(true, Ordering::Release);
    }

    /// Install a fresh cancel flag for the next search. Taken before the
    /// search is handed to another thread so an early `stop` is not lost.
    fn arm(&self) -> Arc<AtomicBool> {
        let cancel = Arc::new(AtomicBool::new(false));
        *self.cancel.lock() = cancel.clone();
        self.running.store(true, Ordering::Release);
        cancel
    }

    /// Blocking search. Returns once a worker solves the template or the
    /// search is stopped.
    pub fn solve(&self, template: Block) -> MiningOutcome {
        let cancel = self.arm();
        self.search(template, cancel)
    }

    fn search(&self, template: Block, cancel: Arc<AtomicBool>) -> MiningOutcome {
        let started = std::time::Instant::now();
        debug!(height = template.index, difficulty = template.difficulty, threads = self.threads, "search started");

        let found: Mutex<Option<(u64, crypto::Hash)>> = Mutex::new(None);
        let header = template.header_bytes();
        let step = self.threads as u64;
        let batch = self.batch_size;
        let difficulty = template.difficulty;

        std::thread::scope(|s| {
            for worker in 0..self.threads {
                let (cancel, found, mut header) = (&cancel, &found, header.clone());
                s.spawn(move || {
                    let mut nonce = worker as u64;
                    let off = Block::NONCE_OFFSET;
                    loop {
                        for _ in 0..batch {
                            header[off..off + 8].copy_from_slice(&nonce.to_le_bytes());
                            let hash = crypto::blake3_hash(&header);
                            if Block::meets_difficulty(&hash, difficulty) {
                                let mut slot = found.lock();
                                if slot.is_none() {
                                    *slot = Some((nonce, hash));
                                }
                                cancel.store(true, Ordering::Release);
                                return;
                            }
                            nonce = nonce.wrapping_add(step);
                        }
                        metrics::MINING_ATTEMPTS.inc_by(batch);
                        if cancel.load(Ordering::Acquire) {
                            return;
                        }
                    }
                });
            }
        });

        self.running.store(false, Ordering::Release);
        match found.into_inner() {
            Some((nonce, hash)) => {
                let mut block = template;
                block.nonce = nonce;
                block.hash = hash;
                metrics::MINING_FOUND.inc();
                metrics::MINING_SOLVE_TIME_MS.observe(started.elapsed().as_secs_f64() * 1000.0);
                debug!(height = block.index, nonce, "template solved");
                MiningOutcome::Solved(block)
            }
            None => {
                debug!(height = template.index, "search stopped");
                MiningOutcome::Stopped
            }
        }
    }

    /// Run [`solve`](Self::solve) on the blocking pool.
    pub async fn start(self: &Arc<Self>, template: Block) -> Result<MiningOutcome> {
        let me = self.clone();
        let cancel = self.arm();
        Ok(task::spawn_blocking(move || me.search(template, cancel)).await?)
    }
}

/// Background mining loop: assemble, solve, append, repeat until shutdown.
/// A block appended by someone else at the same height abandons the search.
pub fn spawn(
    ledger: Arc<Ledger>,
    miner: Arc<Miner>,
    reward_to: crypto::Address,
    mut shutdown_rx: Receiver<()>,
) -> task::JoinHandle<()> {
    task::spawn(async move {
        let mut events = ledger.subscribe();
        let mut consecutive_failures = 0u32;
        info!(address = %hex::encode(reward_to), "miner started");
        loop {
            let template = ledger.block_template(reward_to);
            let height = template.index;
            let worker = miner.clone();
            let cancel = miner.arm();
            let mut search = task::spawn_blocking(move || worker.search(template, cancel));

            let joined = loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        miner.stop();
                        let _ = (&mut search).await;
                        info!("miner received shutdown signal");
                        return;
                    }
                    ev = events.recv() => match ev {
                        Some(LedgerEvent::BlockAppended { index, .. }) if index >= height => {
                            debug!(height, "tip moved, abandoning search");
                            miner.stop();
                        }
                        None => {
                            miner.stop();
                            let _ = (&mut search).await;
                            return;
                        }
                        _ => {}
                    },
                    res = &mut search => break res,
                }
            };

            match joined {
                Ok(MiningOutcome::Solved(block)) => match ledger.append_block(block) {
                    Ok(()) => consecutive_failures = 0,
                    Err(e) => {
                        consecutive_failures += 1;
                        warn!("mined block was not appended: {}", e);
                    }
                },
                Ok(MiningOutcome::Stopped) => {}
                Err(e) => {
                    consecutive_failures += 1;
                    error!("mining worker failed: {}", e);
                }
            }

            if consecutive_failures > 0 {
                // Exponential backoff after each failure.
                let backoff = Duration::from_secs(2u64.pow(consecutive_failures.min(6)));
                tokio::select! {
                    _ = shutdown_rx.recv() => return,
                    _ = time::sleep(backoff) => {}
                }
            }
        }
    })
}
