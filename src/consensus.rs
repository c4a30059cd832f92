use crate::block::Block;
use crate::config::LedgerConfig;

// ---------- Consensus constants (v1) ----------
pub const DIFFICULTY_MIN: u32 = 1;
/// A 32-byte hash has 64 hex nibbles.
pub const DIFFICULTY_MAX: u32 = 64;

/// Retarget inputs taken from the ledger configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Schedule {
    pub initial_difficulty: u32,
    pub adjustment_interval: u64,
    pub target_block_time: u64,
}

impl From<&LedgerConfig> for Schedule {
    fn from(cfg: &LedgerConfig) -> Self {
        Schedule {
            initial_difficulty: cfg.initial_difficulty.clamp(DIFFICULTY_MIN, DIFFICULTY_MAX),
            adjustment_interval: cfg.difficulty_adjustment_interval.max(1),
            target_block_time: cfg.target_block_time,
        }
    }
}

impl Schedule {
    pub fn is_adjustment_height(&self, height: u64) -> bool {
        height > 0 && height % self.adjustment_interval == 0
    }

    /// Difficulty the block after `chain`'s tip must carry.
    /// `chain` is the full chain from genesis, in order.
    pub fn difficulty_after(&self, chain: &[Block]) -> u32 {
        let Some(tip) = chain.last() else {
            return self.initial_difficulty;
        };
        if !self.is_adjustment_height(tip.index) {
            return tip.difficulty;
        }
        let window_start = (tip.index - self.adjustment_interval) as usize;
        let elapsed = match chain.get(window_start) {
            Some(start) => tip.timestamp.saturating_sub(start.timestamp),
            None => return tip.difficulty,
        };
        next_difficulty(tip.difficulty, elapsed, self.adjustment_interval, self.target_block_time)
    }
}

/// Bucket retarget: one step up when the window ran in under half the
/// expected time, one step down when it took more than twice as long.
pub fn next_difficulty(current: u32, actual_secs: u64, interval: u64, target_block_time: u64) -> u32 {
    let expected = interval.saturating_mul(target_block_time);
    let next = if actual_secs.saturating_mul(2) < expected {
        current.saturating_add(1)
    } else if actual_secs > expected.saturating_mul(2) {
        current.saturating_sub(1)
    } else {
        current
    };
    next.clamp(DIFFICULTY_MIN, DIFFICULTY_MAX)
}
