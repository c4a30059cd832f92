use std::collections::HashSet;
use parking_lot::Mutex;

use crate::crypto::Hash;
use crate::error::TxRejection;
use crate::transaction::Transaction;

/// Unconfirmed transactions in arrival order.
///
/// Submission, selection and removal all take the same lock, so a transaction
/// cannot be selected twice or lost between assembly and append.
#[derive(Default)]
pub struct TransactionPool {
    inner: Mutex<PoolInner>,
}

#[derive(Default)]
struct PoolInner {
    queue: Vec<Transaction>,
    ids: HashSet<Hash>,
}

impl TransactionPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tx: Transaction) -> Result<(), TxRejection> {
        let mut inner = self.inner.lock();
        if !inner.ids.insert(tx.id) {
            return Err(TxRejection::Duplicate);
        }
        inner.queue.push(tx);
        Ok(())
    }

    /// Highest fee first, arrival order among equal fees, at most `max` entries.
    /// The pool keeps the transactions until [`remove`](Self::remove) is called.
    pub fn select(&self, max: usize) -> Vec<Transaction> {
        let inner = self.inner.lock();
        let mut picked: Vec<Transaction> = inner.queue.clone();
        // Stable sort keeps arrival order for ties.
        picked.sort_by(|a, b| b.fee.cmp(&a.fee));
        picked.truncate(max);
        picked
    }

    /// Fee-ordered snapshot of everything pending.
    pub fn select_all(&self) -> Vec<Transaction> {
        self.select(usize::MAX)
    }

    pub fn remove(&self, ids: &[Hash]) -> usize {
        let mut inner = self.inner.lock();
        let drop: HashSet<Hash> = ids.iter().copied().filter(|id| inner.ids.contains(id)).collect();
        if drop.is_empty() {
            return 0;
        }
        inner.queue.retain(|t| !drop.contains(&t.id));
        for id in &drop {
            inner.ids.remove(id);
        }
        drop.len()
    }

    pub fn contains(&self, id: &Hash) -> bool {
        self.inner.lock().ids.contains(id)
    }

    pub fn get(&self, id: &Hash) -> Option<Transaction> {
        self.inner.lock().queue.iter().find(|t| &t.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Transaction;

    fn tx(tag: u64, fee: u64) -> Transaction {
        let mut t = Transaction::reward([tag as u8; 32], 10, 0, tag);
        t.fee = fee;
        t.id = t.compute_id();
        t
    }

    #[test]
    fn selects_by_fee_then_arrival() {
        let pool = TransactionPool::new();
        pool.insert(tx(1, 5)).unwrap();
        pool.insert(tx(2, 9)).unwrap();
        pool.insert(tx(3, 5)).unwrap();
        pool.insert(tx(4, 1)).unwrap();
        let picked = pool.select(3);
        let nonces: Vec<u64> = picked.iter().map(|t| t.nonce).collect();
        assert_eq!(nonces, vec![2, 1, 3]);
        assert_eq!(pool.len(), 4, "selection does not drain the pool");
    }

    #[test]
    fn rejects_duplicates_and_removes() {
        let pool = TransactionPool::new();
        let t = tx(7, 1);
        pool.insert(t.clone()).unwrap();
        assert_eq!(pool.insert(t.clone()), Err(TxRejection::Duplicate));
        assert_eq!(pool.remove(&[t.id, [0xAA; 32]]), 1);
        assert!(pool.is_empty());
        assert!(!pool.contains(&t.id));
    }
}
