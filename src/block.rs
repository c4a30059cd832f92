use serde::{Serialize, Deserialize};
use crate::crypto::{self, Address, Amount, Hash, ZERO_HASH};
use crate::merkle::MerkleTree;
use crate::transaction::Transaction;

pub const BLOCK_VERSION: u16 = 1;

/// An appended block is immutable. Only the genesis constructor and the miner create blocks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    pub index: u64,
    pub timestamp: u64,
    pub transactions: Vec<Transaction>,
    pub previous_hash: Hash,
    pub hash: Hash,
    pub nonce: u64,
    pub difficulty: u32,
    pub merkle_root: Hash,
    pub miner: Address,
    pub reward: Amount,
    pub version: u16,
}

impl Block {
    pub fn genesis(timestamp: u64, difficulty: u32) -> Self {
        let mut block = Block {
            index: 0,
            timestamp,
            transactions: Vec::new(),
            previous_hash: ZERO_HASH,
            hash: ZERO_HASH,
            nonce: 0,
            difficulty,
            merkle_root: ZERO_HASH,
            miner: ZERO_HASH,
            reward: 0,
            version: BLOCK_VERSION,
        };
        block.hash = block.compute_hash();
        block
    }

    /// Unsolved block: merkle root filled in, hash left for the miner.
    pub fn template(
        index: u64,
        timestamp: u64,
        previous_hash: Hash,
        difficulty: u32,
        miner: Address,
        reward: Amount,
        transactions: Vec<Transaction>,
    ) -> Self {
        let merkle_root = Self::merkle_root_of(&transactions);
        let mut block = Block {
            index,
            timestamp,
            transactions,
            previous_hash,
            hash: ZERO_HASH,
            nonce: 0,
            difficulty,
            merkle_root,
            miner,
            reward,
            version: BLOCK_VERSION,
        };
        block.hash = block.compute_hash();
        block
    }

    /// Header fields in hash order, with the nonce at a fixed offset so the
    /// miner can patch it in place.
    pub fn header_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(8 + 8 + 32 + 32 + 8 + 4 + 2);
        bytes.extend_from_slice(&self.index.to_le_bytes());
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        bytes.extend_from_slice(&self.previous_hash);
        bytes.extend_from_slice(&self.merkle_root);
        bytes.extend_from_slice(&self.nonce.to_le_bytes());
        bytes.extend_from_slice(&self.difficulty.to_le_bytes());
        bytes.extend_from_slice(&self.version.to_le_bytes());
        bytes
    }

    pub const NONCE_OFFSET: usize = 8 + 8 + 32 + 32;

    pub fn compute_hash(&self) -> Hash {
        crypto::blake3_hash(&self.header_bytes())
    }

    pub fn merkle_root_of(transactions: &[Transaction]) -> Hash {
        let leaves: Vec<Hash> = transactions.iter().map(Transaction::leaf_hash).collect();
        MerkleTree::build_root(&leaves)
    }

    pub fn meets_difficulty(hash: &Hash, difficulty: u32) -> bool {
        crypto::leading_zero_nibbles(hash) >= difficulty
    }

    pub fn fees(&self) -> Amount {
        self.transactions
            .iter()
            .filter(|t| !t.is_reward())
            .fold(0u64, |acc, t| acc.saturating_add(t.fee))
    }
}
