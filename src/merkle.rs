//! Binary merkle tree over transaction leaves.
//!
//! Leaf order is the block's transaction order; the tree is not sorted, so
//! reordering transactions changes the root.

use crate::crypto::{Hash, ZERO_HASH};

pub struct MerkleTree;

impl MerkleTree {
    /// Build the root from already-hashed leaves.
    pub fn build_root(leaves: &[Hash]) -> Hash {
        if leaves.is_empty() {
            return ZERO_HASH;
        }

        let mut level: Vec<Hash> = leaves.to_vec();
        while level.len() > 1 {
            level = level
                .chunks(2)
                .map(|pair| {
                    // Odd count: the last node is paired with itself.
                    let right = pair.get(1).unwrap_or(&pair[0]);
                    hash_pair(&pair[0], right)
                })
                .collect();
        }
        level[0]
    }

    /// Sibling path for the leaf at `index`, bottom-up.
    pub fn build_proof(leaves: &[Hash], index: usize) -> Option<Vec<Hash>> {
        if index >= leaves.len() {
            return None;
        }
        let mut proof = Vec::new();
        let mut level: Vec<Hash> = leaves.to_vec();
        let mut idx = index;
        while level.len() > 1 {
            let sibling = if idx % 2 == 0 {
                *level.get(idx + 1).unwrap_or(&level[idx])
            } else {
                level[idx - 1]
            };
            proof.push(sibling);
            level = level
                .chunks(2)
                .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&pair[0])))
                .collect();
            idx /= 2;
        }
        Some(proof)
    }

    pub fn verify_proof(leaf: &Hash, index: usize, proof: &[Hash], root: &Hash) -> bool {
        let mut acc = *leaf;
        let mut idx = index;
        for sibling in proof {
            acc = if idx % 2 == 0 { hash_pair(&acc, sibling) } else { hash_pair(sibling, &acc) };
            idx /= 2;
        }
        &acc == root
    }
}

fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(left);
    hasher.update(right);
    *hasher.finalize().as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::blake3_hash;

    fn leaves(n: u8) -> Vec<Hash> {
        (0..n).map(|i| blake3_hash(&[i])).collect()
    }

    #[test]
    fn empty_root_is_zero() {
        assert_eq!(MerkleTree::build_root(&[]), ZERO_HASH);
    }

    #[test]
    fn single_leaf_is_its_own_root() {
        let l = leaves(1);
        assert_eq!(MerkleTree::build_root(&l), l[0]);
    }

    #[test]
    fn root_depends_on_order() {
        let l = leaves(4);
        let mut swapped = l.clone();
        swapped.swap(1, 2);
        assert_eq!(MerkleTree::build_root(&l), MerkleTree::build_root(&l));
        assert_ne!(MerkleTree::build_root(&l), MerkleTree::build_root(&swapped));
    }

    #[test]
    fn proofs_verify_for_every_leaf() {
        let l = leaves(5);
        let root = MerkleTree::build_root(&l);
        for (i, leaf) in l.iter().enumerate() {
            let proof = MerkleTree::build_proof(&l, i).unwrap();
            assert!(MerkleTree::verify_proof(leaf, i, &proof, &root), "leaf {i}");
        }
        let proof = MerkleTree::build_proof(&l, 0).unwrap();
        assert!(!MerkleTree::verify_proof(&l[1], 0, &proof, &root));
    }
}
