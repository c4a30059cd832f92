use serde::{Serialize, Deserialize};
use anyhow::Result;
use crate::crypto::{self, Address, Amount, Hash, Keypair, SignatureScheme};
use crate::error::TxRejection;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}

/// A value transfer. `from = None` marks the miner-reward transaction of a block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub id: Hash,
    pub from: Option<Address>,
    pub to: Address,
    pub amount: Amount,
    pub fee: Amount,
    pub timestamp: u64,
    /// Distinguishes otherwise identical transfers; reward transactions use the block index.
    pub nonce: u64,
    pub sender_public_key: Option<Vec<u8>>,
    pub signature: Option<Vec<u8>>,
    pub status: TxStatus,
}

impl Transaction {
    /// The message that is signed and hashed into the id.
    pub fn signing_bytes(
        from: Option<&Address>,
        to: &Address,
        amount: Amount,
        fee: Amount,
        timestamp: u64,
        nonce: u64,
    ) -> Vec<u8> {
        let mut data = Vec::with_capacity(1 + 32 + 32 + 8 * 4);
        match from {
            Some(addr) => {
                data.push(1);
                data.extend_from_slice(addr);
            }
            None => data.push(0),
        }
        data.extend_from_slice(to);
        data.extend_from_slice(&amount.to_le_bytes());
        data.extend_from_slice(&fee.to_le_bytes());
        data.extend_from_slice(&timestamp.to_le_bytes());
        data.extend_from_slice(&nonce.to_le_bytes());
        data
    }

    fn own_signing_bytes(&self) -> Vec<u8> {
        Self::signing_bytes(self.from.as_ref(), &self.to, self.amount, self.fee, self.timestamp, self.nonce)
    }

    pub fn compute_id(&self) -> Hash {
        crypto::blake3_hash(&self.own_signing_bytes())
    }

    /// Miner reward for the block at `height`.
    pub fn reward(to: Address, amount: Amount, timestamp: u64, height: u64) -> Self {
        let mut tx = Transaction {
            id: [0u8; 32],
            from: None,
            to,
            amount,
            fee: 0,
            timestamp,
            nonce: height,
            sender_public_key: None,
            signature: None,
            status: TxStatus::Pending,
        };
        tx.id = tx.compute_id();
        tx
    }

    /// Builds and signs a transfer from the keypair's address.
    pub fn new_signed(
        keypair: &Keypair,
        scheme: &dyn SignatureScheme,
        to: Address,
        amount: Amount,
        fee: Amount,
        timestamp: u64,
        nonce: u64,
    ) -> Result<Self> {
        let from = keypair.address();
        let msg = Self::signing_bytes(Some(&from), &to, amount, fee, timestamp, nonce);
        let signature = keypair.sign_with(scheme, &msg)?;
        Ok(Transaction {
            id: crypto::blake3_hash(&msg),
            from: Some(from),
            to,
            amount,
            fee,
            timestamp,
            nonce,
            sender_public_key: Some(keypair.public.clone()),
            signature: Some(signature),
            status: TxStatus::Pending,
        })
    }

    pub fn is_reward(&self) -> bool {
        self.from.is_none()
    }

    /// Amount plus fee, or `None` on overflow.
    pub fn total_debit(&self) -> Option<Amount> {
        self.amount.checked_add(self.fee)
    }

    /// Stateless admission rules: positive amount, consistent id, and for
    /// non-reward transactions a key matching `from` and a verifying signature.
    pub fn check_well_formed(&self, scheme: &dyn SignatureScheme) -> Result<(), TxRejection> {
        if self.amount == 0 {
            return Err(TxRejection::NonPositiveAmount);
        }
        if self.id != self.compute_id() {
            return Err(TxRejection::BadSignature);
        }
        let Some(from) = self.from else {
            return Ok(());
        };
        let (Some(pk), Some(sig)) = (&self.sender_public_key, &self.signature) else {
            return Err(TxRejection::BadSignature);
        };
        if crypto::address_from_pk(pk) != from {
            return Err(TxRejection::BadSignature);
        }
        if !scheme.verify(pk, &self.own_signing_bytes(), sig) {
            return Err(TxRejection::BadSignature);
        }
        Ok(())
    }

    /// Merkle leaf: covers every field, status included.
    pub fn leaf_hash(&self) -> Hash {
        let mut h = blake3::Hasher::new_derive_key("tessera-tx-leaf");
        h.update(&self.id);
        h.update(&self.own_signing_bytes());
        if let Some(pk) = &self.sender_public_key {
            h.update(&(pk.len() as u64).to_le_bytes());
            h.update(pk);
        }
        if let Some(sig) = &self.signature {
            h.update(&(sig.len() as u64).to_le_bytes());
            h.update(sig);
        }
        h.update(&[self.status as u8]);
        *h.finalize().as_bytes()
    }
}
