use thiserror::Error;

use crate::bridge::BridgeTxState;

/// Why a block was refused. The chain is untouched whenever one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockRejection {
    #[error("bad index: expected {expected} got {got}")]
    BadIndex { expected: u64, got: u64 },
    #[error("previous hash does not link to tip")]
    BadPreviousHash,
    #[error("stored hash does not match header")]
    HashMismatch,
    #[error("hash does not meet difficulty target")]
    DifficultyNotMet,
    #[error("difficulty mismatch: expected {expected} got {got}")]
    WrongDifficulty { expected: u32, got: u32 },
    #[error("merkle root mismatch")]
    BadMerkleRoot,
    #[error("timestamp out of range")]
    BadTimestamp,
    #[error("bad reward: {0}")]
    BadReward(String),
    #[error("{got} transactions exceed the limit of {max}")]
    TooManyTransactions { max: usize, got: usize },
    #[error("transaction #{index} invalid: {reason}")]
    InvalidTransaction { index: usize, reason: TxRejection },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxRejection {
    #[error("missing or invalid signature")]
    BadSignature,
    #[error("amount must be positive")]
    NonPositiveAmount,
    #[error("transaction already pending")]
    Duplicate,
    #[error("transaction already confirmed")]
    AlreadyConfirmed,
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("reward transaction outside block assembly")]
    UnexpectedReward,
}

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("invalid block: {0}")]
    InvalidBlock(BlockRejection),
    #[error("invalid transaction: {0}")]
    InvalidTransaction(TxRejection),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<TxRejection> for ChainError {
    fn from(r: TxRejection) -> Self {
        ChainError::InvalidTransaction(r)
    }
}

impl From<BlockRejection> for ChainError {
    fn from(r: BlockRejection) -> Self {
        ChainError::InvalidBlock(r)
    }
}

#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    #[error("invalid transition {from:?} -> {to:?}")]
    InvalidTransition { from: BridgeTxState, to: BridgeTxState },
    #[error("signature verification failed: {0}")]
    VerificationFailure(String),
    #[error("validator {0} not recognized")]
    UnknownValidator(String),
    #[error("transfer {id} stalled in {state:?} for {stalled_for_secs}s")]
    Timeout { id: String, state: BridgeTxState, stalled_for_secs: u64 },
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),
    #[error("source tx {hash} already claimed by {existing}")]
    SourceTxReplayed { hash: String, existing: String },
    #[error("amount {amount} outside [{min}, {max}]")]
    AmountOutOfRange { amount: u64, min: u64, max: u64 },
    #[error("invalid transfer request: {0}")]
    InvalidRequest(String),
    #[error("bridge transaction {0} not found")]
    NotFound(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("storage error: {0}")]
    Storage(String),
}

impl BridgeError {
    /// Errors the monitor loop backs off on and retries later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BridgeError::NetworkUnavailable(_))
    }
}
