// Library interface for the tessera ledger and bridge engine
// The node binary and the integration tests both build on these modules.

pub mod config;
pub mod crypto;
pub mod merkle;
pub mod transaction;
pub mod block;
pub mod consensus;
pub mod pool;
pub mod miner;
pub mod ledger;
pub mod storage;
pub mod bridge;
pub mod validator;
pub mod rpc;
pub mod coordinator;
pub mod harness;
pub mod error;
pub mod events;
pub mod metrics;
pub mod logging;

pub use block::Block;
pub use bridge::{BridgeConfig, BridgeEvent, BridgeStatus, BridgeTransaction, BridgeTxState, SecurityLevel};
pub use coordinator::{BridgeCoordinator, TransferRequest};
pub use crypto::{Address, Amount, Hash, Keypair, SignatureScheme, Dilithium3, address_from_pk, blake3_hash};
pub use error::{BridgeError, ChainError};
pub use ledger::{Ledger, LedgerEvent, TxState};
pub use merkle::MerkleTree;
pub use miner::{Miner, MiningOutcome};
pub use storage::{MemoryStore, RecordStore, Store};
pub use transaction::Transaction;

/// Seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
