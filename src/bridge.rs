// bridge.rs
// Cross-chain transfer records and the state machine they move through.

use serde::{Serialize, Deserialize};
use rand::RngCore;
use crate::crypto::{self, Hash};
use crate::error::BridgeError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BridgeTxState {
    Initiated,
    PendingSourceConfirmation,
    SourceConfirmed,
    PendingValidation,
    Validated,
    Completed,
    Failed,
}

impl BridgeTxState {
    pub fn is_terminal(self) -> bool {
        matches!(self, BridgeTxState::Completed | BridgeTxState::Failed)
    }

    /// The single forward step out of this state, if any.
    pub fn successor(self) -> Option<BridgeTxState> {
        use BridgeTxState::*;
        match self {
            Initiated => Some(PendingSourceConfirmation),
            PendingSourceConfirmation => Some(SourceConfirmed),
            SourceConfirmed => Some(PendingValidation),
            PendingValidation => Some(Validated),
            Validated => Some(Completed),
            Completed | Failed => None,
        }
    }

    pub fn can_transition_to(self, next: BridgeTxState) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == BridgeTxState::Failed || self.successor() == Some(next)
    }
}

impl std::fmt::Display for BridgeTxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    #[default]
    Standard,
    High,
    Maximum,
}

impl SecurityLevel {
    /// Source confirmations demanded for a configured base depth.
    pub fn confirmations(self, base: u64) -> u64 {
        match self {
            SecurityLevel::Standard => base,
            SecurityLevel::High => base.saturating_mul(3).div_ceil(2),
            SecurityLevel::Maximum => base.saturating_mul(2),
        }
    }
}

/// Per-bridge parameters. A running coordinator never mutates these; a changed
/// configuration is stored as a new version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    pub required_confirmations: u64,
    pub validator_threshold: usize,
    pub fee_basis_points: u64,
    pub min_transfer_amount: u64,
    pub max_transfer_amount: u64,
    pub security_level: SecurityLevel,
    pub stall_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        crate::config::Bridge::default().bridge_config()
    }
}

impl BridgeConfig {
    pub fn fee_for(&self, amount: u64) -> u64 {
        ((amount as u128 * self.fee_basis_points as u128) / 10_000) as u64
    }

    pub fn effective_confirmations(&self) -> u64 {
        self.security_level.confirmations(self.required_confirmations)
    }

    pub fn check_amount(&self, amount: u64) -> Result<(), BridgeError> {
        if amount == 0 || amount < self.min_transfer_amount || amount > self.max_transfer_amount {
            return Err(BridgeError::AmountOutOfRange {
                amount,
                min: self.min_transfer_amount,
                max: self.max_transfer_amount,
            });
        }
        Ok(())
    }
}

/// A counted attestation. The key it verified against is kept with it so
/// later audits do not depend on the registry's current membership.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidatorSignature {
    pub validator_id: String,
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
    pub signed_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Same validator already counted; nothing changed.
    Duplicate,
    Counted { distinct: usize },
    QuorumReached { distinct: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeTransaction {
    pub id: String,
    pub bridge_id: String,
    pub source_network: String,
    pub target_network: String,
    pub source_address: String,
    pub target_address: String,
    pub amount: u64,
    pub fee: u64,
    pub token_symbol: String,
    pub status: BridgeTxState,
    pub source_tx_hash: Option<Hash>,
    pub target_tx_hash: Option<Hash>,
    pub validations: Vec<ValidatorSignature>,
    pub source_confirmations: u64,
    pub initiated_at: u64,
    pub updated_at: u64,
    pub completed_at: Option<u64>,
    pub last_error: Option<String>,
}

/// Message every validator signs for a transfer.
pub fn canonical_message(id: &str, source_tx_hash: &Hash, amount: u64, target_address: &str) -> Hash {
    let mut h = blake3::Hasher::new_derive_key("tessera-bridge-attestation");
    h.update(&(id.len() as u64).to_le_bytes());
    h.update(id.as_bytes());
    h.update(source_tx_hash);
    h.update(&amount.to_le_bytes());
    h.update(target_address.as_bytes());
    *h.finalize().as_bytes()
}

impl BridgeTransaction {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bridge_id: &str,
        source_network: &str,
        target_network: &str,
        source_address: &str,
        target_address: &str,
        amount: u64,
        fee: u64,
        token_symbol: &str,
        now: u64,
    ) -> Self {
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        let id = crypto::blake3_hash_parts(&[
            bridge_id.as_bytes(),
            source_address.as_bytes(),
            target_address.as_bytes(),
            &amount.to_le_bytes(),
            &now.to_le_bytes(),
            &salt,
        ]);
        Self {
            id: hex::encode(&id[..16]),
            bridge_id: bridge_id.to_string(),
            source_network: source_network.to_string(),
            target_network: target_network.to_string(),
            source_address: source_address.to_string(),
            target_address: target_address.to_string(),
            amount,
            fee,
            token_symbol: token_symbol.to_string(),
            status: BridgeTxState::Initiated,
            source_tx_hash: None,
            target_tx_hash: None,
            validations: Vec::new(),
            source_confirmations: 0,
            initiated_at: now,
            updated_at: now,
            completed_at: None,
            last_error: None,
        }
    }

    /// Amount delivered on the target chain.
    pub fn payout_amount(&self) -> u64 {
        self.amount.saturating_sub(self.fee)
    }

    pub fn canonical_message(&self) -> Result<Hash, BridgeError> {
        let source = self.source_tx_hash.as_ref().ok_or_else(|| {
            BridgeError::InvalidRequest(format!("transfer {} has no source transaction", self.id))
        })?;
        Ok(canonical_message(&self.id, source, self.amount, &self.target_address))
    }

    fn transition(&mut self, next: BridgeTxState, now: u64) -> Result<BridgeTxState, BridgeError> {
        let from = self.status;
        if !from.can_transition_to(next) {
            return Err(BridgeError::InvalidTransition { from, to: next });
        }
        self.status = next;
        self.updated_at = now;
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(from)
    }

    pub fn record_source_tx(&mut self, hash: Hash, now: u64) -> Result<(), BridgeError> {
        if self.source_tx_hash.is_some() {
            return Err(BridgeError::InvalidTransition {
                from: self.status,
                to: BridgeTxState::PendingSourceConfirmation,
            });
        }
        self.transition(BridgeTxState::PendingSourceConfirmation, now)?;
        self.source_tx_hash = Some(hash);
        Ok(())
    }

    /// Returns true when this observation moved the transfer to `SourceConfirmed`.
    pub fn observe_confirmations(&mut self, confirmations: u64, required: u64, now: u64) -> Result<bool, BridgeError> {
        if self.status != BridgeTxState::PendingSourceConfirmation {
            return Err(BridgeError::InvalidTransition { from: self.status, to: BridgeTxState::SourceConfirmed });
        }
        if confirmations > self.source_confirmations {
            self.source_confirmations = confirmations;
        }
        if self.source_confirmations < required {
            return Ok(false);
        }
        self.transition(BridgeTxState::SourceConfirmed, now)?;
        Ok(true)
    }

    pub fn begin_validation(&mut self, now: u64) -> Result<(), BridgeError> {
        self.transition(BridgeTxState::PendingValidation, now).map(|_| ())
    }

    pub fn has_validation_from(&self, validator_id: &str) -> bool {
        self.validations.iter().any(|v| v.validator_id == validator_id)
    }

    /// Count a verified signature. A validator id is counted once no matter
    /// how often it signs.
    pub fn add_validation(
        &mut self,
        sig: ValidatorSignature,
        threshold: usize,
        now: u64,
    ) -> Result<ValidationOutcome, BridgeError> {
        if self.has_validation_from(&sig.validator_id) {
            return Ok(ValidationOutcome::Duplicate);
        }
        if self.status != BridgeTxState::PendingValidation {
            return Err(BridgeError::InvalidTransition { from: self.status, to: BridgeTxState::Validated });
        }
        self.validations.push(sig);
        self.updated_at = now;
        let distinct = self.validations.len();
        if distinct >= threshold.max(1) {
            self.transition(BridgeTxState::Validated, now)?;
            return Ok(ValidationOutcome::QuorumReached { distinct });
        }
        Ok(ValidationOutcome::Counted { distinct })
    }

    pub fn record_target_tx(&mut self, hash: Hash, now: u64) -> Result<(), BridgeError> {
        self.transition(BridgeTxState::Completed, now)?;
        self.target_tx_hash = Some(hash);
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>, now: u64) -> Result<(), BridgeError> {
        self.transition(BridgeTxState::Failed, now)?;
        self.last_error = Some(reason.into());
        Ok(())
    }

    /// Seconds since the last state change.
    pub fn idle_for(&self, now: u64) -> u64 {
        now.saturating_sub(self.updated_at)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BridgeEvent {
    StateChanged { id: String, from: BridgeTxState, to: BridgeTxState },
    SignatureRejected { id: String, validator_id: String, reason: String },
    Stalled { id: String, state: BridgeTxState, stalled_for_secs: u64 },
    ReplayRejected { source_tx_hash: String, existing: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BridgeStatus {
    pub bridge_id: String,
    pub config_version: u32,
    pub active: usize,
    pub in_flight: usize,
    pub completed: usize,
    pub failed: usize,
    pub archived: usize,
    pub total_bridged: u64,
    pub fees_collected: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(id: &str) -> ValidatorSignature {
        ValidatorSignature { validator_id: id.into(), public_key: vec![1], signature: vec![2], signed_at: 5 }
    }

    fn at_validation() -> BridgeTransaction {
        let mut tx = BridgeTransaction::new("b", "tessera", "evm", "src", "dst", 1_000, 1, "TSR", 0);
        tx.record_source_tx([7u8; 32], 1).unwrap();
        assert!(tx.observe_confirmations(6, 6, 2).unwrap());
        tx.begin_validation(3).unwrap();
        tx
    }

    #[test]
    fn happy_path_walks_every_state() {
        let mut tx = at_validation();
        assert_eq!(tx.status, BridgeTxState::PendingValidation);
        tx.add_validation(sig("a"), 1, 4).unwrap();
        assert_eq!(tx.status, BridgeTxState::Validated);
        tx.record_target_tx([9u8; 32], 5).unwrap();
        assert_eq!(tx.status, BridgeTxState::Completed);
        assert_eq!(tx.completed_at, Some(5));
    }

    #[test]
    fn skipping_states_is_refused() {
        let mut tx = BridgeTransaction::new("b", "tessera", "evm", "src", "dst", 10, 0, "TSR", 0);
        let err = tx.record_target_tx([1u8; 32], 1).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidTransition { from: BridgeTxState::Initiated, .. }));
        assert!(tx.begin_validation(1).is_err());
        assert_eq!(tx.status, BridgeTxState::Initiated);
    }

    #[test]
    fn shallow_confirmations_keep_waiting() {
        let mut tx = BridgeTransaction::new("b", "tessera", "evm", "src", "dst", 10, 0, "TSR", 0);
        tx.record_source_tx([1u8; 32], 0).unwrap();
        assert!(!tx.observe_confirmations(3, 6, 1).unwrap());
        assert!(!tx.observe_confirmations(2, 6, 2).unwrap());
        assert_eq!(tx.source_confirmations, 3);
        assert_eq!(tx.status, BridgeTxState::PendingSourceConfirmation);
    }

    #[test]
    fn duplicate_validator_does_not_count() {
        let mut tx = at_validation();
        assert_eq!(tx.add_validation(sig("a"), 3, 4).unwrap(), ValidationOutcome::Counted { distinct: 1 });
        assert_eq!(tx.add_validation(sig("b"), 3, 4).unwrap(), ValidationOutcome::Counted { distinct: 2 });
        assert_eq!(tx.add_validation(sig("a"), 3, 4).unwrap(), ValidationOutcome::Duplicate);
        assert_eq!(tx.status, BridgeTxState::PendingValidation);
        assert_eq!(tx.add_validation(sig("c"), 3, 4).unwrap(), ValidationOutcome::QuorumReached { distinct: 3 });
        assert_eq!(tx.status, BridgeTxState::Validated);
    }

    #[test]
    fn terminal_states_are_final() {
        let mut tx = at_validation();
        tx.fail("operator", 9).unwrap();
        assert!(tx.fail("again", 10).is_err());
        assert!(tx.add_validation(sig("z"), 1, 11).is_err());
        assert_eq!(tx.last_error.as_deref(), Some("operator"));
    }

    #[test]
    fn security_level_scales_depth() {
        assert_eq!(SecurityLevel::Standard.confirmations(6), 6);
        assert_eq!(SecurityLevel::High.confirmations(6), 9);
        assert_eq!(SecurityLevel::High.confirmations(5), 8);
        assert_eq!(SecurityLevel::Maximum.confirmations(6), 12);
    }

    #[test]
    fn fee_and_amount_bounds() {
        let cfg = BridgeConfig { fee_basis_points: 10, min_transfer_amount: 5, max_transfer_amount: 100_000, ..BridgeConfig::default() };
        assert_eq!(cfg.fee_for(10_000), 10);
        assert!(cfg.check_amount(4).is_err());
        assert!(cfg.check_amount(100_001).is_err());
        assert!(cfg.check_amount(5).is_ok());
    }

    #[test]
    fn canonical_message_binds_every_field() {
        let base = canonical_message("id", &[1u8; 32], 10, "dst");
        assert_ne!(base, canonical_message("id2", &[1u8; 32], 10, "dst"));
        assert_ne!(base, canonical_message("id", &[2u8; 32], 10, "dst"));
        assert_ne!(base, canonical_message("id", &[1u8; 32], 11, "dst"));
        assert_ne!(base, canonical_message("id", &[1u8; 32], 10, "dst2"));
    }
}
