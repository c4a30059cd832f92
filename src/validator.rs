use std::collections::HashMap;
use std::sync::Arc;
use anyhow::Result;
use parking_lot::RwLock;
use serde::{Serialize, Deserialize};
use tracing::{debug, info, warn};

use crate::bridge::ValidatorSignature;
use crate::crypto::{self, Address, Hash, Keypair, SignatureScheme};
use crate::error::BridgeError;
use crate::metrics;
use crate::storage::{RecordStore, RecordStoreExt, CF_VALIDATOR};

const REPUTATION_REWARD: f64 = 0.01;
const REPUTATION_PENALTY: f64 = 0.05;
const INITIAL_REPUTATION: f64 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Validator {
    pub id: String,
    pub address: Address,
    pub public_key: Vec<u8>,
    pub network: String,
    pub is_active: bool,
    pub reputation: f64,
    pub added_at: u64,
}

/// Bridge-scoped validator membership.
///
/// Mutations need the admin token. Removing a validator never touches
/// signatures already counted on a transfer: those carry their own key snapshot.
pub struct ValidatorRegistry {
    bridge_id: String,
    admin_token: Option<String>,
    members: RwLock<HashMap<String, Validator>>,
    scheme: Arc<dyn SignatureScheme>,
    store: Arc<dyn RecordStore>,
}

fn record_key(bridge_id: &str, validator_id: &str) -> Vec<u8> {
    format!("{bridge_id}/{validator_id}").into_bytes()
}

impl ValidatorRegistry {
    /// Load the bridge's membership from the store.
    pub fn open(
        bridge_id: &str,
        admin_token: Option<String>,
        scheme: Arc<dyn SignatureScheme>,
        store: Arc<dyn RecordStore>,
    ) -> Result<Self> {
        let prefix = format!("{bridge_id}/").into_bytes();
        let mut members = HashMap::new();
        for (key, _) in store.scan(CF_VALIDATOR)? {
            if !key.starts_with(&prefix) {
                continue;
            }
            if let Some(v) = store.get::<Validator>(CF_VALIDATOR, &key)? {
                members.insert(v.id.clone(), v);
            }
        }
        if !members.is_empty() {
            info!(bridge = bridge_id, count = members.len(), "validators loaded");
        }
        Ok(Self {
            bridge_id: bridge_id.to_string(),
            admin_token,
            members: RwLock::new(members),
            scheme,
            store,
        })
    }

    pub fn bridge_id(&self) -> &str {
        &self.bridge_id
    }

    /// Admin operations are disabled when no token is configured.
    pub fn authorize(&self, token: &str) -> Result<(), BridgeError> {
        match &self.admin_token {
            // blake3::Hash compares in constant time.
            Some(expected) if blake3::hash(expected.as_bytes()) == blake3::hash(token.as_bytes()) => Ok(()),
            _ => Err(BridgeError::Unauthorized),
        }
    }

    fn persist(&self, v: &Validator) -> Result<(), BridgeError> {
        self.store
            .put(CF_VALIDATOR, &record_key(&self.bridge_id, &v.id), v)
            .map_err(|e| BridgeError::Storage(e.to_string()))
    }

    pub fn add_validator(
        &self,
        token: &str,
        id: &str,
        public_key: Vec<u8>,
        network: &str,
    ) -> Result<Validator, BridgeError> {
        self.authorize(token)?;
        if id.is_empty() || public_key.is_empty() {
            return Err(BridgeError::InvalidRequest("validator id and public key are required".into()));
        }
        let mut members = self.members.write();
        if members.contains_key(id) {
            return Err(BridgeError::InvalidRequest(format!("validator {id} already registered")));
        }
        let v = Validator {
            id: id.to_string(),
            address: crypto::address_from_pk(&public_key),
            public_key,
            network: network.to_string(),
            is_active: true,
            reputation: INITIAL_REPUTATION,
            added_at: crate::unix_now(),
        };
        self.persist(&v)?;
        members.insert(v.id.clone(), v.clone());
        info!(bridge = %self.bridge_id, validator = id, "validator added");
        Ok(v)
    }

    pub fn remove_validator(&self, token: &str, id: &str) -> Result<Validator, BridgeError> {
        self.authorize(token)?;
        let mut members = self.members.write();
        if !members.contains_key(id) {
            return Err(BridgeError::UnknownValidator(id.to_string()));
        }
        self.store
            .delete(CF_VALIDATOR, &record_key(&self.bridge_id, id))
            .map_err(|e| BridgeError::Storage(e.to_string()))?;
        let removed = members.remove(id).ok_or_else(|| BridgeError::UnknownValidator(id.to_string()))?;
        info!(bridge = %self.bridge_id, validator = id, "validator removed");
        Ok(removed)
    }

    pub fn set_active(&self, token: &str, id: &str, active: bool) -> Result<(), BridgeError> {
        self.authorize(token)?;
        let mut members = self.members.write();
        let v = members.get_mut(id).ok_or_else(|| BridgeError::UnknownValidator(id.to_string()))?;
        v.is_active = active;
        let snapshot = v.clone();
        self.persist(&snapshot)
    }

    pub fn get(&self, id: &str) -> Option<Validator> {
        self.members.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<Validator> {
        let mut out: Vec<Validator> = self.members.read().values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn active_count(&self) -> usize {
        self.members.read().values().filter(|v| v.is_active).count()
    }

    fn adjust_reputation(&self, id: &str, delta: f64) {
        let snapshot = {
            let mut members = self.members.write();
            let Some(v) = members.get_mut(id) else { return };
            v.reputation = (v.reputation + delta).clamp(0.0, 1.0);
            v.clone()
        };
        if let Err(e) = self.persist(&snapshot) {
            warn!(validator = id, "could not persist reputation: {}", e);
        }
    }

    /// Check `signature` over `message` against the validator's current key.
    /// On success the returned attestation carries that key as its snapshot.
    pub fn verify_signature(
        &self,
        validator_id: &str,
        message: &Hash,
        signature: &[u8],
        signed_at: u64,
    ) -> Result<ValidatorSignature, BridgeError> {
        let validator = self
            .get(validator_id)
            .ok_or_else(|| BridgeError::UnknownValidator(validator_id.to_string()))?;
        if !validator.is_active {
            metrics::BRIDGE_VERIFY_FAIL.inc();
            return Err(BridgeError::VerificationFailure(format!("validator {validator_id} is inactive")));
        }
        if !self.scheme.verify(&validator.public_key, message, signature) {
            metrics::BRIDGE_VERIFY_FAIL.inc();
            self.adjust_reputation(validator_id, -REPUTATION_PENALTY);
            return Err(BridgeError::VerificationFailure(format!(
                "signature from {validator_id} does not verify"
            )));
        }
        metrics::BRIDGE_VERIFY_OK.inc();
        self.adjust_reputation(validator_id, REPUTATION_REWARD);
        debug!(validator = validator_id, "signature verified");
        Ok(ValidatorSignature {
            validator_id: validator_id.to_string(),
            public_key: validator.public_key,
            signature: signature.to_vec(),
            signed_at,
        })
    }

    /// Re-verify a counted signature against the key it was accepted with.
    pub fn audit_signature(&self, sig: &ValidatorSignature, message: &Hash) -> bool {
        self.scheme.verify(&sig.public_key, message, &sig.signature)
    }
}

/// A signer the coordinator can ask for attestations.
#[async_trait::async_trait]
pub trait ValidatorNode: Send + Sync {
    fn id(&self) -> &str;
    async fn sign_attestation(&self, message: &Hash) -> Result<Vec<u8>, BridgeError>;
}

/// In-process validator holding its own keypair.
pub struct LocalValidator {
    id: String,
    keypair: Keypair,
    scheme: Arc<dyn SignatureScheme>,
}

impl LocalValidator {
    pub fn new(id: &str, scheme: Arc<dyn SignatureScheme>) -> Self {
        Self::with_keypair(id, Keypair::generate(), scheme)
    }

    pub fn with_keypair(id: &str, keypair: Keypair, scheme: Arc<dyn SignatureScheme>) -> Self {
        Self { id: id.to_string(), keypair, scheme }
    }

    pub fn public_key(&self) -> Vec<u8> {
        self.keypair.public.clone()
    }

    pub fn address(&self) -> Address {
        self.keypair.address()
    }

    /// Sign synchronously; used by tests and by the async trait method.
    pub fn sign(&self, message: &Hash) -> Result<Vec<u8>, BridgeError> {
        self.keypair
            .sign_with(self.scheme.as_ref(), message)
            .map_err(|e| BridgeError::VerificationFailure(e.to_string()))
    }
}

#[async_trait::async_trait]
impl ValidatorNode for LocalValidator {
    fn id(&self) -> &str {
        &self.id
    }

    async fn sign_attestation(&self, message: &Hash) -> Result<Vec<u8>, BridgeError> {
        self.sign(message)
    }
}
