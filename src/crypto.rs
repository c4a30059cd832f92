use blake3::Hasher;
use pqcrypto_dilithium::dilithium3::{
    self, DetachedSignature, PublicKey, SecretKey,
};
use pqcrypto_traits::sign::{
    DetachedSignature as _, PublicKey as _, SecretKey as _,
};
use anyhow::{anyhow, Result};

// Sizes of the post-quantum primitives, kept here so callers never reach into the FFI crate.
pub const DILITHIUM3_PK_BYTES: usize = pqcrypto_dilithium::ffi::PQCLEAN_DILITHIUM3_CLEAN_CRYPTO_PUBLICKEYBYTES;
pub const DILITHIUM3_SK_BYTES: usize = pqcrypto_dilithium::ffi::PQCLEAN_DILITHIUM3_CLEAN_CRYPTO_SECRETKEYBYTES;
pub const DILITHIUM3_SIG_BYTES: usize = pqcrypto_dilithium::ffi::PQCLEAN_DILITHIUM3_CLEAN_CRYPTO_BYTES;

/// A 32-byte digest. Block hashes, transaction ids and merkle roots all use it.
pub type Hash = [u8; 32];

/// A 32-byte address, derived from a BLAKE3 hash of a public key.
pub type Address = [u8; 32];

/// Token amounts in base units.
pub type Amount = u64;

pub const ZERO_HASH: Hash = [0u8; 32];

pub fn address_from_pk(pk: &[u8]) -> Address {
    *Hasher::new_derive_key("tessera-address")
        .update(pk)
        .finalize()
        .as_bytes()
}

/// Hashes arbitrary data with a domain-specific key for internal consistency.
pub fn blake3_hash(data: &[u8]) -> Hash {
    *Hasher::new_derive_key("tessera-v1").update(data).finalize().as_bytes()
}

/// Hashes a sequence of byte slices as one message, without an intermediate buffer.
pub fn blake3_hash_parts(parts: &[&[u8]]) -> Hash {
    let mut h = Hasher::new_derive_key("tessera-v1");
    for p in parts {
        h.update(p);
    }
    *h.finalize().as_bytes()
}

/// Sign/verify contract for the key collaborator. Any asymmetric scheme fits;
/// the node ships with Dilithium3.
pub trait SignatureScheme: Send + Sync {
    fn sign(&self, secret_key: &[u8], message: &[u8]) -> Result<Vec<u8>>;
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Dilithium3;

impl SignatureScheme for Dilithium3 {
    fn sign(&self, secret_key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
        if secret_key.len() != DILITHIUM3_SK_BYTES {
            return Err(anyhow!("secret key must be {} bytes", DILITHIUM3_SK_BYTES));
        }
        let sk = SecretKey::from_bytes(secret_key)
            .map_err(|e| anyhow!("invalid Dilithium3 secret key: {:?}", e))?;
        Ok(dilithium3::detached_sign(message, &sk).as_bytes().to_vec())
    }

    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
        if public_key.len() != DILITHIUM3_PK_BYTES || signature.len() != DILITHIUM3_SIG_BYTES {
            return false;
        }
        let Ok(pk) = PublicKey::from_bytes(public_key) else { return false };
        let Ok(sig) = DetachedSignature::from_bytes(signature) else { return false };
        dilithium3::verify_detached_signature(&sig, message, &pk).is_ok()
    }
}

/// Raw keypair bytes. The secret half never leaves the process.
#[derive(Clone)]
pub struct Keypair {
    pub public: Vec<u8>,
    secret: Vec<u8>,
}

impl Keypair {
    pub fn generate() -> Self {
        let (pk, sk) = dilithium3_keypair();
        Self { public: pk.as_bytes().to_vec(), secret: sk.as_bytes().to_vec() }
    }

    pub fn address(&self) -> Address {
        address_from_pk(&self.public)
    }

    pub fn sign_with(&self, scheme: &dyn SignatureScheme, message: &[u8]) -> Result<Vec<u8>> {
        scheme.sign(&self.secret, message)
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("address", &hex::encode(self.address()))
            .finish_non_exhaustive()
    }
}

pub fn dilithium3_keypair() -> (PublicKey, SecretKey) {
    dilithium3::keypair()
}

/// Leading zero hex nibbles of a digest.
pub fn leading_zero_nibbles(hash: &Hash) -> u32 {
    let mut n = 0;
    for b in hash {
        if *b == 0 {
            n += 2;
            continue;
        }
        if b >> 4 == 0 {
            n += 1;
        }
        break;
    }
    n
}

pub fn parse_address(s: &str) -> Result<Address> {
    let s = s.trim().trim_start_matches("0x");
    let bytes = hex::decode(s).map_err(|e| anyhow!("invalid address hex: {}", e))?;
    bytes
        .try_into()
        .map_err(|_| anyhow!("address must be 32 bytes"))
}
