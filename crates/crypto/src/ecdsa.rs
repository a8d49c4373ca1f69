//! ECDSA signing over secp256k1 with recoverable signatures.
//!
//! Signatures are carried as 65 bytes `r ‖ s ‖ v` where `v` is the
//! recovery id. A signer's 20-byte address is the last 20 bytes of the
//! Keccak256 of its uncompressed public key, so any signature can be
//! attributed to an address by recovery alone.

use crate::{keccak256, CryptoError, Result};
use k256::{
    ecdsa::{RecoveryId, Signature as K256Signature, SigningKey, VerifyingKey},
    elliptic_curve::sec1::ToEncodedPoint,
    SecretKey,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

/// A 20-byte signer address
pub type Address = [u8; 20];

/// ECDSA private key (32 bytes)
#[derive(Clone)]
pub struct PrivateKey {
    inner: SigningKey,
}

impl PrivateKey {
    /// Generates a random private key using the OS RNG.
    pub fn random() -> Self {
        let secret = SecretKey::random(&mut OsRng);
        Self {
            inner: SigningKey::from(secret),
        }
    }

    /// Creates a private key from raw bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let secret = SecretKey::from_bytes(bytes.into())
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
        Ok(Self {
            inner: SigningKey::from(secret),
        })
    }

    /// Creates a private key from a hex string, with or without `0x`.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
        let bytes = hex::decode(hex_str)?;
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Self::from_bytes(&arr)
    }

    /// Derives the public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: *self.inner.verifying_key(),
        }
    }

    /// Signs a 32-byte digest, producing a recoverable signature.
    pub fn sign_prehash(&self, digest: &[u8; 32]) -> Result<Signature> {
        let (sig, recovery_id) = self
            .inner
            .sign_prehash_recoverable(digest)
            .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;

        let r: [u8; 32] = sig.r().to_bytes().into();
        let s: [u8; 32] = sig.s().to_bytes().into();

        Ok(Signature {
            r,
            s,
            v: recovery_id.to_byte(),
        })
    }

    /// Hashes `data` with Keccak256 and signs the digest.
    pub fn sign(&self, data: &[u8]) -> Result<Signature> {
        self.sign_prehash(&keccak256(data))
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("address", &hex::encode(self.public_key().to_address()))
            .finish()
    }
}

/// ECDSA public key
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    inner: VerifyingKey,
}

impl PublicKey {
    /// Creates a public key from SEC1 encoded bytes (33 or 65 bytes).
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self> {
        let inner = VerifyingKey::from_sec1_bytes(bytes)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Returns the uncompressed key bytes without the 0x04 prefix.
    pub fn to_uncompressed(&self) -> [u8; 64] {
        let point = self.inner.to_encoded_point(false);
        let mut out = [0u8; 64];
        out.copy_from_slice(&point.as_bytes()[1..65]);
        out
    }

    /// Derives the 20-byte address: `keccak256(pubkey)[12..32]`.
    pub fn to_address(&self) -> Address {
        let digest = keccak256(&self.to_uncompressed());
        let mut addr = [0u8; 20];
        addr.copy_from_slice(&digest[12..32]);
        addr
    }

    /// Verifies a signature over a 32-byte digest.
    pub fn verify_prehash(&self, digest: &[u8; 32], signature: &Signature) -> bool {
        let Ok(sig) = signature.to_k256() else {
            return false;
        };
        use k256::ecdsa::signature::hazmat::PrehashVerifier;
        self.inner.verify_prehash(digest, &sig).is_ok()
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKey")
            .field("address", &hex::encode(self.to_address()))
            .finish()
    }
}

/// A recoverable ECDSA signature: `r` (32 bytes), `s` (32 bytes) and the
/// recovery id `v`.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// The r component
    pub r: [u8; 32],
    /// The s component
    pub s: [u8; 32],
    /// Recovery id (0 or 1)
    pub v: u8,
}

impl Signature {
    /// Creates a signature from 65 raw bytes `r ‖ s ‖ v`.
    pub fn from_bytes(bytes: &[u8; 65]) -> Self {
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[0..32]);
        s.copy_from_slice(&bytes[32..64]);
        Self { r, s, v: bytes[64] }
    }

    /// Returns the 65-byte encoding `r ‖ s ‖ v`.
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[0..32].copy_from_slice(&self.r);
        out[32..64].copy_from_slice(&self.s);
        out[64] = self.v;
        out
    }

    /// Normalizes legacy 27/28 recovery ids to 0/1.
    fn v_normalized(&self) -> u8 {
        if self.v >= 27 {
            self.v - 27
        } else {
            self.v
        }
    }

    fn to_k256(&self) -> Result<K256Signature> {
        let mut bytes = [0u8; 64];
        bytes[0..32].copy_from_slice(&self.r);
        bytes[32..64].copy_from_slice(&self.s);
        K256Signature::from_bytes((&bytes).into())
            .map_err(|e| CryptoError::InvalidSignature(e.to_string()))
    }

    /// Recovers the public key from this signature and the signed digest.
    pub fn recover_prehash(&self, digest: &[u8; 32]) -> Result<PublicKey> {
        let sig = self.to_k256()?;
        let recovery_id = RecoveryId::from_byte(self.v_normalized())
            .ok_or_else(|| CryptoError::RecoveryFailed("invalid recovery id".to_string()))?;

        let inner = VerifyingKey::recover_from_prehash(digest, &sig, recovery_id)
            .map_err(|e| CryptoError::RecoveryFailed(e.to_string()))?;

        Ok(PublicKey { inner })
    }

    /// Recovers the signer address from this signature and the digest.
    pub fn recover_address(&self, digest: &[u8; 32]) -> Result<Address> {
        Ok(self.recover_prehash(digest)?.to_address())
    }

    /// Verifies this signature over a digest against a public key.
    pub fn verify_prehash(&self, digest: &[u8; 32], public_key: &PublicKey) -> bool {
        public_key.verify_prehash(digest, self)
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signature")
            .field("r", &hex::encode(self.r))
            .field("s", &hex::encode(self.s))
            .field("v", &self.v)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let key = PrivateKey::random();
        let digest = keccak256(b"payload");
        let sig = key.sign_prehash(&digest).unwrap();

        assert!(sig.verify_prehash(&digest, &key.public_key()));
        assert!(!sig.verify_prehash(&keccak256(b"other"), &key.public_key()));
    }

    #[test]
    fn recover_matches_signer() {
        let key = PrivateKey::random();
        let digest = keccak256(b"payload");
        let sig = key.sign_prehash(&digest).unwrap();

        let addr = sig.recover_address(&digest).unwrap();
        assert_eq!(addr, key.public_key().to_address());
    }

    #[test]
    fn byte_roundtrip() {
        let key = PrivateKey::random();
        let digest = keccak256(b"payload");
        let sig = key.sign_prehash(&digest).unwrap();

        let restored = Signature::from_bytes(&sig.to_bytes());
        assert_eq!(restored, sig);
    }

    #[test]
    fn legacy_v_normalization() {
        let key = PrivateKey::random();
        let digest = keccak256(b"payload");
        let mut sig = key.sign_prehash(&digest).unwrap();
        let addr = sig.recover_address(&digest).unwrap();

        sig.v += 27;
        assert_eq!(sig.recover_address(&digest).unwrap(), addr);
    }

    #[test]
    fn deterministic_key_from_hex() {
        let key = PrivateKey::from_hex(
            "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318",
        )
        .unwrap();
        let addr1 = key.public_key().to_address();
        let key2 = PrivateKey::from_hex(
            "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318",
        )
        .unwrap();
        assert_eq!(addr1, key2.public_key().to_address());
    }
}
