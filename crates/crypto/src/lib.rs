//! # Porchain Crypto
//!
//! Cryptographic primitives for the Porchain DPoR blockchain:
//!
//! - **Keccak256 hashing** - Ethereum-compatible hashing
//! - **ECDSA signatures** - secp256k1 signing with recoverable 65-byte
//!   signatures, the format carried in header seals and consensus messages
//!
//! ## Example
//!
//! ```rust
//! use porchain_crypto::{keccak256, ecdsa::PrivateKey};
//!
//! let key = PrivateKey::random();
//! let digest = keccak256(b"message");
//! let sig = key.sign_prehash(&digest).unwrap();
//!
//! let recovered = sig.recover_prehash(&digest).unwrap();
//! assert_eq!(recovered.to_address(), key.public_key().to_address());
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod ecdsa;
pub mod hash;

pub use ecdsa::{PrivateKey, PublicKey, Signature};
pub use hash::{keccak256, keccak256_concat};

/// Result type alias for cryptographic operations
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors produced by cryptographic operations
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Invalid private key bytes
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// Invalid public key bytes
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Invalid signature bytes
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Public key recovery failed
    #[error("recovery failed: {0}")]
    RecoveryFailed(String),

    /// Invalid hex encoding
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Invalid length for a fixed-size input
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },
}
