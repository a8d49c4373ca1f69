//! # Porchain Types
//!
//! Core type definitions for the Porchain DPoR blockchain.
//!
//! This crate provides the fundamental types used throughout Porchain:
//! - [`Address`] - 20-byte account identifiers, ordered by big-endian value
//! - [`H256`] - 32-byte hashes with Keccak256 support
//! - [`Header`] and [`Block`] - block structures carrying the DPoR extra field
//! - [`Extra`] and [`Seal`] - the vanity / validator-signature / seal layout
//!
//! ## Example
//!
//! ```rust
//! use porchain_types::{Address, H256};
//!
//! // Create an address from hex
//! let addr: Address = "0x742d35Cc6634C0532925a3b844Bc9e7595f0bEb1".parse().unwrap();
//!
//! // Hash some data
//! let hash = H256::keccak256(b"hello world");
//! assert_ne!(hash, H256::NIL);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod address;
pub mod block;
pub mod hash;

pub use address::Address;
pub use block::{Block, Extra, Header, Seal, Transaction, EXTRA_SEAL, EXTRA_VANITY};
pub use hash::{keccak256, H256};

/// Result type alias for Porchain type operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when working with Porchain types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid hex string
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Invalid length for a fixed-size type
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Invalid address format
    #[error("invalid address format: {0}")]
    InvalidAddress(String),

    /// Invalid hash format
    #[error("invalid hash format: {0}")]
    InvalidHash(String),

    /// Header extra field does not follow the vanity/signatures/seal layout
    #[error("invalid extra field: {0}")]
    InvalidExtra(String),

    /// RLP decoding error
    #[error("RLP decode error: {0}")]
    RlpDecode(#[from] rlp::DecoderError),
}
