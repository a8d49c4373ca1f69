//! Chain and consensus configuration for Porchain.
//!
//! The central type is [`DporConfig`], which fixes the committee geometry
//! (`term_len` proposers × `view_len` blocks per view), the block period,
//! the impeachment timeout and the reputation fork heights. Construction
//! is validated: a validator set whose size is not `3f + 1` is rejected
//! at startup rather than tolerated at runtime.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod dpor;

pub use dpor::{contract, DporConfig};

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors raised while validating a configuration
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Term length or view length is zero
    #[error("term_len and view_len must be non-zero (got {term_len} x {view_len})")]
    EmptyTermGeometry {
        /// Configured term length
        term_len: u64,
        /// Configured view length
        view_len: u64,
    },

    /// Validator-set size does not satisfy N = 3f + 1
    #[error("validator count {count} does not equal 3f + 1 for f = {faulty}")]
    InvalidValidatorCount {
        /// Configured validator count
        count: usize,
        /// Configured faulty-node bound
        faulty: u64,
    },

    /// Block period is zero
    #[error("block period must be non-zero")]
    ZeroPeriod,

    /// A required contract address is missing
    #[error("missing contract address: {0}")]
    MissingContract(&'static str),
}
