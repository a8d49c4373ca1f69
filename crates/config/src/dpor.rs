//! DPoR consensus parameters.

use crate::{ConfigError, Result};
use porchain_types::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Default block period in milliseconds
pub const DEFAULT_BLOCK_PERIOD_MS: u64 = 3_000;

/// Default number of proposers per term
pub const DEFAULT_TERM_LEN: u64 = 4;

/// Default number of blocks per proposer view
pub const DEFAULT_VIEW_LEN: u64 = 3;

/// Default bound on faulty validators
pub const DEFAULT_FAULTY_NUMBER: u64 = 1;

/// Well-known contract names used as keys in [`DporConfig::contracts`].
pub mod contract {
    /// Campaign contract holding the candidate registry
    pub const CAMPAIGN: &str = "campaign";
    /// Reputation contract aggregating per-block scores
    pub const RPT: &str = "rpt";
    /// Proxy register contract backing the proxy relaying metric
    pub const PROXY_REGISTER: &str = "proxy_register";
    /// Reputation-node admission contract
    pub const RNODE: &str = "rnode";
}

/// DPoR consensus engine configuration.
///
/// A term spans `term_len × view_len` blocks with a fixed proposer set;
/// membership only changes at term boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DporConfig {
    /// Target block period in milliseconds
    pub period_ms: u64,
    /// Number of proposers per term
    pub term_len: u64,
    /// Number of consecutive blocks each proposer seals per view
    pub view_len: u64,
    /// Maximum tolerated faulty validators `f`; the validator set must
    /// have exactly `3f + 1` members
    pub faulty_number: u64,
    /// View timer duration in milliseconds; 0 selects the default of
    /// ten block periods
    pub impeach_timeout_ms: u64,
    /// First height at which the v2 reputation collector applies
    pub rpt_calc_method2_block: u64,
    /// First height at which the v3 reputation collector applies
    pub rpt_calc_method3_block: u64,
    /// Height up to which the bootstrap proposer list is used verbatim
    pub max_init_block_number: u64,
    /// Bootstrap candidate list for the first elected term
    pub candidates: Vec<Address>,
    /// Bootstrap proposers for term 0
    pub proposers: Vec<Address>,
    /// The configured validator committee
    pub validators: Vec<Address>,
    /// Named on-chain contract addresses
    pub contracts: BTreeMap<String, Address>,
}

impl DporConfig {
    /// Validates the configuration, normalizing defaulted fields.
    ///
    /// Returns the validated configuration with `impeach_timeout_ms`
    /// resolved to its default when left at zero.
    pub fn validated(mut self) -> Result<Self> {
        if self.term_len == 0 || self.view_len == 0 {
            return Err(ConfigError::EmptyTermGeometry {
                term_len: self.term_len,
                view_len: self.view_len,
            });
        }
        if self.period_ms == 0 {
            return Err(ConfigError::ZeroPeriod);
        }
        if self.validators.len() as u64 != 3 * self.faulty_number + 1 {
            return Err(ConfigError::InvalidValidatorCount {
                count: self.validators.len(),
                faulty: self.faulty_number,
            });
        }
        if self.impeach_timeout_ms == 0 {
            self.impeach_timeout_ms = self.period_ms * 10;
        }
        Ok(self)
    }

    /// Target block period.
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    /// View timer duration before the impeachment path triggers.
    pub fn impeach_timeout(&self) -> Duration {
        Duration::from_millis(self.impeach_timeout_ms)
    }

    /// Number of blocks in one term.
    pub fn term_span(&self) -> u64 {
        self.term_len * self.view_len
    }

    /// Term index of a block height.
    pub fn term_of(&self, number: u64) -> u64 {
        number.saturating_sub(1) / self.term_span()
    }

    /// Whether `number` is the first block of a term.
    pub fn is_term_start(&self, number: u64) -> bool {
        number > 0 && (number - 1) % self.term_span() == 0
    }

    /// Whether a snapshot at `number` must be checkpointed.
    pub fn is_checkpoint(&self, number: u64) -> bool {
        number % self.term_span() == 0
    }

    /// View index of a block height within its term.
    pub fn view_of(&self, number: u64) -> u64 {
        (number / self.view_len) % self.term_len
    }

    /// Index into the term's proposer list for block `number`.
    pub fn proposer_index(&self, number: u64) -> usize {
        self.view_of(number) as usize
    }

    /// Quorum threshold: the smallest vote count strictly greater than
    /// two thirds of the validator set.
    pub fn quorum(&self) -> usize {
        let n = self.validators.len();
        2 * n / 3 + 1
    }

    /// Development-chain configuration: four proposers, three blocks per
    /// view and a four-validator committee (`f = 1`).
    pub fn dev() -> Self {
        let candidates = vec![
            addr("0xc3a5b0724371f3d0715b0d2ea0e35249b51c4a92"),
            addr("0xe75b1c6c8a0e526a4d97f9763aa6097bde25d61a"),
            addr("0xef4dd127de235f15ffb4fc0d71469d1339df6471"),
            addr("0x6e41e5b68a98dcd17264bd1ba547d0b3e874da2f"),
            addr("0x3a28598184ef84198db90c28fdfdfdf56544f731"),
            addr("0x22b672eab2b1a3ff3ed91563205a56ca5a560e17"),
        ];
        let proposers = candidates[..4].to_vec();
        let validators = vec![
            addr("0x7b3f052a372951d02798853e39ee56c895109981"),
            addr("0x2f1176cc3a8617b6ddea6a501028fa4c6fc25cb2"),
            addr("0xe4d51117832e84f1d082e9fc12439b771a57e7c3"),
            addr("0x32bd7c33bb5060a85f361caf20c0bda9075c5d62"),
        ];

        let mut contracts = BTreeMap::new();
        contracts.insert(
            contract::CAMPAIGN.to_string(),
            addr("0x1404bf355428523f8e51e68df00a0521e413f98e"),
        );
        contracts.insert(
            contract::RPT.to_string(),
            addr("0x878a9a4155e8d60fbe07074a9061a0dcc031c212"),
        );
        contracts.insert(
            contract::PROXY_REGISTER.to_string(),
            addr("0xd4826927aa2dba7930117782ed183576ccebed93"),
        );
        contracts.insert(
            contract::RNODE.to_string(),
            addr("0xf0f87e064c76674fe7c4ddcee3603afc67998658"),
        );

        Self {
            period_ms: DEFAULT_BLOCK_PERIOD_MS,
            term_len: DEFAULT_TERM_LEN,
            view_len: DEFAULT_VIEW_LEN,
            faulty_number: DEFAULT_FAULTY_NUMBER,
            impeach_timeout_ms: DEFAULT_BLOCK_PERIOD_MS * 10,
            rpt_calc_method2_block: 100,
            rpt_calc_method3_block: 200,
            max_init_block_number: 120,
            candidates,
            proposers,
            validators,
            contracts,
        }
    }

    /// Looks up a contract address by its well-known name.
    pub fn contract_address(&self, name: &'static str) -> Result<Address> {
        self.contracts
            .get(name)
            .copied()
            .ok_or(ConfigError::MissingContract(name))
    }
}

fn addr(s: &str) -> Address {
    // Only used with the compile-time dev constants above.
    s.parse().unwrap_or(Address::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_config_is_valid() {
        let config = DporConfig::dev().validated().unwrap();
        assert_eq!(config.term_span(), 12);
        assert_eq!(config.quorum(), 3);
        assert_eq!(config.impeach_timeout(), Duration::from_millis(30_000));
    }

    #[test]
    fn rejects_wrong_validator_count() {
        let mut config = DporConfig::dev();
        config.validators.pop();
        assert_eq!(
            config.validated().unwrap_err(),
            ConfigError::InvalidValidatorCount { count: 3, faulty: 1 }
        );
    }

    #[test]
    fn rejects_zero_geometry() {
        let mut config = DporConfig::dev();
        config.view_len = 0;
        assert!(matches!(
            config.validated().unwrap_err(),
            ConfigError::EmptyTermGeometry { .. }
        ));
    }

    #[test]
    fn impeach_timeout_defaults_to_ten_periods() {
        let mut config = DporConfig::dev();
        config.impeach_timeout_ms = 0;
        let config = config.validated().unwrap();
        assert_eq!(config.impeach_timeout_ms, config.period_ms * 10);
    }

    #[test]
    fn term_arithmetic() {
        let config = DporConfig::dev();
        // Term 0 covers heights 1..=12, term 1 starts at 13.
        assert_eq!(config.term_of(1), 0);
        assert_eq!(config.term_of(12), 0);
        assert_eq!(config.term_of(13), 1);
        assert!(config.is_term_start(13));
        assert!(!config.is_term_start(12));
        assert!(config.is_checkpoint(12));
        assert!(!config.is_checkpoint(13));
    }

    #[test]
    fn view_schedule_matches_proposer_slots() {
        let config = DporConfig::dev();
        // view_len = 3, term_len = 4
        assert_eq!(config.proposer_index(13), 0);
        assert_eq!(config.proposer_index(15), 1);
        assert_eq!(config.proposer_index(18), 2);
        assert_eq!(config.proposer_index(21), 3);
        assert_eq!(config.proposer_index(24), 0);
    }

    #[test]
    fn serde_roundtrip() {
        let config = DporConfig::dev();
        let json = serde_json::to_string(&config).unwrap();
        let decoded: DporConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, decoded);
    }
}
