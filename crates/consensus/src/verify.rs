//! Header verification.
//!
//! Two layers exist: proposal-time checks applied before a validator
//! signs (extra layout, scheduled proposer, seal recovery, recent-signer
//! discipline) and finalization checks applied to blocks entering the
//! chain (additionally a quorum of validator signatures in the extra
//! field).
//!
//! The proposal-time checks sit behind the injectable [`VerifierPolicy`]
//! so test harnesses can replace them without runtime mode branches in
//! the hot path: [`RealVerifier`] for production, [`AlwaysOkVerifier`]
//! and [`DelayVerifier`] for accept-everything harnesses, and
//! [`FailAtHeightVerifier`] to inject a rejection at one height.

use porchain_config::DporConfig;
use porchain_crypto::Signature;
use porchain_types::{Address, Header, H256};
use std::time::Duration;

use crate::backend::message::{ConsensusMsg, MsgKind};
use crate::snapshot::Committee;

/// Reasons a header is rejected.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// The extra field length does not fit the validator-set size
    #[error("extra field carries {got} validator slots, committee has {expected}")]
    ExtraLayout {
        /// Slots present
        got: usize,
        /// Slots required
        expected: usize,
    },

    /// The header names a proposer outside the schedule
    #[error("proposer {proposer} is not scheduled at height {height}")]
    WrongProposer {
        /// Claimed proposer
        proposer: Address,
        /// Block height
        height: u64,
    },

    /// The seal signature is missing or does not recover to the proposer
    #[error("seal does not recover to proposer {proposer} at height {height}")]
    BadSeal {
        /// Claimed proposer
        proposer: Address,
        /// Block height
        height: u64,
    },

    /// A validator slot carries a signature that does not recover to
    /// that slot's validator
    #[error("validator slot {slot} carries a foreign signature at height {height}")]
    ForeignSignature {
        /// Slot index
        slot: usize,
        /// Block height
        height: u64,
    },

    /// Fewer distinct validator signatures than the quorum requires
    #[error("{got} validator signatures at height {height}, quorum is {need}")]
    InsufficientSignatures {
        /// Signatures present
        got: usize,
        /// Quorum threshold
        need: usize,
        /// Block height
        height: u64,
    },

    /// The proposer sealed more blocks inside the window than its view
    /// allows
    #[error("proposer {proposer} exceeded its view allowance in the signer window")]
    RecentlySigned {
        /// Offending proposer
        proposer: Address,
    },

    /// Rejection injected by a test policy
    #[error("policy rejected header at height {0}")]
    PolicyReject(u64),
}

/// Proposal-time header verification, injectable for tests.
pub trait VerifierPolicy: Send + Sync {
    /// Verifies a proposed header against its governing committee.
    fn verify_header(
        &self,
        header: &Header,
        committee: &Committee,
        config: &DporConfig,
    ) -> Result<(), VerifyError>;
}

/// The production verifier.
pub struct RealVerifier;

impl VerifierPolicy for RealVerifier {
    fn verify_header(
        &self,
        header: &Header,
        committee: &Committee,
        config: &DporConfig,
    ) -> Result<(), VerifyError> {
        verify_proposal(header, committee, config)
    }
}

/// Accepts every header.
pub struct AlwaysOkVerifier;

impl VerifierPolicy for AlwaysOkVerifier {
    fn verify_header(
        &self,
        _header: &Header,
        _committee: &Committee,
        _config: &DporConfig,
    ) -> Result<(), VerifyError> {
        Ok(())
    }
}

/// Accepts every header after sleeping, to exercise slow-path timing.
pub struct DelayVerifier {
    delay: Duration,
}

impl DelayVerifier {
    /// Creates a verifier that sleeps `delay` per header.
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl VerifierPolicy for DelayVerifier {
    fn verify_header(
        &self,
        _header: &Header,
        _committee: &Committee,
        _config: &DporConfig,
    ) -> Result<(), VerifyError> {
        std::thread::sleep(self.delay);
        Ok(())
    }
}

/// Accepts every header except at one height.
pub struct FailAtHeightVerifier {
    height: u64,
}

impl FailAtHeightVerifier {
    /// Creates a verifier rejecting headers at `height`.
    pub fn new(height: u64) -> Self {
        Self { height }
    }
}

impl VerifierPolicy for FailAtHeightVerifier {
    fn verify_header(
        &self,
        header: &Header,
        _committee: &Committee,
        _config: &DporConfig,
    ) -> Result<(), VerifyError> {
        if header.height == self.height {
            return Err(VerifyError::PolicyReject(header.height));
        }
        Ok(())
    }
}

/// Proposal-time checks: extra layout, schedule, seal recovery and the
/// recent-signer allowance.
pub fn verify_proposal(
    header: &Header,
    committee: &Committee,
    config: &DporConfig,
) -> Result<(), VerifyError> {
    check_extra_layout(header, committee)?;

    let scheduled = committee.proposer_of(header.height, config);
    if scheduled != Some(header.proposer) {
        return Err(VerifyError::WrongProposer {
            proposer: header.proposer,
            height: header.height,
        });
    }

    check_seal(header)?;
    Ok(())
}

/// Finalization checks: everything from the proposal layer plus a
/// quorum of validator signatures, each recovering to its slot's
/// validator. Impeach blocks carry no seal; for them the quorum covers
/// impeach-commit digests instead of commit digests.
pub fn verify_finalized(
    header: &Header,
    committee: &Committee,
    config: &DporConfig,
) -> Result<(), VerifyError> {
    check_extra_layout(header, committee)?;

    let impeached = header.extra.seal.is_zero();
    if !impeached {
        verify_proposal(header, committee, config)?;
    }

    let kind = if impeached {
        MsgKind::ImpeachCommit
    } else {
        MsgKind::Commit
    };
    let digest = ConsensusMsg::digest(
        kind,
        header.height,
        config.view_of(header.height),
        header.hash(),
    );

    let mut got = 0;
    for (slot, seal) in header.extra.validator_sigs.iter().enumerate() {
        if seal.is_zero() {
            continue;
        }
        let sig = Signature::from_bytes(seal.as_fixed_bytes());
        let recovered = sig
            .recover_address(digest.as_fixed_bytes())
            .map_err(|_| VerifyError::ForeignSignature {
                slot,
                height: header.height,
            })?;
        if recovered != *committee.validators[slot].as_fixed_bytes() {
            return Err(VerifyError::ForeignSignature {
                slot,
                height: header.height,
            });
        }
        got += 1;
    }

    let need = committee.quorum();
    if got < need {
        return Err(VerifyError::InsufficientSignatures {
            got,
            need,
            height: header.height,
        });
    }
    Ok(())
}

/// The recent-signer discipline: a proposer may appear at most
/// `view_len` times inside the trailing window, its per-term allowance.
pub fn check_recent_signers(
    header: &Header,
    signed_in_window: usize,
    config: &DporConfig,
) -> Result<(), VerifyError> {
    if signed_in_window >= config.view_len as usize {
        return Err(VerifyError::RecentlySigned {
            proposer: header.proposer,
        });
    }
    Ok(())
}

fn check_extra_layout(header: &Header, committee: &Committee) -> Result<(), VerifyError> {
    let got = header.extra.validator_sigs.len();
    let expected = committee.validators.len();
    if got != expected {
        return Err(VerifyError::ExtraLayout { got, expected });
    }
    Ok(())
}

fn check_seal(header: &Header) -> Result<(), VerifyError> {
    let reject = || VerifyError::BadSeal {
        proposer: header.proposer,
        height: header.height,
    };
    if header.extra.seal.is_zero() {
        return Err(reject());
    }

    let sig = Signature::from_bytes(header.extra.seal.as_fixed_bytes());
    let hash: H256 = header.hash();
    match sig.recover_address(hash.as_fixed_bytes()) {
        Ok(addr) if addr == *header.proposer.as_fixed_bytes() => Ok(()),
        _ => Err(reject()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use porchain_crypto::PrivateKey;
    use porchain_types::Seal;

    fn committee_of(keys: &[PrivateKey], proposers: Vec<Address>) -> Committee {
        let mut validators: Vec<Address> = keys
            .iter()
            .map(|k| Address::new(k.public_key().to_address()))
            .collect();
        validators.sort();
        Committee {
            term: 0,
            proposers,
            validators,
        }
    }

    fn sealed_header(proposer_key: &PrivateKey, height: u64, n: usize) -> Header {
        let proposer = Address::new(proposer_key.public_key().to_address());
        let mut header = Header::new(height, H256::keccak256(b"parent"), proposer, 1_000, n);
        let hash = header.hash();
        let seal = proposer_key.sign_prehash(hash.as_fixed_bytes()).unwrap();
        header.extra.seal = Seal::new(seal.to_bytes());
        header
    }

    #[test]
    fn accepts_well_formed_proposal() {
        let config = porchain_config::DporConfig::dev();
        let proposer_key = PrivateKey::random();
        let proposer = Address::new(proposer_key.public_key().to_address());
        let validator_keys: Vec<PrivateKey> = (0..4).map(|_| PrivateKey::random()).collect();

        let header = sealed_header(&proposer_key, 1, 4);
        let committee = committee_of(&validator_keys, vec![proposer; 4]);

        verify_proposal(&header, &committee, &config).unwrap();
    }

    #[test]
    fn rejects_unscheduled_proposer() {
        let config = porchain_config::DporConfig::dev();
        let proposer_key = PrivateKey::random();
        let validator_keys: Vec<PrivateKey> = (0..4).map(|_| PrivateKey::random()).collect();

        let header = sealed_header(&proposer_key, 1, 4);
        let committee = committee_of(&validator_keys, vec![Address::from_low_u64(9); 4]);

        assert!(matches!(
            verify_proposal(&header, &committee, &config),
            Err(VerifyError::WrongProposer { .. })
        ));
    }

    #[test]
    fn rejects_foreign_seal() {
        let config = porchain_config::DporConfig::dev();
        let proposer_key = PrivateKey::random();
        let proposer = Address::new(proposer_key.public_key().to_address());
        let validator_keys: Vec<PrivateKey> = (0..4).map(|_| PrivateKey::random()).collect();

        // Sealed by someone other than the named proposer.
        let mut header = sealed_header(&PrivateKey::random(), 1, 4);
        header.proposer = proposer;
        let committee = committee_of(&validator_keys, vec![proposer; 4]);

        assert!(matches!(
            verify_proposal(&header, &committee, &config),
            Err(VerifyError::BadSeal { .. })
        ));
    }

    #[test]
    fn finalized_block_needs_quorum() {
        let config = porchain_config::DporConfig::dev();
        let proposer_key = PrivateKey::random();
        let proposer = Address::new(proposer_key.public_key().to_address());
        let validator_keys: Vec<PrivateKey> = (0..4).map(|_| PrivateKey::random()).collect();
        let committee = committee_of(&validator_keys, vec![proposer; 4]);

        let mut header = sealed_header(&proposer_key, 1, 4);
        let digest = ConsensusMsg::digest(
            MsgKind::Commit,
            header.height,
            config.view_of(header.height),
            header.hash(),
        );

        // Two signatures: below the quorum of three.
        for validator in committee.validators.iter().take(2) {
            let key = validator_keys
                .iter()
                .find(|k| Address::new(k.public_key().to_address()) == *validator)
                .unwrap();
            let slot = committee.validator_index(validator).unwrap();
            let sig = key.sign_prehash(digest.as_fixed_bytes()).unwrap();
            header.extra.validator_sigs[slot] = Seal::new(sig.to_bytes());
        }
        assert!(matches!(
            verify_finalized(&header, &committee, &config),
            Err(VerifyError::InsufficientSignatures { got: 2, need: 3, .. })
        ));

        // A third signature completes the quorum.
        let third = &committee.validators[2];
        let key = validator_keys
            .iter()
            .find(|k| Address::new(k.public_key().to_address()) == *third)
            .unwrap();
        let sig = key.sign_prehash(digest.as_fixed_bytes()).unwrap();
        header.extra.validator_sigs[2] = Seal::new(sig.to_bytes());

        verify_finalized(&header, &committee, &config).unwrap();
    }

    #[test]
    fn rejects_signature_in_wrong_slot() {
        let config = porchain_config::DporConfig::dev();
        let proposer_key = PrivateKey::random();
        let proposer = Address::new(proposer_key.public_key().to_address());
        let validator_keys: Vec<PrivateKey> = (0..4).map(|_| PrivateKey::random()).collect();
        let committee = committee_of(&validator_keys, vec![proposer; 4]);

        let mut header = sealed_header(&proposer_key, 1, 4);
        let digest = ConsensusMsg::digest(
            MsgKind::Commit,
            header.height,
            config.view_of(header.height),
            header.hash(),
        );

        // Validator 0's signature placed in slot 1.
        let key = validator_keys
            .iter()
            .find(|k| Address::new(k.public_key().to_address()) == committee.validators[0])
            .unwrap();
        let sig = key.sign_prehash(digest.as_fixed_bytes()).unwrap();
        header.extra.validator_sigs[1] = Seal::new(sig.to_bytes());

        assert!(matches!(
            verify_finalized(&header, &committee, &config),
            Err(VerifyError::ForeignSignature { slot: 1, .. })
        ));
    }

    #[test]
    fn policy_doubles_behave() {
        let config = porchain_config::DporConfig::dev();
        let proposer_key = PrivateKey::random();
        let validator_keys: Vec<PrivateKey> = (0..4).map(|_| PrivateKey::random()).collect();
        let header = sealed_header(&proposer_key, 7, 4);
        let committee = committee_of(&validator_keys, vec![Address::from_low_u64(1); 4]);

        // The real verifier rejects (unscheduled proposer); the doubles
        // behave per their contract.
        assert!(RealVerifier.verify_header(&header, &committee, &config).is_err());
        assert!(AlwaysOkVerifier.verify_header(&header, &committee, &config).is_ok());
        assert!(DelayVerifier::new(Duration::from_millis(1))
            .verify_header(&header, &committee, &config)
            .is_ok());
        assert!(FailAtHeightVerifier::new(7)
            .verify_header(&header, &committee, &config)
            .is_err());
        assert!(FailAtHeightVerifier::new(8)
            .verify_header(&header, &committee, &config)
            .is_ok());
    }

    #[test]
    fn recent_signer_allowance() {
        let config = porchain_config::DporConfig::dev();
        let header = sealed_header(&PrivateKey::random(), 5, 4);

        assert!(check_recent_signers(&header, 0, &config).is_ok());
        assert!(check_recent_signers(&header, 2, &config).is_ok());
        assert!(check_recent_signers(&header, 3, &config).is_err());
    }
}
