//! Block and header types carrying the DPoR extra field.
//!
//! The header `extra` field follows a fixed byte layout:
//!
//! ```text
//!  0..32        vanity (opaque, preserved verbatim)
//! 32..32+65N    validator signatures, zero-filled if absent,
//!               ordered by validator address ascending
//! tail 65       proposer seal signature
//! ```
//!
//! so `len(extra) = 32 + 65N + 65` where `N` is the validator-set size
//! fixed for the term. [`Header::hash`] covers the vanity prefix but not
//! the signature sections, so a block's identity is stable while prepare
//! and commit signatures accumulate.

use crate::{Address, Error, Result, H256};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Fixed number of extra-data prefix bytes reserved for proposer vanity
pub const EXTRA_VANITY: usize = 32;

/// Fixed number of bytes per signature slot (r ‖ s ‖ v)
pub const EXTRA_SEAL: usize = 65;

/// A raw 65-byte signature slot in the header extra field.
///
/// A zero-filled slot marks a validator that did not sign.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Seal([u8; EXTRA_SEAL]);

impl Seal {
    /// The zero-filled (absent) signature slot.
    pub const ZERO: Self = Self([0u8; EXTRA_SEAL]);

    /// Creates a seal from a 65-byte array.
    pub const fn new(bytes: [u8; EXTRA_SEAL]) -> Self {
        Self(bytes)
    }

    /// Creates a seal from a slice, which must be exactly 65 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        if slice.len() != EXTRA_SEAL {
            return Err(Error::InvalidLength {
                expected: EXTRA_SEAL,
                actual: slice.len(),
            });
        }
        let mut bytes = [0u8; EXTRA_SEAL];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    /// Returns the seal as a byte slice.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the seal as a fixed-size byte array.
    #[inline]
    pub const fn as_fixed_bytes(&self) -> &[u8; EXTRA_SEAL] {
        &self.0
    }

    /// Checks whether this slot is zero-filled (no signature present).
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl Default for Seal {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Debug for Seal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            write!(f, "Seal(absent)")
        } else {
            write!(f, "Seal(0x{}..)", hex::encode(&self.0[..6]))
        }
    }
}

impl From<[u8; EXTRA_SEAL]> for Seal {
    fn from(bytes: [u8; EXTRA_SEAL]) -> Self {
        Self(bytes)
    }
}

impl From<Seal> for [u8; EXTRA_SEAL] {
    fn from(seal: Seal) -> Self {
        seal.0
    }
}

impl Serialize for Seal {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

impl<'de> Deserialize<'de> for Seal {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        Self::from_slice(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Decoded view of the header extra field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extra {
    /// Opaque 32-byte vanity prefix, preserved verbatim.
    pub vanity: [u8; EXTRA_VANITY],
    /// One slot per validator, ordered by validator address ascending.
    pub validator_sigs: Vec<Seal>,
    /// The proposer seal signature.
    pub seal: Seal,
}

impl Extra {
    /// Creates an extra section with `n` empty validator slots.
    pub fn empty(vanity: [u8; EXTRA_VANITY], n: usize) -> Self {
        Self {
            vanity,
            validator_sigs: vec![Seal::ZERO; n],
            seal: Seal::ZERO,
        }
    }

    /// The encoded length for a validator set of size `n`.
    pub const fn encoded_len(n: usize) -> usize {
        EXTRA_VANITY + n * EXTRA_SEAL + EXTRA_SEAL
    }

    /// Number of validator slots carrying a signature.
    pub fn signature_count(&self) -> usize {
        self.validator_sigs.iter().filter(|s| !s.is_zero()).count()
    }

    /// Encodes the extra field to its fixed byte layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::encoded_len(self.validator_sigs.len()));
        out.extend_from_slice(&self.vanity);
        for sig in &self.validator_sigs {
            out.extend_from_slice(sig.as_bytes());
        }
        out.extend_from_slice(self.seal.as_bytes());
        out
    }

    /// Decodes an extra field.
    ///
    /// The validator-slot count is derived from the length, which must be
    /// exactly `32 + 65N + 65` for some `N ≥ 0`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let min = EXTRA_VANITY + EXTRA_SEAL;
        if bytes.len() < min || (bytes.len() - min) % EXTRA_SEAL != 0 {
            return Err(Error::InvalidExtra(format!(
                "length {} does not match 32 + 65N + 65",
                bytes.len()
            )));
        }

        let n = (bytes.len() - min) / EXTRA_SEAL;
        let mut vanity = [0u8; EXTRA_VANITY];
        vanity.copy_from_slice(&bytes[..EXTRA_VANITY]);

        let mut validator_sigs = Vec::with_capacity(n);
        for i in 0..n {
            let start = EXTRA_VANITY + i * EXTRA_SEAL;
            validator_sigs.push(Seal::from_slice(&bytes[start..start + EXTRA_SEAL])?);
        }

        let seal = Seal::from_slice(&bytes[bytes.len() - EXTRA_SEAL..])?;

        Ok(Self {
            vanity,
            validator_sigs,
            seal,
        })
    }
}

/// A block header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Block height (genesis is height 0)
    pub height: u64,
    /// Hash of the parent block
    pub parent_hash: H256,
    /// Address of the proposer that sealed the block
    pub proposer: Address,
    /// Unix timestamp in milliseconds
    pub timestamp: u64,
    /// Merkle root of the transactions in this block
    pub transactions_root: H256,
    /// Merkle root of the world state after executing this block
    pub state_root: H256,
    /// Vanity prefix, validator signatures and proposer seal
    pub extra: Extra,
}

impl Header {
    /// Creates a header with empty roots and an extra section sized for
    /// `n_validators`.
    pub fn new(height: u64, parent_hash: H256, proposer: Address, timestamp: u64, n_validators: usize) -> Self {
        Self {
            height,
            parent_hash,
            proposer,
            timestamp,
            transactions_root: H256::NIL,
            state_root: H256::NIL,
            extra: Extra::empty([0u8; EXTRA_VANITY], n_validators),
        }
    }

    /// Computes the block identity hash.
    ///
    /// The hash is the Keccak256 of the RLP-encoded header with the extra
    /// field reduced to its vanity prefix. Validator signatures and the
    /// proposer seal are excluded so the hash does not move while
    /// signatures are collected; this is also the digest that proposer and
    /// validators sign.
    pub fn hash(&self) -> H256 {
        let mut stream = RlpStream::new_list(7);
        stream.append(&self.height);
        stream.append(&self.parent_hash);
        stream.append(&self.proposer);
        stream.append(&self.timestamp);
        stream.append(&self.transactions_root);
        stream.append(&self.state_root);
        stream.append(&self.extra.vanity.to_vec());
        H256::keccak256(&stream.out())
    }
}

impl Encodable for Header {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(7);
        s.append(&self.height);
        s.append(&self.parent_hash);
        s.append(&self.proposer);
        s.append(&self.timestamp);
        s.append(&self.transactions_root);
        s.append(&self.state_root);
        s.append(&self.extra.encode());
    }
}

impl Decodable for Header {
    fn decode(rlp: &Rlp<'_>) -> std::result::Result<Self, DecoderError> {
        if rlp.item_count()? != 7 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        let extra_bytes: Vec<u8> = rlp.val_at(6)?;
        let extra = Extra::decode(&extra_bytes).map_err(|_| DecoderError::RlpInvalidLength)?;
        Ok(Self {
            height: rlp.val_at(0)?,
            parent_hash: rlp.val_at(1)?,
            proposer: rlp.val_at(2)?,
            timestamp: rlp.val_at(3)?,
            transactions_root: rlp.val_at(4)?,
            state_root: rlp.val_at(5)?,
            extra,
        })
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} (hash: {}, parent: {}, proposer: {})",
            self.height,
            self.hash(),
            self.parent_hash,
            self.proposer
        )
    }
}

/// A transaction carried in a block body.
///
/// The engine treats transaction payloads as opaque; execution happens in
/// an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Sender nonce
    pub nonce: u64,
    /// Sender address
    pub from: Address,
    /// Recipient address
    pub to: Address,
    /// Transferred value in the native token
    pub value: u128,
    /// Opaque call payload
    pub payload: Vec<u8>,
}

impl Transaction {
    /// Returns the transaction hash.
    pub fn hash(&self) -> H256 {
        H256::keccak256(&rlp::encode(self))
    }
}

impl Encodable for Transaction {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(5);
        s.append(&self.nonce);
        s.append(&self.from);
        s.append(&self.to);
        s.append(&self.value);
        s.append(&self.payload);
    }
}

impl Decodable for Transaction {
    fn decode(rlp: &Rlp<'_>) -> std::result::Result<Self, DecoderError> {
        if rlp.item_count()? != 5 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Self {
            nonce: rlp.val_at(0)?,
            from: rlp.val_at(1)?,
            to: rlp.val_at(2)?,
            value: rlp.val_at(3)?,
            payload: rlp.val_at(4)?,
        })
    }
}

/// A complete block: header plus transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// The block header
    pub header: Header,
    /// The transactions in this block
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Creates a new block from a header and transactions.
    pub fn new(header: Header, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    /// Creates an empty block with the given header.
    pub fn empty(header: Header) -> Self {
        Self::new(header, Vec::new())
    }

    /// Returns the block hash (identity hash of the header).
    pub fn hash(&self) -> H256 {
        self.header.hash()
    }

    /// Returns the block height.
    pub fn height(&self) -> u64 {
        self.header.height
    }

    /// Returns the parent hash.
    pub fn parent_hash(&self) -> H256 {
        self.header.parent_hash
    }

    /// Checks if the block carries no transactions.
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

impl Encodable for Block {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        s.append(&self.header);
        s.begin_list(self.transactions.len());
        for tx in &self.transactions {
            s.append(tx);
        }
    }
}

impl Decodable for Block {
    fn decode(rlp: &Rlp<'_>) -> std::result::Result<Self, DecoderError> {
        if rlp.item_count()? != 2 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Self {
            header: rlp.val_at(0)?,
            transactions: rlp.list_at(1)?,
        })
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Block #{} (hash: {}, {} txs)",
            self.header.height,
            self.hash(),
            self.transactions.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header(n: usize) -> Header {
        Header::new(10, H256::keccak256(b"parent"), Address::from_low_u64(7), 1_000, n)
    }

    #[test]
    fn extra_layout_length() {
        assert_eq!(Extra::encoded_len(4), 32 + 4 * 65 + 65);
        let extra = Extra::empty([0u8; 32], 4);
        assert_eq!(extra.encode().len(), Extra::encoded_len(4));
    }

    #[test]
    fn extra_roundtrip() {
        let mut extra = Extra::empty([0xab; 32], 4);
        extra.validator_sigs[1] = Seal::new([0x11; 65]);
        extra.seal = Seal::new([0x22; 65]);

        let decoded = Extra::decode(&extra.encode()).unwrap();
        assert_eq!(decoded, extra);
        assert_eq!(decoded.signature_count(), 1);
    }

    #[test]
    fn extra_rejects_bad_length() {
        assert!(Extra::decode(&[0u8; 96]).is_err());
        assert!(Extra::decode(&[0u8; 32 + 65 + 64]).is_err());
    }

    #[test]
    fn hash_is_stable_under_signature_aggregation() {
        let mut header = sample_header(4);
        let before = header.hash();

        header.extra.validator_sigs[0] = Seal::new([0x33; 65]);
        header.extra.seal = Seal::new([0x44; 65]);
        assert_eq!(header.hash(), before);

        // The vanity is covered, so changing it moves the hash.
        header.extra.vanity[0] = 0xff;
        assert_ne!(header.hash(), before);
    }

    #[test]
    fn header_rlp_roundtrip() {
        let mut header = sample_header(2);
        header.extra.seal = Seal::new([0x55; 65]);
        let encoded = rlp::encode(&header);
        let decoded: Header = rlp::decode(&encoded).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn block_rlp_roundtrip() {
        let tx = Transaction {
            nonce: 1,
            from: Address::from_low_u64(1),
            to: Address::from_low_u64(2),
            value: 42,
            payload: vec![1, 2, 3],
        };
        let block = Block::new(sample_header(2), vec![tx]);
        let encoded = rlp::encode(&block);
        let decoded: Block = rlp::decode(&encoded).unwrap();
        assert_eq!(decoded, block);
    }

    #[test]
    fn empty_block_has_no_transactions() {
        let block = Block::empty(sample_header(4));
        assert!(block.is_empty());
        assert_eq!(block.height(), 10);
    }
}
