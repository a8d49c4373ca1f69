//! Typed consensus messages and their wire encoding.
//!
//! Every message carries `{kind, height, view, hash, signer, sig}`,
//! RLP-encoded. The signature covers `keccak256(rlp([kind, height, view,
//! hash]))`, binding it to the message kind so a prepare signature can
//! never be replayed as a commit. Preprepare and block-relay messages
//! additionally carry the block body in the envelope.

use porchain_types::{Address, Block, Seal, H256};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use std::fmt;

use crate::traits::{BackendError, DporService};

/// Message kinds on the committee wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgKind {
    /// Proposer publishing a sealed candidate block
    Preprepare = 1,
    /// Validator prepare vote
    Prepare = 2,
    /// Validator commit vote
    Commit = 3,
    /// Validator prepare vote on the impeachment path
    ImpeachPrepare = 4,
    /// Validator commit vote on the impeachment path
    ImpeachCommit = 5,
    /// Relay of a finalized block
    BlockRelay = 6,
}

impl MsgKind {
    /// The wire byte of this kind.
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parses a wire byte.
    pub fn from_byte(byte: u8) -> Result<Self, DecoderError> {
        match byte {
            1 => Ok(Self::Preprepare),
            2 => Ok(Self::Prepare),
            3 => Ok(Self::Commit),
            4 => Ok(Self::ImpeachPrepare),
            5 => Ok(Self::ImpeachCommit),
            6 => Ok(Self::BlockRelay),
            _ => Err(DecoderError::Custom("unknown message kind")),
        }
    }

    /// Whether this kind travels with a block body.
    pub fn carries_block(self) -> bool {
        matches!(self, Self::Preprepare | Self::BlockRelay)
    }
}

impl fmt::Display for MsgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Preprepare => "preprepare",
            Self::Prepare => "prepare",
            Self::Commit => "commit",
            Self::ImpeachPrepare => "impeach-prepare",
            Self::ImpeachCommit => "impeach-commit",
            Self::BlockRelay => "block-relay",
        };
        write!(f, "{}", name)
    }
}

/// A signed consensus message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusMsg {
    /// Message kind
    pub kind: MsgKind,
    /// Height of the addressed block
    pub height: u64,
    /// View (proposer slot) the message belongs to
    pub view: u64,
    /// Hash of the addressed block
    pub hash: H256,
    /// Claimed signer address
    pub signer: Address,
    /// Signature over [`ConsensusMsg::digest`]
    pub sig: Seal,
}

impl ConsensusMsg {
    /// The digest a message of this shape signs.
    pub fn digest(kind: MsgKind, height: u64, view: u64, hash: H256) -> H256 {
        let mut stream = RlpStream::new_list(4);
        stream.append(&kind.as_byte());
        stream.append(&height);
        stream.append(&view);
        stream.append(&hash);
        H256::keccak256(&stream.out())
    }

    /// Builds and signs a message with the local signer.
    pub fn signed(
        service: &dyn DporService,
        kind: MsgKind,
        height: u64,
        view: u64,
        hash: H256,
    ) -> Result<Self, BackendError> {
        let digest = Self::digest(kind, height, view, hash);
        let sig = service.sign_digest(digest)?;
        Ok(Self {
            kind,
            height,
            view,
            hash,
            signer: service.signer_address(),
            sig: Seal::new(sig.to_bytes()),
        })
    }

    /// Verifies that the signature recovers to the claimed signer for
    /// this kind, height, view and hash.
    pub fn verify_signature(&self) -> bool {
        let digest = Self::digest(self.kind, self.height, self.view, self.hash);
        let sig = porchain_crypto::Signature::from_bytes(self.sig.as_fixed_bytes());
        match sig.recover_address(digest.as_fixed_bytes()) {
            Ok(addr) => addr == *self.signer.as_fixed_bytes(),
            Err(_) => false,
        }
    }
}

impl Encodable for ConsensusMsg {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(6);
        s.append(&self.kind.as_byte());
        s.append(&self.height);
        s.append(&self.view);
        s.append(&self.hash);
        s.append(&self.signer);
        s.append(&self.sig.as_bytes());
    }
}

impl Decodable for ConsensusMsg {
    fn decode(rlp: &Rlp<'_>) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 6 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        let sig_bytes: Vec<u8> = rlp.val_at(5)?;
        let sig = Seal::from_slice(&sig_bytes).map_err(|_| DecoderError::RlpInvalidLength)?;
        Ok(Self {
            kind: MsgKind::from_byte(rlp.val_at(0)?)?,
            height: rlp.val_at(1)?,
            view: rlp.val_at(2)?,
            hash: rlp.val_at(3)?,
            signer: rlp.val_at(4)?,
            sig,
        })
    }
}

impl fmt::Display for ConsensusMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}(h={}, v={}, {})",
            self.kind, self.height, self.view, self.hash
        )
    }
}

/// The envelope exchanged between committee peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    /// A bare consensus message
    Consensus(ConsensusMsg),
    /// A consensus message with the block body it addresses
    ConsensusWithBlock(ConsensusMsg, Block),
}

impl PeerMessage {
    /// The consensus message inside the envelope.
    pub fn msg(&self) -> &ConsensusMsg {
        match self {
            Self::Consensus(msg) => msg,
            Self::ConsensusWithBlock(msg, _) => msg,
        }
    }

    /// Encodes the envelope for the wire.
    pub fn encode(&self) -> Vec<u8> {
        let mut stream = RlpStream::new();
        match self {
            Self::Consensus(msg) => {
                stream.begin_list(2);
                stream.append(&0u8);
                stream.append(msg);
            }
            Self::ConsensusWithBlock(msg, block) => {
                stream.begin_list(3);
                stream.append(&1u8);
                stream.append(msg);
                stream.append(block);
            }
        }
        stream.out().to_vec()
    }

    /// Decodes an envelope from the wire.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecoderError> {
        let rlp = Rlp::new(bytes);
        let tag: u8 = rlp.val_at(0)?;
        match tag {
            0 => {
                if rlp.item_count()? != 2 {
                    return Err(DecoderError::RlpIncorrectListLen);
                }
                Ok(Self::Consensus(rlp.val_at(1)?))
            }
            1 => {
                if rlp.item_count()? != 3 {
                    return Err(DecoderError::RlpIncorrectListLen);
                }
                Ok(Self::ConsensusWithBlock(rlp.val_at(1)?, rlp.val_at(2)?))
            }
            _ => Err(DecoderError::Custom("unknown envelope tag")),
        }
    }

    /// A stable identity for outbound de-duplication: two messages with
    /// the same identity supersede each other in a peer's queue.
    pub fn dedup_id(&self) -> (MsgKind, u64, H256, Address) {
        let msg = self.msg();
        (msg.kind, msg.height, msg.hash, msg.signer)
    }
}
