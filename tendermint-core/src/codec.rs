// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Wire envelope and payload codec.
//!
//! The envelope layout is byte-exact and shared with peers:
//!
//! ```text
//! code: u64 BE | msg_len: u32 BE | msg bytes | address (20) | signature (65)
//! ```
//!
//! The signature pre-image is the same encoding with the signature field
//! omitted entirely. Vote and proposal payloads are bincode blobs carried
//! opaquely in `msg`.

use serde::de::DeserializeOwned;
use serde::Serialize;

use tendermint_traits::{Address, BlockHash, Signature};

use crate::types::{MsgCode, Proposal, Vote};

/// Length of the committed seal: 32-byte hash plus the commit tag byte.
pub const COMMITTED_SEAL_LEN: usize = 33;

/// Errors from envelope or payload decoding.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The buffer ended before the layout was satisfied.
    #[error("truncated envelope: needed {needed} more bytes")]
    Truncated { needed: usize },

    /// Bytes remained after the fixed layout was consumed.
    #[error("trailing bytes after envelope: {0}")]
    TrailingBytes(usize),

    /// The code field is not a known message code.
    #[error("unknown message code: {0}")]
    UnknownCode(u64),

    /// The payload did not decode as the expected type.
    #[error("payload decode failed: {0}")]
    Payload(#[from] bincode::Error),
}

/// A signed message envelope.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// The vote-kind / proposal code.
    pub code: MsgCode,

    /// Opaque encoded payload (vote or proposal).
    pub msg: Vec<u8>,

    /// The signer's address.
    pub address: Address,

    /// Signature over the pre-image.
    pub signature: Signature,
}

impl Message {
    /// Assemble a signed envelope.
    pub fn new(code: MsgCode, msg: Vec<u8>, address: Address, signature: Signature) -> Self {
        Self {
            code,
            msg,
            address,
            signature,
        }
    }

    /// The signature pre-image: the envelope without its signature field.
    pub fn preimage(&self) -> Vec<u8> {
        signing_preimage(self.code, &self.msg, &self.address)
    }

    /// Encode the full envelope.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.preimage();
        out.extend_from_slice(self.signature.as_bytes());
        out
    }

    /// Decode an envelope, checking the fixed layout exactly.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut cursor = bytes;

        let code = u64::from_be_bytes(take::<8>(&mut cursor)?);
        let code = MsgCode::from_u64(code).ok_or(CodecError::UnknownCode(code))?;

        let msg_len = u32::from_be_bytes(take::<4>(&mut cursor)?) as usize;
        if cursor.len() < msg_len {
            return Err(CodecError::Truncated {
                needed: msg_len - cursor.len(),
            });
        }
        let (msg, rest) = cursor.split_at(msg_len);
        cursor = rest;

        let address = Address::from(take::<20>(&mut cursor)?);
        let signature = Signature::from(take::<65>(&mut cursor)?);

        if !cursor.is_empty() {
            return Err(CodecError::TrailingBytes(cursor.len()));
        }

        Ok(Message {
            code,
            msg: msg.to_vec(),
            address,
            signature,
        })
    }
}

/// Build the signing pre-image for an envelope before it carries a
/// signature.
pub fn signing_preimage(code: MsgCode, msg: &[u8], address: &Address) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + 4 + msg.len() + 20);
    out.extend_from_slice(&code.as_u64().to_be_bytes());
    out.extend_from_slice(&(msg.len() as u32).to_be_bytes());
    out.extend_from_slice(msg);
    out.extend_from_slice(address.as_bytes());
    out
}

/// Encode a vote payload.
pub fn encode_vote(vote: &Vote) -> Result<Vec<u8>, CodecError> {
    Ok(bincode::serialize(vote)?)
}

/// Decode a vote payload.
pub fn decode_vote(bytes: &[u8]) -> Result<Vote, CodecError> {
    Ok(bincode::deserialize(bytes)?)
}

/// Encode a proposal payload.
pub fn encode_proposal<B: Serialize>(proposal: &Proposal<B>) -> Result<Vec<u8>, CodecError> {
    Ok(bincode::serialize(proposal)?)
}

/// Decode a proposal payload.
pub fn decode_proposal<B: DeserializeOwned>(bytes: &[u8]) -> Result<Proposal<B>, CodecError> {
    Ok(bincode::deserialize(bytes)?)
}

/// The committed seal for a block hash: `hash || byte(Commit)`.
///
/// External verifiers depend on this exact concatenation; the signature each
/// committing validator produces over it is what downstream consumers check
/// on the finalized block.
pub fn committed_seal(hash: &BlockHash) -> [u8; COMMITTED_SEAL_LEN] {
    let mut seal = [0u8; COMMITTED_SEAL_LEN];
    seal[..32].copy_from_slice(hash.as_bytes());
    seal[32] = MsgCode::Commit.as_u64() as u8;
    seal
}

fn take<const N: usize>(cursor: &mut &[u8]) -> Result<[u8; N], CodecError> {
    if cursor.len() < N {
        return Err(CodecError::Truncated {
            needed: N - cursor.len(),
        });
    }
    let (head, rest) = cursor.split_at(N);
    *cursor = rest;
    let mut out = [0u8; N];
    out.copy_from_slice(head);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tendermint_traits::BlockHash;

    fn sample_message() -> Message {
        Message::new(
            MsgCode::Prevote,
            vec![1, 2, 3, 4],
            Address::from([7u8; 20]),
            Signature::from([9u8; 65]),
        )
    }

    #[test]
    fn test_envelope_roundtrip() {
        let msg = sample_message();
        let decoded = Message::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_preimage_stable_across_roundtrip() {
        let msg = sample_message();
        let decoded = Message::decode(&msg.encode()).unwrap();
        assert_eq!(decoded.preimage(), msg.preimage());
    }

    #[test]
    fn test_preimage_excludes_signature() {
        let mut msg = sample_message();
        let preimage = msg.preimage();
        msg.signature = Signature::from([0u8; 65]);
        assert_eq!(msg.preimage(), preimage);
    }

    #[test]
    fn test_decode_truncated() {
        let encoded = sample_message().encode();
        assert!(matches!(
            Message::decode(&encoded[..encoded.len() - 1]),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn test_decode_trailing() {
        let mut encoded = sample_message().encode();
        encoded.push(0);
        assert!(matches!(
            Message::decode(&encoded),
            Err(CodecError::TrailingBytes(1))
        ));
    }

    #[test]
    fn test_decode_unknown_code() {
        let mut encoded = sample_message().encode();
        encoded[..8].copy_from_slice(&99u64.to_be_bytes());
        assert!(matches!(
            Message::decode(&encoded),
            Err(CodecError::UnknownCode(99))
        ));
    }

    #[test]
    fn test_vote_payload_roundtrip() {
        let vote = Vote {
            block_hash: BlockHash::from([3u8; 32]),
            round: 2,
            height: 11,
        };
        let decoded = decode_vote(&encode_vote(&vote).unwrap()).unwrap();
        assert_eq!(decoded, vote);
    }

    #[test]
    fn test_committed_seal_layout() {
        let hash = BlockHash::from([0xaau8; 32]);
        let seal = committed_seal(&hash);
        assert_eq!(seal.len(), COMMITTED_SEAL_LEN);
        assert_eq!(&seal[..32], hash.as_bytes());
        assert_eq!(seal[32], 0);
    }
}
