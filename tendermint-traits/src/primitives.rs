// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Primitive wire types for consensus.
//!
//! These are fixed-width by contract: 20-byte validator addresses, 32-byte
//! block hashes, 65-byte recoverable signatures. Peers agree on these widths,
//! so they are concrete types rather than trait parameters.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::Error;

/// Block-number slot under consensus; monotonically increasing.
pub type Height = u64;

/// Attempt number within a height. Signed so that `-1` can mean
/// "no valid round known" (locks, PoL rounds, commit round).
pub type Round = i64;

/// 20-byte validator address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address([u8; 20]);

impl Address {
    /// Create an address from a byte slice.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice is not exactly 20 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != 20 {
            return Err(anyhow::anyhow!(
                "invalid address length: expected 20, got {}",
                bytes.len()
            ));
        }
        let mut addr = [0u8; 20];
        addr.copy_from_slice(bytes);
        Ok(Address(addr))
    }

    /// Get the byte representation of this address.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl From<[u8; 20]> for Address {
    fn from(bytes: [u8; 20]) -> Self {
        Address(bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// 32-byte block hash.
///
/// The all-zero value is the nil sentinel: a vote carrying it is a vote for
/// "no block".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockHash([u8; 32]);

impl BlockHash {
    /// The nil/empty sentinel hash (all zeros).
    pub const EMPTY: BlockHash = BlockHash([0u8; 32]);

    /// Create a hash from a byte slice.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice is not exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != 32 {
            return Err(anyhow::anyhow!(
                "invalid hash length: expected 32, got {}",
                bytes.len()
            ));
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(bytes);
        Ok(BlockHash(hash))
    }

    /// Get the byte representation of this hash.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Whether this is the nil sentinel.
    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }
}

impl From<[u8; 32]> for BlockHash {
    fn from(bytes: [u8; 32]) -> Self {
        BlockHash(bytes)
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// 65-byte recoverable signature over an envelope pre-image.
///
/// Serialized as a byte sequence because fixed arrays above 32 elements do
/// not derive serde implementations.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature([u8; 65]);

impl Signature {
    /// Create a signature from a byte slice.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice is not exactly 65 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != 65 {
            return Err(anyhow::anyhow!(
                "invalid signature length: expected 65, got {}",
                bytes.len()
            ));
        }
        let mut sig = [0u8; 65];
        sig.copy_from_slice(bytes);
        Ok(Signature(sig))
    }

    /// Get the byte representation of this signature.
    pub fn as_bytes(&self) -> &[u8; 65] {
        &self.0
    }
}

impl From<[u8; 65]> for Signature {
    fn from(bytes: [u8; 65]) -> Self {
        Signature(bytes)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = <Vec<u8>>::deserialize(deserializer)?;
        Signature::from_slice(&bytes).map_err(serde::de::Error::custom)
    }
}
