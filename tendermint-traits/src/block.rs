// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Block trait for consensus.
//!
//! The engine never inspects block contents. It orders opaque blocks by
//! hash and height; production and semantic validation belong to the
//! embedding system.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

use crate::primitives::{BlockHash, Height};

/// A candidate block as seen by the consensus core.
///
/// # Requirements
///
/// Implementations must be:
/// - Cheap to clone (blocks flow through proposals and the finalized-block
///   event; wrap large payloads in `Arc` internally)
/// - Thread-safe (Send + Sync)
/// - Serializable, since proposals carry the full block on the wire
pub trait Block:
    Clone + Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// The hash identifying this block. Votes and committed seals are
    /// constructed over this value.
    fn hash(&self) -> BlockHash;

    /// The height this block is proposed for.
    fn number(&self) -> Height;
}
