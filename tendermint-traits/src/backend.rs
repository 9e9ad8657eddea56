// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Backend trait consumed by the consensus core.
//!
//! The backend is supplied by the embedding system. It carries the local
//! validator identity, signs outbound envelopes, authenticates inbound
//! ones, disseminates payloads, and resolves the validator set for a
//! height. The core treats `sign` and `broadcast` as synchronous from its
//! perspective and holds no lock across them.

use async_trait::async_trait;

use crate::block::Block;
use crate::primitives::{Address, Height, Signature};
use crate::validator::ValidatorSet;

/// Errors surfaced by backend operations.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The recovered signer does not match the claimed address, or the
    /// signature does not verify at all.
    #[error("invalid signature")]
    InvalidSignature,

    /// The signer is not a member of the validator set in force.
    #[error("unauthorized signer: {0}")]
    UnauthorizedSigner(Address),

    /// Signing the payload failed (key unavailable, HSM error, ...).
    #[error("signing failed: {0}")]
    Signing(String),

    /// Dissemination failed before any peer could be reached.
    #[error("broadcast failed: {0}")]
    Broadcast(String),
}

/// Operations the consensus core requires from its embedding system.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// The block type flowing through proposals and finalization.
    type Block: Block;

    /// Identity of the local validator.
    fn address(&self) -> Address;

    /// Sign the pre-image supplied by the core.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Signing`] when the key is unavailable; the
    /// core logs and abandons the send.
    fn sign(&self, payload: &[u8]) -> Result<Signature, BackendError>;

    /// Recover the signer of an inbound envelope pre-image.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidSignature`] when the signature does
    /// not verify.
    fn verify(&self, payload: &[u8], signature: &Signature) -> Result<Address, BackendError>;

    /// Disseminate a fully-signed envelope to all peers in the set.
    async fn broadcast(
        &self,
        validators: &dyn ValidatorSet,
        payload: Vec<u8>,
    ) -> Result<(), BackendError>;

    /// Snapshot of the validator set for a height.
    fn validators(&self, height: Height) -> Box<dyn ValidatorSet>;
}
