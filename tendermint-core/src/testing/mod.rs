// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Mock implementations for testing.
//!
//! This module provides deterministic stand-ins for the embedding system:
//! a block type with a content-derived hash, and a backend whose
//! "signatures" carry the signer address and a payload digest so that
//! `verify` can recover the signer without real cryptography. Broadcast
//! payloads are captured for assertions instead of hitting a network.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tendermint_traits::{
    Address, Backend, BackendError, Block, BlockHash, Height, Signature, Validator, ValidatorSet,
};

use crate::codec::{self, Message};
use crate::types::{MsgCode, Proposal, Vote};
use crate::validator::RoundRobinValidatorSet;

/// A minimal block: a height and an identifier that seeds the hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestBlock {
    number: Height,
    id: u64,
}

impl TestBlock {
    /// Create a block for a height with a distinguishing id.
    pub fn new(number: Height, id: u64) -> Self {
        Self { number, id }
    }
}

impl Block for TestBlock {
    fn hash(&self) -> BlockHash {
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&self.number.to_be_bytes());
        bytes[8..16].copy_from_slice(&self.id.to_be_bytes());
        // Never collide with the nil sentinel.
        bytes[31] = 1;
        BlockHash::from(bytes)
    }

    fn number(&self) -> Height {
        self.number
    }
}

/// Deterministic mock signature: signer address followed by a payload
/// digest. `MockBackend::verify` recovers the address and checks the digest.
pub fn mock_signature(signer: &Address, payload: &[u8]) -> Signature {
    let mut bytes = [0u8; 65];
    bytes[..20].copy_from_slice(signer.as_bytes());
    bytes[20..52].copy_from_slice(&fold_digest(payload));
    Signature::from(bytes)
}

fn fold_digest(payload: &[u8]) -> [u8; 32] {
    let mut digest = [0u8; 32];
    digest[..8].copy_from_slice(&(payload.len() as u64).to_be_bytes());
    for (i, byte) in payload.iter().enumerate() {
        digest[8 + i % 24] ^= byte.rotate_left((i % 7) as u32);
    }
    digest
}

/// Backend double that signs with the mock scheme and records broadcasts.
pub struct MockBackend {
    address: Address,
    validators: Vec<Validator>,
    broadcasts: Mutex<Vec<Vec<u8>>>,
}

impl MockBackend {
    /// Create a backend for a local validator among the given set.
    pub fn new(address: Address, validators: Vec<Validator>) -> Arc<Self> {
        Arc::new(Self {
            address,
            validators,
            broadcasts: Mutex::new(Vec::new()),
        })
    }

    /// Drain the captured broadcast payloads.
    pub fn take_broadcasts(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.broadcasts.lock().expect("broadcast capture poisoned"))
    }

    /// Number of payloads broadcast so far (without draining).
    pub fn broadcast_count(&self) -> usize {
        self.broadcasts.lock().expect("broadcast capture poisoned").len()
    }
}

#[async_trait]
impl Backend for MockBackend {
    type Block = TestBlock;

    fn address(&self) -> Address {
        self.address
    }

    fn sign(&self, payload: &[u8]) -> Result<Signature, BackendError> {
        Ok(mock_signature(&self.address, payload))
    }

    fn verify(&self, payload: &[u8], signature: &Signature) -> Result<Address, BackendError> {
        let bytes = signature.as_bytes();
        if bytes[20..52] != fold_digest(payload) {
            return Err(BackendError::InvalidSignature);
        }
        Address::from_slice(&bytes[..20]).map_err(|_| BackendError::InvalidSignature)
    }

    async fn broadcast(
        &self,
        _validators: &dyn ValidatorSet,
        payload: Vec<u8>,
    ) -> Result<(), BackendError> {
        self.broadcasts
            .lock()
            .expect("broadcast capture poisoned")
            .push(payload);
        Ok(())
    }

    fn validators(&self, _height: Height) -> Box<dyn ValidatorSet> {
        Box::new(RoundRobinValidatorSet::new(self.validators.clone()))
    }
}

/// Address `[byte; 20]` shorthand for fixtures.
pub fn test_address(byte: u8) -> Address {
    Address::from([byte; 20])
}

/// A four-validator committee with unit voting power, addresses 1..=4.
pub fn four_validators() -> Vec<Validator> {
    (1..=4).map(|i| Validator::new(test_address(i), 1)).collect()
}

/// Build the fully-signed envelope a validator would broadcast for a vote.
pub fn signed_vote(code: MsgCode, vote: &Vote, signer: &Address) -> Vec<u8> {
    let payload = codec::encode_vote(vote).expect("vote encoding");
    signed_envelope(code, payload, signer)
}

/// Build the fully-signed envelope a proposer would broadcast.
pub fn signed_proposal(proposal: &Proposal<TestBlock>, signer: &Address) -> Vec<u8> {
    let payload = codec::encode_proposal(proposal).expect("proposal encoding");
    signed_envelope(MsgCode::Propose, payload, signer)
}

fn signed_envelope(code: MsgCode, payload: Vec<u8>, signer: &Address) -> Vec<u8> {
    let preimage = codec::signing_preimage(code, &payload, signer);
    let signature = mock_signature(signer, &preimage);
    Message::new(code, payload, *signer, signature).encode()
}
