// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Validator set traits for consensus.
//!
//! The committee authorized to vote at a given height. All 2/3 thresholds
//! are computed against the voting power reported here.

use serde::{Deserialize, Serialize};

use crate::primitives::{Address, Round};

/// A single committee member.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    /// The validator's address (signer identity).
    pub address: Address,

    /// The validator's voting power (stake weight).
    pub voting_power: u64,
}

impl Validator {
    /// Create a validator entry.
    pub fn new(address: Address, voting_power: u64) -> Self {
        Self {
            address,
            voting_power,
        }
    }
}

/// Validator set for a height.
///
/// # Requirements
///
/// Implementations must be:
/// - Thread-safe (Send + Sync)
/// - Deterministic: `calc_proposer` must compute the same proposer on every
///   correct validator given the same inputs
pub trait ValidatorSet: Send + Sync {
    /// Number of validators in the set.
    fn size(&self) -> usize;

    /// All validators in the set, in canonical order.
    fn list(&self) -> &[Validator];

    /// Look up a validator by address, returning its index in canonical
    /// order alongside the entry.
    fn get_by_address(&self, address: &Address) -> Option<(usize, Validator)>;

    /// The current proposer.
    fn get_proposer(&self) -> Validator;

    /// Whether the given address is the current proposer.
    fn is_proposer(&self, address: &Address) -> bool;

    /// Recompute the proposer for a round, rotating deterministically from
    /// the previous proposer.
    fn calc_proposer(&mut self, prev_proposer: &Address, round: Round);

    /// Total voting power of the set.
    fn total_voting_power(&self) -> u64;

    /// Voting power of a single validator, or 0 if not a member.
    fn voting_power(&self, address: &Address) -> u64 {
        self.get_by_address(address)
            .map(|(_, v)| v.voting_power)
            .unwrap_or(0)
    }
}
