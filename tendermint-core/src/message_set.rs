// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Per-(height, round, kind) vote tally.
//!
//! A message set keeps at most one vote per validator. A second, different
//! vote from the same validator is a double-sign and is rejected; the exact
//! same vote again is an idempotent no-op. Threshold predicates are weighted
//! by voting power and recomputed on each add.

use std::collections::HashMap;

use tendermint_traits::{Address, BlockHash, ValidatorSet};

use crate::types::{MsgCode, View, Vote};

/// Errors from adding a vote to a message set.
#[derive(Debug, thiserror::Error)]
pub enum VoteError {
    /// The signer is not in the validator set backing this tally.
    #[error("vote from unknown validator {0}")]
    UnknownValidator(Address),

    /// The validator already voted for a different block hash at this
    /// (height, round, kind), which is a double-sign.
    #[error("conflicting vote from {address}: already have {existing}, received {received}")]
    ConflictingVote {
        address: Address,
        existing: BlockHash,
        received: BlockHash,
    },
}

/// Tally of signed votes for one (height, round, kind).
#[derive(Debug)]
pub struct MessageSet {
    view: View,
    kind: MsgCode,
    total_voting_power: u64,
    votes: HashMap<Address, (Vote, u64)>,
}

impl MessageSet {
    /// Create an empty tally backed by the given validator set.
    pub fn new(view: View, kind: MsgCode, validators: &dyn ValidatorSet) -> Self {
        Self {
            view,
            kind,
            total_voting_power: validators.total_voting_power(),
            votes: HashMap::new(),
        }
    }

    /// The view this tally belongs to.
    pub fn view(&self) -> View {
        self.view
    }

    /// The vote kind this tally collects.
    pub fn kind(&self) -> MsgCode {
        self.kind
    }

    /// Add a vote from a validator.
    ///
    /// Returns `Ok(true)` if the vote was added, `Ok(false)` if the identical
    /// vote was already present.
    ///
    /// # Errors
    ///
    /// - [`VoteError::UnknownValidator`] if the signer is not a member.
    /// - [`VoteError::ConflictingVote`] on a double-sign; the set is left
    ///   unchanged so the first vote stands.
    pub fn add_vote(
        &mut self,
        signer: Address,
        vote: Vote,
        validators: &dyn ValidatorSet,
    ) -> Result<bool, VoteError> {
        let Some((_, validator)) = validators.get_by_address(&signer) else {
            return Err(VoteError::UnknownValidator(signer));
        };

        if let Some((existing, _)) = self.votes.get(&signer) {
            if existing.block_hash == vote.block_hash {
                return Ok(false);
            }
            return Err(VoteError::ConflictingVote {
                address: signer,
                existing: existing.block_hash,
                received: vote.block_hash,
            });
        }

        self.votes.insert(signer, (vote, validator.voting_power));
        Ok(true)
    }

    /// Number of votes collected.
    pub fn len(&self) -> usize {
        self.votes.len()
    }

    /// Whether no votes have been collected.
    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    /// The vote a validator cast, if any.
    pub fn vote_by(&self, address: &Address) -> Option<&Vote> {
        self.votes.get(address).map(|(vote, _)| vote)
    }

    /// Total voting power that has voted for anything.
    pub fn voted_power(&self) -> u64 {
        self.votes.values().map(|(_, power)| power).sum()
    }

    /// Voting power behind one specific hash.
    pub fn power_for(&self, hash: &BlockHash) -> u64 {
        self.votes
            .values()
            .filter(|(vote, _)| vote.block_hash == *hash)
            .map(|(_, power)| power)
            .sum()
    }

    /// Whether some single block hash holds strictly more than 2/3 of the
    /// total voting power.
    pub fn has_majority(&self) -> bool {
        self.two_thirds_majority().is_some()
    }

    /// Whether strictly more than 2/3 of the total voting power has voted
    /// for anything (block hash or nil).
    pub fn has_two_thirds_any(&self) -> bool {
        exceeds_two_thirds(self.voted_power(), self.total_voting_power)
    }

    /// The hash holding a strict 2/3 majority, if one exists. The returned
    /// hash may be the nil sentinel (a nil polka).
    pub fn two_thirds_majority(&self) -> Option<BlockHash> {
        let mut by_hash: HashMap<BlockHash, u64> = HashMap::new();
        for (vote, power) in self.votes.values() {
            *by_hash.entry(vote.block_hash).or_default() += power;
        }
        by_hash
            .into_iter()
            .find(|(_, power)| exceeds_two_thirds(*power, self.total_voting_power))
            .map(|(hash, _)| hash)
    }
}

fn exceeds_two_thirds(power: u64, total: u64) -> bool {
    // Strictly more than 2/3, computed without division.
    power as u128 * 3 > total as u128 * 2
}
