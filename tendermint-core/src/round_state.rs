// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Mutable consensus state for the current height.
//!
//! A `RoundState` is created at a height with round 0 and step `NewHeight`,
//! mutated only by the core dispatcher, and reset in place when advancing to
//! the next height. Lock and valid pairs keep the invariant that the round
//! is `-1` exactly when the block is absent.

use std::collections::HashMap;
use std::time::Instant;

use tendermint_traits::{Address, Block, BlockHash, Height, Round, ValidatorSet};

use crate::message_set::{MessageSet, VoteError};
use crate::types::{MsgCode, Proposal, RoundStep, View, Vote};

/// The consensus state at one height.
#[derive(Debug)]
pub struct RoundState<B: Block> {
    view: View,
    step: RoundStep,

    /// Locally assembled candidate block, installed by the producer.
    block: Option<B>,

    locked_round: Round,
    locked_block: Option<B>,

    valid_round: Round,
    valid_block: Option<B>,

    proposal_received: Option<Proposal<B>>,

    prevotes: HashMap<Round, MessageSet>,
    precommits: HashMap<Round, MessageSet>,

    /// The precommit-wait timer is scheduled at most once per round.
    precommit_waited: bool,

    commit_round: Round,
    commit_time: Option<Instant>,
    start_time: Instant,
}

impl<B: Block> RoundState<B> {
    /// Create the state for a height, at round 0 and step `NewHeight`.
    pub fn new(height: Height, start_time: Instant) -> Self {
        Self {
            view: View::new(height, 0),
            step: RoundStep::NewHeight,
            block: None,
            locked_round: -1,
            locked_block: None,
            valid_round: -1,
            valid_block: None,
            proposal_received: None,
            prevotes: HashMap::new(),
            precommits: HashMap::new(),
            precommit_waited: false,
            commit_round: -1,
            commit_time: None,
            start_time,
        }
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn height(&self) -> Height {
        self.view.height
    }

    pub fn round(&self) -> Round {
        self.view.round
    }

    pub fn step(&self) -> RoundStep {
        self.step
    }

    /// Advance the view's round and the step together.
    pub fn update_round_step(&mut self, round: Round, step: RoundStep) {
        self.view.round = round;
        self.step = step;
    }

    pub fn block(&self) -> Option<&B> {
        self.block.as_ref()
    }

    pub fn set_block(&mut self, block: Option<B>) {
        self.block = block;
    }

    pub fn locked_round(&self) -> Round {
        self.locked_round
    }

    pub fn locked_block(&self) -> Option<&B> {
        self.locked_block.as_ref()
    }

    /// Lock (or relock) on a block at a round.
    pub fn set_locked(&mut self, round: Round, block: B) {
        debug_assert!(round >= 0);
        self.locked_round = round;
        self.locked_block = Some(block);
    }

    /// Release the lock.
    pub fn unlock(&mut self) {
        self.locked_round = -1;
        self.locked_block = None;
    }

    pub fn valid_round(&self) -> Round {
        self.valid_round
    }

    pub fn valid_block(&self) -> Option<&B> {
        self.valid_block.as_ref()
    }

    /// Record the latest round with a prevote polka for a non-nil block.
    pub fn set_valid(&mut self, round: Round, block: B) {
        debug_assert!(round >= 0);
        self.valid_round = round;
        self.valid_block = Some(block);
    }

    pub fn proposal_received(&self) -> Option<&Proposal<B>> {
        self.proposal_received.as_ref()
    }

    pub fn set_proposal_received(&mut self, proposal: Option<Proposal<B>>) {
        self.proposal_received = proposal;
    }

    pub fn precommit_waited(&self) -> bool {
        self.precommit_waited
    }

    pub fn set_precommit_waited(&mut self, waited: bool) {
        self.precommit_waited = waited;
    }

    pub fn commit_round(&self) -> Round {
        self.commit_round
    }

    /// Record the commit round and the commit timestamp on entering commit.
    pub fn set_commit(&mut self, round: Round, at: Instant) {
        self.commit_round = round;
        self.commit_time = Some(at);
    }

    pub fn commit_time(&self) -> Option<Instant> {
        self.commit_time
    }

    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    /// Add a prevote to the tally for its round, creating the tally lazily.
    pub fn add_prevote(
        &mut self,
        signer: Address,
        vote: Vote,
        validators: &dyn ValidatorSet,
    ) -> Result<bool, VoteError> {
        let view = View::new(self.view.height, vote.round);
        self.prevotes
            .entry(vote.round)
            .or_insert_with(|| MessageSet::new(view, MsgCode::Prevote, validators))
            .add_vote(signer, vote, validators)
    }

    /// Add a precommit to the tally for its round, creating the tally lazily.
    pub fn add_precommit(
        &mut self,
        signer: Address,
        vote: Vote,
        validators: &dyn ValidatorSet,
    ) -> Result<bool, VoteError> {
        let view = View::new(self.view.height, vote.round);
        self.precommits
            .entry(vote.round)
            .or_insert_with(|| MessageSet::new(view, MsgCode::Precommit, validators))
            .add_vote(signer, vote, validators)
    }

    /// Prevote tally for a round, if any votes arrived.
    pub fn prevotes(&self, round: Round) -> Option<&MessageSet> {
        self.prevotes.get(&round)
    }

    /// Precommit tally for a round, if any votes arrived.
    pub fn precommits(&self, round: Round) -> Option<&MessageSet> {
        self.precommits.get(&round)
    }

    /// True when the proposal for this round is usable: it arrived, and if
    /// it claims a proof-of-lock round, the prevotes there reached a
    /// same-block majority.
    pub fn is_proposal_complete(&self) -> bool {
        let Some(proposal) = &self.proposal_received else {
            return false;
        };
        if proposal.pol_round < 0 {
            return true;
        }
        match self.prevotes.get(&proposal.pol_round) {
            Some(prevotes) => prevotes.has_majority(),
            None => false,
        }
    }

    /// Last round at or below the current one with a prevote 2/3 majority
    /// (for a block or nil), and the majority hash. Returns `(-1, None)`
    /// when no such round exists.
    pub fn pol_info(&self) -> (Round, Option<BlockHash>) {
        let mut round = self.view.round;
        while round >= 0 {
            if let Some(prevotes) = self.prevotes.get(&round) {
                if let Some(hash) = prevotes.two_thirds_majority() {
                    return (round, Some(hash));
                }
            }
            round -= 1;
        }
        (-1, None)
    }

    /// Reset in place for the next height. Nothing survives except the
    /// ratchet to the new view and the commit timestamp the caller used to
    /// compute `start_time`.
    pub fn update_for_new_height(&mut self, start_time: Instant) {
        self.view = View::new(self.view.height + 1, 0);
        self.step = RoundStep::NewHeight;
        self.block = None;
        self.locked_round = -1;
        self.locked_block = None;
        self.valid_round = -1;
        self.valid_block = None;
        self.proposal_received = None;
        self.prevotes.clear();
        self.precommits.clear();
        self.precommit_waited = false;
        self.commit_round = -1;
        self.start_time = start_time;
    }

    /// An owned view of the state for observers outside the dispatcher.
    pub fn snapshot(&self) -> RoundSnapshot {
        RoundSnapshot {
            height: self.view.height,
            round: self.view.round,
            step: self.step,
            locked_round: self.locked_round,
            locked_block_hash: self.locked_block.as_ref().map(|b| b.hash()),
            valid_round: self.valid_round,
            valid_block_hash: self.valid_block.as_ref().map(|b| b.hash()),
            commit_round: self.commit_round,
            proposal_block_hash: self.proposal_received.as_ref().map(|p| p.block.hash()),
        }
    }
}

/// Owned, lock-free copy of the observable round state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundSnapshot {
    pub height: Height,
    pub round: Round,
    pub step: RoundStep,
    pub locked_round: Round,
    pub locked_block_hash: Option<BlockHash>,
    pub valid_round: Round,
    pub valid_block_hash: Option<BlockHash>,
    pub commit_round: Round,
    pub proposal_block_hash: Option<BlockHash>,
}
