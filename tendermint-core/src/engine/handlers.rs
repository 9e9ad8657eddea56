// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Inbound message and timeout handling.
//!
//! Envelopes are authenticated (signer recovery plus validator-set
//! membership) before their payloads reach the state machine. Vote arrivals
//! evaluate the quorum conditions and cascade into the transition family;
//! the guards there make every cascade idempotent, so replays and races
//! between votes and timer fires are harmless.

use tracing::{debug, info, warn};

use tendermint_traits::{Address, Backend, Block};

use crate::codec::{self, Message};
use crate::message_set::VoteError;
use crate::timeout::TimeoutInfo;
use crate::types::{MsgCode, Proposal, RoundStep, Vote};

use super::{ConsensusError, Core};

impl<BE: Backend> Core<BE> {
    /// Authenticate and dispatch a raw signed envelope.
    pub async fn handle_message(&mut self, payload: &[u8]) -> Result<(), ConsensusError> {
        let message = Message::decode(payload)?;

        let recovered = self
            .backend
            .verify(&message.preimage(), &message.signature)?;
        if recovered != message.address {
            return Err(ConsensusError::Backend(
                tendermint_traits::BackendError::InvalidSignature,
            ));
        }
        if self.val_set.get_by_address(&recovered).is_none() {
            return Err(ConsensusError::UnknownValidator(recovered));
        }

        match message.code {
            MsgCode::Commit => Err(ConsensusError::ReservedCode),
            MsgCode::Propose => {
                let proposal = codec::decode_proposal(&message.msg)?;
                self.handle_proposal(proposal, recovered).await;
                Ok(())
            }
            MsgCode::Prevote => {
                let vote = codec::decode_vote(&message.msg)?;
                self.handle_prevote(vote, recovered).await?;
                Ok(())
            }
            MsgCode::Precommit => {
                let vote = codec::decode_vote(&message.msg)?;
                self.handle_precommit(vote, recovered).await?;
                Ok(())
            }
        }
    }

    /// Accept a proposal for the current round, or resume a postponed
    /// finalization when the committed block arrives late.
    pub async fn handle_proposal(&mut self, proposal: Proposal<BE::Block>, sender: Address) {
        let height = self.state.height();
        if proposal.block.number() != height {
            debug!(
                proposal_height = proposal.block.number(),
                height, "ignoring proposal for another height"
            );
            return;
        }

        if self.state.step() == RoundStep::Commit {
            // Finalization stalls when the committed block was never
            // delivered; the matching proposal restarts it.
            let commit_hash = self
                .state
                .precommits(self.state.commit_round())
                .and_then(|precommits| precommits.two_thirds_majority());
            if commit_hash == Some(proposal.block.hash()) {
                info!(hash = %proposal.block.hash(), "committed block arrived; resuming finalization");
                self.state.set_proposal_received(Some(proposal));
                self.finalize_commit(height).await;
            } else {
                debug!("ignoring proposal while committing a different block");
            }
            return;
        }

        let round = self.state.round();
        if proposal.round != round {
            debug!(
                proposal_round = proposal.round,
                round, "ignoring proposal outside the current round"
            );
            return;
        }
        if self.state.proposal_received().map(|p| p.round) == Some(round) {
            debug!(round, "proposal already received for this round");
            return;
        }
        if !self.val_set.is_proposer(&sender) {
            warn!(%sender, round, "proposal from a non-proposer");
            return;
        }
        if proposal.pol_round < -1 || proposal.pol_round >= proposal.round {
            warn!(
                pol_round = proposal.pol_round,
                round, "proposal carries an invalid proof-of-lock round"
            );
            return;
        }

        debug!(round, hash = %proposal.block.hash(), "proposal received");
        self.state.set_proposal_received(Some(proposal));

        if self.state.step() <= RoundStep::Propose && self.state.is_proposal_complete() {
            self.enter_prevote(height, round).await;
        }
    }

    /// Tally a prevote and evaluate the transitions it may unlock.
    pub async fn handle_prevote(&mut self, vote: Vote, sender: Address) -> Result<(), VoteError> {
        let height = self.state.height();
        if vote.height != height || vote.round < 0 {
            debug!(%vote, height, "ignoring prevote outside the current height");
            return Ok(());
        }

        match self.state.add_prevote(sender, vote, &*self.val_set) {
            Ok(added) => {
                debug!(%vote, %sender, added, "prevote received");
            }
            Err(err @ VoteError::ConflictingVote { .. }) => {
                warn!(%err, "prevote double-sign detected; vote rejected");
                return Err(err);
            }
            Err(err) => {
                debug!(%err, "prevote rejected");
                return Err(err);
            }
        }

        let round = vote.round;
        let current = self.state.round();

        // A polka for a non-nil block we hold becomes the valid block the
        // proposer prefers in later rounds.
        if round == current {
            let polka = self
                .state
                .prevotes(round)
                .and_then(|prevotes| prevotes.two_thirds_majority());
            if let Some(hash) = polka {
                if !hash.is_empty() && self.state.valid_round() < round {
                    let block = self
                        .state
                        .proposal_received()
                        .map(|p| &p.block)
                        .filter(|b| b.hash() == hash)
                        .cloned();
                    if let Some(block) = block {
                        debug!(round, %hash, "recording proof-of-lock block");
                        self.state.set_valid(round, block);
                    }
                }
            }
        }

        if round == current && self.state.step() >= RoundStep::Prevote {
            let (polka, any) = match self.state.prevotes(round) {
                Some(prevotes) => (
                    prevotes.two_thirds_majority().is_some(),
                    prevotes.has_two_thirds_any(),
                ),
                None => (false, false),
            };
            if polka {
                self.enter_precommit(height, round).await;
            } else if any {
                self.enter_prevote_wait(height, round).await;
            }
        } else if round > current {
            let any = self
                .state
                .prevotes(round)
                .map(|prevotes| prevotes.has_two_thirds_any())
                .unwrap_or(false);
            if any {
                // 2/3 of voting power is already prevoting a later round;
                // skip ahead.
                self.enter_new_round(height, round).await;
            }
        }

        Ok(())
    }

    /// Tally a precommit and evaluate the transitions it may unlock.
    pub async fn handle_precommit(&mut self, vote: Vote, sender: Address) -> Result<(), VoteError> {
        let height = self.state.height();
        if vote.height != height || vote.round < 0 {
            debug!(%vote, height, "ignoring precommit outside the current height");
            return Ok(());
        }

        match self.state.add_precommit(sender, vote, &*self.val_set) {
            Ok(added) => {
                debug!(%vote, %sender, added, "precommit received");
            }
            Err(err @ VoteError::ConflictingVote { .. }) => {
                warn!(%err, "precommit double-sign detected; vote rejected");
                return Err(err);
            }
            Err(err) => {
                debug!(%err, "precommit rejected");
                return Err(err);
            }
        }

        let round = vote.round;
        let current = self.state.round();
        let (majority, any) = match self.state.precommits(round) {
            Some(precommits) => (
                precommits.two_thirds_majority(),
                precommits.has_two_thirds_any(),
            ),
            None => (None, false),
        };

        if let Some(hash) = majority {
            if round > current {
                self.enter_new_round(height, round).await;
            }
            if !hash.is_empty() {
                self.enter_commit(height, round).await;
            } else if round >= self.state.round() {
                self.enter_precommit_wait(height, round).await;
            }
        } else if any && round >= current {
            self.enter_new_round(height, round).await;
            self.enter_precommit_wait(height, round).await;
        }

        Ok(())
    }

    /// React to a timeout fire, ignoring tuples that no longer match the
    /// current state. Replaying a stale fire is a no-op.
    pub async fn handle_timeout(&mut self, info: TimeoutInfo) {
        let height = self.state.height();
        let round = self.state.round();
        let step = self.state.step();
        if info.height != height || info.round < round || (info.round == round && info.step < step)
        {
            debug!(%info, height, round, current_step = %step, "ignoring stale timeout");
            return;
        }

        match info.step {
            RoundStep::NewHeight => self.enter_new_round(info.height, 0).await,
            RoundStep::Propose => self.enter_prevote(info.height, info.round).await,
            RoundStep::PrevoteWait => self.enter_precommit(info.height, info.round).await,
            RoundStep::PrecommitWait => self.enter_new_round(info.height, info.round + 1).await,
            _ => warn!(%info, "timeout fired for an unexpected step"),
        }
    }
}
