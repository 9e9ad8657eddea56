// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! The `enter*` transition family.
//!
//! Every transition validates its (height, round) arguments against the
//! current state before acting; a stale tuple is ignored at debug level.
//! Transitions cascade into each other with direct calls so an event is
//! processed to completion inside one dispatcher tick; re-queueing through
//! the event stream would break run-to-completion ordering.

use std::time::Instant;

use tracing::{debug, info, warn};

use tendermint_traits::{Backend, Block, Height, Round};

use crate::events::BlockFinalizedEvent;
use crate::timeout::TimeoutInfo;
use crate::types::{MsgCode, Proposal, RoundStep};

use super::Core;

impl<BE: Backend> Core<BE> {
    /// Move to a new round at the current height.
    ///
    /// Accepts only `round >= current`, and re-entry at the same round only
    /// from the height-reset state (`NewHeight`). When skipping forward, the
    /// proposer is recomputed for the target round.
    pub async fn enter_new_round(&mut self, height: Height, round: Round) {
        let s_height = self.state.height();
        let s_round = self.state.round();
        let s_step = self.state.step();
        if height != s_height
            || round < s_round
            || (round == s_round && s_step != RoundStep::NewHeight)
        {
            debug!(
                height, round, current_height = s_height, current_round = s_round,
                current_step = %s_step, "enter_new_round ignored: input is behind current state"
            );
            return;
        }
        debug!(height, round, current_round = s_round, current_step = %s_step, "enter_new_round");

        if s_round < round {
            let prev_proposer = self.val_set.get_proposer().address;
            self.val_set.calc_proposer(&prev_proposer, round);
        }

        self.state.update_round_step(round, RoundStep::NewRound);
        self.state.set_precommit_waited(false);

        self.enter_propose(height, round).await;
    }

    /// Enter the propose step: schedule the proposal timeout and, if this
    /// node is the proposer, decide and broadcast a proposal.
    pub async fn enter_propose(&mut self, height: Height, round: Round) {
        let s_height = self.state.height();
        let s_round = self.state.round();
        let s_step = self.state.step();
        if height != s_height
            || round < s_round
            || (round == s_round && s_step >= RoundStep::Propose)
        {
            debug!(
                height, round, current_height = s_height, current_round = s_round,
                current_step = %s_step, "enter_propose ignored: input is behind current state"
            );
            return;
        }
        debug!(height, round, current_round = s_round, current_step = %s_step, "enter_propose");

        // The timeout eventually forces enter_prevote even if no proposal
        // arrives; a later transition supersedes it.
        self.timeout.schedule(TimeoutInfo {
            duration: self.config.propose_timeout(round),
            height,
            round,
            step: RoundStep::Propose,
        });

        let local = self.backend.address();
        if self.val_set.get_by_address(&local).is_none() {
            debug!(%local, height, round, "this node is not a validator of this round");
        } else if self.val_set.is_proposer(&local) {
            info!(height, round, "this node is the proposer of this round");
            match self.decide_proposal(round) {
                Some(proposal) => self.send_propose(&proposal).await,
                None => warn!(height, round, "no candidate block to propose yet"),
            }
        }

        self.state.update_round_step(round, RoundStep::Propose);
        if self.state.is_proposal_complete() {
            self.enter_prevote(height, round).await;
        }
    }

    /// Pick the proposal for a round: the valid block if one is known
    /// (re-proposing under its proof-of-lock round), otherwise the locally
    /// assembled candidate.
    pub fn decide_proposal(&self, round: Round) -> Option<Proposal<BE::Block>> {
        if self.state.valid_round() >= 0 {
            if let Some(block) = self.state.valid_block() {
                debug!(valid_round = self.state.valid_round(), "proposing the valid block");
                return Some(Proposal::new(
                    block.clone(),
                    round,
                    self.state.valid_round(),
                ));
            }
        }
        self.state
            .block()
            .map(|block| Proposal::new(block.clone(), round, -1))
    }

    /// Enter the prevote step and cast the prevote decision.
    pub async fn enter_prevote(&mut self, height: Height, round: Round) {
        let s_height = self.state.height();
        let s_round = self.state.round();
        let s_step = self.state.step();
        if height != s_height
            || round < s_round
            || (round == s_round && s_step >= RoundStep::Prevote)
        {
            debug!(
                height, round, current_height = s_height, current_round = s_round,
                current_step = %s_step, "enter_prevote ignored: input is behind current state"
            );
            return;
        }
        debug!(height, round, current_round = s_round, current_step = %s_step, "enter_prevote");

        self.do_prevote(round).await;
        self.state.update_round_step(round, RoundStep::Prevote);
    }

    /// The prevote decision: the locked block while locked, the received
    /// proposal if one is usable, nil otherwise.
    pub(crate) async fn do_prevote(&mut self, round: Round) {
        if self.state.locked_round() >= 0 {
            info!(locked_round = self.state.locked_round(), "prevoting the locked block");
            let block = self.state.locked_block().cloned();
            self.send_vote(MsgCode::Prevote, block.as_ref(), round).await;
            return;
        }

        let Some(proposal) = self.state.proposal_received() else {
            info!(round, "no proposal received; prevoting nil");
            self.send_vote(MsgCode::Prevote, None, round).await;
            return;
        };

        // Semantic validation of the proposal body is the embedder's hook;
        // the proposal signature was checked on receipt.
        info!(hash = %proposal.block.hash(), "prevoting the proposal block");
        let block = proposal.block.clone();
        self.send_vote(MsgCode::Prevote, Some(&block), round).await;
    }

    /// Wait out straggler prevotes after 2/3 of voting power prevoted for
    /// anything.
    pub async fn enter_prevote_wait(&mut self, height: Height, round: Round) {
        let s_height = self.state.height();
        let s_round = self.state.round();
        let s_step = self.state.step();
        if height != s_height
            || round < s_round
            || (round == s_round && s_step >= RoundStep::PrevoteWait)
        {
            debug!(
                height, round, current_height = s_height, current_round = s_round,
                current_step = %s_step, "enter_prevote_wait ignored: input is behind current state"
            );
            return;
        }
        let has_two_thirds = self
            .state
            .prevotes(round)
            .map(|prevotes| prevotes.has_two_thirds_any())
            .unwrap_or(false);
        if !has_two_thirds {
            debug!(round, "enter_prevote_wait ignored: no 2/3 prevotes received");
            return;
        }
        debug!(height, round, current_step = %s_step, "enter_prevote_wait");

        self.timeout.schedule(TimeoutInfo {
            duration: self.config.prevote_timeout(round),
            height,
            round,
            step: RoundStep::PrevoteWait,
        });
        self.state.update_round_step(round, RoundStep::PrevoteWait);
    }

    /// Enter the precommit step and cast the precommit decision, updating
    /// the lock per the proof-of-lock-change discipline.
    pub async fn enter_precommit(&mut self, height: Height, round: Round) {
        let s_height = self.state.height();
        let s_round = self.state.round();
        let s_step = self.state.step();
        if height != s_height
            || round < s_round
            || (round == s_round && s_step >= RoundStep::Precommit)
        {
            debug!(
                height, round, current_height = s_height, current_round = s_round,
                current_step = %s_step, "enter_precommit ignored: input is behind current state"
            );
            return;
        }
        debug!(height, round, current_round = s_round, current_step = %s_step, "enter_precommit");

        let majority = self
            .state
            .prevotes(round)
            .and_then(|prevotes| prevotes.two_thirds_majority());

        match majority {
            // No polka: precommit nil. If locked, we stay locked.
            None => {
                if self.state.locked_block().is_some() {
                    info!(round, "no 2/3 prevotes while locked; precommitting nil");
                } else {
                    info!(round, "no 2/3 prevotes; precommitting nil");
                }
                self.send_vote(MsgCode::Precommit, None, round).await;
            }
            Some(hash) => {
                // The most recent proof-of-lock round must be this round; a
                // lower value means the tally and the transition disagree.
                let (pol_round, _) = self.state.pol_info();
                if pol_round < round {
                    panic!(
                        "proof-of-lock round should be {} but got {}",
                        round, pol_round
                    );
                }

                if hash.is_empty() {
                    // 2/3 prevoted nil: unlock and precommit nil.
                    if self.state.locked_block().is_some() {
                        info!(round, "2/3 prevoted nil; unlocking");
                        self.state.unlock();
                    } else {
                        info!(round, "2/3 prevoted nil");
                    }
                    self.send_vote(MsgCode::Precommit, None, round).await;
                } else if let Some(block) = self
                    .state
                    .locked_block()
                    .filter(|b| b.hash() == hash)
                    .cloned()
                {
                    // Already locked on the polka block: relock at this round.
                    info!(round, %hash, "2/3 prevoted the locked block; relocking");
                    self.state.set_locked(round, block.clone());
                    self.send_vote(MsgCode::Precommit, Some(&block), round).await;
                } else if let Some(block) = self
                    .state
                    .proposal_received()
                    .map(|p| &p.block)
                    .filter(|b| b.hash() == hash)
                    .cloned()
                {
                    // Polka for the received proposal: lock and precommit it.
                    info!(round, %hash, "2/3 prevoted the proposal block; locking");
                    self.state.set_locked(round, block.clone());
                    self.send_vote(MsgCode::Precommit, Some(&block), round).await;
                } else {
                    // Polka for a block we do not have. Unlock and precommit
                    // nil; fetching the block from peers is an outer-layer
                    // concern.
                    info!(round, %hash, "2/3 prevoted a block we don't have; unlocking");
                    self.state.unlock();
                    self.send_vote(MsgCode::Precommit, None, round).await;
                }
            }
        }

        self.state.update_round_step(round, RoundStep::Precommit);
    }

    /// Wait out straggler precommits after 2/3 of voting power precommitted
    /// for anything. Scheduled at most once per round.
    pub async fn enter_precommit_wait(&mut self, height: Height, round: Round) {
        let s_height = self.state.height();
        let s_round = self.state.round();
        if height != s_height || round < s_round || (round == s_round && self.state.precommit_waited())
        {
            debug!(
                height, round, current_height = s_height, current_round = s_round,
                precommit_waited = self.state.precommit_waited(),
                "enter_precommit_wait ignored: not suitable for the input state"
            );
            return;
        }

        let Some(precommits) = self.state.precommits(round) else {
            panic!("enter_precommit_wait with no precommit votes at round {round}");
        };
        if !precommits.has_two_thirds_any() {
            panic!("enter_precommit_wait without 2/3 of precommits at round {round}");
        }
        debug!(height, round, "enter_precommit_wait");

        self.timeout.schedule(TimeoutInfo {
            duration: self.config.precommit_timeout(round),
            height,
            round,
            step: RoundStep::PrecommitWait,
        });
        self.state.set_precommit_waited(true);
    }

    /// Enter the commit step for the round that produced a precommit
    /// majority, align the stored proposal with the committed hash, and
    /// attempt finalization.
    pub async fn enter_commit(&mut self, height: Height, commit_round: Round) {
        let s_height = self.state.height();
        let s_step = self.state.step();
        if height != s_height || s_step >= RoundStep::Commit {
            debug!(
                height, commit_round, current_height = s_height, current_step = %s_step,
                "enter_commit ignored: input is behind current state"
            );
            return;
        }
        debug!(height, commit_round, current_step = %s_step, "enter_commit");

        let Some(precommits) = self.state.precommits(commit_round) else {
            panic!("commit round {commit_round} must have a set of precommits");
        };
        let Some(hash) = precommits.two_thirds_majority() else {
            panic!("commit round {commit_round} must have a majority block");
        };

        // If the locked block is the committed one, stage it as the
        // proposal so the block is available locally even if the network
        // proposal was lost. Cleared on entering the next height.
        if let Some(block) = self
            .state
            .locked_block()
            .filter(|b| b.hash() == hash)
            .cloned()
        {
            info!(%hash, "commit is for the locked block; staging it as the proposal");
            self.state
                .set_proposal_received(Some(Proposal::new(block, commit_round, -1)));
        }

        // If the proposal we hold is not the committed block, drop it and
        // wait for the committed block to arrive via gossip.
        if let Some(proposal) = self.state.proposal_received() {
            if proposal.block.hash() != hash {
                info!(%hash, "held proposal does not match the commit; awaiting delivery");
                self.state.set_proposal_received(None);
            }
        }

        // The round is kept as-is; commit_round points at the right
        // precommit set.
        let current_round = self.state.round();
        self.state.update_round_step(current_round, RoundStep::Commit);
        self.state.set_commit(commit_round, Instant::now());

        self.finalize_commit(height).await;
    }

    /// Finalize the committed block if it is locally available, then reset
    /// for the next height. Re-triggered by a late proposal delivery when
    /// the block was missing at commit time.
    pub async fn finalize_commit(&mut self, height: Height) {
        if self.state.height() != height {
            panic!(
                "finalize commit at height {} while at height {}",
                height,
                self.state.height()
            );
        }
        if self.state.step() != RoundStep::Commit {
            panic!(
                "finalize commit in step {} instead of Commit",
                self.state.step()
            );
        }

        let commit_round = self.state.commit_round();
        let Some(precommits) = self.state.precommits(commit_round) else {
            panic!("no precommits at commit round {commit_round}");
        };
        let Some(hash) = precommits.two_thirds_majority() else {
            panic!("no 2/3 majority for a block at commit round {commit_round}");
        };
        if hash.is_empty() {
            panic!("nil majority at commit round {commit_round}");
        }

        let Some(proposal) = self.state.proposal_received() else {
            info!(height, %hash, "committed block not received yet; finalization postponed");
            return;
        };
        if proposal.block.hash() != hash {
            info!(height, %hash, "held proposal is not the commit hash; finalization postponed");
            return;
        }

        info!(height, %hash, "finalizing block");
        let block = self.finalize_block(proposal.block.clone());
        // Subscriber absence is not an error.
        let _ = self.finalized_tx.send(BlockFinalizedEvent { block });

        self.update_state_for_new_height();
        self.start_round_zero();
    }

    /// Decorate the block before it is handed to subscribers. The committed
    /// seal and any extra-data belong to the block-type owner; this layer
    /// passes the block through.
    fn finalize_block(&self, block: BE::Block) -> BE::Block {
        block
    }

    /// Deterministic reset to the next height. The next round starts after
    /// the configured commit delay so the producer can gather transactions.
    pub(crate) fn update_state_for_new_height(&mut self) {
        let committed_at = self.state.commit_time().unwrap_or_else(Instant::now);
        let start_time = self.config.commit_time(committed_at);
        self.state.update_for_new_height(start_time);
        debug!(height = self.state.height(), "state reset for new height");
    }

    /// Schedule the `NewHeight` timeout that opens round zero at
    /// `start_time`.
    pub fn start_round_zero(&mut self) {
        let sleep = self
            .state
            .start_time()
            .saturating_duration_since(Instant::now());
        self.timeout.schedule(TimeoutInfo {
            duration: sleep,
            height: self.state.height(),
            round: 0,
            step: RoundStep::NewHeight,
        });
    }
}
