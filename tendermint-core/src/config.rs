// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Configuration for the consensus core.

use std::time::{Duration, Instant};

use tendermint_traits::Round;

/// Timeout and delay knobs for the round state machine.
///
/// The per-step timeouts grow linearly with the round number
/// (`base + delta * round`) so that slow rounds eventually give every
/// correct validator enough time to converge.
#[derive(Clone, Debug)]
pub struct ConsensusConfig {
    /// Base wait for a proposal before prevoting nil.
    pub propose_timeout_base: Duration,

    /// Additional proposal wait per round.
    pub propose_timeout_delta: Duration,

    /// Base wait for straggler prevotes after seeing 2/3 of any.
    pub prevote_timeout_base: Duration,

    /// Additional prevote wait per round.
    pub prevote_timeout_delta: Duration,

    /// Base wait for straggler precommits after seeing 2/3 of any.
    pub precommit_timeout_base: Duration,

    /// Additional precommit wait per round.
    pub precommit_timeout_delta: Duration,

    /// Slack between committing a block and starting the next height,
    /// giving the producer time to gather transactions.
    pub commit_delay: Duration,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            propose_timeout_base: Duration::from_secs(3),
            propose_timeout_delta: Duration::from_millis(500),
            prevote_timeout_base: Duration::from_secs(1),
            prevote_timeout_delta: Duration::from_millis(500),
            precommit_timeout_base: Duration::from_secs(1),
            precommit_timeout_delta: Duration::from_millis(500),
            commit_delay: Duration::from_secs(1),
        }
    }
}

impl ConsensusConfig {
    /// Proposal timeout for a round.
    pub fn propose_timeout(&self, round: Round) -> Duration {
        scaled(self.propose_timeout_base, self.propose_timeout_delta, round)
    }

    /// Prevote-wait timeout for a round.
    pub fn prevote_timeout(&self, round: Round) -> Duration {
        scaled(self.prevote_timeout_base, self.prevote_timeout_delta, round)
    }

    /// Precommit-wait timeout for a round.
    pub fn precommit_timeout(&self, round: Round) -> Duration {
        scaled(
            self.precommit_timeout_base,
            self.precommit_timeout_delta,
            round,
        )
    }

    /// The instant the next height should start, given the commit time.
    pub fn commit_time(&self, committed_at: Instant) -> Instant {
        committed_at + self.commit_delay
    }
}

fn scaled(base: Duration, delta: Duration, round: Round) -> Duration {
    base + delta * round.max(0) as u32
}
