// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Core consensus types: views, round steps, message codes, votes, and
//! proposals.

use serde::{Deserialize, Serialize};
use std::fmt;

use tendermint_traits::{Block, BlockHash, Height, Round};

/// The (height, round) pair a validator is currently working on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    /// The block-number slot under consensus.
    pub height: Height,

    /// The attempt number within the height.
    pub round: Round,
}

impl View {
    /// Create a view.
    pub fn new(height: Height, round: Round) -> Self {
        Self { height, round }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.height, self.round)
    }
}

/// Phase within a round.
///
/// The ordering is load-bearing: transition guards compare steps to enforce
/// monotonic progress within a fixed (height, round).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum RoundStep {
    /// Between heights: the commit delay is running.
    NewHeight = 0,

    /// A new round was entered; the proposer is being recomputed.
    NewRound = 1,

    /// Waiting for (or sending) the round's proposal.
    Propose = 2,

    /// Prevote cast; collecting prevotes.
    Prevote = 3,

    /// 2/3 of prevotes seen for anything; waiting out stragglers.
    PrevoteWait = 4,

    /// Precommit cast; collecting precommits.
    Precommit = 5,

    /// 2/3 of precommits seen for anything; waiting out stragglers.
    PrecommitWait = 6,

    /// A block reached a precommit majority; finalizing.
    Commit = 7,
}

impl fmt::Display for RoundStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoundStep::NewHeight => "NewHeight",
            RoundStep::NewRound => "NewRound",
            RoundStep::Propose => "Propose",
            RoundStep::Prevote => "Prevote",
            RoundStep::PrevoteWait => "PrevoteWait",
            RoundStep::Precommit => "Precommit",
            RoundStep::PrecommitWait => "PrecommitWait",
            RoundStep::Commit => "Commit",
        };
        write!(f, "{}", name)
    }
}

/// Message codes on the wire.
///
/// `Commit` never appears in live consensus messages; it is reserved for the
/// committed-seal construction. It lives in the same enum so there is a
/// single source of truth on tag values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum MsgCode {
    /// Reserved for the committed seal.
    Commit = 0,

    /// Block proposal.
    Propose = 1,

    /// Prevote.
    Prevote = 2,

    /// Precommit.
    Precommit = 3,
}

impl MsgCode {
    /// The numeric wire value.
    pub fn as_u64(self) -> u64 {
        self as u64
    }

    /// Decode a wire value.
    pub fn from_u64(code: u64) -> Option<Self> {
        match code {
            0 => Some(MsgCode::Commit),
            1 => Some(MsgCode::Propose),
            2 => Some(MsgCode::Prevote),
            3 => Some(MsgCode::Precommit),
            _ => None,
        }
    }
}

impl fmt::Display for MsgCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MsgCode::Commit => "Commit",
            MsgCode::Propose => "Propose",
            MsgCode::Prevote => "Prevote",
            MsgCode::Precommit => "Precommit",
        };
        write!(f, "{}", name)
    }
}

/// A signed vote's payload.
///
/// A vote for "no block" carries [`BlockHash::EMPTY`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    /// Hash of the block voted for, or the empty sentinel for nil.
    pub block_hash: BlockHash,

    /// Round the vote belongs to.
    pub round: Round,

    /// Height the vote belongs to.
    pub height: Height,
}

impl Vote {
    /// Whether this is a nil vote.
    pub fn is_nil(&self) -> bool {
        self.block_hash.is_empty()
    }
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Vote({}/{}, {})",
            self.height, self.round, self.block_hash
        )
    }
}

/// A block proposal for a round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Proposal<B> {
    /// The proposed block.
    pub block: B,

    /// Round the proposal is made for.
    pub round: Round,

    /// The round whose prevote polka justifies re-proposing this block, or
    /// `-1` when the block is fresh.
    pub pol_round: Round,
}

impl<B: Block> Proposal<B> {
    /// Create a proposal.
    pub fn new(block: B, round: Round, pol_round: Round) -> Self {
        Self {
            block,
            round,
            pol_round,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_step_ordering() {
        assert!(RoundStep::NewHeight < RoundStep::NewRound);
        assert!(RoundStep::NewRound < RoundStep::Propose);
        assert!(RoundStep::Propose < RoundStep::Prevote);
        assert!(RoundStep::Prevote < RoundStep::PrevoteWait);
        assert!(RoundStep::PrevoteWait < RoundStep::Precommit);
        assert!(RoundStep::Precommit < RoundStep::PrecommitWait);
        assert!(RoundStep::PrecommitWait < RoundStep::Commit);
    }

    #[test]
    fn test_msg_code_roundtrip() {
        for code in [
            MsgCode::Commit,
            MsgCode::Propose,
            MsgCode::Prevote,
            MsgCode::Precommit,
        ] {
            assert_eq!(MsgCode::from_u64(code.as_u64()), Some(code));
        }
        assert_eq!(MsgCode::from_u64(17), None);
    }

    #[test]
    fn test_commit_code_is_zero() {
        // The seal layout depends on this value.
        assert_eq!(MsgCode::Commit.as_u64(), 0);
    }

    #[test]
    fn test_nil_vote() {
        let vote = Vote {
            block_hash: BlockHash::EMPTY,
            round: 0,
            height: 1,
        };
        assert!(vote.is_nil());
    }

    #[test]
    fn test_view_display() {
        assert_eq!(format!("{}", View::new(5, 2)), "5/2");
    }
}
