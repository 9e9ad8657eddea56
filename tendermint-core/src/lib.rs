// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! # Tendermint Consensus Core
//!
//! The per-validator state machine of a Tendermint-style BFT consensus
//! engine. For a sequence of block heights it drives a validator through
//! the rounds of proposing, prevoting, precommitting, and committing a
//! block, coordinating with other validators via signed vote messages.
//!
//! # Overview
//!
//! - [`engine::Core`]: owns the round state, consumes the ordered event
//!   stream, executes the `enter*` transitions, and posts finalized blocks.
//! - [`round_state::RoundState`]: the height/round/step lattice with the
//!   lock and valid-block bookkeeping.
//! - [`message_set::MessageSet`]: per-(height, round, kind) vote tallies
//!   with the 2/3 quorum predicates.
//! - [`timeout::TimeoutTicker`]: the single-slot timeout service.
//! - [`codec`]: the wire envelope, payload codecs, and the committed seal.
//! - [`validator::RoundRobinValidatorSet`]: the default deterministic
//!   proposer rotation.
//!
//! The embedding system supplies the [`tendermint_traits::Backend`]: local
//! identity, signing, signer recovery, broadcast, and validator sets.
//! Backend implementations must loop broadcast payloads back to the local
//! node (self-gossip) so the validator's own votes enter its tallies
//! through the same path as everyone else's.

pub mod codec;
pub mod config;
pub mod engine;
pub mod events;
pub mod message_set;
pub mod round_state;
pub mod testing;
pub mod timeout;
pub mod types;
pub mod validator;

pub use codec::{committed_seal, CodecError, Message, COMMITTED_SEAL_LEN};
pub use config::ConsensusConfig;
pub use engine::{ConsensusError, Core, EngineHandle};
pub use events::{BlockFinalizedEvent, CoreEvent};
pub use message_set::{MessageSet, VoteError};
pub use round_state::{RoundSnapshot, RoundState};
pub use timeout::{TimeoutInfo, TimeoutTicker};
pub use types::{MsgCode, Proposal, RoundStep, View, Vote};
pub use validator::RoundRobinValidatorSet;
