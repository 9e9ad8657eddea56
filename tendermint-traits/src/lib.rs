// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! # Tendermint Consensus Traits
//!
//! This library defines the boundary between the Tendermint consensus core
//! and the system that embeds it. The core drives the round state machine;
//! everything else (block production, signature cryptography, transport,
//! validator-set derivation) is reached through the traits in this crate.
//!
//! ## Overview
//!
//! - **Primitives**: [`Address`], [`BlockHash`], [`Signature`], the
//!   fixed-width types that appear on the wire.
//! - **Blocks**: [`Block`], the two operations the core reads from a block.
//! - **Backend**: [`Backend`], which carries identity, signing, signer recovery,
//!   broadcast, and validator-set lookup.
//! - **Validators**: [`Validator`] and [`ValidatorSet`]: committee membership,
//!   voting power, and deterministic proposer rotation.

pub mod backend;
pub mod block;
pub mod primitives;
pub mod validator;

pub use backend::{Backend, BackendError};
pub use block::Block;
pub use primitives::{Address, BlockHash, Height, Round, Signature};
pub use validator::{Validator, ValidatorSet};

/// Error type for fallible constructors in this crate.
pub type Error = anyhow::Error;

/// Result type alias for consensus operations.
pub type Result<T> = std::result::Result<T, Error>;
