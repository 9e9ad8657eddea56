// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Events flowing into and out of the core.
//!
//! Inbound events (peer messages and locally assembled blocks) share one
//! ordered stream with timer fires; the dispatcher consumes them one at a
//! time to completion. The only outbound event is the finalized block,
//! posted on a broadcast bus.

/// Capacity of the finalized-block broadcast channel. Slow subscribers that
/// fall further behind than this observe a lag error, not backpressure on
/// the dispatcher.
pub const FINALIZED_CHANNEL_CAPACITY: usize = 64;

/// Inbound events multiplexed into the dispatcher.
#[derive(Clone, Debug)]
pub enum CoreEvent<B> {
    /// A raw signed envelope from a peer (or our own gossip loopback).
    Message(Vec<u8>),

    /// A candidate block assembled by the local producer.
    NewBlock(B),
}

/// Posted to subscribers when a block commits.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockFinalizedEvent<B> {
    /// The finalized block, decorated for storage by the block-type owner.
    pub block: B,
}
