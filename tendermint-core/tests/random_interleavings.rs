// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Randomized delivery-order tests.
//!
//! One honest height's worth of traffic (the proposal, a prevote quorum,
//! and a precommit quorum) is delivered in seeded random orders. Whatever
//! the order, the universal invariants must hold after every event and the
//! height must commit by the end.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use tendermint_core::testing::{
    four_validators, signed_proposal, signed_vote, test_address, MockBackend, TestBlock,
};
use tendermint_core::{ConsensusConfig, Core, MsgCode, Proposal, RoundSnapshot, Vote};
use tendermint_traits::{Block, Height};

const HEIGHT: Height = 5;
const SEEDS: u64 = 24;

fn new_core() -> (Arc<MockBackend>, Core<MockBackend>) {
    let backend = MockBackend::new(test_address(2), four_validators());
    let config = ConsensusConfig {
        commit_delay: Duration::from_millis(10),
        ..Default::default()
    };
    let core = Core::new(backend.clone(), config, HEIGHT);
    (backend, core)
}

async fn deliver_loopback(core: &mut Core<MockBackend>, backend: &MockBackend) {
    loop {
        let payloads = backend.take_broadcasts();
        if payloads.is_empty() {
            break;
        }
        for payload in payloads {
            let _ = core.handle_message(&payload).await;
        }
    }
}

fn check_invariants(snapshot: &RoundSnapshot, previous: &RoundSnapshot, seed: u64) {
    assert_eq!(
        snapshot.locked_round == -1,
        snapshot.locked_block_hash.is_none(),
        "seed {seed}: lock pairing violated"
    );
    assert_eq!(
        snapshot.valid_round == -1,
        snapshot.valid_block_hash.is_none(),
        "seed {seed}: valid pairing violated"
    );
    assert!(
        snapshot.locked_round <= snapshot.round,
        "seed {seed}: locked round ahead of current round"
    );
    assert!(
        snapshot.valid_round <= snapshot.round,
        "seed {seed}: valid round ahead of current round"
    );
    if snapshot.height == previous.height && snapshot.round == previous.round {
        assert!(
            snapshot.step >= previous.step,
            "seed {seed}: step regressed within a round"
        );
    }
}

#[tokio::test]
async fn test_random_delivery_orders_commit_and_preserve_invariants() {
    let block = TestBlock::new(HEIGHT, 9);
    let vote = |round| Vote {
        block_hash: block.hash(),
        round,
        height: HEIGHT,
    };

    for seed in 0..SEEDS {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let (backend, mut core) = new_core();
        let mut finalized = core.subscribe_finalized();

        core.enter_new_round(HEIGHT, 0).await;

        let mut events = vec![signed_proposal(
            &Proposal::new(block.clone(), 0, -1),
            &test_address(1),
        )];
        for i in [1u8, 3, 4] {
            events.push(signed_vote(MsgCode::Prevote, &vote(0), &test_address(i)));
            events.push(signed_vote(MsgCode::Precommit, &vote(0), &test_address(i)));
        }
        events.shuffle(&mut rng);

        let mut previous = core.state().snapshot();
        for payload in events {
            let _ = core.handle_message(&payload).await;
            deliver_loopback(&mut core, &backend).await;

            let snapshot = core.state().snapshot();
            check_invariants(&snapshot, &previous, seed);
            previous = snapshot;
        }

        assert_eq!(
            core.state().height(),
            HEIGHT + 1,
            "seed {seed}: the height did not commit"
        );
        let event = finalized
            .try_recv()
            .unwrap_or_else(|_| panic!("seed {seed}: no finalized event"));
        assert_eq!(event.block.hash(), block.hash());
    }
}

#[tokio::test]
async fn test_duplicate_deliveries_are_idempotent() {
    let block = TestBlock::new(HEIGHT, 9);
    let vote = |round| Vote {
        block_hash: block.hash(),
        round,
        height: HEIGHT,
    };

    for seed in 0..SEEDS {
        let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_mul(31).wrapping_add(7));
        let (backend, mut core) = new_core();
        let mut finalized = core.subscribe_finalized();

        core.enter_new_round(HEIGHT, 0).await;

        // Every event twice, shuffled: duplicates must change nothing.
        let mut events = Vec::new();
        for _ in 0..2 {
            events.push(signed_proposal(
                &Proposal::new(block.clone(), 0, -1),
                &test_address(1),
            ));
            for i in [1u8, 3, 4] {
                events.push(signed_vote(MsgCode::Prevote, &vote(0), &test_address(i)));
                events.push(signed_vote(MsgCode::Precommit, &vote(0), &test_address(i)));
            }
        }
        events.shuffle(&mut rng);

        let mut previous = core.state().snapshot();
        for payload in events {
            let _ = core.handle_message(&payload).await;
            deliver_loopback(&mut core, &backend).await;

            let snapshot = core.state().snapshot();
            check_invariants(&snapshot, &previous, seed);
            previous = snapshot;
        }

        assert_eq!(core.state().height(), HEIGHT + 1, "seed {seed}");
        assert!(finalized.try_recv().is_ok(), "seed {seed}");
        assert!(
            finalized.try_recv().is_err(),
            "seed {seed}: a block must finalize exactly once"
        );
    }
}
