// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Proof-of-lock-change scenarios: locking, relocking, and the two unlock
//! paths (nil polka, polka for an unavailable block).

use std::sync::Arc;
use std::time::Duration;

use tendermint_core::codec::{decode_vote, Message};
use tendermint_core::testing::{
    four_validators, signed_proposal, signed_vote, test_address, MockBackend, TestBlock,
};
use tendermint_core::{ConsensusConfig, Core, MsgCode, Proposal, RoundStep, TimeoutInfo, Vote};
use tendermint_traits::{Block, BlockHash, Height, Round};

const HEIGHT: Height = 5;

fn new_core() -> (Arc<MockBackend>, Core<MockBackend>) {
    // Validator 2 is never the proposer in these scenarios.
    let backend = MockBackend::new(test_address(2), four_validators());
    let config = ConsensusConfig {
        commit_delay: Duration::from_millis(10),
        ..Default::default()
    };
    let core = Core::new(backend.clone(), config, HEIGHT);
    (backend, core)
}

fn vote_for(block: &TestBlock, round: Round) -> Vote {
    Vote {
        block_hash: block.hash(),
        round,
        height: HEIGHT,
    }
}

fn nil_vote(round: Round) -> Vote {
    Vote {
        block_hash: BlockHash::EMPTY,
        round,
        height: HEIGHT,
    }
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

fn last_vote_broadcast(backend: &MockBackend) -> (MsgCode, Vote) {
    let broadcasts = backend.take_broadcasts();
    let payload = broadcasts.last().expect("a vote was broadcast");
    let message = Message::decode(payload).expect("valid envelope");
    let vote = decode_vote(&message.msg).expect("valid vote payload");
    (message.code, vote)
}

/// Drive validator 2 to lock on `block` in round 0: proposal from the
/// proposer, then a prevote polka.
async fn lock_in_round_zero(
    core: &mut Core<MockBackend>,
    backend: &MockBackend,
    block: &TestBlock,
) {
    core.enter_new_round(HEIGHT, 0).await;
    core.handle_message(&signed_proposal(
        &Proposal::new(block.clone(), 0, -1),
        &test_address(1),
    ))
    .await
    .unwrap();
    deliver_loopback(core, backend).await;

    for i in [1u8, 3, 4] {
        core.handle_message(&signed_vote(
            MsgCode::Prevote,
            &vote_for(block, 0),
            &test_address(i),
        ))
        .await
        .unwrap();
    }
    assert_eq!(core.state().locked_round(), 0);
    assert_eq!(
        core.state().locked_block().map(|b| b.hash()),
        Some(block.hash())
    );
}

/// Fail round 0 after the lock (a precommit two-thirds-any without a
/// majority) and advance into round 1 via the precommit-wait timeout.
/// Validator 2 prevotes its locked block on entry; the loopback tallies it.
async fn advance_to_round_one(core: &mut Core<MockBackend>, backend: &MockBackend) {
    // Our own precommit for the locked block is still in the capture
    // buffer; loop it back, then add two nil precommits for 2/3-any.
    deliver_loopback(core, backend).await;
    for i in [3u8, 4] {
        core.handle_message(&signed_vote(
            MsgCode::Precommit,
            &nil_vote(0),
            &test_address(i),
        ))
        .await
        .unwrap();
    }

    core.handle_timeout(TimeoutInfo {
        duration: Duration::ZERO,
        height: HEIGHT,
        round: 0,
        step: RoundStep::PrecommitWait,
    })
    .await;

    assert_eq!(core.state().round(), 1);
    // Still locked: round changes do not release the lock.
    assert_eq!(core.state().locked_round(), 0);
}

#[tokio::test]
async fn test_lock_then_relock_in_next_round() {
    let (backend, mut core) = new_core();
    let block = TestBlock::new(HEIGHT, 11);

    lock_in_round_zero(&mut core, &backend, &block).await;
    advance_to_round_one(&mut core, &backend).await;

    // Entering round 1 prevoted the locked block, not nil.
    deliver_loopback(&mut core, &backend).await;
    let own_prevote = core
        .state()
        .prevotes(1)
        .and_then(|tally| tally.vote_by(&test_address(2)).copied())
        .expect("own round-1 prevote");
    assert_eq!(own_prevote.block_hash, block.hash());

    // A second polka for the same block advances the lock to round 1.
    for i in [1u8, 3, 4] {
        core.handle_message(&signed_vote(
            MsgCode::Prevote,
            &vote_for(&block, 1),
            &test_address(i),
        ))
        .await
        .unwrap();
    }

    assert_eq!(core.state().locked_round(), 1);
    assert_eq!(
        core.state().locked_block().map(|b| b.hash()),
        Some(block.hash())
    );
    let (code, vote) = last_vote_broadcast(&backend);
    assert_eq!(code, MsgCode::Precommit);
    assert_eq!(vote.block_hash, block.hash());
    assert_eq!(vote.round, 1);
}

#[tokio::test]
async fn test_unlock_on_nil_polka() {
    let (backend, mut core) = new_core();
    let block = TestBlock::new(HEIGHT, 11);

    lock_in_round_zero(&mut core, &backend, &block).await;
    advance_to_round_one(&mut core, &backend).await;
    deliver_loopback(&mut core, &backend).await;

    // 2/3 prevote nil in round 1.
    for i in [1u8, 3, 4] {
        core.handle_message(&signed_vote(MsgCode::Prevote, &nil_vote(1), &test_address(i)))
            .await
            .unwrap();
    }

    assert_eq!(core.state().locked_round(), -1);
    assert!(core.state().locked_block().is_none());
    let (code, vote) = last_vote_broadcast(&backend);
    assert_eq!(code, MsgCode::Precommit);
    assert!(vote.block_hash.is_empty());
    assert_eq!(vote.round, 1);
}

#[tokio::test]
async fn test_unlock_on_polka_for_unavailable_block() {
    let (backend, mut core) = new_core();
    let block = TestBlock::new(HEIGHT, 11);
    let unknown = TestBlock::new(HEIGHT, 99);

    lock_in_round_zero(&mut core, &backend, &block).await;
    advance_to_round_one(&mut core, &backend).await;
    deliver_loopback(&mut core, &backend).await;

    // 2/3 prevote a block we never received.
    for i in [1u8, 3, 4] {
        core.handle_message(&signed_vote(
            MsgCode::Prevote,
            &vote_for(&unknown, 1),
            &test_address(i),
        ))
        .await
        .unwrap();
    }

    assert_eq!(core.state().locked_round(), -1);
    assert!(core.state().locked_block().is_none());
    let (code, vote) = last_vote_broadcast(&backend);
    assert_eq!(code, MsgCode::Precommit);
    assert!(vote.block_hash.is_empty());
    assert_eq!(vote.round, 1);
}

#[tokio::test]
async fn test_valid_block_survives_into_proposal_priority() {
    // After a polka on the proposal block, the valid pair is recorded even
    // on a node that stays unlocked later; the proposer re-proposes it with
    // its proof-of-lock round.
    let (backend, mut core) = new_core();
    let block = TestBlock::new(HEIGHT, 11);

    lock_in_round_zero(&mut core, &backend, &block).await;

    assert_eq!(core.state().valid_round(), 0);
    assert_eq!(
        core.state().valid_block().map(|b| b.hash()),
        Some(block.hash())
    );

    let proposal = core.decide_proposal(1).expect("proposal decided");
    assert_eq!(proposal.block.hash(), block.hash());
    assert_eq!(proposal.round, 1);
    assert_eq!(proposal.pol_round, 0);
}

#[tokio::test]
async fn test_precommit_wait_scheduled_once_per_round() {
    let (backend, mut core) = new_core();
    let block = TestBlock::new(HEIGHT, 11);

    lock_in_round_zero(&mut core, &backend, &block).await;
    deliver_loopback(&mut core, &backend).await;

    // First 2/3-any of precommits sets the wait flag.
    for i in [3u8, 4] {
        core.handle_message(&signed_vote(
            MsgCode::Precommit,
            &nil_vote(0),
            &test_address(i),
        ))
        .await
        .unwrap();
    }
    assert!(core.state().precommit_waited());
}
