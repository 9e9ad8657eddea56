// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! The consensus core engine.
//!
//! [`Core`] owns the round state and reacts to a single ordered stream of
//! events: inbound peer messages, locally assembled blocks, and timeout
//! fires. Each event is processed to completion, including every cascaded
//! transition, outbound send, and event post, before the next one is
//! dequeued, so the round state needs no locking of its own. Observers read
//! a published [`RoundSnapshot`] behind a reader-writer lock.
//!
//! The transition family lives in [`transitions`]; inbound message and
//! timeout handling in [`handlers`].

mod handlers;
mod transitions;

use std::sync::{Arc, RwLock};
use std::time::Instant;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use tendermint_traits::{Backend, BackendError, Block, BlockHash, Height, Round, ValidatorSet};

use crate::codec::{self, CodecError, Message};
use crate::config::ConsensusConfig;
use crate::events::{BlockFinalizedEvent, CoreEvent, FINALIZED_CHANNEL_CAPACITY};
use crate::message_set::VoteError;
use crate::round_state::{RoundSnapshot, RoundState};
use crate::timeout::{TimeoutInfo, TimeoutTicker};
use crate::types::{MsgCode, Proposal, Vote};

/// Errors surfaced while handling an inbound message.
///
/// None of these are fatal: the dispatcher logs them and moves on. Fatal
/// invariant violations abort the process instead (see the transition
/// family).
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    /// The envelope or payload did not decode.
    #[error("codec: {0}")]
    Codec(#[from] CodecError),

    /// Signature verification or another backend operation failed.
    #[error("backend: {0}")]
    Backend(#[from] BackendError),

    /// The vote was rejected by the tally (double-sign, unknown signer).
    #[error("vote rejected: {0}")]
    Vote(#[from] VoteError),

    /// The recovered signer is not in the current validator set.
    #[error("message from address outside the validator set: {0}")]
    UnknownValidator(tendermint_traits::Address),

    /// The commit code is reserved for seal construction and never appears
    /// in live consensus messages.
    #[error("reserved commit code on the wire")]
    ReservedCode,
}

/// The per-validator consensus state machine.
///
/// Constructed with [`Core::new`], then either driven directly (tests call
/// the `handle_*` methods and inspect [`Core::state`]) or spawned with
/// [`Core::start`], which returns an [`EngineHandle`] for the embedding
/// system.
pub struct Core<BE: Backend> {
    backend: Arc<BE>,
    config: ConsensusConfig,
    val_set: Box<dyn ValidatorSet>,
    state: RoundState<BE::Block>,
    timeout: TimeoutTicker,
    timeout_rx: Option<mpsc::UnboundedReceiver<TimeoutInfo>>,
    finalized_tx: broadcast::Sender<BlockFinalizedEvent<BE::Block>>,
    snapshot: Arc<RwLock<RoundSnapshot>>,
}

impl<BE: Backend> Core<BE> {
    /// Create a core at the given height, at round 0 and step `NewHeight`.
    ///
    /// The first round starts after the configured commit delay, giving the
    /// producer time to assemble a candidate block.
    pub fn new(backend: Arc<BE>, config: ConsensusConfig, height: Height) -> Self {
        let start_time = config.commit_time(Instant::now());
        let state = RoundState::new(height, start_time);
        let val_set = backend.validators(height);
        let (timeout, timeout_rx) = TimeoutTicker::new();
        let (finalized_tx, _) = broadcast::channel(FINALIZED_CHANNEL_CAPACITY);
        let snapshot = Arc::new(RwLock::new(state.snapshot()));

        Self {
            backend,
            config,
            val_set,
            state,
            timeout,
            timeout_rx: Some(timeout_rx),
            finalized_tx,
            snapshot,
        }
    }

    /// The round state, for direct-drive tests and in-process observers.
    pub fn state(&self) -> &RoundState<BE::Block> {
        &self.state
    }

    /// The validator set currently in force.
    pub fn validator_set(&self) -> &dyn ValidatorSet {
        &*self.val_set
    }

    /// Subscribe to finalized blocks.
    pub fn subscribe_finalized(&self) -> broadcast::Receiver<BlockFinalizedEvent<BE::Block>> {
        self.finalized_tx.subscribe()
    }

    /// Install the locally assembled candidate block.
    ///
    /// Legal at any time during a height; only read when this validator
    /// proposes and no valid block exists.
    pub fn handle_new_block(&mut self, block: BE::Block) {
        if block.number() != self.state.height() {
            debug!(
                block_number = block.number(),
                height = self.state.height(),
                "ignoring candidate block for another height"
            );
            return;
        }
        debug!(hash = %block.hash(), "candidate block installed");
        self.state.set_block(Some(block));
    }

    /// Spawn the dispatcher and hand the engine to the embedding system.
    pub fn start(mut self) -> EngineHandle<BE::Block> {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let finalized_tx = self.finalized_tx.clone();
        let snapshot = self.snapshot.clone();
        let loop_cancel = cancel.clone();
        let mut timeout_rx = self.timeout_rx.take().expect("engine already started");

        let join = tokio::spawn(async move {
            self.start_round_zero();
            self.publish_snapshot();
            loop {
                tokio::select! {
                    _ = loop_cancel.cancelled() => break,
                    event = event_rx.recv() => match event {
                        Some(event) => self.dispatch(event).await,
                        None => break,
                    },
                    fired = timeout_rx.recv() => match fired {
                        Some(info) => self.handle_timeout(info).await,
                        None => break,
                    },
                }
                self.publish_snapshot();
            }
            self.timeout.stop();
            debug!("dispatcher drained and stopped");
        });

        EngineHandle {
            events: event_tx,
            finalized: finalized_tx,
            snapshot,
            cancel,
            join,
        }
    }

    /// Process one inbound event to completion.
    pub async fn dispatch(&mut self, event: CoreEvent<BE::Block>) {
        match event {
            CoreEvent::Message(payload) => {
                if let Err(err) = self.handle_message(&payload).await {
                    match err {
                        ConsensusError::Vote(VoteError::ConflictingVote { .. }) => {
                            // Already logged with the offender; evidence
                            // collection is an external concern.
                        }
                        err => debug!(%err, "inbound message rejected"),
                    }
                }
            }
            CoreEvent::NewBlock(block) => self.handle_new_block(block),
        }
    }

    /// Publish the observable state for readers outside the dispatcher.
    pub(crate) fn publish_snapshot(&self) {
        *self.snapshot.write().expect("snapshot lock poisoned") = self.state.snapshot();
    }

    /// Sign an envelope and return the wire bytes.
    fn finalize_msg(&self, code: MsgCode, payload: Vec<u8>) -> Result<Vec<u8>, ConsensusError> {
        let address = self.backend.address();
        let preimage = codec::signing_preimage(code, &payload, &address);
        let signature = self.backend.sign(&preimage)?;
        Ok(Message::new(code, payload, address, signature).encode())
    }

    /// Encode, sign, and broadcast a proposal. Failures are logged and the
    /// send abandoned; the round proceeds on the proposal timeout.
    pub(crate) async fn send_propose(&self, proposal: &Proposal<BE::Block>) {
        debug!(round = proposal.round, pol_round = proposal.pol_round, "sending proposal");
        let payload = match codec::encode_proposal(proposal) {
            Ok(payload) => payload,
            Err(err) => {
                error!(%err, "failed to encode proposal");
                return;
            }
        };
        let envelope = match self.finalize_msg(MsgCode::Propose, payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                error!(%err, "failed to finalize proposal");
                return;
            }
        };
        if let Err(err) = self.backend.broadcast(&*self.val_set, envelope).await {
            error!(%err, "failed to broadcast proposal");
            return;
        }
        debug!(hash = %proposal.block.hash(), "proposal sent");
    }

    /// Encode, sign, and broadcast a prevote or precommit for a block (or
    /// nil). Skips silently when this node is not in the validator set.
    pub(crate) async fn send_vote(&self, kind: MsgCode, block: Option<&BE::Block>, round: Round) {
        let local = self.backend.address();
        if self.val_set.get_by_address(&local).is_none() {
            debug!(%local, round, "not a validator of this round; skipping vote");
            return;
        }
        if kind != MsgCode::Prevote && kind != MsgCode::Precommit {
            warn!(%kind, "refusing to send non-vote kind");
            return;
        }

        let vote = Vote {
            block_hash: block.map(|b| b.hash()).unwrap_or(BlockHash::EMPTY),
            round,
            height: self.state.height(),
        };
        let payload = match codec::encode_vote(&vote) {
            Ok(payload) => payload,
            Err(err) => {
                error!(%err, "failed to encode vote");
                return;
            }
        };
        let envelope = match self.finalize_msg(kind, payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                error!(%err, "failed to finalize vote");
                return;
            }
        };
        if let Err(err) = self.backend.broadcast(&*self.val_set, envelope).await {
            error!(%err, "failed to broadcast vote");
            return;
        }
        debug!(%kind, %vote, "vote sent");
    }
}

/// Handle returned by [`Core::start`].
///
/// Cloneable senders feed the dispatcher; `stop` cancels it and waits for
/// the current tick to drain. Pending timeouts are abandoned.
pub struct EngineHandle<B: Block> {
    events: mpsc::UnboundedSender<CoreEvent<B>>,
    finalized: broadcast::Sender<BlockFinalizedEvent<B>>,
    snapshot: Arc<RwLock<RoundSnapshot>>,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl<B: Block> EngineHandle<B> {
    /// Queue a raw signed envelope from the network.
    pub fn send_message(&self, payload: Vec<u8>) {
        let _ = self.events.send(CoreEvent::Message(payload));
    }

    /// Install a locally assembled candidate block.
    pub fn set_block_for_proposal(&self, block: B) {
        let _ = self.events.send(CoreEvent::NewBlock(block));
    }

    /// Subscribe to finalized blocks.
    pub fn subscribe_finalized(&self) -> broadcast::Receiver<BlockFinalizedEvent<B>> {
        self.finalized.subscribe()
    }

    /// The latest published round state.
    pub fn snapshot(&self) -> RoundSnapshot {
        self.snapshot.read().expect("snapshot lock poisoned").clone()
    }

    /// Stop the dispatcher, waiting for its current tick to complete.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.join.await;
    }
}
