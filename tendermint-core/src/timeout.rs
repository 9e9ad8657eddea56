// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Single-slot timeout service.
//!
//! The state machine never needs two concurrent timers: advancing a step
//! supersedes any earlier expected timeout, and a late fire is rejected by
//! the transition guard on its (height, round, step) tuple. Scheduling a new
//! timeout therefore replaces the pending one. Fires are delivered through a
//! channel, never re-entrantly, even for zero durations.

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use tendermint_traits::{Height, Round};

use crate::types::RoundStep;

/// The tuple identifying a scheduled timeout and its fire event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeoutInfo {
    /// How long to wait before firing.
    pub duration: Duration,

    /// Height the timeout was scheduled at.
    pub height: Height,

    /// Round the timeout was scheduled at.
    pub round: Round,

    /// Step the timeout belongs to.
    pub step: RoundStep,
}

impl fmt::Display for TimeoutInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Timeout({:?} at {}/{}/{})",
            self.duration, self.height, self.round, self.step
        )
    }
}

/// Schedules single-shot timeouts; at most one outstanding.
pub struct TimeoutTicker {
    fire_tx: mpsc::UnboundedSender<TimeoutInfo>,
    pending: Option<JoinHandle<()>>,
}

impl TimeoutTicker {
    /// Create a ticker and the receiver its fires are delivered on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimeoutInfo>) {
        let (fire_tx, fire_rx) = mpsc::unbounded_channel();
        (
            Self {
                fire_tx,
                pending: None,
            },
            fire_rx,
        )
    }

    /// Schedule a timeout, replacing any pending one.
    pub fn schedule(&mut self, info: TimeoutInfo) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }

        debug!(%info, "scheduling timeout");
        let fire_tx = self.fire_tx.clone();
        self.pending = Some(tokio::spawn(async move {
            if !info.duration.is_zero() {
                tokio::time::sleep(info.duration).await;
            }
            // The receiver side is gone only during shutdown.
            let _ = fire_tx.send(info);
        }));
    }

    /// Release the pending timeout without firing.
    pub fn stop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
            debug!("pending timeout released");
        }
    }
}

impl Drop for TimeoutTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(round: Round, step: RoundStep, duration: Duration) -> TimeoutInfo {
        TimeoutInfo {
            duration,
            height: 1,
            round,
            step,
        }
    }

    #[tokio::test]
    async fn test_timeout_fires_with_its_tuple() {
        let (mut ticker, mut fires) = TimeoutTicker::new();
        let scheduled = info(0, RoundStep::Propose, Duration::from_millis(10));
        ticker.schedule(scheduled);

        let fired = tokio::time::timeout(Duration::from_millis(200), fires.recv())
            .await
            .expect("timer should fire")
            .expect("channel open");
        assert_eq!(fired, scheduled);
    }

    #[tokio::test]
    async fn test_schedule_replaces_pending() {
        let (mut ticker, mut fires) = TimeoutTicker::new();
        ticker.schedule(info(0, RoundStep::Propose, Duration::from_secs(60)));
        ticker.schedule(info(1, RoundStep::Propose, Duration::from_millis(10)));

        let fired = tokio::time::timeout(Duration::from_millis(200), fires.recv())
            .await
            .expect("replacement should fire")
            .expect("channel open");
        assert_eq!(fired.round, 1);

        // The replaced timeout must never fire.
        let extra = tokio::time::timeout(Duration::from_millis(100), fires.recv()).await;
        assert!(extra.is_err());
    }

    #[tokio::test]
    async fn test_zero_duration_fires_through_channel() {
        let (mut ticker, mut fires) = TimeoutTicker::new();
        ticker.schedule(info(0, RoundStep::NewHeight, Duration::ZERO));

        // Not delivered re-entrantly: nothing is observable until we poll
        // the channel.
        let fired = tokio::time::timeout(Duration::from_millis(100), fires.recv())
            .await
            .expect("zero-duration timer should fire")
            .expect("channel open");
        assert_eq!(fired.step, RoundStep::NewHeight);
    }

    #[tokio::test]
    async fn test_stop_releases_pending() {
        let (mut ticker, mut fires) = TimeoutTicker::new();
        ticker.schedule(info(0, RoundStep::Propose, Duration::from_millis(20)));
        ticker.stop();

        let fired = tokio::time::timeout(Duration::from_millis(100), fires.recv()).await;
        assert!(fired.is_err(), "stopped timeout must not fire");
    }
}
