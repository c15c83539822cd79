//! Condition polling with flap detection.
//!
//! [`wait_for`] polls a snapshot source immediately and then at a fixed
//! interval, evaluates a condition against every snapshot and succeeds once
//! the condition held on `successes_needed` consecutive polls. A condition
//! that keeps going from satisfied back to unsatisfied is treated as a crash
//! loop and fails fast instead of waiting out the whole timeout.
//!
//! The condition functions live in [`conditions`] and the waits specialised
//! for nodes, pods and workload rollouts in [`readiness`].

use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::trace;

use crate::error::{Error, Result};

pub mod conditions;
pub mod readiness;

pub use readiness::{
    NODES_READY_SUCCESSES, PODS_READY_SUCCESSES, RESTART_SUCCESSES, ROLLOUT_SUCCESSES,
    wait_for_all_in_namespace_ready, wait_for_daemon_sets_updated, wait_for_deployments_updated,
    wait_for_nodes_ready, wait_for_ready, wait_for_restart,
};

/// Shortest accepted poll interval.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Result of evaluating a condition against one snapshot.
#[derive(Debug)]
pub struct ConditionOutcome {
    pub satisfied: bool,
    /// Why the condition did not hold.
    pub error: Option<Error>,
}

impl ConditionOutcome {
    pub fn satisfied() -> Self {
        Self {
            satisfied: true,
            error: None,
        }
    }

    pub fn unsatisfied(error: Error) -> Self {
        Self {
            satisfied: false,
            error: Some(error),
        }
    }
}

impl From<Result<()>> for ConditionOutcome {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => Self::satisfied(),
            Err(e) => Self::unsatisfied(e),
        }
    }
}

impl From<bool> for ConditionOutcome {
    fn from(satisfied: bool) -> Self {
        Self {
            satisfied,
            error: None,
        }
    }
}

/// What the poll loop should do after a tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Enough consecutive successes.
    Converged,
    /// Too many satisfied to unsatisfied transitions.
    Flapping,
    /// Keep polling.
    Pending,
}

/// Progress of one wait call.
#[derive(Clone, Debug)]
pub struct PollState {
    successes_needed: u32,
    success_count: u32,
    total_successes: u32,
    flap_count: u32,
    last_satisfied: Option<bool>,
}

impl PollState {
    /// `successes_needed` is clamped to at least one.
    pub fn new(successes_needed: u32) -> Self {
        Self {
            successes_needed: successes_needed.max(1),
            success_count: 0,
            total_successes: 0,
            flap_count: 0,
            last_satisfied: None,
        }
    }

    /// Record the outcome of one poll.
    pub fn observe(&mut self, satisfied: bool) -> Verdict {
        let was_satisfied = self.last_satisfied.replace(satisfied) == Some(true);
        if satisfied {
            self.success_count += 1;
            self.total_successes += 1;
            if self.success_count >= self.successes_needed {
                return Verdict::Converged;
            }
            return Verdict::Pending;
        }

        self.success_count = 0;
        if was_satisfied {
            self.flap_count += 1;
            if self.flap_count >= self.successes_needed - 1 {
                return Verdict::Flapping;
            }
        }
        Verdict::Pending
    }

    pub fn successes_needed(&self) -> u32 {
        self.successes_needed
    }

    /// Current run of consecutive satisfied polls.
    pub fn success_count(&self) -> u32 {
        self.success_count
    }

    /// Satisfied polls over the whole wait.
    pub fn total_successes(&self) -> u32 {
        self.total_successes
    }

    pub fn flap_count(&self) -> u32 {
        self.flap_count
    }
}

/// Poll until `condition` holds on `successes_needed` consecutive snapshots.
///
/// The first poll happens immediately. A poll error is returned as is,
/// annotated with the successes so far. Returns the converged snapshot, a
/// [`Error::Flapping`] error once the condition flapped `successes_needed - 1`
/// times, or a [`Error::Timeout`] error carrying the last condition error.
pub async fn wait_for<S, P, Fut, C>(
    mut poll: P,
    mut condition: C,
    successes_needed: u32,
    interval: Duration,
    timeout: Duration,
) -> Result<S>
where
    P: FnMut() -> Fut,
    Fut: Future<Output = Result<S>>,
    C: FnMut(&S) -> ConditionOutcome,
{
    let mut state = PollState::new(successes_needed);
    let mut last_error: Option<Error> = None;

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let mut ticker = tokio::time::interval(interval.max(MIN_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        let snapshot = tokio::select! {
            biased;
            _ = &mut deadline => break,
            polled = poll() => polled.map_err(|e| {
                e.context(format!("condition successesCount: {}", state.total_successes()))
            })?,
        };

        let outcome = condition(&snapshot);
        let verdict = state.observe(outcome.satisfied);
        trace!(
            satisfied = outcome.satisfied,
            success_count = state.success_count(),
            flap_count = state.flap_count(),
            "Condition evaluated"
        );
        match verdict {
            Verdict::Converged => return Ok(snapshot),
            Verdict::Flapping => {
                return Err(Error::Flapping {
                    successes: state.total_successes(),
                    flaps: state.flap_count(),
                    source: outcome.error.or(last_error).map(Box::new),
                });
            }
            Verdict::Pending => {
                if outcome.error.is_some() {
                    last_error = outcome.error;
                }
            }
        }

        tokio::select! {
            biased;
            _ = &mut deadline => break,
            _ = ticker.tick() => {}
        }
    }

    Err(Error::Timeout {
        timeout,
        successes: state.total_successes(),
        source: last_error.map(Box::new),
    })
}
