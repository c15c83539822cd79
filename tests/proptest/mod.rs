// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Property-based tests for ca-rotation.
//!
//! Uses proptest to generate random inputs and verify invariants.

use std::time::Duration;

use proptest::prelude::*;

use ca_rotation::resources::pod::ContainerId;
use ca_rotation::retry::step_count;
use ca_rotation::wait::{PollState, Verdict};

/// Strategy for generating poll intervals (1ms-10s).
fn interval_millis() -> impl Strategy<Value = u64> {
    1..=10_000u64
}

/// Strategy for generating timeouts (0-30min).
fn timeout_millis() -> impl Strategy<Value = u64> {
    0..=1_800_000u64
}

/// Strategy for generating required success counts.
fn successes_needed() -> impl Strategy<Value = u32> {
    1..=8u32
}

/// Strategy for generating condition outcomes over a wait.
fn observations() -> impl Strategy<Value = Vec<bool>> {
    prop::collection::vec(any::<bool>(), 0..64)
}

proptest! {
    /// Property: There is always at least one attempt, and the attempts fit
    /// in the timeout whenever the timeout covers one interval.
    #[test]
    fn test_step_count_fits_timeout(
        interval in interval_millis(),
        timeout in timeout_millis()
    ) {
        let steps = u64::from(step_count(
            Duration::from_millis(interval),
            Duration::from_millis(timeout),
        ));
        prop_assert!(steps >= 1);
        if timeout >= interval {
            prop_assert!(steps * interval <= timeout);
            prop_assert!((steps + 1) * interval > timeout);
        } else {
            prop_assert_eq!(steps, 1);
        }
    }

    /// Property: An always satisfied condition converges exactly on the
    /// required poll.
    #[test]
    fn test_steady_condition_converges_on_time(needed in successes_needed()) {
        let mut state = PollState::new(needed);
        for poll in 1..needed {
            prop_assert_eq!(state.observe(true), Verdict::Pending, "poll {}", poll);
        }
        prop_assert_eq!(state.observe(true), Verdict::Converged);
    }

    /// Property: A condition that never held is never flapping.
    #[test]
    fn test_never_satisfied_never_flaps(needed in successes_needed(), polls in 0..64usize) {
        let mut state = PollState::new(needed);
        for _ in 0..polls {
            prop_assert_eq!(state.observe(false), Verdict::Pending);
        }
        prop_assert_eq!(state.flap_count(), 0);
    }

    /// Property: Verdicts agree with the observed history up to the first
    /// terminal verdict.
    #[test]
    fn test_verdicts_follow_history(needed in successes_needed(), outcomes in observations()) {
        let mut state = PollState::new(needed);
        let mut run = 0u32;
        let mut flaps = 0u32;
        let mut previous = None;

        for satisfied in outcomes {
            let verdict = state.observe(satisfied);
            if satisfied {
                run += 1;
            } else {
                if previous == Some(true) {
                    flaps += 1;
                }
                run = 0;
            }
            previous = Some(satisfied);

            prop_assert_eq!(state.success_count(), run);
            prop_assert_eq!(state.flap_count(), flaps);
            match verdict {
                Verdict::Converged => {
                    prop_assert!(satisfied);
                    prop_assert_eq!(run, needed);
                    break;
                }
                Verdict::Flapping => {
                    prop_assert!(!satisfied);
                    prop_assert_eq!(flaps, needed - 1);
                    break;
                }
                Verdict::Pending => prop_assert!(run < needed),
            }
        }
    }

    /// Property: Container ids of known runtimes parse back into their parts.
    #[test]
    fn test_container_id_parts(docker in any::<bool>(), id in "[0-9a-f]{1,64}") {
        let runtime = if docker { "docker" } else { "containerd" };
        let parsed: ContainerId = format!("{runtime}://{id}").parse().unwrap();
        prop_assert_eq!(parsed.runtime.to_string(), runtime);
        prop_assert_eq!(parsed.id, id);
    }
}
