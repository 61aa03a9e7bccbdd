//! # Retry Policy
//!
//! Pure computation of the next retry budget and delay for a failed attempt.
//!
//! Attempts are counted from the engine's `retries` value for the task: a task
//! that has never failed carries no value and is on its first attempt; after
//! that the engine stores whatever this policy returned last time.
//!
//! ```text
//! attempt      = 1                            if retries_left is None
//!              = max_attempts - retries_left + 1 otherwise
//! retries_left' = max_attempts - attempt
//! delay        = backoff[min(attempt, len) - 1], or zero when retries_left' == 0
//! ```
//!
//! `max_attempts` is the total number of attempts including the first one.

use crate::constants::defaults;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry budget and delay to report to the engine for a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryDecision {
    /// 1-based number of the attempt that just failed
    pub attempt: u32,
    /// Retries the engine should record for the task
    pub retries_left: u32,
    /// How long the engine should keep the task back before it is leasable again
    pub delay: Duration,
}

impl RetryDecision {
    /// Whether another attempt will be made
    pub fn will_retry(&self) -> bool {
        self.retries_left > 0
    }
}

/// Compute the next retry state.
///
/// Total for every input: `retries_left` larger than `max_attempts` is treated as
/// a first attempt and all arithmetic saturates at zero. An empty backoff
/// sequence falls back to a single 5 second delay.
pub fn next_retry(
    max_attempts: u32,
    retries_left: Option<u32>,
    backoff_sequence: &[Duration],
) -> RetryDecision {
    let attempt = match retries_left {
        None => 1,
        Some(retries) => max_attempts.saturating_sub(retries).saturating_add(1),
    };

    let next_retries_left = max_attempts.saturating_sub(attempt);

    let delay = if next_retries_left == 0 {
        Duration::ZERO
    } else {
        delay_for_attempt(attempt, backoff_sequence)
    };

    RetryDecision {
        attempt,
        retries_left: next_retries_left,
        delay,
    }
}

/// Delay configured for the given 1-based attempt; the last entry repeats.
pub fn delay_for_attempt(attempt: u32, backoff_sequence: &[Duration]) -> Duration {
    let default_sequence = [defaults::RETRY_DELAY];
    let sequence = if backoff_sequence.is_empty() {
        &default_sequence[..]
    } else {
        backoff_sequence
    };

    let index = (attempt.max(1) as usize).min(sequence.len()) - 1;
    sequence[index]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn millis(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|v| Duration::from_millis(*v)).collect()
    }

    #[test]
    fn test_first_attempt_uses_first_delay() {
        let decision = next_retry(3, None, &millis(&[1000, 2000]));
        assert_eq!(decision.attempt, 1);
        assert_eq!(decision.retries_left, 2);
        assert_eq!(decision.delay, Duration::from_millis(1000));
        assert!(decision.will_retry());
    }

    #[test]
    fn test_subsequent_attempts_walk_the_sequence() {
        let sequence = millis(&[1000, 2000]);

        let second = next_retry(3, Some(2), &sequence);
        assert_eq!(second.attempt, 2);
        assert_eq!(second.retries_left, 1);
        assert_eq!(second.delay, Duration::from_millis(2000));

        let third = next_retry(3, Some(1), &sequence);
        assert_eq!(third.attempt, 3);
        assert_eq!(third.retries_left, 0);
        assert_eq!(third.delay, Duration::ZERO);
        assert!(!third.will_retry());
    }

    #[test]
    fn test_last_delay_repeats_beyond_sequence() {
        let sequence = millis(&[100, 200]);
        let decision = next_retry(10, Some(6), &sequence);
        assert_eq!(decision.attempt, 5);
        assert_eq!(decision.delay, Duration::from_millis(200));
    }

    #[test]
    fn test_empty_sequence_defaults_to_five_seconds() {
        let decision = next_retry(4, None, &[]);
        assert_eq!(decision.delay, Duration::from_secs(5));
    }

    #[test]
    fn test_single_attempt_never_retries() {
        let decision = next_retry(1, None, &millis(&[1000]));
        assert_eq!(decision.retries_left, 0);
        assert_eq!(decision.delay, Duration::ZERO);
    }

    #[test]
    fn test_degenerate_inputs_are_total() {
        let zero = next_retry(0, None, &[]);
        assert_eq!(zero.retries_left, 0);
        assert_eq!(zero.delay, Duration::ZERO);

        let exhausted = next_retry(2, Some(0), &[]);
        assert_eq!(exhausted.attempt, 3);
        assert_eq!(exhausted.retries_left, 0);

        // more retries left than attempts allowed reads as a first attempt
        let inflated = next_retry(2, Some(7), &millis(&[10, 20]));
        assert_eq!(inflated.attempt, 1);
        assert_eq!(inflated.retries_left, 1);
        assert_eq!(inflated.delay, Duration::from_millis(10));
    }
}
