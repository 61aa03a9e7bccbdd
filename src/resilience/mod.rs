//! # Resilience Module
//!
//! Retry budgeting for processors that signal a retryable failure.
//!
//! ## Usage
//!
//! ```rust
//! use external_task_handler::resilience::next_retry;
//! use std::time::Duration;
//!
//! let backoff = [Duration::from_secs(1), Duration::from_secs(2)];
//!
//! // First failure of a task allowed three attempts in total
//! let decision = next_retry(3, None, &backoff);
//! assert_eq!(decision.retries_left, 2);
//! assert_eq!(decision.delay, Duration::from_secs(1));
//! ```

pub mod retry_policy;

pub use retry_policy::{delay_for_attempt, next_retry, RetryDecision};
