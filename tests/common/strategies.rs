//! Property-based testing strategies
//!
//! Generators for retry budgets, backoff sequences and registration keys.

#![allow(dead_code)]

use proptest::prelude::*;
use std::time::Duration;

/// Total attempt budgets, including the degenerate zero budget
pub fn max_attempts_strategy() -> impl Strategy<Value = u32> {
    prop_oneof![
        Just(0u32),
        Just(1u32),
        2u32..=10,
        11u32..=1_000,
    ]
}

/// Retries value the engine may hold for a task, including out-of-range ones
pub fn retries_left_strategy() -> impl Strategy<Value = Option<u32>> {
    prop_oneof![Just(None), (0u32..=1_000).prop_map(Some), any::<u32>().prop_map(Some)]
}

/// Backoff sequences of millisecond delays, possibly empty
pub fn backoff_sequence_strategy() -> impl Strategy<Value = Vec<Duration>> {
    prop::collection::vec((1u64..=600_000).prop_map(Duration::from_millis), 0..=6)
}

/// Definition keys and topics accepted by registration
pub fn registration_part_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9_.-]{0,31}"
}

/// Keys or topics that contain the separator somewhere
pub fn separator_part_strategy() -> impl Strategy<Value = String> {
    ("[a-z]{0,8}", "[a-z]{0,8}").prop_map(|(head, tail)| format!("{head}#{tail}"))
}
