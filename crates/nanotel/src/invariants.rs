//! Debug assertion macros for telemetry pipeline invariants.
//!
//! Only active in debug builds (`#[cfg(debug_assertions)]`), so there is
//! zero overhead in release builds.

// =============================================================================
// INV-SPAN-01: Monotonic Span Duration
// =============================================================================

/// Assert that a finalized span does not end before it starts.
///
/// **Invariant**: `end_time_unix_nano >= start_time_unix_nano`
///
/// Used in: `OpenSpan::finish()`
macro_rules! debug_assert_span_ordered {
    ($start:expr, $end:expr) => {
        debug_assert!(
            $end >= $start,
            "INV-SPAN-01 violated: span ends at {} before it starts at {}",
            $end,
            $start
        )
    };
}

// =============================================================================
// INV-SPAN-02: Settle Exactly Once
// =============================================================================

/// Assert that a traced call is settled from the running state only.
///
/// **Invariant**: `Pending → Running → Settled → Enqueued`, no repeats
///
/// Used in: `TracedCall::settle()`
macro_rules! debug_assert_settled_once {
    ($state:expr) => {
        debug_assert!(
            matches!($state, $crate::trace::CallState::Running),
            "INV-SPAN-02 violated: settling a call in state {:?}",
            $state
        )
    };
}

// =============================================================================
// INV-SCHED-01: Single Timer Per Channel
// =============================================================================

/// Assert that arming a timer never replaces a live one.
///
/// **Invariant**: at most one pending flush timer per channel
///
/// Used in: `Client::apply()`
macro_rules! debug_assert_single_timer {
    ($channel:expr, $existing:expr) => {
        debug_assert!(
            $existing.as_ref().map_or(true, |handle| handle.is_finished()),
            "INV-SCHED-01 violated: {:?} channel already has a pending timer",
            $channel
        )
    };
}

// =============================================================================
// INV-QUEUE-01: Drain Is Lossless
// =============================================================================

/// Assert that a drain split the buffer without losing or duplicating events.
///
/// **Invariant**: `before == drained + kept`
///
/// Used in: `EventQueue::drain()`
macro_rules! debug_assert_drain_conserves {
    ($before:expr, $drained:expr, $kept:expr) => {
        debug_assert_eq!(
            $before,
            $drained + $kept,
            "INV-QUEUE-01 violated: drained {} + kept {} != buffered {}",
            $drained,
            $kept,
            $before
        )
    };
}

// =============================================================================
// Re-exports for crate-internal use
// =============================================================================

pub(crate) use debug_assert_drain_conserves;
pub(crate) use debug_assert_settled_once;
pub(crate) use debug_assert_single_timer;
pub(crate) use debug_assert_span_ordered;
