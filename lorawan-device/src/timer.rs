//! Time abstraction for the synchronous dispatcher.
//!
//! The `nb`-style state machine this crate follows never awaits a timer directly: the caller
//! owns the clock and tells the dispatcher when a previously-armed deadline fires via
//! [`crate::dispatcher::Event::TimerFired`]. This
//! trait exists only so `MacCore` can read the current time to compute absolute deadlines and
//! duty-cycle off-time windows without hard-coding a clock source.
pub trait TimeService {
    /// Milliseconds since an arbitrary, caller-chosen epoch. Must be monotonically
    /// non-decreasing for the duration of the device's operation.
    fn now_ms(&self) -> u64;
}
