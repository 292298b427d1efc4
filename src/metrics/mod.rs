//! Metrics & Notification Forwarding
//!
//! The narrow reporting interface the state machines depend on:
//!
//! - **`agent`**: per-component counters (`increment`) and last-activity
//!   instants (`touch_instant`), keyed by component id.
//! - **`notifications`**: operator-facing messages queued by producers
//!   without blocking and drained by a single forwarding daemon per tick.
//!   Items that fail to forward are re-enqueued (at-least-once; no dedup
//!   across restarts).

pub mod agent;
pub mod notifications;

#[cfg(test)]
mod tests;
