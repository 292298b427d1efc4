//! Endpoint Status & Watchdogs
//!
//! Every subsystem owns a small set of typed communication endpoints
//! (messaging, topology, subscriptions, ...). This module tracks their
//! health and aggregates it into one subsystem-wide operational state.
//!
//! ## Core Mechanisms
//! - **Aggregation** (`aggregation`): a table-driven resolution of many
//!   endpoint statuses into one aggregate, order-independent by
//!   construction.
//! - **Startup watchdog** (`watchdog`): ticks from process start until the
//!   aggregate is operational and the minimum viable endpoint set is
//!   present, or the startup ceiling is hit (terminal failure).
//! - **Ongoing watchdog** (`watchdog`): steady-state re-derivation of the
//!   aggregate each tick, with a bounded tolerance for consecutive suspect
//!   resolutions.

pub mod aggregation;
pub mod types;
pub mod watchdog;

#[cfg(test)]
mod tests;
