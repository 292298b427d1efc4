//! Membership Tracking & Address Resolution
//!
//! Sits directly on top of the cluster transport's view callback and turns
//! raw member views into usable facts:
//!
//! - **`tracker`**: keeps the previous/current view snapshots, computes the
//!   added/removed delta on every view change and fans it out to registered
//!   listeners. Runs on the transport callback path, so it never blocks.
//! - **`resolver`**: pure lookups over the current snapshot — exact logical
//!   name, first instance of a service, scope-qualified "contains" matches,
//!   and everyone-but-me.
//! - **`types`**: the transient [`types::MemberAddress`] carried in views.

pub mod resolver;
pub mod tracker;
pub mod types;

#[cfg(test)]
mod tests;
