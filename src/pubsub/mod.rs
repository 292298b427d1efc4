//! Publish/Subscribe Subscription Protocol
//!
//! Implements the RPC-based negotiation by which a subscriber discovers,
//! probes and registers interest with remote publishers.
//!
//! ## Protocol
//! All calls are unicast request/response over the cluster transport with a
//! bounded timeout. A timeout or transport failure is treated exactly like
//! an application-level rejection — nothing on this path ever crashes the
//! caller.
//! - **Probe**: health/identity exchange. The callee records the caller's
//!   endpoint and replies with its own endpoint annotated with the current
//!   aggregate status.
//! - **RequestSubscription**: accepted only when the requester is inside the
//!   channel's configured scope and the publisher's aggregate is
//!   operational; otherwise declined with a commentary string.
//! - **RegisterPublisher**: a publisher announces itself; the callee records
//!   (or returns the existing) publisher registration.
//!
//! ## Convergence
//! `perform_full_subscription_check` walks every subscription registration
//! against every known publisher and issues subscription requests where
//! state allows. The convergence daemon re-runs it until the registries have
//! been stable for a configured number of consecutive ticks, then stops;
//! any membership addition re-arms it.

pub mod coordinator;
pub mod types;
