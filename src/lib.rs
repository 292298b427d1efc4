//! Petasos — Distributed Task-Processing Substrate
//!
//! This library crate implements the coordination core of a clustered
//! service mesh: it discovers peer processing nodes over a group
//! communication membership protocol, negotiates publish/subscribe
//! relationships between producers and consumers, tracks the health of
//! every node's communication endpoints, and drives work units (tasks)
//! from ingress through fulfillment to completion. It is embedded in a
//! long-running service process; there is no CLI.
//!
//! ## Architecture Modules
//! The system is composed of loosely coupled subsystems:
//!
//! - **`transport`**: The group-communication seam. A narrow
//!   `ClusterTransport` trait (view callback + unicast RPC with timeout)
//!   with a UDP gossip implementation and an in-memory hub for tests.
//! - **`membership`**: View tracking and address resolution. Diffs every
//!   membership view into added/removed members and resolves logical
//!   `service(instance-uuid)` names against the current snapshot.
//! - **`endpoint`**: Per-subsystem endpoint health. Table-driven status
//!   aggregation plus the startup and ongoing watchdog state machines.
//! - **`pubsub`**: The subscription protocol. Probe, subscription
//!   negotiation and publisher registration RPCs, with a convergence
//!   daemon that re-attempts pending subscriptions until stable.
//! - **`task`**: The task lifecycle. Actionable/fulfillment/aggregate
//!   tasks, partial-update merge semantics and per-slot execution
//!   privilege arbitration.
//! - **`metrics`**: Counters and operator notification forwarding with
//!   at-least-once drain semantics.
//! - **`plant`**: Explicit constructor wiring of one node.

pub mod config;
pub mod endpoint;
pub mod membership;
pub mod metrics;
pub mod naming;
pub mod plant;
pub mod pubsub;
pub mod task;
pub mod transport;

pub use config::PetasosConfig;
pub use plant::ProcessingPlant;
