//! Task Lifecycle
//!
//! The task family and the controller that drives it:
//!
//! - **ActionableTask**: the logical unit of work as triggered at a system
//!   boundary, independent of which local process executes it.
//! - **FulfillmentTask**: one concrete local execution attempt against an
//!   actionable task (more than one only on retry).
//! - **AggregateTask**: a task composed of multiple actionable tasks
//!   (fan-out/fan-in).
//!
//! Every mutable task field is an `Option` with a `has_*` predicate —
//! absence is distinct from default — which is what makes the partial-update
//! merge in [`controller::TaskLifecycleController::update_actionable_task`]
//! safe: distributed partial views of the same task reconcile without
//! clobbering concurrently written fields.
//!
//! Tasks are owned state: all mutation goes through the controller, which
//! serializes writers per task while leaving other tasks untouched. There
//! are no per-field lock objects.

pub mod controller;
pub mod types;

#[cfg(test)]
mod tests;
