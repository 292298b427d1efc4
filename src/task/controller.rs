//! Task Lifecycle Controller
//!
//! Creates and transitions actionable/fulfillment/aggregate tasks, and
//! arbitrates execution privilege per work-unit-processor slot.
//!
//! ## State machines
//! - ActionableTask: `created(unregistered) -> registered ->
//!   fulfillment-tracked -> {finished | failed} -> finalised`.
//! - FulfillmentTask: `created -> executionRequested -> {granted: executing
//!   -> finished|failed ; denied: failed}`.
//!
//! ## Arbitration
//! At most one fulfillment task executes per slot at any instant. The grant
//! is a single atomic insert into the slot table; everything racing behind
//! it is denied. A denial is not retried here — that is the caller's call.

use anyhow::Result;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use super::types::{
    ActionableTask, AggregateTask, AggregateTaskReport, FulfillmentExecStatus, FulfillmentTask,
    PetasosTask, TaskCompletionSummary, TaskFulfillment, TaskIdType, TaskJobCard,
    TaskOutcomeStatus, TaskReason, TaskType,
};
use crate::metrics::agent::{now_ms, MetricsAgent};

/// Result of execution-privilege arbitration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPrivilege {
    Granted,
    Denied,
}

/// Owns every task on this node. All mutation flows through here.
pub struct TaskLifecycleController {
    component_id: String,
    actionable_tasks: DashMap<TaskIdType, ActionableTask>,
    fulfillment_tasks: DashMap<TaskIdType, FulfillmentTask>,
    aggregate_tasks: DashMap<TaskIdType, AggregateTask>,
    /// Slot -> id of the fulfillment task currently granted execution.
    execution_slots: DashMap<String, TaskIdType>,
    metrics: Arc<MetricsAgent>,
}

impl TaskLifecycleController {
    pub fn new(component_id: &str, metrics: Arc<MetricsAgent>) -> Arc<Self> {
        Arc::new(Self {
            component_id: component_id.to_string(),
            actionable_tasks: DashMap::new(),
            fulfillment_tasks: DashMap::new(),
            aggregate_tasks: DashMap::new(),
            execution_slots: DashMap::new(),
            metrics,
        })
    }

    // --------------------------------------------------------
    // Actionable tasks
    // --------------------------------------------------------

    /// Registers an actionable task, assigning an identity if it has none.
    /// Idempotent: re-registering an already registered task returns its id
    /// without recreating it.
    pub fn register_actionable_task(&self, mut task: ActionableTask) -> TaskIdType {
        let id = match &task.base.id {
            Some(id) => id.clone(),
            None => {
                let id = TaskIdType::new();
                task.base.id = Some(id.clone());
                id
            }
        };

        if let Some(existing) = self.actionable_tasks.get(&id) {
            if existing.base.registered {
                tracing::debug!("Task {} already registered", id.0);
                return id;
            }
        }

        task.base.registered = true;
        if task.base.task_type.is_none() {
            task.base.task_type = Some(TaskType::Actionable);
        }
        if task.base.outcome_status.is_none() {
            task.base.outcome_status = Some(TaskOutcomeStatus::Waiting);
        }

        tracing::info!("Registered actionable task {}", id.0);
        self.metrics
            .increment(&self.component_id, "actionable-tasks-registered");
        self.actionable_tasks.insert(id.clone(), task);
        id
    }

    /// Reconciles an incoming (possibly partial) view of an actionable task
    /// into the local one. Unknown tasks are adopted as-is.
    pub fn update_actionable_task(&self, incoming: &ActionableTask) -> Result<ActionableTask> {
        let id = incoming
            .base
            .id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Incoming task has no id"))?;

        match self.actionable_tasks.entry(id) {
            Entry::Occupied(mut existing) => {
                existing.get_mut().merge_from(incoming);
                Ok(existing.get().clone())
            }
            Entry::Vacant(vacant) => {
                vacant.insert(incoming.clone());
                Ok(incoming.clone())
            }
        }
    }

    /// Marks an actionable task finalised: the end of its lifecycle.
    pub fn finalise_actionable_task(&self, actionable_task_id: &TaskIdType) -> Result<()> {
        let mut actionable = self
            .actionable_tasks
            .get_mut(actionable_task_id)
            .ok_or_else(|| anyhow::anyhow!("Unknown actionable task {}", actionable_task_id.0))?;

        actionable.base.outcome_status = Some(TaskOutcomeStatus::Finalised);
        let summary = actionable
            .completion_summary
            .get_or_insert_with(TaskCompletionSummary::default);
        summary.finalised = true;
        if let Some(fulfillment) = &mut actionable.fulfillment {
            fulfillment.finalisation_instant_ms = Some(now_ms());
        }

        self.metrics
            .increment(&self.component_id, "actionable-tasks-finalised");
        Ok(())
    }

    // --------------------------------------------------------
    // Fulfillment tasks
    // --------------------------------------------------------

    /// Derives a fulfillment task for one execution attempt. The actionable
    /// task is updated in place to track the attempt; a second derivation
    /// for the same actionable task is a retry.
    pub fn create_fulfillment_task(
        &self,
        actionable_task_id: &TaskIdType,
        executor_component: &str,
    ) -> Result<FulfillmentTask> {
        let mut actionable = self
            .actionable_tasks
            .get_mut(actionable_task_id)
            .ok_or_else(|| anyhow::anyhow!("Unknown actionable task {}", actionable_task_id.0))?;

        let is_retry = actionable
            .fulfillment
            .as_ref()
            .and_then(|fulfillment| fulfillment.tracking_id.as_ref())
            .is_some();

        let fulfillment_id = TaskIdType::new();
        let task = FulfillmentTask {
            base: PetasosTask {
                id: Some(fulfillment_id.clone()),
                task_type: Some(TaskType::Fulfillment),
                work_item: actionable.base.work_item.clone(),
                traceability: actionable.base.traceability.clone(),
                outcome_status: Some(TaskOutcomeStatus::Waiting),
                performer_types: actionable.base.performer_types.clone(),
                reason: if is_retry {
                    Some(TaskReason::Retry)
                } else {
                    actionable.base.reason
                },
                node_affinity: actionable.base.node_affinity.clone(),
                sub_tasks: None,
                registered: true,
            },
            job_card: Some(TaskJobCard {
                requested_status: Some(FulfillmentExecStatus::Registered),
                granted_status: None,
                execution_slot: Some(executor_component.to_string()),
                updated_at_ms: now_ms(),
            }),
            actionable_task_id: Some(actionable_task_id.clone()),
            is_retry,
        };

        actionable.fulfillment = Some(TaskFulfillment {
            fulfiller_component_id: Some(executor_component.to_string()),
            ready_instant_ms: Some(now_ms()),
            start_instant_ms: None,
            finish_instant_ms: None,
            finalisation_instant_ms: None,
            tracking_id: Some(fulfillment_id.clone()),
            status: Some(FulfillmentExecStatus::Registered),
        });
        drop(actionable);

        tracing::info!(
            "Created fulfillment task {} for actionable {} (retry: {})",
            fulfillment_id.0,
            actionable_task_id.0,
            is_retry
        );
        self.metrics
            .increment(&self.component_id, "fulfillment-tasks-created");
        self.fulfillment_tasks.insert(fulfillment_id, task.clone());
        Ok(task)
    }

    /// Reconciles an incoming partial view of a fulfillment task.
    pub fn update_fulfillment_task(&self, incoming: &FulfillmentTask) -> Result<FulfillmentTask> {
        let id = incoming
            .base
            .id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Incoming task has no id"))?;

        match self.fulfillment_tasks.entry(id) {
            Entry::Occupied(mut existing) => {
                existing.get_mut().merge_from(incoming);
                Ok(existing.get().clone())
            }
            Entry::Vacant(vacant) => {
                vacant.insert(incoming.clone());
                Ok(incoming.clone())
            }
        }
    }

    /// Single-writer arbitration for the task's execution slot.
    ///
    /// The slot table insert is atomic, so at most one fulfillment task per
    /// slot holds a grant at any instant. A denial moves the attempt to
    /// `Failed`; retrying is the caller's decision.
    pub fn request_execution_privilege(
        &self,
        fulfillment_task_id: &TaskIdType,
    ) -> Result<ExecutionPrivilege> {
        let slot = {
            let task = self
                .fulfillment_tasks
                .get(fulfillment_task_id)
                .ok_or_else(|| {
                    anyhow::anyhow!("Unknown fulfillment task {}", fulfillment_task_id.0)
                })?;
            task.job_card
                .as_ref()
                .and_then(|card| card.execution_slot.clone())
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "Fulfillment task {} has no execution slot",
                        fulfillment_task_id.0
                    )
                })?
        };

        let granted = match self.execution_slots.entry(slot.clone()) {
            Entry::Occupied(occupied) => occupied.get() == fulfillment_task_id,
            Entry::Vacant(vacant) => {
                vacant.insert(fulfillment_task_id.clone());
                true
            }
        };

        if granted {
            tracing::debug!(
                "Execution privilege granted to {} in slot {}",
                fulfillment_task_id.0,
                slot
            );
            self.metrics
                .increment(&self.component_id, "execution-privileges-granted");
            self.apply_grant(fulfillment_task_id);
            Ok(ExecutionPrivilege::Granted)
        } else {
            tracing::info!(
                "Execution privilege denied to {}: slot {} is busy",
                fulfillment_task_id.0,
                slot
            );
            self.metrics
                .increment(&self.component_id, "execution-privileges-denied");
            self.apply_denial(fulfillment_task_id);
            Ok(ExecutionPrivilege::Denied)
        }
    }

    fn apply_grant(&self, fulfillment_task_id: &TaskIdType) {
        let started_at = now_ms();
        let actionable_task_id = {
            let mut task = match self.fulfillment_tasks.get_mut(fulfillment_task_id) {
                Some(task) => task,
                None => return,
            };
            task.base.outcome_status = Some(TaskOutcomeStatus::Active);
            if let Some(card) = &mut task.job_card {
                card.requested_status = Some(FulfillmentExecStatus::ExecutionRequested);
                card.granted_status = Some(FulfillmentExecStatus::Executing);
                card.updated_at_ms = started_at;
            }
            task.actionable_task_id.clone()
        };

        self.with_tracked_fulfillment(actionable_task_id, fulfillment_task_id, |fulfillment| {
            fulfillment.status = Some(FulfillmentExecStatus::Executing);
            fulfillment.start_instant_ms = Some(started_at);
        });
    }

    fn apply_denial(&self, fulfillment_task_id: &TaskIdType) {
        let actionable_task_id = {
            let mut task = match self.fulfillment_tasks.get_mut(fulfillment_task_id) {
                Some(task) => task,
                None => return,
            };
            task.base.outcome_status = Some(TaskOutcomeStatus::Failed);
            if let Some(card) = &mut task.job_card {
                card.requested_status = Some(FulfillmentExecStatus::ExecutionRequested);
                card.granted_status = Some(FulfillmentExecStatus::Failed);
                card.updated_at_ms = now_ms();
            }
            task.actionable_task_id.clone()
        };

        self.with_tracked_fulfillment(actionable_task_id, fulfillment_task_id, |fulfillment| {
            fulfillment.status = Some(FulfillmentExecStatus::Failed);
        });
    }

    /// Completes an execution attempt successfully, releasing the slot and
    /// correlating back to the owning actionable task.
    pub fn notify_execution_finish(&self, fulfillment_task_id: &TaskIdType) -> Result<()> {
        self.conclude_execution(fulfillment_task_id, TaskOutcomeStatus::Finished, None)
    }

    /// Records a failed execution attempt, releasing the slot and
    /// correlating back to the owning actionable task.
    pub fn notify_execution_failure(
        &self,
        fulfillment_task_id: &TaskIdType,
        reason: &str,
    ) -> Result<()> {
        self.conclude_execution(
            fulfillment_task_id,
            TaskOutcomeStatus::Failed,
            Some(reason.to_string()),
        )
    }

    fn conclude_execution(
        &self,
        fulfillment_task_id: &TaskIdType,
        outcome: TaskOutcomeStatus,
        failure_reason: Option<String>,
    ) -> Result<()> {
        let finished_at = now_ms();
        let exec_status = match outcome {
            TaskOutcomeStatus::Finished => FulfillmentExecStatus::Finished,
            _ => FulfillmentExecStatus::Failed,
        };

        let (actionable_task_id, slot) = {
            let mut task = self
                .fulfillment_tasks
                .get_mut(fulfillment_task_id)
                .ok_or_else(|| {
                    anyhow::anyhow!("Unknown fulfillment task {}", fulfillment_task_id.0)
                })?;

            task.base.outcome_status = Some(outcome);
            if let Some(reason) = &failure_reason {
                let work_item = task.base.work_item.get_or_insert_with(Default::default);
                work_item.outcome = Some(serde_json::json!({ "error": reason }));
            }
            if let Some(card) = &mut task.job_card {
                card.granted_status = Some(exec_status);
                card.updated_at_ms = finished_at;
            }

            let slot = task
                .job_card
                .as_ref()
                .and_then(|card| card.execution_slot.clone());
            (task.actionable_task_id.clone(), slot)
        };

        // Free the slot for the next attempt.
        if let Some(slot) = slot {
            self.execution_slots
                .remove_if(&slot, |_, holder| holder == fulfillment_task_id);
        }

        if let Some(actionable_task_id) = &actionable_task_id {
            if let Some(mut actionable) = self.actionable_tasks.get_mut(actionable_task_id) {
                if let Some(fulfillment) = &mut actionable.fulfillment {
                    if fulfillment.tracking_id.as_ref() == Some(fulfillment_task_id) {
                        fulfillment.status = Some(exec_status);
                        fulfillment.finish_instant_ms = Some(finished_at);
                    }
                }
                actionable.base.outcome_status = Some(outcome);
                actionable
                    .completion_summary
                    .get_or_insert_with(TaskCompletionSummary::default);
            }
        }

        let counter = match outcome {
            TaskOutcomeStatus::Finished => "executions-finished",
            _ => "executions-failed",
        };
        self.metrics.increment(&self.component_id, counter);
        tracing::info!(
            "Fulfillment task {} concluded with {:?}",
            fulfillment_task_id.0,
            outcome
        );
        Ok(())
    }

    fn with_tracked_fulfillment<F>(
        &self,
        actionable_task_id: Option<TaskIdType>,
        fulfillment_task_id: &TaskIdType,
        apply: F,
    ) where
        F: FnOnce(&mut TaskFulfillment),
    {
        let Some(actionable_task_id) = actionable_task_id else {
            return;
        };
        let Some(mut actionable) = self.actionable_tasks.get_mut(&actionable_task_id) else {
            return;
        };
        if let Some(fulfillment) = &mut actionable.fulfillment {
            if fulfillment.tracking_id.as_ref() == Some(fulfillment_task_id) {
                apply(fulfillment);
            }
        }
    }

    // --------------------------------------------------------
    // Aggregate tasks
    // --------------------------------------------------------

    /// Creates an aggregate over a set of actionable task ids.
    pub fn create_aggregate_task(&self, sub_task_ids: Vec<TaskIdType>) -> TaskIdType {
        let id = TaskIdType::new();
        let task = AggregateTask {
            base: PetasosTask {
                id: Some(id.clone()),
                task_type: Some(TaskType::Aggregate),
                outcome_status: Some(TaskOutcomeStatus::Waiting),
                registered: true,
                ..PetasosTask::default()
            },
            sub_task_ids: sub_task_ids.into_iter().collect(),
            aggregate_status: Some(TaskOutcomeStatus::Waiting),
            report: None,
        };
        self.aggregate_tasks.insert(id.clone(), task);
        self.metrics
            .increment(&self.component_id, "aggregate-tasks-created");
        id
    }

    pub fn add_sub_task(
        &self,
        aggregate_task_id: &TaskIdType,
        sub_task_id: TaskIdType,
    ) -> Result<()> {
        let mut aggregate = self
            .aggregate_tasks
            .get_mut(aggregate_task_id)
            .ok_or_else(|| anyhow::anyhow!("Unknown aggregate task {}", aggregate_task_id.0))?;
        aggregate.sub_task_ids.insert(sub_task_id);
        Ok(())
    }

    /// Re-derives the aggregate's status and report from its constituents:
    /// any failed sub-task fails the aggregate; it finishes only when every
    /// sub-task has finished.
    pub fn refresh_aggregate_status(
        &self,
        aggregate_task_id: &TaskIdType,
    ) -> Result<TaskOutcomeStatus> {
        let sub_task_ids: Vec<TaskIdType> = {
            let aggregate = self
                .aggregate_tasks
                .get(aggregate_task_id)
                .ok_or_else(|| anyhow::anyhow!("Unknown aggregate task {}", aggregate_task_id.0))?;
            aggregate.sub_task_ids.iter().cloned().collect()
        };

        let mut succeeded = 0u32;
        let mut failed = 0u32;
        let mut unsettled = 0u32;
        for sub_task_id in &sub_task_ids {
            let status = self
                .actionable_tasks
                .get(sub_task_id)
                .and_then(|task| task.base.outcome_status);
            match status {
                Some(TaskOutcomeStatus::Finished) | Some(TaskOutcomeStatus::Finalised) => {
                    succeeded += 1
                }
                Some(TaskOutcomeStatus::Failed) => failed += 1,
                _ => unsettled += 1,
            }
        }

        let status = if failed > 0 {
            TaskOutcomeStatus::Failed
        } else if unsettled > 0 {
            TaskOutcomeStatus::Active
        } else {
            TaskOutcomeStatus::Finished
        };

        let mut aggregate = self
            .aggregate_tasks
            .get_mut(aggregate_task_id)
            .ok_or_else(|| anyhow::anyhow!("Unknown aggregate task {}", aggregate_task_id.0))?;
        aggregate.aggregate_status = Some(status);
        aggregate.base.outcome_status = Some(status);
        aggregate.report = Some(AggregateTaskReport {
            succeeded,
            failed,
            commentary: None,
        });
        Ok(status)
    }

    // --------------------------------------------------------
    // Lookup
    // --------------------------------------------------------

    pub fn actionable_task(&self, id: &TaskIdType) -> Option<ActionableTask> {
        self.actionable_tasks.get(id).map(|task| task.clone())
    }

    pub fn fulfillment_task(&self, id: &TaskIdType) -> Option<FulfillmentTask> {
        self.fulfillment_tasks.get(id).map(|task| task.clone())
    }

    pub fn aggregate_task(&self, id: &TaskIdType) -> Option<AggregateTask> {
        self.aggregate_tasks.get(id).map(|task| task.clone())
    }

    /// The fulfillment task currently granted execution in `slot`, if any.
    pub fn slot_holder(&self, slot: &str) -> Option<TaskIdType> {
        self.execution_slots.get(slot).map(|holder| holder.clone())
    }

    pub fn actionable_task_count(&self) -> usize {
        self.actionable_tasks.len()
    }
}
