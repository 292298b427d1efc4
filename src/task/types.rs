use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::metrics::agent::now_ms;

/// Unique identifier for a task within the cluster.
///
/// Wrapper around a UUID string so ids stay globally unique across nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskIdType(pub String);

impl TaskIdType {
    /// Generates a new random UUID v4-based id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskType {
    Actionable,
    Fulfillment,
    Aggregate,
}

/// Outcome of a task as a whole.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskOutcomeStatus {
    Waiting,
    Active,
    Finished,
    Failed,
    Finalised,
}

/// Execution state of one fulfillment attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FulfillmentExecStatus {
    Registered,
    ExecutionRequested,
    Executing,
    Finished,
    Failed,
}

/// The payload a task carries in and the outcome it produces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TaskWorkItem {
    pub payload: Option<serde_json::Value>,
    pub outcome: Option<serde_json::Value>,
}

impl TaskWorkItem {
    pub fn from_payload(payload: serde_json::Value) -> Self {
        Self {
            payload: Some(payload),
            outcome: None,
        }
    }

    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    pub fn has_outcome(&self) -> bool {
        self.outcome.is_some()
    }
}

/// One hop in a task's journey through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TraceabilityEntry {
    pub component_id: String,
    pub action: String,
    pub instant_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TaskTraceability {
    pub journey: Vec<TraceabilityEntry>,
}

impl TaskTraceability {
    pub fn add_hop(&mut self, component_id: &str, action: &str) {
        self.journey.push(TraceabilityEntry {
            component_id: component_id.to_string(),
            action: action.to_string(),
            instant_ms: now_ms(),
        });
    }
}

/// Why the task exists.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskReason {
    Event,
    Schedule,
    Retry,
}

/// Preferred executor for the task, when the triggering boundary cares.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskNodeAffinity {
    pub participant_name: String,
}

/// Common base of every task variant.
///
/// Each mutable field is optional with an explicit `has_*` predicate:
/// absence is distinct from default, and only populated fields survive a
/// merge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PetasosTask {
    pub id: Option<TaskIdType>,
    pub task_type: Option<TaskType>,
    pub work_item: Option<TaskWorkItem>,
    pub traceability: Option<TaskTraceability>,
    pub outcome_status: Option<TaskOutcomeStatus>,
    pub performer_types: Option<Vec<String>>,
    pub reason: Option<TaskReason>,
    pub node_affinity: Option<TaskNodeAffinity>,
    pub sub_tasks: Option<BTreeMap<String, TaskIdType>>,
    pub registered: bool,
}

impl PetasosTask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_id(&self) -> bool {
        self.id.is_some()
    }
    pub fn has_task_type(&self) -> bool {
        self.task_type.is_some()
    }
    pub fn has_work_item(&self) -> bool {
        self.work_item.is_some()
    }
    pub fn has_traceability(&self) -> bool {
        self.traceability.is_some()
    }
    pub fn has_outcome_status(&self) -> bool {
        self.outcome_status.is_some()
    }
    pub fn has_performer_types(&self) -> bool {
        self.performer_types.is_some()
    }
    pub fn has_reason(&self) -> bool {
        self.reason.is_some()
    }
    pub fn has_node_affinity(&self) -> bool {
        self.node_affinity.is_some()
    }
    pub fn has_sub_tasks(&self) -> bool {
        self.sub_tasks.is_some()
    }

    /// Field-by-field merge: a field is overwritten only when the incoming
    /// side has it populated. A task never becomes unregistered through a
    /// merge.
    pub fn merge_from(&mut self, incoming: &PetasosTask) {
        if incoming.has_id() {
            self.id = incoming.id.clone();
        }
        if incoming.has_task_type() {
            self.task_type = incoming.task_type;
        }
        if incoming.has_work_item() {
            self.work_item = incoming.work_item.clone();
        }
        if incoming.has_traceability() {
            self.traceability = incoming.traceability.clone();
        }
        if incoming.has_outcome_status() {
            self.outcome_status = incoming.outcome_status;
        }
        if incoming.has_performer_types() {
            self.performer_types = incoming.performer_types.clone();
        }
        if incoming.has_reason() {
            self.reason = incoming.reason;
        }
        if incoming.has_node_affinity() {
            self.node_affinity = incoming.node_affinity.clone();
        }
        if incoming.has_sub_tasks() {
            self.sub_tasks = incoming.sub_tasks.clone();
        }
        if incoming.registered {
            self.registered = true;
        }
    }
}

/// Record of who is fulfilling an actionable task and how far along the
/// attempt is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TaskFulfillment {
    pub fulfiller_component_id: Option<String>,
    pub ready_instant_ms: Option<u64>,
    pub start_instant_ms: Option<u64>,
    pub finish_instant_ms: Option<u64>,
    pub finalisation_instant_ms: Option<u64>,
    /// Id of the fulfillment task executing this attempt.
    pub tracking_id: Option<TaskIdType>,
    pub status: Option<FulfillmentExecStatus>,
}

/// Where the task ended up once its chain completed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TaskCompletionSummary {
    pub finalised: bool,
    pub last_in_chain: bool,
    /// Downstream tasks spawned from this one, keyed by participant name.
    pub downstream: BTreeMap<String, TaskIdType>,
}

/// The logical unit of work as seen by the triggering boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ActionableTask {
    pub base: PetasosTask,
    pub fulfillment: Option<TaskFulfillment>,
    pub completion_summary: Option<TaskCompletionSummary>,
}

impl ActionableTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a fresh actionable task from an ingress payload.
    pub fn from_ingress(payload: serde_json::Value, reason: TaskReason) -> Self {
        Self {
            base: PetasosTask {
                task_type: Some(TaskType::Actionable),
                work_item: Some(TaskWorkItem::from_payload(payload)),
                outcome_status: Some(TaskOutcomeStatus::Waiting),
                reason: Some(reason),
                ..PetasosTask::default()
            },
            fulfillment: None,
            completion_summary: None,
        }
    }

    pub fn has_fulfillment(&self) -> bool {
        self.fulfillment.is_some()
    }

    pub fn has_completion_summary(&self) -> bool {
        self.completion_summary.is_some()
    }

    /// Merge with the same only-if-populated rule as the base task.
    pub fn merge_from(&mut self, incoming: &ActionableTask) {
        self.base.merge_from(&incoming.base);
        if incoming.has_fulfillment() {
            self.fulfillment = incoming.fulfillment.clone();
        }
        if incoming.has_completion_summary() {
            self.completion_summary = incoming.completion_summary.clone();
        }
    }
}

/// Requested vs granted execution state for one fulfillment attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskJobCard {
    pub requested_status: Option<FulfillmentExecStatus>,
    pub granted_status: Option<FulfillmentExecStatus>,
    /// The work-unit-processor slot the attempt executes in.
    pub execution_slot: Option<String>,
    pub updated_at_ms: u64,
}

/// One concrete local execution attempt against an actionable task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FulfillmentTask {
    pub base: PetasosTask,
    pub job_card: Option<TaskJobCard>,
    pub actionable_task_id: Option<TaskIdType>,
    pub is_retry: bool,
}

impl FulfillmentTask {
    pub fn has_job_card(&self) -> bool {
        self.job_card.is_some()
    }

    pub fn merge_from(&mut self, incoming: &FulfillmentTask) {
        self.base.merge_from(&incoming.base);
        if incoming.has_job_card() {
            self.job_card = incoming.job_card.clone();
        }
        if incoming.actionable_task_id.is_some() {
            self.actionable_task_id = incoming.actionable_task_id.clone();
        }
        if incoming.is_retry {
            self.is_retry = true;
        }
    }
}

/// Rollup produced when an aggregate's constituents settle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AggregateTaskReport {
    pub succeeded: u32,
    pub failed: u32,
    pub commentary: Option<String>,
}

/// A task composed of multiple actionable tasks (fan-out/fan-in).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AggregateTask {
    pub base: PetasosTask,
    pub sub_task_ids: BTreeSet<TaskIdType>,
    pub aggregate_status: Option<TaskOutcomeStatus>,
    pub report: Option<AggregateTaskReport>,
}
