//! Task Module Tests
//!
//! Validates registration idempotence, the partial-update merge semantics,
//! execution-privilege arbitration (including a concurrent race) and the
//! finish/failure correlation back to the owning actionable task.

use std::sync::Arc;

use super::controller::{ExecutionPrivilege, TaskLifecycleController};
use super::types::{
    ActionableTask, FulfillmentExecStatus, PetasosTask, TaskIdType, TaskOutcomeStatus, TaskReason,
    TaskWorkItem,
};
use crate::metrics::agent::MetricsAgent;

fn controller() -> Arc<TaskLifecycleController> {
    TaskLifecycleController::new("test-wup", MetricsAgent::new())
}

fn ingress_task() -> ActionableTask {
    ActionableTask::from_ingress(
        serde_json::json!({"message": "hello"}),
        TaskReason::Event,
    )
}

// ============================================================
// REGISTRATION
// ============================================================

#[test]
fn test_register_assigns_identity_and_marks_registered() {
    let controller = controller();

    let id = controller.register_actionable_task(ingress_task());

    let task = controller.actionable_task(&id).expect("Task missing");
    assert!(task.base.registered);
    assert_eq!(task.base.id, Some(id));
    assert_eq!(task.base.outcome_status, Some(TaskOutcomeStatus::Waiting));
}

#[test]
fn test_register_is_idempotent() {
    let controller = controller();

    let id = controller.register_actionable_task(ingress_task());
    // Track a fulfillment so re-registration would visibly clobber state.
    controller
        .create_fulfillment_task(&id, "wup-slot-1")
        .expect("Fulfillment creation failed");

    let mut again = ingress_task();
    again.base.id = Some(id.clone());
    let second_id = controller.register_actionable_task(again);

    assert_eq!(second_id, id);
    assert_eq!(controller.actionable_task_count(), 1);
    let task = controller.actionable_task(&id).expect("Task missing");
    assert!(task.has_fulfillment(), "Re-registration must not recreate the task");
}

// ============================================================
// PARTIAL-UPDATE MERGE
// ============================================================

#[test]
fn test_merge_only_overwrites_populated_fields() {
    let mut existing = PetasosTask {
        id: Some(TaskIdType::new()),
        work_item: Some(TaskWorkItem::from_payload(serde_json::json!({"keep": true}))),
        outcome_status: Some(TaskOutcomeStatus::Waiting),
        ..PetasosTask::default()
    };

    let incoming = PetasosTask {
        outcome_status: Some(TaskOutcomeStatus::Active),
        reason: Some(TaskReason::Schedule),
        ..PetasosTask::default()
    };

    existing.merge_from(&incoming);

    // Populated incoming fields win.
    assert_eq!(existing.outcome_status, Some(TaskOutcomeStatus::Active));
    assert_eq!(existing.reason, Some(TaskReason::Schedule));
    // Absent incoming fields never clear existing values.
    assert!(existing.has_id());
    assert!(existing.has_work_item());
    assert_eq!(
        existing.work_item.as_ref().and_then(|w| w.payload.as_ref()),
        Some(&serde_json::json!({"keep": true}))
    );
}

#[test]
fn test_merge_is_idempotent() {
    let base = PetasosTask {
        id: Some(TaskIdType::new()),
        work_item: Some(TaskWorkItem::from_payload(serde_json::json!({"n": 1}))),
        outcome_status: Some(TaskOutcomeStatus::Waiting),
        ..PetasosTask::default()
    };
    let incoming = PetasosTask {
        outcome_status: Some(TaskOutcomeStatus::Finished),
        performer_types: Some(vec!["transformer".to_string()]),
        ..PetasosTask::default()
    };

    let mut once = base.clone();
    once.merge_from(&incoming);

    let mut twice = once.clone();
    twice.merge_from(&incoming);

    assert_eq!(once, twice, "merge(merge(t, u), u) == merge(t, u)");
}

#[test]
fn test_update_actionable_task_merges_into_store() {
    let controller = controller();
    let id = controller.register_actionable_task(ingress_task());

    let incoming = ActionableTask {
        base: PetasosTask {
            id: Some(id.clone()),
            outcome_status: Some(TaskOutcomeStatus::Active),
            ..PetasosTask::default()
        },
        ..ActionableTask::default()
    };

    let merged = controller
        .update_actionable_task(&incoming)
        .expect("Update failed");

    assert_eq!(merged.base.outcome_status, Some(TaskOutcomeStatus::Active));
    // The payload set at registration survives the partial update.
    assert!(merged.base.has_work_item());
    assert!(merged.base.registered);
}

// ============================================================
// FULFILLMENT DERIVATION
// ============================================================

#[test]
fn test_fulfillment_task_copies_work_and_links_back() {
    let controller = controller();
    let id = controller.register_actionable_task(ingress_task());

    let fulfillment = controller
        .create_fulfillment_task(&id, "wup-slot-1")
        .expect("Fulfillment creation failed");

    assert!(!fulfillment.is_retry);
    assert_eq!(fulfillment.actionable_task_id, Some(id.clone()));
    assert_eq!(
        fulfillment.base.work_item,
        controller.actionable_task(&id).unwrap().base.work_item
    );
    let card = fulfillment.job_card.expect("Job card missing");
    assert_eq!(card.requested_status, Some(FulfillmentExecStatus::Registered));
    assert_eq!(card.execution_slot.as_deref(), Some("wup-slot-1"));

    // The actionable task now tracks the attempt.
    let actionable = controller.actionable_task(&id).unwrap();
    let tracked = actionable.fulfillment.expect("Fulfillment record missing");
    assert_eq!(tracked.tracking_id, fulfillment.base.id);
    assert_eq!(tracked.status, Some(FulfillmentExecStatus::Registered));
    assert!(tracked.ready_instant_ms.is_some());
}

#[test]
fn test_second_attempt_is_a_retry() {
    let controller = controller();
    let id = controller.register_actionable_task(ingress_task());

    let first = controller.create_fulfillment_task(&id, "wup-slot-1").unwrap();
    assert!(!first.is_retry);

    let second = controller.create_fulfillment_task(&id, "wup-slot-1").unwrap();
    assert!(second.is_retry);
    assert_eq!(second.base.reason, Some(TaskReason::Retry));
}

// ============================================================
// EXECUTION PRIVILEGE ARBITRATION
// ============================================================

#[test]
fn test_privilege_granted_then_denied_for_busy_slot() {
    let controller = controller();
    let a = controller.register_actionable_task(ingress_task());
    let b = controller.register_actionable_task(ingress_task());

    let first = controller.create_fulfillment_task(&a, "wup-slot-1").unwrap();
    let second = controller.create_fulfillment_task(&b, "wup-slot-1").unwrap();
    let first_id = first.base.id.clone().unwrap();
    let second_id = second.base.id.clone().unwrap();

    assert_eq!(
        controller.request_execution_privilege(&first_id).unwrap(),
        ExecutionPrivilege::Granted
    );
    assert_eq!(
        controller.request_execution_privilege(&second_id).unwrap(),
        ExecutionPrivilege::Denied
    );

    // Grant stamped the start and moved the attempt to Executing.
    let granted = controller.fulfillment_task(&first_id).unwrap();
    assert_eq!(
        granted.job_card.unwrap().granted_status,
        Some(FulfillmentExecStatus::Executing)
    );
    let tracked = controller.actionable_task(&a).unwrap().fulfillment.unwrap();
    assert_eq!(tracked.status, Some(FulfillmentExecStatus::Executing));
    assert!(tracked.start_instant_ms.is_some());

    // Denial failed the second attempt.
    let denied = controller.fulfillment_task(&second_id).unwrap();
    assert_eq!(denied.base.outcome_status, Some(TaskOutcomeStatus::Failed));
    assert_eq!(
        denied.job_card.unwrap().granted_status,
        Some(FulfillmentExecStatus::Failed)
    );
}

#[test]
fn test_slot_released_on_finish_allows_next_grant() {
    let controller = controller();
    let a = controller.register_actionable_task(ingress_task());
    let b = controller.register_actionable_task(ingress_task());

    let first = controller.create_fulfillment_task(&a, "wup-slot-1").unwrap();
    let first_id = first.base.id.clone().unwrap();
    controller.request_execution_privilege(&first_id).unwrap();
    assert_eq!(controller.slot_holder("wup-slot-1"), Some(first_id.clone()));

    controller.notify_execution_finish(&first_id).unwrap();
    assert_eq!(controller.slot_holder("wup-slot-1"), None);

    let second = controller.create_fulfillment_task(&b, "wup-slot-1").unwrap();
    let second_id = second.base.id.clone().unwrap();
    assert_eq!(
        controller.request_execution_privilege(&second_id).unwrap(),
        ExecutionPrivilege::Granted
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_at_most_one_grant_per_slot_under_race() {
    let controller = controller();

    // Sixteen fulfillment tasks all racing for the same slot.
    let mut fulfillment_ids = Vec::new();
    for _ in 0..16 {
        let actionable_id = controller.register_actionable_task(ingress_task());
        let fulfillment = controller
            .create_fulfillment_task(&actionable_id, "contended-slot")
            .unwrap();
        fulfillment_ids.push(fulfillment.base.id.unwrap());
    }

    let mut handles = Vec::new();
    for fulfillment_id in fulfillment_ids {
        let controller = controller.clone();
        handles.push(tokio::spawn(async move {
            controller.request_execution_privilege(&fulfillment_id).unwrap()
        }));
    }

    let mut grants = 0;
    let mut denials = 0;
    for handle in handles {
        match handle.await.expect("Task panicked") {
            ExecutionPrivilege::Granted => grants += 1,
            ExecutionPrivilege::Denied => denials += 1,
        }
    }

    assert_eq!(grants, 1, "Exactly one task may hold the slot");
    assert_eq!(denials, 15);
}

#[test]
fn test_regrant_to_holder_is_idempotent() {
    let controller = controller();
    let a = controller.register_actionable_task(ingress_task());
    let task = controller.create_fulfillment_task(&a, "wup-slot-1").unwrap();
    let id = task.base.id.clone().unwrap();

    assert_eq!(
        controller.request_execution_privilege(&id).unwrap(),
        ExecutionPrivilege::Granted
    );
    assert_eq!(
        controller.request_execution_privilege(&id).unwrap(),
        ExecutionPrivilege::Granted
    );
}

// ============================================================
// TERMINAL TRANSITIONS
// ============================================================

#[test]
fn test_finish_correlates_back_to_actionable() {
    let controller = controller();
    let id = controller.register_actionable_task(ingress_task());
    let fulfillment = controller.create_fulfillment_task(&id, "wup-slot-1").unwrap();
    let fulfillment_id = fulfillment.base.id.unwrap();

    controller.request_execution_privilege(&fulfillment_id).unwrap();
    controller.notify_execution_finish(&fulfillment_id).unwrap();

    let actionable = controller.actionable_task(&id).unwrap();
    assert_eq!(actionable.base.outcome_status, Some(TaskOutcomeStatus::Finished));
    let tracked = actionable.fulfillment.unwrap();
    assert_eq!(tracked.status, Some(FulfillmentExecStatus::Finished));
    assert!(tracked.finish_instant_ms.is_some());
    let summary = actionable.completion_summary.unwrap();
    assert!(!summary.finalised, "Finish does not finalise");

    controller.finalise_actionable_task(&id).unwrap();
    let finalised = controller.actionable_task(&id).unwrap();
    assert_eq!(finalised.base.outcome_status, Some(TaskOutcomeStatus::Finalised));
    assert!(finalised.completion_summary.unwrap().finalised);
    assert!(finalised.fulfillment.unwrap().finalisation_instant_ms.is_some());
}

#[test]
fn test_failure_records_reason_and_fails_actionable() {
    let controller = controller();
    let id = controller.register_actionable_task(ingress_task());
    let fulfillment = controller.create_fulfillment_task(&id, "wup-slot-1").unwrap();
    let fulfillment_id = fulfillment.base.id.unwrap();

    controller.request_execution_privilege(&fulfillment_id).unwrap();
    controller
        .notify_execution_failure(&fulfillment_id, "downstream unreachable")
        .unwrap();

    let failed = controller.fulfillment_task(&fulfillment_id).unwrap();
    assert_eq!(failed.base.outcome_status, Some(TaskOutcomeStatus::Failed));
    let outcome = failed.base.work_item.unwrap().outcome.unwrap();
    assert_eq!(outcome["error"], "downstream unreachable");

    let actionable = controller.actionable_task(&id).unwrap();
    assert_eq!(actionable.base.outcome_status, Some(TaskOutcomeStatus::Failed));

    // The slot is free for a retry attempt the caller may choose to make.
    assert_eq!(controller.slot_holder("wup-slot-1"), None);
}

// ============================================================
// AGGREGATE TASKS
// ============================================================

#[test]
fn test_aggregate_status_follows_constituents() {
    let controller = controller();
    let a = controller.register_actionable_task(ingress_task());
    let b = controller.register_actionable_task(ingress_task());
    let aggregate_id = controller.create_aggregate_task(vec![a.clone(), b.clone()]);

    // Nothing settled yet.
    assert_eq!(
        controller.refresh_aggregate_status(&aggregate_id).unwrap(),
        TaskOutcomeStatus::Active
    );

    // Finish a, fail b: the aggregate fails.
    let fa = controller.create_fulfillment_task(&a, "slot-a").unwrap();
    let fa_id = fa.base.id.unwrap();
    controller.request_execution_privilege(&fa_id).unwrap();
    controller.notify_execution_finish(&fa_id).unwrap();

    let fb = controller.create_fulfillment_task(&b, "slot-b").unwrap();
    let fb_id = fb.base.id.unwrap();
    controller.request_execution_privilege(&fb_id).unwrap();
    controller.notify_execution_failure(&fb_id, "boom").unwrap();

    assert_eq!(
        controller.refresh_aggregate_status(&aggregate_id).unwrap(),
        TaskOutcomeStatus::Failed
    );
    let report = controller
        .aggregate_task(&aggregate_id)
        .unwrap()
        .report
        .unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);
}

#[test]
fn test_aggregate_finishes_when_all_sub_tasks_finish() {
    let controller = controller();
    let a = controller.register_actionable_task(ingress_task());
    let aggregate_id = controller.create_aggregate_task(vec![a.clone()]);

    let fa = controller.create_fulfillment_task(&a, "slot-a").unwrap();
    let fa_id = fa.base.id.unwrap();
    controller.request_execution_privilege(&fa_id).unwrap();
    controller.notify_execution_finish(&fa_id).unwrap();

    assert_eq!(
        controller.refresh_aggregate_status(&aggregate_id).unwrap(),
        TaskOutcomeStatus::Finished
    );
}
