//! Endpoint Module Tests
//!
//! Validates the table-driven status aggregation, the scope predicate and
//! the startup/ongoing watchdog state machines (driven tick by tick, no
//! timers).

use std::sync::Arc;
use std::time::Duration;

use super::aggregation::{aggregate_status, merge_status};
use super::types::{ChannelScope, DeploymentPlace, Endpoint, EndpointStatus};
use super::watchdog::{EndpointStatusWatchdog, StartupCheck};
use crate::config::PetasosConfig;
use crate::metrics::agent::MetricsAgent;
use crate::metrics::notifications::{LogNotificationSink, NotificationForwarder};
use crate::naming::EndpointFunction;

fn place(site: &str, zone: &str) -> DeploymentPlace {
    DeploymentPlace {
        site: site.to_string(),
        zone: zone.to_string(),
        group: "group-a".to_string(),
    }
}

fn endpoint(function: EndpointFunction, status: EndpointStatus) -> Endpoint {
    let mut endpoint = Endpoint::new(
        "test-subsystem",
        function,
        place("site-a", "zone-a"),
        "component-1",
        "plant-1",
        ChannelScope::IntraZone,
    );
    endpoint.status = status;
    endpoint
}

fn watchdog() -> Arc<EndpointStatusWatchdog> {
    let config = PetasosConfig::default();
    let metrics = MetricsAgent::new();
    let notifier = NotificationForwarder::new(Arc::new(LogNotificationSink), Duration::from_secs(1));
    EndpointStatusWatchdog::new(&config, metrics, notifier)
}

// ============================================================
// STATUS AGGREGATION
// ============================================================

#[test]
fn test_aggregation_precedence() {
    use EndpointStatus::*;

    // Any Failed dominates
    assert_eq!(aggregate_status(vec![Operational, Failed, Operational]), Failed);
    // Else any Suspect
    assert_eq!(aggregate_status(vec![Operational, Suspect, Started]), Suspect);
    // Else any Started
    assert_eq!(aggregate_status(vec![Operational, Started, Operational]), Started);
    // All operational
    assert_eq!(aggregate_status(vec![Operational, Operational]), Operational);
}

#[test]
fn test_aggregation_closed_world_default() {
    use EndpointStatus::*;

    // Probe-derived states are not valid owned-endpoint lifecycle states.
    assert_eq!(aggregate_status(vec![Operational, Reachable]), Failed);
    assert_eq!(aggregate_status(vec![Detected]), Failed);
    assert_eq!(aggregate_status(vec![Unreachable, Operational]), Failed);
}

#[test]
fn test_aggregation_is_order_independent() {
    use EndpointStatus::*;

    let statuses = [Operational, Suspect, Started, Operational, Suspect];

    // Every rotation (and the reverse) must resolve identically.
    let expected = aggregate_status(statuses.to_vec());
    for rotation in 0..statuses.len() {
        let mut permuted = statuses.to_vec();
        permuted.rotate_left(rotation);
        assert_eq!(aggregate_status(permuted), expected);
    }
    let mut reversed = statuses.to_vec();
    reversed.reverse();
    assert_eq!(aggregate_status(reversed), expected);
}

#[test]
fn test_merge_is_commutative() {
    use EndpointStatus::*;

    let all = [Started, Operational, Suspect, Failed, Detected, Reachable, Unreachable];
    for a in all {
        for b in all {
            assert_eq!(merge_status(a, b), merge_status(b, a), "merge({:?},{:?})", a, b);
        }
    }
}

#[test]
fn test_empty_set_resolves_started() {
    assert_eq!(aggregate_status(Vec::new()), EndpointStatus::Started);
}

// ============================================================
// CHANNEL SCOPE
// ============================================================

#[test]
fn test_scope_predicates() {
    let owner = place("site-a", "zone-a");
    let same_zone = place("site-a", "zone-a");
    let other_zone = place("site-a", "zone-b");
    let other_site = place("site-b", "zone-a");

    assert!(ChannelScope::IntraZone.permits(&owner, &same_zone));
    assert!(!ChannelScope::IntraZone.permits(&owner, &other_zone));
    assert!(!ChannelScope::IntraZone.permits(&owner, &other_site));

    assert!(ChannelScope::InterZone.permits(&owner, &other_zone));
    assert!(!ChannelScope::InterZone.permits(&owner, &other_site));

    assert!(ChannelScope::InterSite.permits(&owner, &other_site));
}

// ============================================================
// STARTUP WATCHDOG
// ============================================================

#[tokio::test]
async fn test_startup_completes_once_viable_set_is_operational() {
    let watchdog = watchdog();
    watchdog.register_owned_endpoint(endpoint(EndpointFunction::Messaging, EndpointStatus::Started));
    watchdog.register_owned_endpoint(endpoint(EndpointFunction::Topology, EndpointStatus::Started));
    watchdog.register_owned_endpoint(endpoint(
        EndpointFunction::Subscriptions,
        EndpointStatus::Started,
    ));

    // Still warming: everything is merely Started.
    assert_eq!(
        watchdog.run_startup_check(),
        StartupCheck::Warming(EndpointStatus::Started)
    );

    watchdog.update_owned_status(EndpointFunction::Messaging, EndpointStatus::Operational);
    watchdog.update_owned_status(EndpointFunction::Topology, EndpointStatus::Operational);
    assert_eq!(
        watchdog.run_startup_check(),
        StartupCheck::Warming(EndpointStatus::Started)
    );

    watchdog.update_owned_status(EndpointFunction::Subscriptions, EndpointStatus::Operational);
    assert_eq!(watchdog.run_startup_check(), StartupCheck::Complete);
    assert_eq!(watchdog.aggregate_status(), EndpointStatus::Operational);
}

#[tokio::test]
async fn test_startup_blocked_when_required_endpoint_missing() {
    let watchdog = watchdog();
    // Only two of the three required single-site endpoints are configured.
    watchdog.register_owned_endpoint(endpoint(
        EndpointFunction::Messaging,
        EndpointStatus::Operational,
    ));
    watchdog.register_owned_endpoint(endpoint(
        EndpointFunction::Topology,
        EndpointStatus::Operational,
    ));

    assert!(!watchdog.minimum_viable_set_present());
    assert_eq!(
        watchdog.run_startup_check(),
        StartupCheck::Warming(EndpointStatus::Operational)
    );
}

#[tokio::test]
async fn test_startup_times_out_terminally() {
    let config = PetasosConfig {
        max_startup_duration: Duration::from_millis(0),
        ..PetasosConfig::default()
    };
    let metrics = MetricsAgent::new();
    let notifier = NotificationForwarder::new(Arc::new(LogNotificationSink), Duration::from_secs(1));
    let watchdog = EndpointStatusWatchdog::new(&config, metrics.clone(), notifier);

    watchdog.register_owned_endpoint(endpoint(
        EndpointFunction::Messaging,
        EndpointStatus::Operational,
    ));

    std::thread::sleep(Duration::from_millis(5));
    assert_eq!(watchdog.run_startup_check(), StartupCheck::TimedOut);
    assert_eq!(watchdog.aggregate_status(), EndpointStatus::Failed);
    assert_eq!(metrics.count_of("petasos", "aggregate-failures"), 1);
}

// ============================================================
// ONGOING WATCHDOG
// ============================================================

#[tokio::test]
async fn test_suspect_tolerated_up_to_threshold_then_failed() {
    let watchdog = watchdog();
    watchdog.register_owned_endpoint(endpoint(
        EndpointFunction::Messaging,
        EndpointStatus::Operational,
    ));
    watchdog.register_owned_endpoint(endpoint(EndpointFunction::Audit, EndpointStatus::Suspect));

    // Threshold is 3: three consecutive suspect ticks stay Suspect...
    assert_eq!(watchdog.run_ongoing_check(), EndpointStatus::Suspect);
    assert_eq!(watchdog.run_ongoing_check(), EndpointStatus::Suspect);
    assert_eq!(watchdog.run_ongoing_check(), EndpointStatus::Suspect);
    // ...and the fourth fails the aggregate.
    assert_eq!(watchdog.run_ongoing_check(), EndpointStatus::Failed);
}

#[tokio::test]
async fn test_operational_tick_resets_suspect_counter() {
    let watchdog = watchdog();
    watchdog.register_owned_endpoint(endpoint(EndpointFunction::Audit, EndpointStatus::Suspect));

    assert_eq!(watchdog.run_ongoing_check(), EndpointStatus::Suspect);
    assert_eq!(watchdog.run_ongoing_check(), EndpointStatus::Suspect);

    // Recovery resets the tolerance window.
    watchdog.update_owned_status(EndpointFunction::Audit, EndpointStatus::Operational);
    assert_eq!(watchdog.run_ongoing_check(), EndpointStatus::Operational);

    watchdog.update_owned_status(EndpointFunction::Audit, EndpointStatus::Suspect);
    assert_eq!(watchdog.run_ongoing_check(), EndpointStatus::Suspect);
    assert_eq!(watchdog.run_ongoing_check(), EndpointStatus::Suspect);
    assert_eq!(watchdog.run_ongoing_check(), EndpointStatus::Suspect);
    assert_eq!(watchdog.run_ongoing_check(), EndpointStatus::Failed);
}

#[tokio::test]
async fn test_operational_never_spontaneously_fails() {
    let watchdog = watchdog();
    watchdog.register_owned_endpoint(endpoint(
        EndpointFunction::Messaging,
        EndpointStatus::Operational,
    ));
    watchdog.register_owned_endpoint(endpoint(
        EndpointFunction::Topology,
        EndpointStatus::Operational,
    ));

    for _ in 0..20 {
        assert_eq!(watchdog.run_ongoing_check(), EndpointStatus::Operational);
    }
}

#[tokio::test]
async fn test_started_endpoint_in_steady_state_fails_conservatively() {
    let watchdog = watchdog();
    watchdog.register_owned_endpoint(endpoint(
        EndpointFunction::Messaging,
        EndpointStatus::Operational,
    ));
    watchdog.register_owned_endpoint(endpoint(EndpointFunction::Audit, EndpointStatus::Started));

    assert_eq!(watchdog.run_ongoing_check(), EndpointStatus::Failed);
}

// ============================================================
// PUBLISHER VISIBILITY EVENTS
// ============================================================

#[tokio::test]
async fn test_newly_operational_endpoints_are_announced_once() {
    use std::sync::Mutex;

    struct Recorder {
        seen: Mutex<Vec<String>>,
    }
    impl super::watchdog::PublisherEventListener for Recorder {
        fn on_publisher_visible(&self, endpoint: &Endpoint) {
            self.seen.lock().unwrap().push(endpoint.channel_name.clone());
        }
    }

    let watchdog = watchdog();
    let recorder = Arc::new(Recorder {
        seen: Mutex::new(Vec::new()),
    });
    watchdog.register_listener(recorder.clone());

    watchdog.register_owned_endpoint(endpoint(
        EndpointFunction::Messaging,
        EndpointStatus::Operational,
    ));
    watchdog.register_owned_endpoint(endpoint(
        EndpointFunction::Topology,
        EndpointStatus::Operational,
    ));
    watchdog.register_owned_endpoint(endpoint(
        EndpointFunction::Subscriptions,
        EndpointStatus::Operational,
    ));

    assert_eq!(watchdog.run_startup_check(), StartupCheck::Complete);
    assert_eq!(recorder.seen.lock().unwrap().len(), 3);

    // Repeat checks do not re-announce.
    watchdog.run_ongoing_check();
    assert_eq!(recorder.seen.lock().unwrap().len(), 3);
}
