//! Membership Module Tests
//!
//! Validates view diffing (the added/removed contract), listener fan-out and
//! the pure resolver lookups.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use super::resolver::AddressResolver;
use super::tracker::{MembershipChangeListener, MembershipTracker};
use super::types::MemberAddress;

fn member(logical_name: &str, port: u16) -> MemberAddress {
    let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
    MemberAddress::new(logical_name, addr)
}

struct RecordingListener {
    deltas: Mutex<Vec<(Vec<MemberAddress>, Vec<MemberAddress>)>>,
}

impl RecordingListener {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            deltas: Mutex::new(Vec::new()),
        })
    }

    fn delta_count(&self) -> usize {
        self.deltas.lock().unwrap().len()
    }

    fn last_delta(&self) -> (Vec<MemberAddress>, Vec<MemberAddress>) {
        self.deltas.lock().unwrap().last().cloned().expect("No delta recorded")
    }
}

impl MembershipChangeListener for RecordingListener {
    fn on_membership_change(&self, added: &[MemberAddress], removed: &[MemberAddress]) {
        self.deltas
            .lock()
            .unwrap()
            .push((added.to_vec(), removed.to_vec()));
    }
}

// ============================================================
// VIEW DIFFING
// ============================================================

#[test]
fn test_first_view_is_all_added() {
    let tracker = MembershipTracker::new(member("me(0)", 5000));
    let listener = RecordingListener::new();
    tracker.register_listener(listener.clone());

    tracker.on_view_change(vec![member("me(0)", 5000), member("svc-a(1)", 5001)]);

    let (added, removed) = listener.last_delta();
    assert_eq!(added.len(), 2);
    assert!(removed.is_empty());
    assert_eq!(tracker.current_members().len(), 2);
    assert!(tracker.previous_members().is_empty());
}

#[test]
fn test_added_and_removed_are_disjoint_and_reconstruct_current() {
    let tracker = MembershipTracker::new(member("me(0)", 5000));
    let listener = RecordingListener::new();
    tracker.register_listener(listener.clone());

    // A sequence of views with churn in every step.
    let views = vec![
        vec![member("me(0)", 5000)],
        vec![member("me(0)", 5000), member("a(1)", 5001)],
        vec![member("me(0)", 5000), member("a(1)", 5001), member("b(2)", 5002)],
        vec![member("me(0)", 5000), member("b(2)", 5002), member("c(3)", 5003)],
        vec![member("c(3)", 5003)],
    ];

    for view in views {
        let before = tracker.current_members();
        tracker.on_view_change(view.clone());
        let (added, removed) = listener.last_delta();

        // added and removed never overlap
        for member in &added {
            assert!(!removed.contains(member), "added ∩ removed must be empty");
        }

        // previous minus removed plus added reproduces current
        let mut reconstructed: Vec<MemberAddress> = before
            .into_iter()
            .filter(|member| !removed.contains(member))
            .collect();
        reconstructed.extend(added.clone());

        let mut expected = view;
        reconstructed.sort_by(|a, b| a.logical_name.cmp(&b.logical_name));
        expected.sort_by(|a, b| a.logical_name.cmp(&b.logical_name));
        assert_eq!(reconstructed, expected);
    }
}

#[test]
fn test_unchanged_view_does_not_notify() {
    let tracker = MembershipTracker::new(member("me(0)", 5000));
    let listener = RecordingListener::new();
    tracker.register_listener(listener.clone());

    let view = vec![member("me(0)", 5000), member("a(1)", 5001)];
    tracker.on_view_change(view.clone());
    assert_eq!(listener.delta_count(), 1);

    tracker.on_view_change(view);
    assert_eq!(listener.delta_count(), 1, "Identical view must not notify");
}

#[test]
fn test_removal_is_reported() {
    let tracker = MembershipTracker::new(member("me(0)", 5000));
    let listener = RecordingListener::new();
    tracker.register_listener(listener.clone());

    tracker.on_view_change(vec![member("me(0)", 5000), member("a(1)", 5001)]);
    tracker.on_view_change(vec![member("me(0)", 5000)]);

    let (added, removed) = listener.last_delta();
    assert!(added.is_empty());
    assert_eq!(removed, vec![member("a(1)", 5001)]);
    assert_eq!(tracker.previous_members().len(), 2);
}

// ============================================================
// MEMBER ADDRESS NAMING
// ============================================================

#[test]
fn test_service_name_derivation() {
    let m = member("lab-results(uuid-77)", 5001);
    assert_eq!(m.service_name(), "lab-results");
    assert_eq!(m.instance_id(), Some("uuid-77"));
    assert_eq!(m.to_string(), "lab-results(uuid-77)");
}

#[test]
fn test_service_name_of_malformed_logical_name() {
    // Untrusted peer names must not panic the accessors.
    let m = member("just-a-service", 5001);
    assert_eq!(m.service_name(), "just-a-service");
    assert_eq!(m.instance_id(), None);
}

// ============================================================
// ADDRESS RESOLVER
// ============================================================

fn populated_resolver() -> (Arc<MembershipTracker>, Arc<AddressResolver>) {
    let tracker = MembershipTracker::new(member("me-svc(0)", 5000));
    tracker.on_view_change(vec![
        member("me-svc(0)", 5000),
        member("lab-results(1)", 5001),
        member("lab-results(2)", 5002),
        member("site-a.imaging(3)", 5003),
    ]);
    let resolver = AddressResolver::new(tracker.clone());
    (tracker, resolver)
}

#[test]
fn test_resolver_exact_match() {
    let (_tracker, resolver) = populated_resolver();

    assert_eq!(
        resolver.find_exact("lab-results(1)"),
        Some(member("lab-results(1)", 5001))
    );
    assert_eq!(resolver.find_exact("lab-results(9)"), None);
}

#[test]
fn test_resolver_prefix_match_finds_first_instance() {
    let (_tracker, resolver) = populated_resolver();

    let found = resolver
        .find_first_with_prefix("lab-results")
        .expect("Prefix match failed");
    assert!(found.logical_name.starts_with("lab-results"));
}

#[test]
fn test_resolver_contains_match_for_scoped_names() {
    let (_tracker, resolver) = populated_resolver();

    let scoped = resolver.find_containing("site-a");
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0], member("site-a.imaging(3)", 5003));
}

#[test]
fn test_resolver_members_of_service() {
    let (_tracker, resolver) = populated_resolver();

    let instances = resolver.members_of_service("lab-results");
    assert_eq!(instances.len(), 2);
}

#[test]
fn test_resolver_all_members_except_self() {
    let (_tracker, resolver) = populated_resolver();

    let others = resolver.all_members_except_self();
    assert_eq!(others.len(), 3);
    assert!(others.iter().all(|m| m.service_name() != "me-svc"));
}
