//! Logical-name address resolution.
//!
//! Pure functions over the tracker's current snapshot. No I/O: every lookup
//! is a scan of the in-memory view, cheap at cluster sizes this substrate
//! targets.

use std::sync::Arc;

use super::tracker::MembershipTracker;
use super::types::MemberAddress;

/// Resolves logical names against the current membership view.
pub struct AddressResolver {
    tracker: Arc<MembershipTracker>,
}

impl AddressResolver {
    pub fn new(tracker: Arc<MembershipTracker>) -> Arc<Self> {
        Arc::new(Self { tracker })
    }

    /// Exact logical-name match.
    pub fn find_exact(&self, logical_name: &str) -> Option<MemberAddress> {
        self.tracker
            .current_members()
            .into_iter()
            .find(|member| member.logical_name == logical_name)
    }

    /// First member whose logical name starts with `prefix`. Used to find
    /// "any instance" of a service, since instances differ only in the
    /// `(uuid)` suffix.
    pub fn find_first_with_prefix(&self, prefix: &str) -> Option<MemberAddress> {
        self.tracker
            .current_members()
            .into_iter()
            .find(|member| member.logical_name.starts_with(prefix))
    }

    /// All members whose logical name contains `fragment`. Used for
    /// scope-qualified names such as site/zone-prefixed cluster names.
    pub fn find_containing(&self, fragment: &str) -> Vec<MemberAddress> {
        self.tracker
            .current_members()
            .into_iter()
            .filter(|member| member.logical_name.contains(fragment))
            .collect()
    }

    /// All current instances of a service, by derived service name.
    pub fn members_of_service(&self, service_name: &str) -> Vec<MemberAddress> {
        self.tracker
            .current_members()
            .into_iter()
            .filter(|member| member.service_name() == service_name)
            .collect()
    }

    /// Every member whose derived service name differs from the local
    /// participant's service name.
    pub fn all_members_except_self(&self) -> Vec<MemberAddress> {
        let my_service = self.tracker.local_address().service_name().to_string();
        self.tracker
            .current_members()
            .into_iter()
            .filter(|member| member.service_name() != my_service)
            .collect()
    }
}
