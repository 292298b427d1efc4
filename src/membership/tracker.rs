//! Membership view tracking.
//!
//! Receives the full member view from the transport, diffs it against the
//! last view and notifies listeners of exactly what changed. Snapshot
//! bookkeeping and diffing are the only work done on the callback path;
//! anything expensive belongs in the listeners' own queues.

use std::sync::{Arc, Mutex};

use super::types::MemberAddress;
use crate::transport::ViewListener;

/// Receives the membership delta after every view change.
///
/// Invoked synchronously from the tracker; implementations must only mutate
/// local state and enqueue or trigger re-checks.
pub trait MembershipChangeListener: Send + Sync {
    fn on_membership_change(&self, added: &[MemberAddress], removed: &[MemberAddress]);
}

#[derive(Default)]
struct ViewSnapshots {
    previous: Vec<MemberAddress>,
    current: Vec<MemberAddress>,
}

/// Tracks the previous/current member views and fans out deltas.
pub struct MembershipTracker {
    local: MemberAddress,
    snapshots: Mutex<ViewSnapshots>,
    listeners: Mutex<Vec<Arc<dyn MembershipChangeListener>>>,
}

impl MembershipTracker {
    pub fn new(local: MemberAddress) -> Arc<Self> {
        Arc::new(Self {
            local,
            snapshots: Mutex::new(ViewSnapshots::default()),
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// This node's own member address.
    pub fn local_address(&self) -> &MemberAddress {
        &self.local
    }

    pub fn register_listener(&self, listener: Arc<dyn MembershipChangeListener>) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.push(listener);
    }

    /// Applies a new member view: computes `added = current \ previous` and
    /// `removed = previous \ current` over raw addresses, swaps both
    /// snapshots atomically, then notifies every listener with the delta.
    pub fn on_view_change(&self, members: Vec<MemberAddress>) {
        let (added, removed) = {
            let mut snapshots = self.snapshots.lock().unwrap_or_else(|e| e.into_inner());

            let added: Vec<MemberAddress> = members
                .iter()
                .filter(|member| !snapshots.current.contains(member))
                .cloned()
                .collect();
            let removed: Vec<MemberAddress> = snapshots
                .current
                .iter()
                .filter(|member| !members.contains(member))
                .cloned()
                .collect();

            snapshots.previous = std::mem::replace(&mut snapshots.current, members);

            (added, removed)
        };

        if added.is_empty() && removed.is_empty() {
            return;
        }

        tracing::info!(
            "Membership change: {} added, {} removed",
            added.len(),
            removed.len()
        );

        let listeners: Vec<Arc<dyn MembershipChangeListener>> = {
            let guard = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            guard.clone()
        };
        for listener in listeners {
            listener.on_membership_change(&added, &removed);
        }
    }

    /// The current member view snapshot.
    pub fn current_members(&self) -> Vec<MemberAddress> {
        let snapshots = self.snapshots.lock().unwrap_or_else(|e| e.into_inner());
        snapshots.current.clone()
    }

    /// The member view before the last change.
    pub fn previous_members(&self) -> Vec<MemberAddress> {
        let snapshots = self.snapshots.lock().unwrap_or_else(|e| e.into_inner());
        snapshots.previous.clone()
    }
}

impl ViewListener for MembershipTracker {
    fn on_view(&self, members: Vec<MemberAddress>) {
        self.on_view_change(members);
    }
}
