use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::naming;

/// A single member address in the current cluster view.
///
/// Wraps the opaque transport address together with the logical name the
/// member announced, of the form `service(instance-uuid)`. Addresses are
/// transient: the whole set is recomputed on every membership view change
/// and carries no identity beyond the current view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MemberAddress {
    /// Logical name in the form `service(instance-uuid)`.
    pub logical_name: String,
    /// Transport address the member is reachable at.
    pub addr: SocketAddr,
}

impl MemberAddress {
    pub fn new(logical_name: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            logical_name: logical_name.into(),
            addr,
        }
    }

    /// Service part of the logical name (everything before the first `(`).
    pub fn service_name(&self) -> &str {
        naming::service_name_of(&self.logical_name)
    }

    /// Instance part of the logical name, if present.
    pub fn instance_id(&self) -> Option<&str> {
        naming::instance_id_of(&self.logical_name)
    }
}

impl std::fmt::Display for MemberAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.logical_name)
    }
}
