//! Channel & Participant Naming
//!
//! Every channel/participant in the cluster is identified by a name of the
//! form `site::zone::subsystem::function::uuid` — five `::`-delimited fields
//! in that fixed order. The format is wire-visible: peers parse each other's
//! names straight out of the membership view, so the builders and accessors
//! here must stay bit-exact.
//!
//! Peer names are untrusted input. Every accessor is a fixed positional
//! split that returns `None` on malformed names instead of panicking.

use serde::{Deserialize, Serialize};


/// Separator between the five channel name fields.
pub const CHANNEL_NAME_SEPARATOR: &str = "::";

/// Number of fields in a well-formed channel name.
pub const CHANNEL_NAME_FIELD_COUNT: usize = 5;

/// The closed set of endpoint functions a subsystem can own.
///
/// The wire names are part of the protocol: they appear in the function
/// field of every channel name.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EndpointFunction {
    Messaging,
    Topology,
    Subscriptions,
    Audit,
    TaskDistribution,
    Interception,
    Metrics,
}

impl EndpointFunction {
    /// All functions, in declaration order.
    pub const ALL: [EndpointFunction; 7] = [
        EndpointFunction::Messaging,
        EndpointFunction::Topology,
        EndpointFunction::Subscriptions,
        EndpointFunction::Audit,
        EndpointFunction::TaskDistribution,
        EndpointFunction::Interception,
        EndpointFunction::Metrics,
    ];

    /// The exact string used in the function field of channel names.
    pub fn wire_name(&self) -> &'static str {
        match self {
            EndpointFunction::Messaging => "messaging",
            EndpointFunction::Topology => "topology",
            EndpointFunction::Subscriptions => "subscriptions",
            EndpointFunction::Audit => "audit",
            EndpointFunction::TaskDistribution => "task-distribution-grid",
            EndpointFunction::Interception => "interception",
            EndpointFunction::Metrics => "metrics",
        }
    }

    /// Parses a wire name back into a function. `None` for anything outside
    /// the closed set.
    pub fn from_wire_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|function| function.wire_name() == name)
    }
}

impl std::fmt::Display for EndpointFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Builds a channel/participant name from its five fields.
pub fn build_channel_name(
    site: &str,
    zone: &str,
    subsystem: &str,
    function: EndpointFunction,
    unique_id: &str,
) -> String {
    [site, zone, subsystem, function.wire_name(), unique_id].join(CHANNEL_NAME_SEPARATOR)
}

/// Positional field extraction. `None` unless the name has exactly five
/// fields.
fn field_at(channel_name: &str, index: usize) -> Option<&str> {
    let fields: Vec<&str> = channel_name.split(CHANNEL_NAME_SEPARATOR).collect();
    if fields.len() != CHANNEL_NAME_FIELD_COUNT {
        return None;
    }
    fields.get(index).copied()
}

/// Site field (position 0) of a channel name.
pub fn site_of(channel_name: &str) -> Option<&str> {
    field_at(channel_name, 0)
}

/// Zone field (position 1) of a channel name.
pub fn zone_of(channel_name: &str) -> Option<&str> {
    field_at(channel_name, 1)
}

/// Subsystem field (position 2) of a channel name.
pub fn subsystem_of(channel_name: &str) -> Option<&str> {
    field_at(channel_name, 2)
}

/// Function field (position 3) of a channel name, parsed against the closed
/// function set.
pub fn function_of(channel_name: &str) -> Option<EndpointFunction> {
    field_at(channel_name, 3).and_then(EndpointFunction::from_wire_name)
}

/// Unique-id field (position 4) of a channel name.
pub fn unique_id_of(channel_name: &str) -> Option<&str> {
    field_at(channel_name, 4)
}

/// Builds the cluster logical name `service(instance-uuid)` carried by every
/// member address.
pub fn build_logical_name(service: &str, instance_id: &str) -> String {
    format!("{}({})", service, instance_id)
}

/// Service part of a logical name: everything before the first `(`.
/// A name with no `(` is treated as a bare service name.
pub fn service_name_of(logical_name: &str) -> &str {
    match logical_name.split_once('(') {
        Some((service, _)) => service,
        None => logical_name,
    }
}

/// Instance part of a logical name: the text between `(` and `)`.
pub fn instance_id_of(logical_name: &str) -> Option<&str> {
    let (_, rest) = logical_name.split_once('(')?;
    let (instance, _) = rest.split_once(')')?;
    Some(instance)
}
