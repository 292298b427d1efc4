use serde::{Deserialize, Serialize};

use crate::naming::{self, EndpointFunction};

/// Observable health of a single endpoint.
///
/// `Started`/`Operational`/`Suspect`/`Failed` are the lifecycle states an
/// owning subsystem reports for its own endpoints; `Detected`/`Reachable`/
/// `Unreachable` are probe-derived states recorded for remote endpoints.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EndpointStatus {
    Started,
    Operational,
    Suspect,
    Failed,
    Detected,
    Reachable,
    Unreachable,
}

/// Topological boundary within which a channel accepts subscriptions and
/// probes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChannelScope {
    IntraZone,
    InterZone,
    InterSite,
}

impl ChannelScope {
    /// Whether a requester deployed at `requester` falls inside this scope
    /// relative to the channel owner's deployment at `owner`.
    pub fn permits(&self, owner: &DeploymentPlace, requester: &DeploymentPlace) -> bool {
        match self {
            ChannelScope::IntraZone => {
                owner.site == requester.site && owner.zone == requester.zone
            }
            ChannelScope::InterZone => owner.site == requester.site,
            ChannelScope::InterSite => true,
        }
    }
}

/// Deployment coordinates supplied by the directory layer. Read-only input
/// to naming and scope resolution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentPlace {
    pub site: String,
    pub zone: String,
    pub group: String,
}

/// A named, typed communication channel belonging to a subsystem.
///
/// Created when a node establishes the channel; mutated by the watchdog and
/// by remote probe handlers; never deleted while the node is alive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Endpoint {
    /// Subsystem (service) that owns the channel.
    pub subsystem_name: String,
    /// Full participant name: `site::zone::subsystem::function::uuid`.
    pub channel_name: String,
    /// Where the owning subsystem is deployed.
    pub deployment: DeploymentPlace,
    /// Detailed address name used in operator-facing output.
    pub detailed_address_name: String,
    /// Component id of the owning component.
    pub component_id: String,
    /// Id of the processing plant (node) owning this endpoint.
    pub processing_plant_id: String,
    /// What the channel is for.
    pub function: EndpointFunction,
    /// Boundary within which subscriptions to this channel are accepted.
    pub scope: ChannelScope,
    /// Current observable status.
    pub status: EndpointStatus,
}

impl Endpoint {
    /// Creates an endpoint in `Started` state with a freshly minted
    /// participant name.
    pub fn new(
        subsystem_name: &str,
        function: EndpointFunction,
        deployment: DeploymentPlace,
        component_id: &str,
        processing_plant_id: &str,
        scope: ChannelScope,
    ) -> Self {
        let unique_id = uuid::Uuid::new_v4().to_string();
        let channel_name = naming::build_channel_name(
            &deployment.site,
            &deployment.zone,
            subsystem_name,
            function,
            &unique_id,
        );
        let detailed_address_name = format!("{}.{}", subsystem_name, function.wire_name());
        Self {
            subsystem_name: subsystem_name.to_string(),
            channel_name,
            deployment,
            detailed_address_name,
            component_id: component_id.to_string(),
            processing_plant_id: processing_plant_id.to_string(),
            function,
            scope,
            status: EndpointStatus::Started,
        }
    }

    /// Service name this endpoint publishes under.
    pub fn service_name(&self) -> &str {
        &self.subsystem_name
    }

    /// Clone with a different status. Used to annotate probe replies.
    pub fn with_status(&self, status: EndpointStatus) -> Self {
        let mut endpoint = self.clone();
        endpoint.status = status;
        endpoint
    }
}
