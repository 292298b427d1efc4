//! Runtime configuration for a Petasos node.
//!
//! All tunables live in one named-field struct assembled by the embedding
//! process at startup. There is no file or environment loading here; the
//! host service decides where values come from.

use std::time::Duration;

use crate::endpoint::types::ChannelScope;
use crate::naming::EndpointFunction;

/// Configuration for a single processing plant (node) in the cluster.
#[derive(Clone, Debug)]
pub struct PetasosConfig {
    /// Deployment site this node runs in (e.g. a data centre).
    pub site: String,
    /// Deployment zone within the site.
    pub zone: String,
    /// Deployment group within the zone.
    pub group: String,
    /// Subsystem (service) name of this node. Doubles as the service part
    /// of the cluster logical name `service(instance-uuid)`.
    pub subsystem_name: String,

    /// Delay before the first startup watchdog check.
    pub startup_check_delay: Duration,
    /// Period between startup watchdog checks.
    pub startup_check_period: Duration,
    /// Hard ceiling on how long startup may take before the aggregate is
    /// declared failed.
    pub max_startup_duration: Duration,

    /// Delay before the first ongoing watchdog check.
    pub ongoing_check_delay: Duration,
    /// Period between ongoing watchdog checks.
    pub ongoing_check_period: Duration,
    /// Consecutive suspect iterations tolerated before the aggregate is
    /// declared failed.
    pub suspect_failure_threshold: u32,

    /// Timeout applied to every unicast RPC over the cluster transport.
    pub rpc_timeout: Duration,

    /// Delay before the first subscription convergence check.
    pub subscription_check_delay: Duration,
    /// Period between subscription convergence checks.
    pub subscription_check_period: Duration,
    /// Consecutive no-op convergence ticks before the daemon stops itself.
    pub stabilisation_count: u32,

    /// Endpoint functions that must be present (single-site minimum viable
    /// set) before startup is considered complete.
    pub required_functions: Vec<EndpointFunction>,

    /// Scope applied to this node's owned channels: who may subscribe.
    pub channel_scope: ChannelScope,
}

impl Default for PetasosConfig {
    /// Defaults mirror the values the watchdogs and convergence loop were
    /// tuned with:
    /// - startup check: 5s delay / 5s period, 90s maximum
    /// - ongoing check: 10s delay / 30s period, suspect threshold 3
    /// - subscription check: 5s delay / 5s period, 10-tick stabilisation
    /// - RPC unicast timeout: 5s
    fn default() -> Self {
        Self {
            site: "site-a".to_string(),
            zone: "zone-a".to_string(),
            group: "group-a".to_string(),
            subsystem_name: "petasos".to_string(),
            startup_check_delay: Duration::from_secs(5),
            startup_check_period: Duration::from_secs(5),
            max_startup_duration: Duration::from_secs(90),
            ongoing_check_delay: Duration::from_secs(10),
            ongoing_check_period: Duration::from_secs(30),
            suspect_failure_threshold: 3,
            rpc_timeout: Duration::from_secs(5),
            subscription_check_delay: Duration::from_secs(5),
            subscription_check_period: Duration::from_secs(5),
            stabilisation_count: 10,
            required_functions: vec![
                EndpointFunction::Messaging,
                EndpointFunction::Topology,
                EndpointFunction::Subscriptions,
            ],
            channel_scope: ChannelScope::IntraZone,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values_match_tuning() {
        let cfg = PetasosConfig::default();

        assert_eq!(cfg.startup_check_period, Duration::from_secs(5));
        assert_eq!(cfg.max_startup_duration, Duration::from_secs(90));
        assert_eq!(cfg.ongoing_check_period, Duration::from_secs(30));
        assert_eq!(cfg.suspect_failure_threshold, 3);
        assert_eq!(cfg.stabilisation_count, 10);
        assert_eq!(cfg.required_functions.len(), 3);
    }
}
