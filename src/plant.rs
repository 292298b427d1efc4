//! Processing Plant assembly.
//!
//! Explicit constructor wiring of one node's subsystems: tracker on the
//! transport's view callback, coordinator on the transport's RPC handler and
//! on the tracker/watchdog listener lists, task controller and reporting
//! agents alongside. The embedding process creates and starts the transport,
//! hands it in, and calls [`ProcessingPlant::start`].

use std::sync::Arc;
use std::time::Duration;

use crate::config::PetasosConfig;
use crate::endpoint::types::{DeploymentPlace, Endpoint};
use crate::endpoint::watchdog::EndpointStatusWatchdog;
use crate::membership::resolver::AddressResolver;
use crate::membership::tracker::MembershipTracker;
use crate::metrics::agent::MetricsAgent;
use crate::metrics::notifications::{NotificationForwarder, NotificationSink};
use crate::naming::EndpointFunction;
use crate::pubsub::coordinator::SubscriptionCoordinator;
use crate::task::controller::TaskLifecycleController;
use crate::transport::ClusterTransport;

const NOTIFICATION_DRAIN_PERIOD: Duration = Duration::from_secs(5);

/// One fully wired Petasos node.
pub struct ProcessingPlant {
    pub plant_id: String,
    pub membership: Arc<MembershipTracker>,
    pub resolver: Arc<AddressResolver>,
    pub watchdog: Arc<EndpointStatusWatchdog>,
    pub coordinator: Arc<SubscriptionCoordinator>,
    pub tasks: Arc<TaskLifecycleController>,
    pub metrics: Arc<MetricsAgent>,
    pub notifications: Arc<NotificationForwarder>,
}

impl ProcessingPlant {
    /// Wires every subsystem together. The transport must already be
    /// created (and is started separately by its owner).
    pub fn assemble(
        config: &PetasosConfig,
        transport: Arc<dyn ClusterTransport>,
        notification_sink: Arc<dyn NotificationSink>,
    ) -> Arc<Self> {
        let plant_id = uuid::Uuid::new_v4().to_string();

        let metrics = MetricsAgent::new();
        let notifications =
            NotificationForwarder::new(notification_sink, NOTIFICATION_DRAIN_PERIOD);

        let membership = MembershipTracker::new(transport.local_address());
        transport.set_view_listener(membership.clone());
        let resolver = AddressResolver::new(membership.clone());

        let watchdog =
            EndpointStatusWatchdog::new(config, metrics.clone(), notifications.clone());

        let deployment = DeploymentPlace {
            site: config.site.clone(),
            zone: config.zone.clone(),
            group: config.group.clone(),
        };
        for function in &config.required_functions {
            watchdog.register_owned_endpoint(Endpoint::new(
                &config.subsystem_name,
                *function,
                deployment.clone(),
                &format!("{}-{}", config.subsystem_name, function.wire_name()),
                &plant_id,
                config.channel_scope,
            ));
        }

        let local_endpoint = watchdog
            .owned_endpoint(EndpointFunction::Subscriptions)
            .unwrap_or_else(|| {
                Endpoint::new(
                    &config.subsystem_name,
                    EndpointFunction::Subscriptions,
                    deployment.clone(),
                    &format!("{}-subscriptions", config.subsystem_name),
                    &plant_id,
                    config.channel_scope,
                )
            });

        let coordinator = SubscriptionCoordinator::new(
            local_endpoint,
            transport,
            resolver.clone(),
            watchdog.clone(),
            metrics.clone(),
            config,
        );
        membership.register_listener(coordinator.clone());
        watchdog.register_listener(coordinator.clone());

        let tasks = TaskLifecycleController::new(&config.subsystem_name, metrics.clone());

        Arc::new(Self {
            plant_id,
            membership,
            resolver,
            watchdog,
            coordinator,
            tasks,
            metrics,
            notifications,
        })
    }

    /// Starts every daemon: notification drain, RPC serving + command loop,
    /// and the startup watchdog (which schedules the ongoing watchdog once
    /// startup completes).
    pub fn start(&self) {
        tracing::info!("Starting processing plant {}", self.plant_id);
        self.notifications.start();
        self.coordinator.start();
        self.watchdog.start();
    }

    /// Stops every daemon. The transport is stopped by its owner.
    pub fn stop(&self) {
        tracing::info!("Stopping processing plant {}", self.plant_id);
        self.watchdog.stop();
        self.coordinator.stop();
        self.notifications.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::types::EndpointStatus;
    use crate::endpoint::watchdog::StartupCheck;
    use crate::metrics::notifications::LogNotificationSink;
    use crate::transport::memory::InMemoryHub;

    #[tokio::test]
    async fn test_assembled_plant_reaches_operational() {
        let hub = InMemoryHub::new();
        let transport = hub.attach("petasos(plant-1)");

        let config = PetasosConfig::default();
        let plant = ProcessingPlant::assemble(&config, transport, Arc::new(LogNotificationSink));

        // The required endpoints were registered in Started state.
        assert_eq!(plant.watchdog.owned_endpoints().len(), 3);
        assert_eq!(
            plant.watchdog.run_startup_check(),
            StartupCheck::Warming(EndpointStatus::Started)
        );

        // Once every owned endpoint reports operational, startup completes.
        for function in &config.required_functions {
            plant
                .watchdog
                .update_owned_status(*function, EndpointStatus::Operational);
        }
        assert_eq!(plant.watchdog.run_startup_check(), StartupCheck::Complete);
        assert_eq!(plant.watchdog.aggregate_status(), EndpointStatus::Operational);
    }
}
