//! Subscription Coordinator
//!
//! One per node. Serves the probe/subscribe/register RPC handlers, keeps the
//! endpoint map and the publisher/subscription registries, and drives the
//! convergence daemon that keeps re-attempting pending subscriptions until
//! the registries stabilise.
//!
//! Membership and watchdog callbacks arrive on their owners' callback paths,
//! so they only enqueue commands here; a single command loop does the actual
//! probing and announcing.

use anyhow::Result;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

use super::types::{
    CoordinationReply, CoordinationRequest, DataParcelManifest, ProbeOutcome,
    PublisherConnectionStatus, PublisherRegistration, PublisherUtilisation,
    SubscriptionRegistration, SubscriptionResponse, SubscriptionState,
};
use crate::config::PetasosConfig;
use crate::endpoint::types::{Endpoint, EndpointStatus};
use crate::endpoint::watchdog::{EndpointStatusWatchdog, PublisherEventListener};
use crate::membership::resolver::AddressResolver;
use crate::membership::tracker::MembershipChangeListener;
use crate::membership::types::MemberAddress;
use crate::metrics::agent::{now_ms, MetricsAgent};
use crate::transport::{ClusterTransport, RpcHandler};

/// Work enqueued from membership/watchdog callbacks.
enum CoordinatorCommand {
    ProbeMembers(Vec<MemberAddress>),
    MembersRemoved(Vec<MemberAddress>),
    AnnouncePublisher(Endpoint),
}

/// Negotiates publish/subscribe relationships for one node.
pub struct SubscriptionCoordinator {
    /// This node's subscriptions endpoint; the identity used in every
    /// outbound probe and subscription request.
    local_endpoint: Endpoint,
    transport: Arc<dyn ClusterTransport>,
    resolver: Arc<AddressResolver>,
    watchdog: Arc<EndpointStatusWatchdog>,
    metrics: Arc<MetricsAgent>,

    /// Remote endpoints learned from probes and requests, keyed by
    /// participant (channel) name.
    endpoints: DashMap<String, Endpoint>,
    /// Publisher registrations keyed by the publisher's participant name.
    publishers: DashMap<String, PublisherRegistration>,
    /// Subscription registrations keyed by publisher service name.
    subscriptions: DashMap<String, SubscriptionRegistration>,

    rpc_timeout: Duration,
    check_delay: Duration,
    check_period: Duration,
    stabilisation_count: u32,

    commands: UnboundedSender<CoordinatorCommand>,
    command_rx: Mutex<Option<UnboundedReceiver<CoordinatorCommand>>>,
    convergence_running: AtomicBool,
    convergence_token: Mutex<CancellationToken>,
    shutdown: CancellationToken,
}

impl SubscriptionCoordinator {
    pub fn new(
        local_endpoint: Endpoint,
        transport: Arc<dyn ClusterTransport>,
        resolver: Arc<AddressResolver>,
        watchdog: Arc<EndpointStatusWatchdog>,
        metrics: Arc<MetricsAgent>,
        config: &PetasosConfig,
    ) -> Arc<Self> {
        let (commands, command_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            local_endpoint,
            transport,
            resolver,
            watchdog,
            metrics,
            endpoints: DashMap::new(),
            publishers: DashMap::new(),
            subscriptions: DashMap::new(),
            rpc_timeout: config.rpc_timeout,
            check_delay: config.subscription_check_delay,
            check_period: config.subscription_check_period,
            stabilisation_count: config.stabilisation_count,
            commands,
            command_rx: Mutex::new(Some(command_rx)),
            convergence_running: AtomicBool::new(false),
            convergence_token: Mutex::new(CancellationToken::new()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Registers the RPC handler with the transport and spawns the command
    /// loop. Membership/watchdog listener registration is done by the owner
    /// assembling the node.
    pub fn start(self: &Arc<Self>) {
        self.transport.set_rpc_handler(self.clone());

        let receiver = {
            let mut guard = self.command_rx.lock().unwrap_or_else(|e| e.into_inner());
            guard.take()
        };
        let Some(mut receiver) = receiver else {
            tracing::warn!("Subscription coordinator already started");
            return;
        };

        let coordinator = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = coordinator.shutdown.cancelled() => break,
                    command = receiver.recv() => {
                        let Some(command) = command else { break };
                        match command {
                            CoordinatorCommand::ProbeMembers(members) => {
                                for member in &members {
                                    coordinator.probe_member(member).await;
                                }
                                coordinator.ensure_convergence_scheduled();
                            }
                            CoordinatorCommand::MembersRemoved(members) => {
                                coordinator.mark_members_unreachable(&members);
                            }
                            CoordinatorCommand::AnnouncePublisher(endpoint) => {
                                coordinator.announce_publisher(&endpoint).await;
                            }
                        }
                    }
                }
            }
        });
    }

    /// Stops the command loop and the convergence daemon.
    pub fn stop(&self) {
        self.shutdown.cancel();
        let token = self.convergence_token.lock().unwrap_or_else(|e| e.into_inner());
        token.cancel();
    }

    fn component_id(&self) -> &str {
        &self.local_endpoint.component_id
    }

    /// The local endpoint annotated with the current aggregate status.
    pub fn local_endpoint_snapshot(&self) -> Endpoint {
        self.local_endpoint
            .with_status(self.watchdog.aggregate_status())
    }

    // --------------------------------------------------------
    // Client side
    // --------------------------------------------------------

    async fn call(
        &self,
        member: &MemberAddress,
        request: &CoordinationRequest,
    ) -> Result<CoordinationReply> {
        let payload = bincode::serialize(request)?;
        let reply = self
            .transport
            .unicast(member, payload, self.rpc_timeout)
            .await?;
        Ok(bincode::deserialize(&reply)?)
    }

    /// Synchronous health/identity probe of one member. Transport failures
    /// and unexpected replies all collapse into `Unreachable`.
    pub async fn probe_member(&self, member: &MemberAddress) -> ProbeOutcome {
        if member.logical_name == self.transport.local_address().logical_name {
            return ProbeOutcome::Reachable(self.local_endpoint_snapshot());
        }

        let request = CoordinationRequest::ProbeEndpoint {
            requester: self.local_endpoint_snapshot(),
        };

        match self.call(member, &request).await {
            Ok(CoordinationReply::Probe { endpoint }) => {
                tracing::debug!(
                    "Probe of {} returned {} ({:?})",
                    member.logical_name,
                    endpoint.channel_name,
                    endpoint.status
                );
                self.metrics.increment(self.component_id(), "probes-succeeded");
                self.metrics.touch_instant(self.component_id(), "last-probe");
                self.note_remote_endpoint(endpoint.clone(), Some(member.logical_name.clone()));
                ProbeOutcome::Reachable(endpoint)
            }
            Ok(other) => {
                tracing::warn!(
                    "Probe of {} returned unexpected reply {:?}; treating as unreachable",
                    member.logical_name,
                    other
                );
                self.metrics.increment(self.component_id(), "probes-failed");
                ProbeOutcome::Unreachable
            }
            Err(e) => {
                tracing::warn!(
                    "Probe of {} failed: {}; treating as unreachable",
                    member.logical_name,
                    e
                );
                self.metrics.increment(self.component_id(), "probes-failed");
                ProbeOutcome::Unreachable
            }
        }
    }

    /// Declares interest in a publisher service. Idempotent per service;
    /// manifests are merged in.
    pub fn subscribe_to_service(
        self: &Arc<Self>,
        service_name: &str,
        manifests: Vec<DataParcelManifest>,
    ) {
        match self.subscriptions.entry(service_name.to_string()) {
            Entry::Occupied(mut existing) => {
                let registration = existing.get_mut();
                for manifest in manifests {
                    if !registration.manifests.contains(&manifest) {
                        registration.manifests.push(manifest);
                    }
                }
            }
            Entry::Vacant(vacant) => {
                tracing::info!(
                    "Created subscription registration for service {} (no providers yet)",
                    service_name
                );
                vacant.insert(SubscriptionRegistration {
                    publisher_service_name: service_name.to_string(),
                    manifests,
                    state: SubscriptionState::PendingNoProviders,
                    created_at_ms: now_ms(),
                });
            }
        }
        self.ensure_convergence_scheduled();
    }

    /// Records a remote endpoint and registers it as a candidate publisher.
    fn note_remote_endpoint(&self, endpoint: Endpoint, member_logical_name: Option<String>) {
        self.endpoints
            .insert(endpoint.channel_name.clone(), endpoint.clone());
        self.upsert_publisher(endpoint, member_logical_name);
    }

    fn upsert_publisher(
        &self,
        endpoint: Endpoint,
        member_logical_name: Option<String>,
    ) -> PublisherRegistration {
        match self.publishers.entry(endpoint.channel_name.clone()) {
            Entry::Occupied(mut existing) => {
                let registration = existing.get_mut();
                registration.publisher = endpoint;
                if member_logical_name.is_some() {
                    registration.member_logical_name = member_logical_name;
                }
                registration.clone()
            }
            Entry::Vacant(vacant) => {
                tracing::info!(
                    "Registered publisher {} for service {}",
                    endpoint.channel_name,
                    endpoint.service_name()
                );
                let registration = PublisherRegistration {
                    publisher: endpoint,
                    member_logical_name,
                    connection_status: PublisherConnectionStatus::NotEstablished,
                    utilisation: PublisherUtilisation::Registered,
                    registered_at_ms: now_ms(),
                };
                vacant.insert(registration.clone());
                registration
            }
        }
    }

    /// Walks every subscription registration against every known publisher
    /// of that service and issues subscription requests where state allows.
    ///
    /// Returns whether another check is required: any registration still
    /// pending, or any publisher still not utilised.
    pub async fn perform_full_subscription_check(&self) -> bool {
        let services: Vec<String> = self
            .subscriptions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        for service in services {
            let manifests = match self.subscriptions.get(&service) {
                Some(registration) => registration.manifests.clone(),
                None => continue,
            };

            let candidates: Vec<PublisherRegistration> = self
                .publishers
                .iter()
                .filter(|entry| entry.value().publisher.service_name() == service)
                .map(|entry| entry.value().clone())
                .collect();

            for candidate in candidates {
                if !matches!(
                    candidate.utilisation,
                    PublisherUtilisation::Registered | PublisherUtilisation::NotUtilised
                ) {
                    continue;
                }
                if candidate.publisher.status != EndpointStatus::Operational {
                    continue;
                }
                if !candidate.publisher.scope.permits(
                    &candidate.publisher.deployment,
                    &self.local_endpoint.deployment,
                ) {
                    continue;
                }

                let Some(member) = self.resolve_publisher_member(&candidate) else {
                    tracing::debug!(
                        "Publisher {} has no resolvable member; skipping",
                        candidate.publisher.channel_name
                    );
                    continue;
                };

                self.attempt_subscription(&service, &member, &candidate, manifests.clone())
                    .await;
            }
        }

        let pending_subscriptions = self
            .subscriptions
            .iter()
            .any(|entry| entry.value().state == SubscriptionState::PendingNoProviders);
        let unutilised_publishers = self
            .publishers
            .iter()
            .any(|entry| entry.value().utilisation == PublisherUtilisation::NotUtilised);

        pending_subscriptions || unutilised_publishers
    }

    fn resolve_publisher_member(&self, candidate: &PublisherRegistration) -> Option<MemberAddress> {
        if let Some(logical_name) = &candidate.member_logical_name {
            if let Some(member) = self.resolver.find_exact(logical_name) {
                return Some(member);
            }
        }
        self.resolver
            .find_first_with_prefix(candidate.publisher.service_name())
    }

    async fn attempt_subscription(
        &self,
        service: &str,
        member: &MemberAddress,
        candidate: &PublisherRegistration,
        manifests: Vec<DataParcelManifest>,
    ) {
        let request = CoordinationRequest::RequestSubscription {
            subscriber: self.local_endpoint_snapshot(),
            manifests,
        };

        match self.call(member, &request).await {
            Ok(CoordinationReply::Subscription(response)) if response.accepted => {
                tracing::info!(
                    "Subscription to {} accepted by {}",
                    service,
                    candidate.publisher.channel_name
                );
                self.metrics
                    .increment(self.component_id(), "subscriptions-activated");
                self.mark_subscription_active(service);
                self.mark_publisher(
                    &candidate.publisher.channel_name,
                    PublisherConnectionStatus::Established,
                    PublisherUtilisation::Utilised,
                );
            }
            Ok(CoordinationReply::Subscription(response)) => {
                tracing::debug!(
                    "Subscription to {} declined by {}: {}",
                    service,
                    candidate.publisher.channel_name,
                    response.commentary
                );
                self.metrics
                    .increment(self.component_id(), "subscriptions-declined");
                self.mark_publisher(
                    &candidate.publisher.channel_name,
                    PublisherConnectionStatus::Established,
                    PublisherUtilisation::NotUtilised,
                );
            }
            Ok(other) => {
                tracing::warn!(
                    "Subscription request to {} returned unexpected reply {:?}",
                    candidate.publisher.channel_name,
                    other
                );
                self.mark_publisher(
                    &candidate.publisher.channel_name,
                    PublisherConnectionStatus::Failed,
                    PublisherUtilisation::NotUtilised,
                );
            }
            Err(e) => {
                // Transport trouble is handled exactly like a decline.
                tracing::warn!(
                    "Subscription request to {} failed: {}",
                    candidate.publisher.channel_name,
                    e
                );
                self.metrics
                    .increment(self.component_id(), "subscriptions-transport-failures");
                self.mark_publisher(
                    &candidate.publisher.channel_name,
                    PublisherConnectionStatus::Failed,
                    PublisherUtilisation::NotUtilised,
                );
            }
        }
    }

    fn mark_subscription_active(&self, service: &str) {
        if let Some(mut registration) = self.subscriptions.get_mut(service) {
            registration.state = SubscriptionState::Active;
        }
    }

    fn mark_publisher(
        &self,
        participant_name: &str,
        connection_status: PublisherConnectionStatus,
        utilisation: PublisherUtilisation,
    ) {
        if let Some(mut registration) = self.publishers.get_mut(participant_name) {
            registration.connection_status = connection_status;
            registration.utilisation = utilisation;
        }
    }

    fn mark_members_unreachable(&self, members: &[MemberAddress]) {
        for member in members {
            for mut entry in self.publishers.iter_mut() {
                let registration = entry.value_mut();
                if registration.member_logical_name.as_deref() == Some(&member.logical_name) {
                    tracing::info!(
                        "Publisher {} lost its member {}; marking unreachable",
                        registration.publisher.channel_name,
                        member.logical_name
                    );
                    registration.connection_status = PublisherConnectionStatus::Failed;
                    registration.publisher.status = EndpointStatus::Unreachable;
                }
            }
        }
    }

    /// Announces an owned publisher endpoint to every other member.
    async fn announce_publisher(&self, endpoint: &Endpoint) {
        let members = self.resolver.all_members_except_self();
        if members.is_empty() {
            return;
        }

        let request = CoordinationRequest::RegisterPublisher {
            publisher: endpoint.clone(),
        };
        for member in members {
            match self.call(&member, &request).await {
                Ok(CoordinationReply::PublisherRegistered(registration)) => {
                    tracing::debug!(
                        "Announced publisher {} to {} (utilisation {:?})",
                        endpoint.channel_name,
                        member.logical_name,
                        registration.utilisation
                    );
                }
                Ok(other) => {
                    tracing::warn!(
                        "Publisher announcement to {} returned unexpected reply {:?}",
                        member.logical_name,
                        other
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "Publisher announcement to {} failed: {}",
                        member.logical_name,
                        e
                    );
                }
            }
        }
    }

    /// Spawns the convergence daemon unless it is already running. Safe to
    /// call from anywhere a membership event lands.
    pub fn ensure_convergence_scheduled(self: &Arc<Self>) {
        if self.convergence_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let token = CancellationToken::new();
        {
            let mut guard = self
                .convergence_token
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            *guard = token.clone();
        }

        let coordinator = self.clone();
        tokio::spawn(async move {
            tracing::info!("Subscription convergence daemon armed");
            tokio::time::sleep(coordinator.check_delay).await;
            let mut interval = tokio::time::interval(coordinator.check_period);
            let mut stable_ticks = 0u32;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = coordinator.shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let more_required = coordinator.perform_full_subscription_check().await;
                if more_required {
                    stable_ticks = 0;
                } else {
                    stable_ticks += 1;
                }

                if stable_ticks >= coordinator.stabilisation_count {
                    tracing::info!(
                        "Subscription map stable for {} checks; convergence daemon pausing",
                        stable_ticks
                    );
                    break;
                }
            }

            coordinator.convergence_running.store(false, Ordering::SeqCst);
        });
    }

    // --------------------------------------------------------
    // Server side (RPC handlers)
    // --------------------------------------------------------

    /// Handles an inbound probe: records the caller's endpoint, replies with
    /// the local endpoint annotated with the current aggregate status.
    pub fn handle_probe(&self, requester: Endpoint) -> Endpoint {
        tracing::debug!("Probed by {}", requester.channel_name);
        self.endpoints
            .insert(requester.channel_name.clone(), requester);
        self.metrics.increment(self.component_id(), "probes-served");
        self.local_endpoint_snapshot()
    }

    /// Handles an inbound subscription request. Never fails: scope and
    /// status problems become declined responses with commentary.
    pub fn handle_subscription_request(
        &self,
        subscriber: Endpoint,
        manifests: Vec<DataParcelManifest>,
    ) -> SubscriptionResponse {
        let local = self.local_endpoint_snapshot();
        self.endpoints
            .insert(subscriber.channel_name.clone(), subscriber.clone());

        if !local
            .scope
            .permits(&local.deployment, &subscriber.deployment)
        {
            tracing::info!(
                "Declined subscription from {}: outside {:?} scope",
                subscriber.channel_name,
                local.scope
            );
            self.metrics
                .increment(self.component_id(), "subscriptions-refused-scope");
            return SubscriptionResponse {
                publisher: local.clone(),
                accepted: false,
                commentary: format!(
                    "subscriber {} is not within the {:?} scope supported by this channel",
                    subscriber.channel_name, local.scope
                ),
                registration_status: SubscriptionState::PendingNoProviders,
                registration_instant_ms: now_ms(),
            };
        }

        if local.status != EndpointStatus::Operational {
            tracing::info!(
                "Declined subscription from {}: publisher aggregate is {:?}",
                subscriber.channel_name,
                local.status
            );
            self.metrics
                .increment(self.component_id(), "subscriptions-refused-status");
            return SubscriptionResponse {
                publisher: local.clone(),
                accepted: false,
                commentary: format!(
                    "publisher is not operational (currently {:?})",
                    local.status
                ),
                registration_status: SubscriptionState::PendingNoProviders,
                registration_instant_ms: now_ms(),
            };
        }

        tracing::info!(
            "Accepted subscription from {} ({} manifests)",
            subscriber.channel_name,
            manifests.len()
        );
        self.metrics
            .increment(self.component_id(), "subscriptions-accepted");
        SubscriptionResponse {
            publisher: local,
            accepted: true,
            commentary: "subscription registered".to_string(),
            registration_status: SubscriptionState::Active,
            registration_instant_ms: now_ms(),
        }
    }

    /// Handles an inbound publisher announcement: upserts the registration
    /// and returns it.
    pub fn handle_register_publisher(
        &self,
        publisher: Endpoint,
        member_logical_name: Option<String>,
    ) -> PublisherRegistration {
        self.metrics
            .increment(self.component_id(), "publishers-registered");
        self.upsert_publisher(publisher, member_logical_name)
    }

    // --------------------------------------------------------
    // Registry access
    // --------------------------------------------------------

    pub fn known_endpoint(&self, channel_name: &str) -> Option<Endpoint> {
        self.endpoints
            .get(channel_name)
            .map(|entry| entry.value().clone())
    }

    pub fn publisher_registration(&self, participant_name: &str) -> Option<PublisherRegistration> {
        self.publishers
            .get(participant_name)
            .map(|entry| entry.value().clone())
    }

    pub fn subscription_registration(&self, service: &str) -> Option<SubscriptionRegistration> {
        self.subscriptions
            .get(service)
            .map(|entry| entry.value().clone())
    }

    pub fn publisher_registrations_for_service(&self, service: &str) -> Vec<PublisherRegistration> {
        self.publishers
            .iter()
            .filter(|entry| entry.value().publisher.service_name() == service)
            .map(|entry| entry.value().clone())
            .collect()
    }
}

impl MembershipChangeListener for SubscriptionCoordinator {
    fn on_membership_change(&self, added: &[MemberAddress], removed: &[MemberAddress]) {
        if !added.is_empty() {
            let _ = self
                .commands
                .send(CoordinatorCommand::ProbeMembers(added.to_vec()));
        }
        if !removed.is_empty() {
            let _ = self
                .commands
                .send(CoordinatorCommand::MembersRemoved(removed.to_vec()));
        }
    }
}

impl PublisherEventListener for SubscriptionCoordinator {
    fn on_publisher_visible(&self, endpoint: &Endpoint) {
        let _ = self
            .commands
            .send(CoordinatorCommand::AnnouncePublisher(endpoint.clone()));
    }
}

#[async_trait::async_trait]
impl RpcHandler for SubscriptionCoordinator {
    async fn handle(&self, from: &MemberAddress, payload: Vec<u8>) -> Vec<u8> {
        let reply = match bincode::deserialize::<CoordinationRequest>(&payload) {
            Ok(CoordinationRequest::ProbeEndpoint { requester }) => CoordinationReply::Probe {
                endpoint: self.handle_probe(requester),
            },
            Ok(CoordinationRequest::RequestSubscription {
                subscriber,
                manifests,
            }) => CoordinationReply::Subscription(
                self.handle_subscription_request(subscriber, manifests),
            ),
            Ok(CoordinationRequest::RegisterPublisher { publisher }) => {
                CoordinationReply::PublisherRegistered(self.handle_register_publisher(
                    publisher,
                    Some(from.logical_name.clone()),
                ))
            }
            Err(e) => {
                tracing::warn!("Malformed coordination request from {}: {}", from, e);
                CoordinationReply::Malformed {
                    commentary: "request payload could not be decoded".to_string(),
                }
            }
        };

        match bincode::serialize(&reply) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!("Failed to serialize coordination reply: {}", e);
                Vec::new()
            }
        }
    }
}
