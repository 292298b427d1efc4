//! Subscription Protocol Definitions
//!
//! DTOs exchanged between subscription coordinators, plus the registry
//! records they maintain. Everything here crosses the wire or is returned
//! to RPC callers, so all types are serde-serializable.

use serde::{Deserialize, Serialize};

use crate::endpoint::types::Endpoint;

/// Connection state of a remote publisher as seen from this node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PublisherConnectionStatus {
    NotEstablished,
    Established,
    Failed,
}

/// Whether a known publisher is actually feeding any local subscription.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PublisherUtilisation {
    /// Known, no subscription attempt has concluded yet.
    Registered,
    /// At least one subscription against it is active.
    Utilised,
    /// A subscription attempt concluded without success.
    NotUtilised,
}

/// State of a service-level subscription registration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SubscriptionState {
    /// No publisher instance has accepted yet.
    PendingNoProviders,
    /// Some instance accepted; data should be flowing.
    Active,
}

/// Describes one parcel of data a subscriber wants delivered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataParcelManifest {
    pub content_type: String,
    pub version: String,
}

impl DataParcelManifest {
    pub fn new(content_type: &str, version: &str) -> Self {
        Self {
            content_type: content_type.to_string(),
            version: version.to_string(),
        }
    }
}

/// A remote publisher known to this node.
///
/// Created on first discovery or first successful subscription response and
/// updated on every probe/response. Entries are never removed automatically;
/// stale ones persist until overwritten.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublisherRegistration {
    pub publisher: Endpoint,
    /// Logical name of the cluster member the publisher was learned from.
    pub member_logical_name: Option<String>,
    pub connection_status: PublisherConnectionStatus,
    pub utilisation: PublisherUtilisation,
    pub registered_at_ms: u64,
}

/// A service-level subscription: one per distinct (subscriber, publisher
/// service) pair, regardless of how many instances the service has.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscriptionRegistration {
    pub publisher_service_name: String,
    pub manifests: Vec<DataParcelManifest>,
    pub state: SubscriptionState,
    pub created_at_ms: u64,
}

/// Requests routed between coordinators over the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CoordinationRequest {
    ProbeEndpoint {
        requester: Endpoint,
    },
    RequestSubscription {
        subscriber: Endpoint,
        manifests: Vec<DataParcelManifest>,
    },
    RegisterPublisher {
        publisher: Endpoint,
    },
}

/// Replies to [`CoordinationRequest`]s. Malformed requests get a reply too:
/// the handler never fails the transport exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CoordinationReply {
    Probe {
        endpoint: Endpoint,
    },
    Subscription(SubscriptionResponse),
    PublisherRegistered(PublisherRegistration),
    Malformed {
        commentary: String,
    },
}

/// Outcome of a subscription request, accepted or not.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscriptionResponse {
    pub publisher: Endpoint,
    pub accepted: bool,
    pub commentary: String,
    pub registration_status: SubscriptionState,
    pub registration_instant_ms: u64,
}

/// Result of probing a remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Reachable(Endpoint),
    Unreachable,
}
