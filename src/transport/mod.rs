//! Cluster Transport
//!
//! The narrow seam between coordination logic and the wire. Everything above
//! this module (membership tracking, subscription negotiation) talks to a
//! [`ClusterTransport`] and never to a socket, so the coordination layers
//! are unit-testable without a real cluster.
//!
//! ## Primitives
//! - **Join**: announce this node to the cluster via seed addresses.
//! - **View callback**: the transport pushes the full member view to a
//!   registered [`ViewListener`] whenever it changes. The callback runs on
//!   the transport's receive path and must not block.
//! - **Unicast RPC**: single-request/single-response with a bounded timeout.
//!   A timeout or transport error surfaces as a typed [`TransportError`];
//!   callers treat it the same as an application-level rejection.
//!
//! ## Implementations
//! - [`udp::UdpClusterTransport`]: UDP gossip membership with RPC envelopes
//!   multiplexed over the same socket.
//! - [`memory::InMemoryHub`]: a process-local hub for tests.

pub mod memory;
pub mod types;
pub mod udp;


use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::membership::types::MemberAddress;

/// Failures at the transport layer.
///
/// These never cross the RPC protocol boundary as errors: the coordination
/// layer converts them into declined responses or unreachable probe results.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("rpc timed out after {0:?}")]
    Timeout(Duration),
    #[error("peer {0} is not reachable")]
    Unreachable(String),
    #[error("wire codec failure: {0}")]
    Codec(String),
    #[error("socket failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Receives the full member view whenever it changes.
///
/// Invoked synchronously on the transport's callback path: implementations
/// only mutate local snapshots and enqueue follow-up work.
pub trait ViewListener: Send + Sync {
    fn on_view(&self, members: Vec<MemberAddress>);
}

/// Serves inbound unicast RPC payloads.
///
/// The handler owns the request/response encoding; the transport only moves
/// opaque bytes. Handlers never fail: protocol-level problems are encoded
/// into the reply payload.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, from: &MemberAddress, payload: Vec<u8>) -> Vec<u8>;
}

/// Group-communication channel: membership view plus unicast RPC.
#[async_trait]
pub trait ClusterTransport: Send + Sync {
    /// This node's own member address.
    fn local_address(&self) -> MemberAddress;

    /// The current member view, local node included.
    fn current_view(&self) -> Vec<MemberAddress>;

    /// Registers the single view listener. Later calls replace it.
    fn set_view_listener(&self, listener: Arc<dyn ViewListener>);

    /// Registers the single inbound RPC handler. Later calls replace it.
    fn set_rpc_handler(&self, handler: Arc<dyn RpcHandler>);

    /// Sends `payload` to `target` and waits for the single reply, bounded
    /// by `timeout`.
    async fn unicast(
        &self,
        target: &MemberAddress,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError>;
}
