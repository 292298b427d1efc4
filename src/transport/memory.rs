//! In-Memory Transport Hub
//!
//! A process-local [`ClusterTransport`] used by tests. The hub wires any
//! number of transports together: attaching or detaching a node republishes
//! the full view to every node, and unicast RPC calls the target's handler
//! directly. No sockets, no timing.

use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use super::{ClusterTransport, RpcHandler, TransportError, ViewListener};
use crate::membership::types::MemberAddress;

/// Connects in-memory transports by logical name.
pub struct InMemoryHub {
    nodes: DashMap<String, Arc<InMemoryTransport>>,
    next_port: AtomicU16,
}

impl InMemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            nodes: DashMap::new(),
            next_port: AtomicU16::new(40000),
        })
    }

    /// Creates a transport for `logical_name` and joins it to the hub.
    pub fn attach(self: &Arc<Self>, logical_name: &str) -> Arc<InMemoryTransport> {
        let port = self.next_port.fetch_add(1, Ordering::SeqCst);
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let transport = Arc::new(InMemoryTransport {
            hub: Arc::downgrade(self),
            local: MemberAddress::new(logical_name, addr),
            view_listener: Mutex::new(None),
            rpc_handler: Mutex::new(None),
        });
        self.nodes
            .insert(logical_name.to_string(), transport.clone());
        self.publish_views();
        transport
    }

    /// Removes a node from the hub, shrinking every remaining node's view.
    pub fn detach(&self, logical_name: &str) {
        self.nodes.remove(logical_name);
        self.publish_views();
    }

    /// Re-publishes the current view to every attached node. Useful after
    /// listeners have been registered post-attach.
    pub fn sync_views(&self) {
        self.publish_views();
    }

    fn member_view(&self) -> Vec<MemberAddress> {
        let mut view: Vec<MemberAddress> = self
            .nodes
            .iter()
            .map(|entry| entry.value().local.clone())
            .collect();
        view.sort_by(|a, b| a.logical_name.cmp(&b.logical_name));
        view
    }

    fn publish_views(&self) {
        let view = self.member_view();
        let nodes: Vec<Arc<InMemoryTransport>> =
            self.nodes.iter().map(|entry| entry.value().clone()).collect();
        for node in nodes {
            node.deliver_view(view.clone());
        }
    }
}

/// One node's endpoint into an [`InMemoryHub`].
pub struct InMemoryTransport {
    hub: Weak<InMemoryHub>,
    local: MemberAddress,
    view_listener: Mutex<Option<Arc<dyn ViewListener>>>,
    rpc_handler: Mutex<Option<Arc<dyn RpcHandler>>>,
}

impl InMemoryTransport {
    fn deliver_view(&self, view: Vec<MemberAddress>) {
        let listener = {
            let guard = self.view_listener.lock().unwrap_or_else(|e| e.into_inner());
            guard.clone()
        };
        if let Some(listener) = listener {
            listener.on_view(view);
        }
    }

    fn handler(&self) -> Option<Arc<dyn RpcHandler>> {
        let guard = self.rpc_handler.lock().unwrap_or_else(|e| e.into_inner());
        guard.clone()
    }
}

#[async_trait::async_trait]
impl ClusterTransport for InMemoryTransport {
    fn local_address(&self) -> MemberAddress {
        self.local.clone()
    }

    fn current_view(&self) -> Vec<MemberAddress> {
        match self.hub.upgrade() {
            Some(hub) => hub.member_view(),
            None => vec![self.local.clone()],
        }
    }

    fn set_view_listener(&self, listener: Arc<dyn ViewListener>) {
        let mut guard = self.view_listener.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(listener);
    }

    fn set_rpc_handler(&self, handler: Arc<dyn RpcHandler>) {
        let mut guard = self.rpc_handler.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(handler);
    }

    async fn unicast(
        &self,
        target: &MemberAddress,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let hub = self
            .hub
            .upgrade()
            .ok_or_else(|| TransportError::Unreachable(target.logical_name.clone()))?;

        let node = hub
            .nodes
            .get(&target.logical_name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::Unreachable(target.logical_name.clone()))?;

        let handler = node
            .handler()
            .ok_or_else(|| TransportError::Unreachable(target.logical_name.clone()))?;

        match tokio::time::timeout(timeout, handler.handle(&self.local, payload)).await {
            Ok(reply) => Ok(reply),
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }
}
