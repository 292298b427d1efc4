//! UDP Cluster Transport
//!
//! Group communication over a single UDP socket. Membership is maintained by
//! a lightweight gossip exchange: nodes join via seed addresses, ping a
//! random peer each interval with their member list piggy-backed, and sweep
//! out peers that have gone silent (Alive -> Suspect -> removed). Unicast
//! RPC envelopes ride the same socket and are matched to callers by
//! correlation id.
//!
//! ## Responsibilities
//! - **Discovery**: Join/Ping/Ack exchange keeps every node's peer table in
//!   sync with the cluster.
//! - **Failure detection**: a sweep loop demotes silent peers to Suspect and
//!   removes them after the expiry timeout, shrinking the published view.
//! - **View publication**: the registered [`ViewListener`] receives the full
//!   member view whenever the set changes.
//! - **RPC**: request/response envelopes with per-call timeout; replies are
//!   routed to the awaiting caller through a pending-reply table.

use anyhow::Result;
use dashmap::DashMap;
use rand::Rng;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::types::{PeerRecord, WireMessage};
use super::{ClusterTransport, RpcHandler, TransportError, ViewListener};
use crate::membership::types::MemberAddress;

const RECV_BUFFER_SIZE: usize = 65536;
const SEND_ATTEMPTS: usize = 3;

/// Gossip cadence and liveness timeouts.
#[derive(Clone, Debug)]
pub struct TransportTiming {
    /// Period between gossip pings to a random peer.
    pub ping_interval: Duration,
    /// Period between failure-detection sweeps.
    pub sweep_interval: Duration,
    /// Silence after which a peer is marked Suspect.
    pub suspect_timeout: Duration,
    /// Silence after which a peer is removed from the view.
    pub expiry_timeout: Duration,
}

impl Default for TransportTiming {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_millis(500),
            sweep_interval: Duration::from_secs(2),
            suspect_timeout: Duration::from_secs(5),
            expiry_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerLiveness {
    Alive,
    Suspect,
}

struct PeerState {
    record: PeerRecord,
    liveness: PeerLiveness,
    last_seen: Instant,
}

/// UDP implementation of [`ClusterTransport`].
pub struct UdpClusterTransport {
    local: MemberAddress,
    socket: Arc<UdpSocket>,
    seeds: Vec<SocketAddr>,
    /// Peer table keyed by logical name.
    peers: DashMap<String, PeerState>,
    /// In-flight RPC calls keyed by correlation id.
    pending: DashMap<String, oneshot::Sender<Vec<u8>>>,
    view_listener: Mutex<Option<Arc<dyn ViewListener>>>,
    rpc_handler: Mutex<Option<Arc<dyn RpcHandler>>>,
    /// Last view handed to the listener; views are only re-published on change.
    last_view: Mutex<Vec<MemberAddress>>,
    timing: TransportTiming,
    shutdown: CancellationToken,
}

impl UdpClusterTransport {
    /// Binds the socket and announces this node to the seed addresses.
    pub async fn new(
        logical_name: &str,
        bind_addr: SocketAddr,
        seeds: Vec<SocketAddr>,
        timing: TransportTiming,
    ) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(bind_addr).await?;
        let bound_addr = socket.local_addr()?;
        let local = MemberAddress::new(logical_name, bound_addr);

        let transport = Arc::new(Self {
            local: local.clone(),
            socket: Arc::new(socket),
            seeds: seeds.clone(),
            peers: DashMap::new(),
            pending: DashMap::new(),
            view_listener: Mutex::new(None),
            rpc_handler: Mutex::new(None),
            last_view: Mutex::new(Vec::new()),
            timing,
            shutdown: CancellationToken::new(),
        });

        if !seeds.is_empty() {
            tracing::info!("Joining cluster via {} seed node(s)", seeds.len());
            let msg = WireMessage::Join {
                member: PeerRecord::from_member_address(&local),
            };
            let encoded = bincode::serialize(&msg)?;
            for seed in &seeds {
                transport.socket.send_to(&encoded, seed).await?;
                tracing::info!("Sent join request to {}", seed);
            }
        }

        Ok(transport)
    }

    /// Spawns the receive, gossip and sweep loops and returns immediately.
    pub fn start(self: &Arc<Self>) {
        tracing::info!("Starting cluster transport on {}", self.local.addr);

        let receiver = self.clone();
        tokio::spawn(async move {
            receiver.receive_loop().await;
        });

        let pinger = self.clone();
        tokio::spawn(async move {
            pinger.ping_loop().await;
        });

        let sweeper = self.clone();
        tokio::spawn(async move {
            sweeper.sweep_loop().await;
        });
    }

    /// Announces departure to known peers and stops all loops.
    pub async fn stop(&self) {
        let msg = WireMessage::Leave {
            from: PeerRecord::from_member_address(&self.local),
        };
        if let Ok(encoded) = bincode::serialize(&msg) {
            let targets: Vec<SocketAddr> =
                self.peers.iter().map(|entry| entry.value().record.addr).collect();
            for addr in targets {
                if let Err(e) = self.socket.send_to(&encoded, addr).await {
                    tracing::warn!("Failed to send leave to {}: {}", addr, e);
                }
            }
        }
        self.shutdown.cancel();
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, src)) => match bincode::deserialize::<WireMessage>(&buf[..len]) {
                        Ok(msg) => self.handle_message(msg, src).await,
                        Err(e) => {
                            tracing::warn!("Failed to deserialize message from {}: {}", src, e);
                        }
                    },
                    Err(e) => {
                        tracing::error!("Failed to receive UDP packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }
    }

    async fn handle_message(self: &Arc<Self>, msg: WireMessage, src: SocketAddr) {
        match msg {
            WireMessage::Join { member } => {
                tracing::info!("Node {} joining cluster at {}", member.logical_name, member.addr);
                self.refresh_peer(&member);
                self.send_ack(src).await;
                self.publish_view();
            }

            WireMessage::Ping { from, members } => {
                tracing::debug!("Received ping from {}", from.logical_name);
                self.refresh_peer(&from);
                self.merge_members(members);
                self.send_ack(src).await;
                self.publish_view();
            }

            WireMessage::Ack { from, members } => {
                tracing::debug!(
                    "Received ack from {} with {} members",
                    from.logical_name,
                    members.len()
                );
                self.refresh_peer(&from);
                self.merge_members(members);
                self.publish_view();
            }

            WireMessage::Leave { from } => {
                tracing::info!("Node {} left the cluster", from.logical_name);
                self.peers.remove(&from.logical_name);
                self.publish_view();
            }

            WireMessage::RpcRequest {
                correlation_id,
                from,
                payload,
            } => {
                self.dispatch_rpc(correlation_id, from, payload, src);
            }

            WireMessage::RpcResponse {
                correlation_id,
                payload,
                ..
            } => {
                if let Some((_, reply_tx)) = self.pending.remove(&correlation_id) {
                    let _ = reply_tx.send(payload);
                } else {
                    tracing::debug!("Dropping reply for unknown correlation id {}", correlation_id);
                }
            }
        }
    }

    /// Hands an inbound RPC to the registered handler on its own task so the
    /// receive loop never blocks on handler work.
    fn dispatch_rpc(
        self: &Arc<Self>,
        correlation_id: String,
        from: PeerRecord,
        payload: Vec<u8>,
        reply_to: SocketAddr,
    ) {
        let handler = {
            let guard = self.rpc_handler.lock().unwrap_or_else(|e| e.into_inner());
            guard.clone()
        };

        let Some(handler) = handler else {
            tracing::warn!(
                "Dropping rpc request {} from {}: no handler registered",
                correlation_id,
                from.logical_name
            );
            return;
        };

        let transport = self.clone();
        tokio::spawn(async move {
            let caller = from.to_member_address();
            let reply_payload = handler.handle(&caller, payload).await;
            let reply = WireMessage::RpcResponse {
                correlation_id,
                from: PeerRecord::from_member_address(&transport.local),
                payload: reply_payload,
            };
            match bincode::serialize(&reply) {
                Ok(encoded) => {
                    if let Err(e) = transport.socket.send_to(&encoded, reply_to).await {
                        tracing::warn!("Failed to send rpc reply to {}: {}", reply_to, e);
                    }
                }
                Err(e) => tracing::error!("Failed to serialize rpc reply: {}", e),
            }
        });
    }

    async fn ping_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.timing.ping_interval);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            // Re-announce to the seeds while nobody has answered yet.
            if self.peers.is_empty() {
                if !self.seeds.is_empty() {
                    let msg = WireMessage::Join {
                        member: PeerRecord::from_member_address(&self.local),
                    };
                    if let Ok(encoded) = bincode::serialize(&msg) {
                        for seed in &self.seeds {
                            let _ = self.socket.send_to(&encoded, seed).await;
                        }
                    }
                }
                continue;
            }

            let alive: Vec<PeerRecord> = self
                .peers
                .iter()
                .filter(|entry| entry.value().liveness == PeerLiveness::Alive)
                .map(|entry| entry.value().record.clone())
                .collect();

            if alive.is_empty() {
                continue;
            }

            let idx = rand::thread_rng().gen_range(0..alive.len());
            let target = &alive[idx];

            let msg = WireMessage::Ping {
                from: PeerRecord::from_member_address(&self.local),
                members: self.all_records(),
            };

            if let Ok(encoded) = bincode::serialize(&msg) {
                if let Err(e) = self.socket.send_to(&encoded, target.addr).await {
                    tracing::warn!("Failed to send ping to {}: {}", target.logical_name, e);
                } else {
                    tracing::trace!("Sent ping to {}", target.logical_name);
                }
            }
        }
    }

    async fn sweep_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.timing.sweep_interval);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            let now = Instant::now();
            let mut expired = Vec::new();
            let mut changed = false;

            for mut entry in self.peers.iter_mut() {
                let peer = entry.value_mut();
                let elapsed = now.duration_since(peer.last_seen);

                match peer.liveness {
                    PeerLiveness::Alive => {
                        if elapsed > self.timing.suspect_timeout {
                            tracing::warn!(
                                "Peer {} suspected (no contact for {:?})",
                                peer.record.logical_name,
                                elapsed
                            );
                            peer.liveness = PeerLiveness::Suspect;
                        }
                    }
                    PeerLiveness::Suspect => {
                        if elapsed > self.timing.expiry_timeout {
                            tracing::warn!(
                                "Peer {} removed from view (no contact for {:?})",
                                peer.record.logical_name,
                                elapsed
                            );
                            expired.push(entry.key().clone());
                        }
                    }
                }
            }

            for key in expired {
                self.peers.remove(&key);
                changed = true;
            }

            if changed {
                self.publish_view();
            }
        }
    }

    /// Records direct contact with a peer.
    fn refresh_peer(&self, record: &PeerRecord) {
        if record.logical_name == self.local.logical_name {
            return;
        }
        match self.peers.get_mut(&record.logical_name) {
            Some(mut existing) => {
                existing.record = record.clone();
                existing.liveness = PeerLiveness::Alive;
                existing.last_seen = Instant::now();
            }
            None => {
                tracing::info!(
                    "Discovered new member: {} at {}",
                    record.logical_name,
                    record.addr
                );
                self.peers.insert(
                    record.logical_name.clone(),
                    PeerState {
                        record: record.clone(),
                        liveness: PeerLiveness::Alive,
                        last_seen: Instant::now(),
                    },
                );
            }
        }
    }

    /// Folds a piggy-backed member list into the peer table.
    fn merge_members(&self, members: Vec<PeerRecord>) {
        for record in members {
            self.refresh_peer(&record);
        }
    }

    fn all_records(&self) -> Vec<PeerRecord> {
        let mut records = vec![PeerRecord::from_member_address(&self.local)];
        records.extend(self.peers.iter().map(|entry| entry.value().record.clone()));
        records
    }

    async fn send_ack(&self, to: SocketAddr) {
        let reply = WireMessage::Ack {
            from: PeerRecord::from_member_address(&self.local),
            members: self.all_records(),
        };
        match bincode::serialize(&reply) {
            Ok(encoded) => {
                if let Err(e) = self.socket.send_to(&encoded, to).await {
                    tracing::warn!("Failed to send ack to {}: {}", to, e);
                }
            }
            Err(e) => tracing::error!("Failed to serialize ack: {}", e),
        }
    }

    /// Pushes the current view to the listener if the member set changed.
    fn publish_view(&self) {
        let view = self.current_view();

        {
            let mut last = self.last_view.lock().unwrap_or_else(|e| e.into_inner());
            if *last == view {
                return;
            }
            *last = view.clone();
        }

        let listener = {
            let guard = self.view_listener.lock().unwrap_or_else(|e| e.into_inner());
            guard.clone()
        };
        if let Some(listener) = listener {
            listener.on_view(view);
        }
    }

    /// Datagram send with bounded retry and jitter to smooth transient
    /// socket errors.
    async fn send_with_retry(&self, bytes: &[u8], addr: SocketAddr) -> Result<(), TransportError> {
        let mut delay_ms = 150u64;

        for attempt in 0..SEND_ATTEMPTS {
            match self.socket.send_to(bytes, addr).await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    if attempt + 1 == SEND_ATTEMPTS {
                        return Err(TransportError::Io(e));
                    }
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(TransportError::Unreachable(addr.to_string()))
    }
}

#[async_trait::async_trait]
impl ClusterTransport for UdpClusterTransport {
    fn local_address(&self) -> MemberAddress {
        self.local.clone()
    }

    fn current_view(&self) -> Vec<MemberAddress> {
        let mut view = vec![self.local.clone()];
        view.extend(
            self.peers
                .iter()
                .map(|entry| entry.value().record.to_member_address()),
        );
        view.sort_by(|a, b| a.logical_name.cmp(&b.logical_name));
        view
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
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.insert(correlation_id.clone(), reply_tx);

        let msg = WireMessage::RpcRequest {
            correlation_id: correlation_id.clone(),
            from: PeerRecord::from_member_address(&self.local),
            payload,
        };
        let encoded = match bincode::serialize(&msg) {
            Ok(encoded) => encoded,
            Err(e) => {
                self.pending.remove(&correlation_id);
                return Err(TransportError::Codec(e.to_string()));
            }
        };

        if let Err(e) = self.send_with_retry(&encoded, target.addr).await {
            self.pending.remove(&correlation_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(TransportError::Unreachable(target.logical_name.clone())),
            Err(_) => {
                self.pending.remove(&correlation_id);
                Err(TransportError::Timeout(timeout))
            }
        }
    }
}
