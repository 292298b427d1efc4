//! Wire Protocol Definitions
//!
//! Messages exchanged over the UDP cluster socket. Membership traffic
//! (join/ping/ack/leave) and RPC envelopes share the same socket; RPC
//! payloads are opaque bytes owned by the layer above.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::membership::types::MemberAddress;

/// A member as carried on the wire: logical name plus reachable address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerRecord {
    pub logical_name: String,
    pub addr: SocketAddr,
}

impl PeerRecord {
    pub fn to_member_address(&self) -> MemberAddress {
        MemberAddress::new(self.logical_name.clone(), self.addr)
    }

    pub fn from_member_address(member: &MemberAddress) -> Self {
        Self {
            logical_name: member.logical_name.clone(),
            addr: member.addr,
        }
    }
}

/// The wire protocol for inter-node communication.
///
/// - `Join`: sent by new nodes to seed nodes to enter the cluster.
/// - `Ping/Ack`: liveness checks with the sender's member list piggy-backed
///   for state synchronization.
/// - `Leave`: polite departure; silent peers are removed by timeout anyway.
/// - `RpcRequest/RpcResponse`: correlation-id matched unicast envelopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireMessage {
    Join {
        member: PeerRecord,
    },

    Ping {
        from: PeerRecord,
        members: Vec<PeerRecord>,
    },

    Ack {
        from: PeerRecord,
        members: Vec<PeerRecord>,
    },

    Leave {
        from: PeerRecord,
    },

    RpcRequest {
        correlation_id: String,
        from: PeerRecord,
        payload: Vec<u8>,
    },

    RpcResponse {
        correlation_id: String,
        from: PeerRecord,
        payload: Vec<u8>,
    },
}
