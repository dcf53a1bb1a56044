use ovs::{Dpid, MacAddress, PortNo};
use stores::{NetworkId, NetworkStoreEvent, TunnelKey, TunnelStoreEvent};

/// A flow-mod as currently installed on a datapath, reported in a
/// [`Event::FlowDumpReply`]. Kept independent of `ovs::FlowMod` so that the
/// bus's sealed event type doesn't need to borrow across an `await` point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowSummary {
    pub table: ovs::Table,
    pub r#match: ovs::Match,
    pub priority: u16,
}

/// The sealed union of every event this controller's bricks exchange. New
/// event classes are added here as variants rather than discovered at
/// runtime by reflection.
#[derive(Clone, Debug)]
pub enum Event {
    /// Forwarded verbatim from a [`stores::NetworkStore`] mutation.
    Network(NetworkStoreEvent),
    /// Forwarded verbatim from a [`stores::TunnelsStore`] mutation.
    Tunnel(TunnelStoreEvent),
    /// Forwarded verbatim from a connected datapath session.
    Dp(ovs::DpEvent),

    /// Emitted by the port-set correlator once every precondition for a VM
    /// port is (or ceases to be) satisfied.
    VmPort {
        network: NetworkId,
        tunnel_key: TunnelKey,
        dpid: Dpid,
        port: PortNo,
        mac: MacAddress,
        add: bool,
    },
    /// Emitted by the port-set correlator when a GRE tunnel port's remote end
    /// is known.
    TunnelPort { dpid: Dpid, port: PortNo, remote_dpid: Dpid, add: bool },
    /// Emitted by the port-set correlator when a tunnel key is deleted and at
    /// least one datapath still references it.
    TunnelKeyGone { key: TunnelKey },

    /// A synchronous request for the flow-mods currently installed on a
    /// datapath, answered with [`Event::FlowDumpReply`] carrying the same
    /// `request_id` via [`crate::Bus::reply_to_request`].
    FlowDumpRequest { request_id: u64, dpid: Dpid },
    FlowDumpReply { request_id: u64, flows: Vec<FlowSummary> },

    /// Delivered to every brick's mailbox to drain and exit.
    Stop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Network,
    Tunnel,
    Dp,
    VmPort,
    TunnelPort,
    TunnelKeyGone,
    FlowDumpRequest,
    FlowDumpReply,
    Stop,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Network(_) => EventKind::Network,
            Event::Tunnel(_) => EventKind::Tunnel,
            Event::Dp(_) => EventKind::Dp,
            Event::VmPort { .. } => EventKind::VmPort,
            Event::TunnelPort { .. } => EventKind::TunnelPort,
            Event::TunnelKeyGone { .. } => EventKind::TunnelKeyGone,
            Event::FlowDumpRequest { .. } => EventKind::FlowDumpRequest,
            Event::FlowDumpReply { .. } => EventKind::FlowDumpReply,
            Event::Stop => EventKind::Stop,
        }
    }
}
