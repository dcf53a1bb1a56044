use crate::flow::FlowMod;
use crate::ids::{Dpid, PortNo};
use crate::port::PortState;

/// Nicira flow-format extensions that must be negotiated on every datapath-up
/// before any table-targeted flow-mod is sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowFormat {
    OpenFlow10,
    Nxm,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("datapath not connected")]
    NotConnected,
    #[error("unknown port {0}")]
    UnknownPort(PortNo),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// The contract a connected OpenFlow datapath exposes to the rest of the
/// controller. The wire codec that implements this trait (decoding port-status
/// and hello messages, encoding flow-mods and barriers) is out of scope here;
/// [`crate::SimulatedSession`] is the in-memory stand-in this workspace ships.
pub trait DatapathSession {
    fn id(&self) -> Dpid;

    fn send_flow_mod(&mut self, flow_mod: &FlowMod) -> Result<(), SessionError>;

    /// Blocks (cooperatively) until the datapath has processed every flow-mod
    /// sent before this call. Callers use this to serialize steps of a
    /// multi-stage pipeline install.
    fn send_barrier(&mut self) -> Result<(), SessionError>;

    fn send_packet_out(&mut self, buffer_id: u32, in_port: PortNo, actions: &[crate::flow::Action]) -> Result<(), SessionError>;

    /// Enables the Nicira Extensible Match flow format, required before any
    /// `tun_id` match can be expressed.
    fn send_nxt_set_flow_format(&mut self, format: FlowFormat) -> Result<(), SessionError>;

    /// Enables (or disables) the `NXT_FLOW_MOD_TABLE_ID` extension, required for
    /// `FlowMod::wire_command` to address a specific pipeline table.
    fn send_nx_flow_mod_table_id(&mut self, enable: bool) -> Result<(), SessionError>;

    fn get_port_state(&self, port: PortNo) -> Option<PortState>;
}

/// Events a datapath session surfaces to its observers. These are the raw
/// inputs the port-set correlator debounces; see `correlator::PortSetCorrelator`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DpEvent {
    Connected { dpid: Dpid },
    Disconnected { dpid: Dpid },
    PortAdd { dpid: Dpid, port: PortNo, state: PortState },
    PortDelete { dpid: Dpid, port: PortNo },
    PortModify { dpid: Dpid, port: PortNo, state: PortState },
}

impl DpEvent {
    pub fn dpid(&self) -> Dpid {
        match self {
            DpEvent::Connected { dpid }
            | DpEvent::Disconnected { dpid }
            | DpEvent::PortAdd { dpid, .. }
            | DpEvent::PortDelete { dpid, .. }
            | DpEvent::PortModify { dpid, .. } => *dpid,
        }
    }
}
