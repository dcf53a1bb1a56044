use std::collections::HashMap;

use ovs::{DatapathSession, Dpid, PortNo, PortState};

/// The set of currently-connected datapaths. A session is present here from
/// the moment its `Connected` event fires until its `Disconnected` event
/// fires; there is no persistence across a disconnect, since the switch
/// discards its own flow table when the control connection drops.
#[derive(Default)]
pub struct DpSet {
    sessions: HashMap<Dpid, Box<dyn DatapathSession>>,
}

impl DpSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, session: Box<dyn DatapathSession>) {
        self.sessions.insert(session.id(), session);
    }

    pub fn remove(&mut self, dpid: Dpid) {
        self.sessions.remove(&dpid);
    }

    pub fn get(&self, dpid: Dpid) -> Option<&dyn DatapathSession> {
        self.sessions.get(&dpid).map(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, dpid: Dpid) -> Option<&mut (dyn DatapathSession + 'static)> {
        self.sessions.get_mut(&dpid).map(|s| s.as_mut())
    }

    pub fn is_connected(&self, dpid: Dpid) -> bool {
        self.sessions.contains_key(&dpid)
    }

    pub fn dpids(&self) -> impl Iterator<Item = Dpid> + '_ {
        self.sessions.keys().copied()
    }

    pub fn get_port_state(&self, dpid: Dpid, port: PortNo) -> Option<PortState> {
        self.get(dpid)?.get_port_state(port)
    }
}
