//! The brick that owns the set of connected datapaths. It is the seam
//! between the out-of-scope OpenFlow wire codec and the rest of the
//! controller: whatever decodes `hello`/`port-status`/`echo` frames calls
//! into a `SwitchManager` to record the fact and have it republished as a
//! typed [`bus::Event::Dp`] for the correlator to consume.
//!
//! Other bricks never reach into a datapath session directly except through
//! [`SwitchManager::dpset`] — a single-threaded-safe `Rc<RefCell<..>>` handle,
//! not a bus round trip, since reads of another brick's owned state are safe
//! here only because exactly one brick handler ever runs at a time.

use std::cell::RefCell;
use std::rc::Rc;

use bus::{Bus, DispatcherState, Event};
use ovs::{DatapathSession, DpEvent, Dpid, PortNo, PortState, SessionError};
use stores::DpSet;
use tracing::warn;

#[derive(Clone)]
pub struct SwitchManager {
    dpset: Rc<RefCell<DpSet>>,
    bus: Bus,
}

impl SwitchManager {
    pub fn new(bus: Bus) -> Self {
        SwitchManager { dpset: Rc::new(RefCell::new(DpSet::default())), bus }
    }

    /// The shared handle other bricks hold to query connectivity and issue
    /// flow-mods directly, without going through the bus.
    pub fn dpset(&self) -> Rc<RefCell<DpSet>> {
        self.dpset.clone()
    }

    /// Registers a newly-handshaked datapath: negotiates the Nicira flow
    /// format and table-id extensions, waits for them to take effect, records
    /// the session, then fans `Dp::Connected` out to observers (the
    /// correlator re-derives VM/tunnel readiness for every known port of this
    /// dpid in response).
    pub async fn connect(&self, mut session: Box<dyn DatapathSession>) -> Result<(), SessionError> {
        let dpid = session.id();
        session.send_nxt_set_flow_format(ovs::FlowFormat::Nxm)?;
        session.send_nx_flow_mod_table_id(true)?;
        session.send_barrier()?;
        self.dpset.borrow_mut().insert(session);
        self.bus.send_event_to_observers(Event::Dp(DpEvent::Connected { dpid }), DispatcherState::Main).await;
        Ok(())
    }

    /// Drops a datapath session. No explicit flow cleanup is performed here:
    /// the switch discards its own table on disconnect, and reconnecting
    /// re-derives everything from the stores.
    pub async fn disconnect(&self, dpid: Dpid) {
        if !self.dpset.borrow().is_connected(dpid) {
            warn!(?dpid, "disconnect of unknown datapath");
            return;
        }
        self.dpset.borrow_mut().remove(dpid);
        self.bus.send_event_to_observers(Event::Dp(DpEvent::Disconnected { dpid }), DispatcherState::Main).await;
    }

    pub async fn notify_port_add(&self, dpid: Dpid, port: PortNo, state: PortState) {
        self.bus.send_event_to_observers(Event::Dp(DpEvent::PortAdd { dpid, port, state }), DispatcherState::Main).await;
    }

    pub async fn notify_port_modify(&self, dpid: Dpid, port: PortNo, state: PortState) {
        self.bus.send_event_to_observers(Event::Dp(DpEvent::PortModify { dpid, port, state }), DispatcherState::Main).await;
    }

    pub async fn notify_port_delete(&self, dpid: Dpid, port: PortNo) {
        self.bus.send_event_to_observers(Event::Dp(DpEvent::PortDelete { dpid, port }), DispatcherState::Main).await;
    }

    pub fn is_connected(&self, dpid: Dpid) -> bool {
        self.dpset.borrow().is_connected(dpid)
    }

    pub fn connected_dpids(&self) -> Vec<Dpid> {
        self.dpset.borrow().dpids().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovs::SimulatedSession;

    #[tokio::test]
    async fn connect_negotiates_flow_format_before_publishing() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let bus = Bus::new();
                let mgr = SwitchManager::new(bus.clone());
                let session = SimulatedSession::new(Dpid(1));
                mgr.connect(Box::new(session)).await.unwrap();
                assert!(mgr.is_connected(Dpid(1)));
            })
            .await;
    }

    #[tokio::test]
    async fn disconnect_removes_from_dpset() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let bus = Bus::new();
                let mgr = SwitchManager::new(bus);
                mgr.connect(Box::new(SimulatedSession::new(Dpid(1)))).await.unwrap();
                mgr.disconnect(Dpid(1)).await;
                assert!(!mgr.is_connected(Dpid(1)));
            })
            .await;
    }
}
