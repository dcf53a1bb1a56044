use std::collections::HashMap;

use crate::flow::{Action, FlowMod, FlowModCommand, Match, Table};
use crate::ids::{Dpid, PortNo};
use crate::port::PortState;
use crate::session::{DatapathSession, FlowFormat, SessionError};

/// An in-memory datapath. This is the one concrete [`DatapathSession`] this
/// workspace ships: it keeps exactly the state a real switch would hold after
/// processing the same flow-mods, which is all the GRE programmer's tests (and
/// the controller binary's default, demo-friendly wiring) need. A deployment
/// wired to a real Open vSwitch instance would substitute a session backed by
/// the actual OpenFlow/OVSDB wire codec behind the same trait.
#[derive(Debug, Default)]
pub struct SimulatedSession {
    dpid: Dpid,
    connected: bool,
    ports: HashMap<PortNo, PortState>,
    flows: HashMap<(Table, Match), FlowMod>,
    flow_format: Option<FlowFormat>,
    table_id_enabled: bool,
    barriers: u64,
}

impl SimulatedSession {
    pub fn new(dpid: Dpid) -> Self {
        SimulatedSession { dpid, connected: true, ..Default::default() }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn disconnect(&mut self) {
        self.connected = false;
    }

    pub fn set_port(&mut self, port: PortNo, state: PortState) {
        self.ports.insert(port, state);
    }

    pub fn remove_port(&mut self, port: PortNo) {
        self.ports.remove(&port);
    }

    pub fn ports(&self) -> impl Iterator<Item = (PortNo, PortState)> + '_ {
        self.ports.iter().map(|(&p, &s)| (p, s))
    }

    pub fn barrier_count(&self) -> u64 {
        self.barriers
    }

    /// Every flow-mod currently installed in `table`, for assertions in tests.
    pub fn flows_in(&self, table: Table) -> Vec<&FlowMod> {
        let mut v: Vec<&FlowMod> = self.flows.iter().filter(|((t, _), _)| *t == table).map(|(_, fm)| fm).collect();
        v.sort_by_key(|fm| fm.priority);
        v
    }

    pub fn flow(&self, table: Table, r#match: &Match) -> Option<&FlowMod> {
        self.flows.get(&(table, *r#match))
    }

    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }
}

impl DatapathSession for SimulatedSession {
    fn id(&self) -> Dpid {
        self.dpid
    }

    fn send_flow_mod(&mut self, flow_mod: &FlowMod) -> Result<(), SessionError> {
        if !self.connected {
            return Err(SessionError::NotConnected);
        }
        let key = (flow_mod.table, flow_mod.r#match);
        match flow_mod.command {
            FlowModCommand::Add | FlowModCommand::Modify { .. } => {
                self.flows.insert(key, flow_mod.clone());
            }
            FlowModCommand::Delete { strict: true } => {
                self.flows.remove(&key);
            }
            // Non-strict delete removes every rule the pattern covers, not
            // just the one with an identical match.
            FlowModCommand::Delete { strict: false } => {
                let table = flow_mod.table;
                let pattern = flow_mod.r#match;
                self.flows.retain(|(t, m), _| !(*t == table && pattern.matches(m)));
            }
        }
        Ok(())
    }

    fn send_barrier(&mut self) -> Result<(), SessionError> {
        if !self.connected {
            return Err(SessionError::NotConnected);
        }
        self.barriers += 1;
        Ok(())
    }

    fn send_packet_out(&mut self, _buffer_id: u32, in_port: PortNo, _actions: &[Action]) -> Result<(), SessionError> {
        if !self.connected {
            return Err(SessionError::NotConnected);
        }
        if !self.ports.contains_key(&in_port) {
            return Err(SessionError::UnknownPort(in_port));
        }
        Ok(())
    }

    fn send_nxt_set_flow_format(&mut self, format: FlowFormat) -> Result<(), SessionError> {
        self.flow_format = Some(format);
        Ok(())
    }

    fn send_nx_flow_mod_table_id(&mut self, enable: bool) -> Result<(), SessionError> {
        self.table_id_enabled = enable;
        Ok(())
    }

    fn get_port_state(&self, port: PortNo) -> Option<PortState> {
        self.ports.get(&port).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::priority;

    #[test]
    fn add_then_delete_restores_empty_table() {
        let mut session = SimulatedSession::new(Dpid(1));
        let m = Match::new().in_port(PortNo(2));
        let add = FlowMod::new(Table::Src, m, priority::SRC_VM_DROP, FlowModCommand::Add);
        session.send_flow_mod(&add).unwrap();
        assert_eq!(session.flow_count(), 1);

        let del = FlowMod::new(Table::Src, m, priority::SRC_VM_DROP, FlowModCommand::Delete { strict: true });
        session.send_flow_mod(&del).unwrap();
        assert_eq!(session.flow_count(), 0);
    }

    #[test]
    fn delete_of_absent_flow_is_a_no_op() {
        let mut session = SimulatedSession::new(Dpid(1));
        let m = Match::new().in_port(PortNo(7));
        let del = FlowMod::new(Table::LocalOut, m, priority::LOCAL_OUT_DROP, FlowModCommand::Delete { strict: true });
        assert!(session.send_flow_mod(&del).is_ok());
        assert_eq!(session.flow_count(), 0);
    }

    #[test]
    fn modify_strict_overwrites_existing_actions() {
        let mut session = SimulatedSession::new(Dpid(1));
        let m = Match::new().tun_id(100);
        let v1 = FlowMod::new(Table::LocalOut, m, priority::LOCAL_OUT_BROADCAST, FlowModCommand::Add)
            .with_actions(vec![Action::Output(PortNo(1))]);
        session.send_flow_mod(&v1).unwrap();

        let v2 = FlowMod::new(Table::LocalOut, m, priority::LOCAL_OUT_BROADCAST, FlowModCommand::Modify { strict: true })
            .with_actions(vec![Action::Output(PortNo(1)), Action::Output(PortNo(2))]);
        session.send_flow_mod(&v2).unwrap();

        let installed = session.flow(Table::LocalOut, &m).unwrap();
        assert_eq!(installed.actions.len(), 2);
    }
}
