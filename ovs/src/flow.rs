use crate::ids::{MacAddress, PortNo};
use crate::OFP_DEFAULT_PRIORITY;

/// The three tables of the GRE overlay pipeline, in resubmit order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Table {
    /// Classifies ingress traffic and tags it with a tunnel key.
    Src = 0,
    /// Picks which tunnel port(s) a tunnel-tagged packet goes out of.
    TunnelOut = 1,
    /// Delivers a tunnel-tagged packet to local VM ports.
    LocalOut = 2,
}

impl Table {
    pub fn id(self) -> u8 {
        self as u8
    }
}

/// `command = (table << 8) | command`, the Nicira `NXT_FLOW_MOD_TABLE_ID` encoding
/// that lets a single flow-mod target a specific table of a multi-table pipeline.
/// [`DatapathSession::send_nx_flow_mod_table_id`](crate::DatapathSession::send_nx_flow_mod_table_id)
/// must have enabled this extension before any flow-mod relying on it is sent.
pub fn table_id_command(table: Table, command: FlowModCommand) -> u16 {
    ((table.id() as u16) << 8) | command.to_wire() as u16
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowModCommand {
    Add,
    Modify { strict: bool },
    Delete { strict: bool },
}

impl FlowModCommand {
    fn to_wire(self) -> u8 {
        match self {
            FlowModCommand::Add => 0,
            FlowModCommand::Modify { strict: false } => 1,
            FlowModCommand::Modify { strict: true } => 2,
            FlowModCommand::Delete { strict: false } => 3,
            FlowModCommand::Delete { strict: true } => 4,
        }
    }
}

/// Match fields used anywhere in the GRE overlay pipeline. A `None` field is a
/// wildcard. `in_port` is always either a VM port or a tunnel port.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Match {
    pub in_port: Option<PortNo>,
    pub dl_src: Option<MacAddress>,
    pub dl_dst: Option<MacAddress>,
    pub tun_id: Option<u32>,
}

impl Match {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_port(mut self, port: PortNo) -> Self {
        self.in_port = Some(port);
        self
    }

    pub fn dl_src(mut self, mac: MacAddress) -> Self {
        self.dl_src = Some(mac);
        self
    }

    pub fn dl_dst(mut self, mac: MacAddress) -> Self {
        self.dl_dst = Some(mac);
        self
    }

    pub fn tun_id(mut self, key: u32) -> Self {
        self.tun_id = Some(key);
        self
    }

    /// True if every field this match pins down also matches `candidate`;
    /// fields left wildcarded (`None`) match anything. Used for non-strict
    /// deletes, which in OpenFlow remove every installed rule a pattern
    /// covers rather than one exact rule.
    pub fn matches(&self, candidate: &Match) -> bool {
        (self.in_port.is_none() || self.in_port == candidate.in_port)
            && (self.dl_src.is_none() || self.dl_src == candidate.dl_src)
            && (self.dl_dst.is_none() || self.dl_dst == candidate.dl_dst)
            && (self.tun_id.is_none() || self.tun_id == candidate.tun_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Output(PortNo),
    SetTunnel(u32),
    /// The Nicira resubmit-to-table extension.
    Resubmit(Table),
    Drop,
}

/// A complete OpenFlow flow-mod: a match, a priority, a command, and the actions
/// to execute on match (empty for a drop rule). `table` selects which of the
/// three GRE pipeline tables the rule belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowMod {
    pub table: Table,
    pub r#match: Match,
    pub priority: u16,
    pub cookie: u64,
    pub command: FlowModCommand,
    pub actions: Vec<Action>,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub out_port: Option<PortNo>,
}

impl FlowMod {
    pub fn new(table: Table, r#match: Match, priority: u16, command: FlowModCommand) -> Self {
        FlowMod {
            table,
            r#match,
            priority,
            cookie: 0,
            command,
            actions: Vec::new(),
            idle_timeout: 0,
            hard_timeout: 0,
            out_port: None,
        }
    }

    pub fn with_actions(mut self, actions: Vec<Action>) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_cookie(mut self, cookie: u64) -> Self {
        self.cookie = cookie;
        self
    }

    /// `(table << 8) | command`, ready to hand to a wire encoder that implements
    /// the Nicira `NXT_FLOW_MOD_TABLE_ID` extension.
    pub fn wire_command(&self) -> u16 {
        table_id_command(self.table, self.command)
    }
}

/// Priority discipline for the GRE overlay pipeline across `SRC`, `TUNNEL_OUT`
/// and `LOCAL_OUT`.
pub mod priority {
    use super::OFP_DEFAULT_PRIORITY;

    pub const SRC_VM: u16 = OFP_DEFAULT_PRIORITY;
    pub const SRC_VM_DROP: u16 = OFP_DEFAULT_PRIORITY / 2;
    pub const SRC_TUNNEL_PASS: u16 = OFP_DEFAULT_PRIORITY;
    pub const SRC_TUNNEL_DROP: u16 = OFP_DEFAULT_PRIORITY / 2;

    pub const TUNNEL_OUT_UNICAST: u16 = OFP_DEFAULT_PRIORITY;
    pub const TUNNEL_OUT_BROADCAST: u16 = OFP_DEFAULT_PRIORITY / 2;
    pub const TUNNEL_OUT_PASS: u16 = OFP_DEFAULT_PRIORITY / 4;
    pub const TUNNEL_OUT_DROP: u16 = OFP_DEFAULT_PRIORITY / 8;

    pub const LOCAL_OUT_UNICAST: u16 = OFP_DEFAULT_PRIORITY;
    pub const LOCAL_OUT_BROADCAST: u16 = OFP_DEFAULT_PRIORITY / 2;
    pub const LOCAL_OUT_DROP: u16 = OFP_DEFAULT_PRIORITY / 4;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_command_packs_table_into_high_byte() {
        let fm = FlowMod::new(Table::TunnelOut, Match::new(), priority::TUNNEL_OUT_UNICAST, FlowModCommand::Add);
        assert_eq!(fm.wire_command(), (1u16 << 8) | 0);
    }

    #[test]
    fn delete_strict_has_distinct_wire_command_from_delete() {
        let strict = table_id_command(Table::Src, FlowModCommand::Delete { strict: true });
        let loose = table_id_command(Table::Src, FlowModCommand::Delete { strict: false });
        assert_ne!(strict, loose);
    }
}
