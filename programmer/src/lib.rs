//! The GRE pipeline programmer: the brick that turns a correlator readiness
//! signal into the actual flow-mods on the local datapath and every reachable
//! peer. It keeps no state of its own beyond the stores it reads — every
//! install or teardown is recomputed fresh from current membership, so a
//! duplicate `add` or a `del` for something never installed is harmless.

use std::cell::RefCell;
use std::rc::Rc;

use bus::{Bus, Event, HandlerEntry, StateSet};
use ovs::flow::priority;
use ovs::{Action, Dpid, FlowMod, FlowModCommand, MacAddress, Match, PortNo, Table};
use stores::{DpSet, NetworkId, NetworkStore, TunnelKey, TunnelsStore};
use tracing::warn;

#[derive(Clone)]
pub struct GreProgrammer {
    networks: Rc<RefCell<NetworkStore>>,
    tunnels: Rc<RefCell<TunnelsStore>>,
    dpset: Rc<RefCell<DpSet>>,
}

impl GreProgrammer {
    pub fn new(networks: Rc<RefCell<NetworkStore>>, tunnels: Rc<RefCell<TunnelsStore>>, dpset: Rc<RefCell<DpSet>>) -> Self {
        GreProgrammer { networks, tunnels, dpset }
    }

    /// Registers this programmer as the `"programmer"` brick, the leaf of the
    /// pipeline: it consumes `VmPort`/`TunnelPort`/`TunnelKeyGone` but never
    /// emits further bus events, only flow-mods over `DatapathSession`.
    pub fn register(self, bus: &Bus) {
        let handlers = vec![
            HandlerEntry::new(bus::EventKind::VmPort, StateSet::All, {
                let this = self.clone();
                Box::new(move |event, _state, _bus| {
                    let this = this.clone();
                    Box::pin(async move {
                        if let Event::VmPort { network, tunnel_key, dpid, port, mac, add } = event {
                            if add {
                                this.vm_port_add(dpid, port, mac, network, tunnel_key);
                            } else {
                                this.vm_port_del(dpid, port, mac, network, tunnel_key);
                            }
                        }
                        Ok(())
                    })
                })
            }),
            HandlerEntry::new(bus::EventKind::TunnelPort, StateSet::All, {
                let this = self.clone();
                Box::new(move |event, _state, _bus| {
                    let this = this.clone();
                    Box::pin(async move {
                        if let Event::TunnelPort { dpid, port, remote_dpid, add } = event {
                            if add {
                                this.tunnel_port_add(dpid, remote_dpid, port);
                            }
                            // Tunnel port deletion teardown is not implemented: the
                            // order relative to in-flight traffic is undecided.
                        }
                        Ok(())
                    })
                })
            }),
            HandlerEntry::new(bus::EventKind::TunnelKeyGone, StateSet::All, {
                let this = self.clone();
                Box::new(move |event, _state, _bus| {
                    let this = this.clone();
                    Box::pin(async move {
                        if let Event::TunnelKeyGone { key } = event {
                            this.tunnel_key_gone(key);
                        }
                        Ok(())
                    })
                })
            }),
        ];
        bus.register_brick("programmer", handlers);
    }

    /// Every currently up, MAC-bearing VM port `net` has on `dpid`.
    fn active_vm_ports(&self, dpid: Dpid, net: &NetworkId) -> Vec<(PortNo, MacAddress)> {
        let dpset = self.dpset.borrow();
        self.networks
            .borrow()
            .members(net)
            .into_iter()
            .filter(|(d, _, mac)| *d == dpid && mac.is_some())
            .filter_map(|(_, port, mac)| {
                let up = dpset.get_port_state(dpid, port).map(|s| s.is_link_up()).unwrap_or(false);
                up.then(|| (port, mac.unwrap()))
            })
            .collect()
    }

    /// `dpid`'s own tunnel ports whose remote end is also currently a member
    /// of `net` — the peers a VM port add/del on `dpid` needs to reach.
    fn reachable_peers(&self, dpid: Dpid, net: &NetworkId) -> Vec<(Dpid, PortNo)> {
        let member_dpids = self.networks.borrow().get_dpids(net);
        self.tunnels.borrow().tunnel_ports_on(dpid).into_iter().filter(|(remote, _)| member_dpids.contains(remote)).collect()
    }

    fn send(&self, dpid: Dpid, flow_mod: FlowMod) {
        let mut dpset = self.dpset.borrow_mut();
        let session = match dpset.get_mut(dpid) {
            Some(s) => s,
            None => return,
        };
        // Flow-mod failures are non-fatal: log and move on. The OpenFlow
        // transport is assumed reliable; a session drop loses the whole table
        // anyway and reconnect reprograms it from the stores.
        if let Err(error) = session.send_flow_mod(&flow_mod) {
            warn!(?dpid, ?error, "flow-mod failed");
        }
    }

    fn barrier(&self, dpid: Dpid) {
        let mut dpset = self.dpset.borrow_mut();
        if let Some(session) = dpset.get_mut(dpid) {
            if let Err(error) = session.send_barrier() {
                warn!(?dpid, ?error, "barrier failed");
            }
        }
    }

    /// `VM_PORT_ADD`: installs the local unicast/broadcast/drop rules for the
    /// new VM port, the first-instance pipeline scaffolding if this is the
    /// datapath's first member of `key`, and the matching entries on every
    /// reachable remote.
    pub fn vm_port_add(&self, dpid: Dpid, port: PortNo, mac: MacAddress, net: NetworkId, key: TunnelKey) {
        self.send(
            dpid,
            FlowMod::new(Table::LocalOut, Match::new().tun_id(key.0).dl_dst(mac), priority::LOCAL_OUT_UNICAST, FlowModCommand::Add)
                .with_actions(vec![Action::Output(port)]),
        );

        let active = self.active_vm_ports(dpid, &net);
        let first_instance = active.len() == 1;
        let broadcast_actions: Vec<Action> = active.iter().map(|(p, _)| Action::Output(*p)).collect();
        let broadcast_command = if first_instance { FlowModCommand::Add } else { FlowModCommand::Modify { strict: true } };
        self.send(
            dpid,
            FlowMod::new(
                Table::LocalOut,
                Match::new().tun_id(key.0).dl_dst(MacAddress::BROADCAST),
                priority::LOCAL_OUT_BROADCAST,
                broadcast_command,
            )
            .with_actions(broadcast_actions),
        );

        if first_instance {
            self.send(
                dpid,
                FlowMod::new(Table::LocalOut, Match::new().tun_id(key.0), priority::LOCAL_OUT_DROP, FlowModCommand::Add),
            );
            self.send(
                dpid,
                FlowMod::new(Table::TunnelOut, Match::new().tun_id(key.0), priority::TUNNEL_OUT_PASS, FlowModCommand::Add)
                    .with_actions(vec![Action::Resubmit(Table::LocalOut)]),
            );
        }

        let reachable = self.reachable_peers(dpid, &net);
        if first_instance {
            let tunnel_broadcast_actions: Vec<Action> =
                reachable.iter().map(|(_, p)| Action::Output(*p)).chain(std::iter::once(Action::Resubmit(Table::LocalOut))).collect();
            self.send(
                dpid,
                FlowMod::new(
                    Table::TunnelOut,
                    Match::new().tun_id(key.0).dl_dst(MacAddress::BROADCAST),
                    priority::TUNNEL_OUT_BROADCAST,
                    FlowModCommand::Add,
                )
                .with_actions(tunnel_broadcast_actions),
            );
        }

        for (_remote_dpid, local_tunnel_port) in &reachable {
            self.send(
                dpid,
                FlowMod::new(Table::TunnelOut, Match::new().tun_id(key.0).dl_dst(mac), priority::TUNNEL_OUT_UNICAST, FlowModCommand::Add)
                    .with_actions(vec![Action::Output(*local_tunnel_port), Action::Resubmit(Table::LocalOut)]),
            );
            if first_instance {
                self.send(
                    dpid,
                    FlowMod::new(
                        Table::Src,
                        Match::new().in_port(*local_tunnel_port).tun_id(key.0),
                        priority::SRC_TUNNEL_PASS,
                        FlowModCommand::Add,
                    )
                    .with_actions(vec![Action::Resubmit(Table::LocalOut)]),
                );
            }
        }

        self.barrier(dpid);

        self.send(
            dpid,
            FlowMod::new(Table::Src, Match::new().in_port(port).dl_src(mac), priority::SRC_VM, FlowModCommand::Add)
                .with_actions(vec![Action::SetTunnel(key.0), Action::Resubmit(Table::TunnelOut)]),
        );
        self.send(dpid, FlowMod::new(Table::Src, Match::new().in_port(port), priority::SRC_VM_DROP, FlowModCommand::Add));

        for (remote_dpid, _local_tunnel_port) in &reachable {
            let remote_port_to_dpid = match self.tunnels.borrow().get_port(*remote_dpid, dpid) {
                Ok(p) => p,
                Err(_) => continue,
            };
            self.send(
                *remote_dpid,
                FlowMod::new(Table::TunnelOut, Match::new().tun_id(key.0).dl_dst(mac), priority::TUNNEL_OUT_UNICAST, FlowModCommand::Add)
                    .with_actions(vec![Action::Output(remote_port_to_dpid), Action::Resubmit(Table::LocalOut)]),
            );
            if first_instance {
                self.send(
                    *remote_dpid,
                    FlowMod::new(
                        Table::Src,
                        Match::new().in_port(remote_port_to_dpid).tun_id(key.0),
                        priority::SRC_TUNNEL_PASS,
                        FlowModCommand::Add,
                    )
                    .with_actions(vec![Action::Resubmit(Table::LocalOut)]),
                );
                let remote_reachable = self.reachable_peers(*remote_dpid, &net);
                let remote_broadcast_actions: Vec<Action> = remote_reachable
                    .iter()
                    .map(|(_, p)| Action::Output(*p))
                    .chain(std::iter::once(Action::Resubmit(Table::LocalOut)))
                    .collect();
                let remote_command = if remote_reachable.len() == 1 { FlowModCommand::Add } else { FlowModCommand::Modify { strict: true } };
                self.send(
                    *remote_dpid,
                    FlowMod::new(
                        Table::TunnelOut,
                        Match::new().tun_id(key.0).dl_dst(MacAddress::BROADCAST),
                        priority::TUNNEL_OUT_BROADCAST,
                        remote_command,
                    )
                    .with_actions(remote_broadcast_actions),
                );
            }
        }
    }

    /// `VM_PORT_DEL`: mirror of [`Self::vm_port_add`]. Removes the per-port
    /// SRC rules first, then either wholesale-removes every `key`-scoped rule
    /// on `dpid` (last instance) or surgically removes this port's unicast
    /// entry and rebuilds the broadcast rule, then cleans up the matching
    /// cross-datapath state on every reachable remote.
    pub fn vm_port_del(&self, dpid: Dpid, port: PortNo, mac: MacAddress, net: NetworkId, key: TunnelKey) {
        self.send(dpid, FlowMod::new(Table::Src, Match::new().in_port(port), priority::SRC_VM_DROP, FlowModCommand::Delete { strict: true }));
        self.send(
            dpid,
            FlowMod::new(Table::Src, Match::new().in_port(port).dl_src(mac), priority::SRC_VM, FlowModCommand::Delete { strict: true }),
        );

        let active = self.active_vm_ports(dpid, &net);
        let last_instance = active.is_empty();
        let reachable = self.reachable_peers(dpid, &net);

        if last_instance {
            for table in [Table::Src, Table::TunnelOut, Table::LocalOut] {
                self.send(dpid, FlowMod::new(table, Match::new().tun_id(key.0), 0, FlowModCommand::Delete { strict: false }));
            }
        } else {
            self.send(
                dpid,
                FlowMod::new(Table::LocalOut, Match::new().tun_id(key.0).dl_dst(mac), priority::LOCAL_OUT_UNICAST, FlowModCommand::Delete { strict: true }),
            );
            let broadcast_actions: Vec<Action> = active.iter().map(|(p, _)| Action::Output(*p)).collect();
            self.send(
                dpid,
                FlowMod::new(
                    Table::LocalOut,
                    Match::new().tun_id(key.0).dl_dst(MacAddress::BROADCAST),
                    priority::LOCAL_OUT_BROADCAST,
                    FlowModCommand::Modify { strict: true },
                )
                .with_actions(broadcast_actions),
            );
        }

        for (remote_dpid, _local_tunnel_port) in &reachable {
            self.send(
                *remote_dpid,
                FlowMod::new(Table::TunnelOut, Match::new().tun_id(key.0).dl_dst(mac), priority::TUNNEL_OUT_UNICAST, FlowModCommand::Delete { strict: true }),
            );
            if last_instance {
                let remote_port_to_dpid = match self.tunnels.borrow().get_port(*remote_dpid, dpid) {
                    Ok(p) => p,
                    Err(_) => continue,
                };
                self.send(
                    *remote_dpid,
                    FlowMod::new(
                        Table::Src,
                        Match::new().in_port(remote_port_to_dpid).tun_id(key.0),
                        priority::SRC_TUNNEL_PASS,
                        FlowModCommand::Delete { strict: true },
                    ),
                );
                let remaining_peers: Vec<(Dpid, PortNo)> =
                    self.reachable_peers(*remote_dpid, &net).into_iter().filter(|(peer, _)| *peer != dpid).collect();
                if remaining_peers.is_empty() {
                    self.send(
                        *remote_dpid,
                        FlowMod::new(
                            Table::TunnelOut,
                            Match::new().tun_id(key.0).dl_dst(MacAddress::BROADCAST),
                            0,
                            FlowModCommand::Delete { strict: false },
                        ),
                    );
                } else {
                    let actions: Vec<Action> =
                        remaining_peers.iter().map(|(_, p)| Action::Output(*p)).chain(std::iter::once(Action::Resubmit(Table::LocalOut))).collect();
                    self.send(
                        *remote_dpid,
                        FlowMod::new(
                            Table::TunnelOut,
                            Match::new().tun_id(key.0).dl_dst(MacAddress::BROADCAST),
                            priority::TUNNEL_OUT_BROADCAST,
                            FlowModCommand::Modify { strict: true },
                        )
                        .with_actions(actions),
                    );
                }
            }
        }
    }

    /// `TUNNEL_PORT_ADD`: for every network with members on both `dpid` and
    /// `remote_dpid`, wires the new tunnel port into that network's pipeline:
    /// an SRC pass-through for traffic arriving on it, a TUNNEL_OUT unicast
    /// toward every MAC already active on the far side, and a refreshed
    /// TUNNEL_OUT broadcast rule that now includes it.
    pub fn tunnel_port_add(&self, dpid: Dpid, remote_dpid: Dpid, port: PortNo) {
        let shared_networks: Vec<NetworkId> = self
            .networks
            .borrow()
            .list_networks()
            .into_iter()
            .filter(|net| !net.is_reserved())
            .filter(|net| {
                let dpids = self.networks.borrow().get_dpids(net);
                dpids.contains(&dpid) && dpids.contains(&remote_dpid)
            })
            .collect();

        for net in shared_networks {
            let key = match self.tunnels.borrow().get_key(&net) {
                Some(key) => key,
                None => continue,
            };

            self.send(
                dpid,
                FlowMod::new(Table::Src, Match::new().in_port(port).tun_id(key.0), priority::SRC_TUNNEL_PASS, FlowModCommand::Add)
                    .with_actions(vec![Action::Resubmit(Table::LocalOut)]),
            );

            for (_, mac) in self.active_vm_ports(remote_dpid, &net) {
                self.send(
                    dpid,
                    FlowMod::new(Table::TunnelOut, Match::new().tun_id(key.0).dl_dst(mac), priority::TUNNEL_OUT_UNICAST, FlowModCommand::Add)
                        .with_actions(vec![Action::Output(port), Action::Resubmit(Table::LocalOut)]),
                );
            }

            let reachable = self.reachable_peers(dpid, &net);
            let command = if reachable.len() == 1 { FlowModCommand::Add } else { FlowModCommand::Modify { strict: true } };
            let actions: Vec<Action> =
                reachable.iter().map(|(_, p)| Action::Output(*p)).chain(std::iter::once(Action::Resubmit(Table::LocalOut))).collect();
            self.send(
                dpid,
                FlowMod::new(Table::TunnelOut, Match::new().tun_id(key.0).dl_dst(MacAddress::BROADCAST), priority::TUNNEL_OUT_BROADCAST, command)
                    .with_actions(actions),
            );
        }
    }

    /// Best-effort wholesale purge of every `key`-scoped rule on every
    /// connected datapath. The correlator only emits this once the per-VM-port
    /// deletes have already run, so in the common case there is nothing left
    /// to remove; it exists to catch rules on datapaths the per-port teardown
    /// never reached (e.g. a bystander with only a tunnel port for this key).
    pub fn tunnel_key_gone(&self, key: TunnelKey) {
        let dpids: Vec<Dpid> = self.dpset.borrow().dpids().collect();
        for dpid in dpids {
            for table in [Table::Src, Table::TunnelOut, Table::LocalOut] {
                self.send(dpid, FlowMod::new(table, Match::new().tun_id(key.0), 0, FlowModCommand::Delete { strict: false }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovs::{FlowFormat, PortState, SessionError, SimulatedSession};

    fn mac(s: &str) -> MacAddress {
        s.parse().unwrap()
    }

    /// `DatapathSession` impl that forwards to a shared `SimulatedSession` so
    /// a test can keep its own handle for introspection after the session is
    /// moved into a `DpSet`.
    struct Shared(Rc<RefCell<SimulatedSession>>);

    impl ovs::DatapathSession for Shared {
        fn id(&self) -> Dpid {
            self.0.borrow().id()
        }
        fn send_flow_mod(&mut self, flow_mod: &FlowMod) -> Result<(), SessionError> {
            self.0.borrow_mut().send_flow_mod(flow_mod)
        }
        fn send_barrier(&mut self) -> Result<(), SessionError> {
            self.0.borrow_mut().send_barrier()
        }
        fn send_packet_out(&mut self, buffer_id: u32, in_port: PortNo, actions: &[Action]) -> Result<(), SessionError> {
            self.0.borrow_mut().send_packet_out(buffer_id, in_port, actions)
        }
        fn send_nxt_set_flow_format(&mut self, format: FlowFormat) -> Result<(), SessionError> {
            self.0.borrow_mut().send_nxt_set_flow_format(format)
        }
        fn send_nx_flow_mod_table_id(&mut self, enable: bool) -> Result<(), SessionError> {
            self.0.borrow_mut().send_nx_flow_mod_table_id(enable)
        }
        fn get_port_state(&self, port: PortNo) -> Option<PortState> {
            self.0.borrow().get_port_state(port)
        }
    }

    struct Fixture {
        programmer: GreProgrammer,
        networks: Rc<RefCell<NetworkStore>>,
        tunnels: Rc<RefCell<TunnelsStore>>,
        dpset: Rc<RefCell<DpSet>>,
    }

    impl Fixture {
        fn new() -> Self {
            let networks = Rc::new(RefCell::new(NetworkStore::new()));
            let tunnels = Rc::new(RefCell::new(TunnelsStore::new()));
            let dpset = Rc::new(RefCell::new(DpSet::new()));
            let programmer = GreProgrammer::new(networks.clone(), tunnels.clone(), dpset.clone());
            Fixture { programmer, networks, tunnels, dpset }
        }

        /// Adds a connected datapath with `ports` all link-up, returns a
        /// handle to its backing `SimulatedSession` for flow assertions.
        fn add_dpid(&self, dpid: Dpid, ports: &[PortNo]) -> Rc<RefCell<SimulatedSession>> {
            let mut session = SimulatedSession::new(dpid);
            for &port in ports {
                session.set_port(port, PortState::LIVE);
            }
            let shared = Rc::new(RefCell::new(session));
            self.dpset.borrow_mut().insert(Box::new(Shared(shared.clone())));
            shared
        }
    }

    #[test]
    fn single_tenant_first_and_second_port_on_same_host() {
        let f = Fixture::new();
        let net = NetworkId::from("tenant-a");
        let key = TunnelKey(42);
        f.networks.borrow_mut().create_network(net.clone()).unwrap();
        f.networks.borrow_mut().create_port(net.clone(), Dpid(1), PortNo(1)).unwrap();
        f.networks.borrow_mut().create_port(net.clone(), Dpid(1), PortNo(2)).unwrap();
        f.networks.borrow_mut().create_mac(&net, Dpid(1), PortNo(1), mac("02:00:00:00:00:01")).unwrap();
        f.networks.borrow_mut().create_mac(&net, Dpid(1), PortNo(2), mac("02:00:00:00:00:02")).unwrap();
        f.tunnels.borrow_mut().register_key(net.clone(), key).unwrap();
        let session = f.add_dpid(Dpid(1), &[PortNo(1), PortNo(2)]);

        f.programmer.vm_port_add(Dpid(1), PortNo(1), mac("02:00:00:00:00:01"), net.clone(), key);

        assert!(session.borrow().flow(Table::LocalOut, &Match::new().tun_id(key.0).dl_dst(mac("02:00:00:00:00:01"))).is_some());
        assert!(session.borrow().flow(Table::LocalOut, &Match::new().tun_id(key.0)).is_some());
        assert!(session.borrow().flow(Table::TunnelOut, &Match::new().tun_id(key.0)).is_some());
        assert!(session.borrow().flow(Table::Src, &Match::new().in_port(PortNo(1)).dl_src(mac("02:00:00:00:00:01"))).is_some());
        assert!(session.borrow().flow(Table::Src, &Match::new().in_port(PortNo(1))).is_some());
        assert_eq!(session.borrow().barrier_count(), 1);
        let broadcast = session.borrow().flow(Table::LocalOut, &Match::new().tun_id(key.0).dl_dst(MacAddress::BROADCAST)).unwrap().clone();
        assert_eq!(broadcast.actions, vec![Action::Output(PortNo(1))]);

        f.programmer.vm_port_add(Dpid(1), PortNo(2), mac("02:00:00:00:00:02"), net, key);

        assert!(session.borrow().flow(Table::LocalOut, &Match::new().tun_id(key.0).dl_dst(mac("02:00:00:00:00:02"))).is_some());
        let broadcast = session.borrow().flow(Table::LocalOut, &Match::new().tun_id(key.0).dl_dst(MacAddress::BROADCAST)).unwrap().clone();
        assert_eq!(broadcast.actions.len(), 2);
        // Scaffolding rules are installed once; a second non-first-instance
        // add must not duplicate them.
        assert_eq!(session.borrow().flows_in(Table::LocalOut).len(), 4);
    }

    #[test]
    fn last_mac_leaving_wipes_every_rule_for_the_key() {
        let f = Fixture::new();
        let net = NetworkId::from("tenant-a");
        let key = TunnelKey(7);
        f.networks.borrow_mut().create_network(net.clone()).unwrap();
        f.networks.borrow_mut().create_port(net.clone(), Dpid(1), PortNo(1)).unwrap();
        f.networks.borrow_mut().create_mac(&net, Dpid(1), PortNo(1), mac("02:00:00:00:00:01")).unwrap();
        f.tunnels.borrow_mut().register_key(net.clone(), key).unwrap();
        let session = f.add_dpid(Dpid(1), &[PortNo(1)]);

        f.programmer.vm_port_add(Dpid(1), PortNo(1), mac("02:00:00:00:00:01"), net.clone(), key);
        assert!(session.borrow().flow_count() > 0);

        f.networks.borrow_mut().remove_port(&net, Dpid(1), PortNo(1)).unwrap();
        f.programmer.vm_port_del(Dpid(1), PortNo(1), mac("02:00:00:00:00:01"), net, key);

        assert_eq!(session.borrow().flow_count(), 0);
    }

    #[test]
    fn cross_host_unicast_installs_both_directions() {
        let f = Fixture::new();
        let net = NetworkId::from("tenant-a");
        let key = TunnelKey(99);
        f.networks.borrow_mut().create_network(net.clone()).unwrap();
        f.networks.borrow_mut().create_port(net.clone(), Dpid(1), PortNo(1)).unwrap();
        f.networks.borrow_mut().create_port(net.clone(), Dpid(2), PortNo(1)).unwrap();
        let mac1 = mac("02:00:00:00:00:01");
        f.networks.borrow_mut().create_mac(&net, Dpid(1), PortNo(1), mac1).unwrap();
        f.tunnels.borrow_mut().register_key(net.clone(), key).unwrap();
        f.tunnels.borrow_mut().register_tunnel_port(Dpid(1), Dpid(2), PortNo(10)).unwrap();
        f.tunnels.borrow_mut().register_tunnel_port(Dpid(2), Dpid(1), PortNo(10)).unwrap();

        let s1 = f.add_dpid(Dpid(1), &[PortNo(1), PortNo(10)]);
        let s2 = f.add_dpid(Dpid(2), &[PortNo(1), PortNo(10)]);

        f.programmer.vm_port_add(Dpid(1), PortNo(1), mac1, net, key);

        // Local host installs a tunnel-out unicast toward its own peer port.
        assert!(s1.borrow().flow(Table::TunnelOut, &Match::new().tun_id(key.0).dl_dst(mac1)).is_some());
        // The remote host gets a matching tunnel-out unicast back toward us,
        // plus the SRC pass-through for the tunnel port facing dpid 1.
        assert!(s2.borrow().flow(Table::TunnelOut, &Match::new().tun_id(key.0).dl_dst(mac1)).is_some());
        assert!(s2.borrow().flow(Table::Src, &Match::new().in_port(PortNo(10)).tun_id(key.0)).is_some());
    }

    #[test]
    fn tunnel_port_add_wires_reachable_peer_into_existing_network() {
        let f = Fixture::new();
        let net = NetworkId::from("tenant-a");
        let key = TunnelKey(55);
        f.networks.borrow_mut().create_network(net.clone()).unwrap();
        f.networks.borrow_mut().create_port(net.clone(), Dpid(1), PortNo(1)).unwrap();
        f.networks.borrow_mut().create_port(net.clone(), Dpid(2), PortNo(1)).unwrap();
        let mac2 = mac("02:00:00:00:00:02");
        f.networks.borrow_mut().create_mac(&net, Dpid(2), PortNo(1), mac2).unwrap();
        f.tunnels.borrow_mut().register_key(net, key).unwrap();
        let s1 = f.add_dpid(Dpid(1), &[PortNo(1), PortNo(10)]);
        f.add_dpid(Dpid(2), &[PortNo(1)]);

        f.tunnels.borrow_mut().register_tunnel_port(Dpid(1), Dpid(2), PortNo(10)).unwrap();
        f.programmer.tunnel_port_add(Dpid(1), Dpid(2), PortNo(10));

        assert!(s1.borrow().flow(Table::Src, &Match::new().in_port(PortNo(10)).tun_id(key.0)).is_some());
        assert!(s1.borrow().flow(Table::TunnelOut, &Match::new().tun_id(key.0).dl_dst(mac2)).is_some());
    }

    #[tokio::test]
    async fn registered_brick_reacts_to_vm_port_event_from_the_bus() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let f = Fixture::new();
                let bus = Bus::new();
                f.programmer.clone().register(&bus);

                let net = NetworkId::from("tenant-a");
                let key = TunnelKey(3);
                f.networks.borrow_mut().create_network(net.clone()).unwrap();
                f.networks.borrow_mut().create_port(net.clone(), Dpid(1), PortNo(1)).unwrap();
                f.tunnels.borrow_mut().register_key(net.clone(), key).unwrap();
                let mac1 = mac("02:00:00:00:00:01");
                let session = f.add_dpid(Dpid(1), &[PortNo(1)]);

                bus.send_event_to_observers(
                    Event::VmPort { network: net, tunnel_key: key, dpid: Dpid(1), port: PortNo(1), mac: mac1, add: true },
                    bus::DispatcherState::Main,
                )
                .await;
                tokio::task::yield_now().await;

                assert!(session.borrow().flow(Table::Src, &Match::new().in_port(PortNo(1)).dl_src(mac1)).is_some());
            })
            .await;
    }
}
