//! The port-set correlator: the brick that turns three independently-arriving
//! event streams (switch port state, tenant network membership, tunnel-key
//! registration) into the higher-level `VmPort`/`TunnelPort`/`TunnelKeyGone`
//! signals the GRE programmer actually acts on.
//!
//! It is pure over the stores it reads — no derived state of its own is kept
//! — which is what makes it safe to re-run the readiness predicate for the
//! same `(dpid, port)` as many times as events arrive. Downstream, the
//! programmer is required to treat a repeated `add` as a modify and a `del`
//! for something never added as a no-op.

use std::cell::RefCell;
use std::rc::Rc;

use bus::{Bus, DispatcherState, Event, HandlerEntry, StateSet};
use ovs::{DpEvent, Dpid, PortNo};
use stores::{NetworkId, NetworkStore, NetworkStoreEvent, TunnelStoreEvent, TunnelsStore};
use tracing::debug;

#[derive(Clone)]
pub struct PortSetCorrelator {
    networks: Rc<RefCell<NetworkStore>>,
    tunnels: Rc<RefCell<TunnelsStore>>,
    dpset: Rc<RefCell<stores::DpSet>>,
    bus: Bus,
}

impl PortSetCorrelator {
    pub fn new(
        networks: Rc<RefCell<NetworkStore>>,
        tunnels: Rc<RefCell<TunnelsStore>>,
        dpset: Rc<RefCell<stores::DpSet>>,
        bus: Bus,
    ) -> Self {
        PortSetCorrelator { networks, tunnels, dpset, bus }
    }

    /// Registers this correlator as the `"correlator"` brick. Consumes this
    /// value since the handler closures below each hold their own clone of
    /// the shared state.
    pub fn register(self) {
        let handlers = vec![
            HandlerEntry::new(bus::EventKind::Network, StateSet::All, {
                let this = self.clone();
                Box::new(move |event, _state, _bus| {
                    let this = this.clone();
                    Box::pin(async move {
                        if let Event::Network(ev) = event {
                            this.on_network_event(ev).await;
                        }
                        Ok(())
                    })
                })
            }),
            HandlerEntry::new(bus::EventKind::Tunnel, StateSet::All, {
                let this = self.clone();
                Box::new(move |event, _state, _bus| {
                    let this = this.clone();
                    Box::pin(async move {
                        if let Event::Tunnel(ev) = event {
                            this.on_tunnel_event(ev).await;
                        }
                        Ok(())
                    })
                })
            }),
            HandlerEntry::new(bus::EventKind::Dp, StateSet::All, {
                let this = self.clone();
                Box::new(move |event, _state, _bus| {
                    let this = this.clone();
                    Box::pin(async move {
                        if let Event::Dp(ev) = event {
                            this.on_dp_event(ev).await;
                        }
                        Ok(())
                    })
                })
            }),
        ];
        self.bus.clone().register_brick("correlator", handlers);
    }

    async fn on_network_event(&self, ev: NetworkStoreEvent) {
        match ev {
            NetworkStoreEvent::NetworkCreated { .. } => {}
            // `remove_network` requires the network to already have zero
            // bound ports, so there is nothing left to retract here — see
            // the design ledger for why this is not a no-op by accident.
            NetworkStoreEvent::NetworkRemoved { net } => debug!(%net, "network removed with no bound ports, nothing to correlate"),
            NetworkStoreEvent::PortAdded { dpid, port, .. } => self.ready(dpid, port, true).await,
            NetworkStoreEvent::PortRemoved { net, dpid, port, mac } => self.port_unbound(net, dpid, port, mac).await,
            NetworkStoreEvent::MacAdded { dpid, port, .. } => self.ready(dpid, port, true).await,
        }
    }

    async fn on_tunnel_event(&self, ev: TunnelStoreEvent) {
        match ev {
            TunnelStoreEvent::KeyAdded { net, .. } => {
                let members = self.networks.borrow().members(&net);
                for (dpid, port, _) in members {
                    self.ready(dpid, port, true).await;
                }
            }
            TunnelStoreEvent::KeyDeleted { net, key } => {
                let members = self.networks.borrow().members(&net);
                for (dpid, port, mac) in members {
                    if let Some(mac) = mac {
                        self.bus
                            .send_event_to_observers(
                                Event::VmPort { network: net.clone(), tunnel_key: key, dpid, port, mac, add: false },
                                DispatcherState::Main,
                            )
                            .await;
                    }
                }
                if !self.networks.borrow().get_dpids(&net).is_empty() {
                    self.bus.send_event_to_observers(Event::TunnelKeyGone { key }, DispatcherState::Main).await;
                }
            }
            TunnelStoreEvent::TunnelPortAdded { dpid, port, .. } => self.ready(dpid, port, true).await,
        }
    }

    async fn on_dp_event(&self, ev: DpEvent) {
        match ev {
            DpEvent::Connected { dpid } => {
                let mut ports: Vec<PortNo> = self.networks.borrow().ports_of_dpid(dpid).into_iter().map(|(_, p)| p).collect();
                ports.extend(self.tunnels.borrow().tunnel_ports_on(dpid).into_iter().map(|(_, p)| p));
                for port in ports {
                    self.ready(dpid, port, true).await;
                }
            }
            // Derived flow state on the switch is discarded by the switch
            // itself on disconnect; the correlator keeps no state to purge,
            // and reconnect re-derives everything via `Connected` above.
            DpEvent::Disconnected { dpid } => debug!(?dpid, "datapath disconnected, no correlator state to purge"),
            DpEvent::PortAdd { dpid, port, state } => self.ready(dpid, port, state.is_link_up()).await,
            DpEvent::PortModify { dpid, port, state } => self.ready(dpid, port, state.is_link_up()).await,
            DpEvent::PortDelete { dpid, port } => self.ready(dpid, port, false).await,
        }
    }

    /// The core `READY(dpid, port_no, add)` predicate: re-reads the
    /// authoritative stores and emits `VmPort`/`TunnelPort` only when every
    /// precondition currently holds (for `add`) or aborts silently the moment
    /// one doesn't (for either direction).
    async fn ready(&self, dpid: Dpid, port: PortNo, add: bool) {
        if self.dpset.borrow().get(dpid).is_none() {
            return;
        }
        if add {
            let link_up = self.dpset.borrow().get_port_state(dpid, port).map(|s| s.is_link_up()).unwrap_or(false);
            if !link_up {
                return;
            }
        }
        let net = match self.networks.borrow().network_of(dpid, port).cloned() {
            Some(net) => net,
            None => return,
        };
        if net.is_tunnel_sentinel() {
            let remote_dpid = match self.tunnels.borrow().get_remote_dpid(dpid, port) {
                Some(r) => r,
                None => return,
            };
            self.bus
                .send_event_to_observers(Event::TunnelPort { dpid, port, remote_dpid, add }, DispatcherState::Main)
                .await;
            return;
        }
        if net.is_reserved() {
            return;
        }
        let mac = match self.networks.borrow().mac_of(&net, dpid, port) {
            Some(mac) => mac,
            None => return,
        };
        let tunnel_key = match self.tunnels.borrow().get_key(&net) {
            Some(key) => key,
            None => return,
        };
        self.bus
            .send_event_to_observers(Event::VmPort { network: net, tunnel_key, dpid, port, mac, add }, DispatcherState::Main)
            .await;
    }

    /// `PortRemoved` fires after the store has already forgotten the port, so
    /// readiness has to be reconstructed from the event's own payload instead
    /// of re-reading `NetworkStore`.
    async fn port_unbound(&self, net: NetworkId, dpid: Dpid, port: PortNo, mac: Option<ovs::MacAddress>) {
        if net.is_reserved() {
            return;
        }
        let mac = match mac {
            Some(mac) => mac,
            // No MAC was ever registered, so the port was never ready and
            // there is nothing to retract.
            None => return,
        };
        let tunnel_key = match self.tunnels.borrow().get_key(&net) {
            Some(key) => key,
            None => return,
        };
        self.bus
            .send_event_to_observers(Event::VmPort { network: net, tunnel_key, dpid, port, mac, add: false }, DispatcherState::Main)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovs::{Dpid, MacAddress, PortNo, PortState, SimulatedSession};
    use stores::{DpSet, TunnelKey};

    fn mac(s: &str) -> MacAddress {
        s.parse().unwrap()
    }

    async fn wire() -> (Bus, Rc<RefCell<NetworkStore>>, Rc<RefCell<TunnelsStore>>, Rc<RefCell<DpSet>>) {
        let bus = Bus::new();
        let networks = Rc::new(RefCell::new(NetworkStore::new()));
        let tunnels = Rc::new(RefCell::new(TunnelsStore::new()));
        let dpset = Rc::new(RefCell::new(DpSet::new()));
        PortSetCorrelator::new(networks.clone(), tunnels.clone(), dpset.clone(), bus.clone()).register();
        (bus, networks, tunnels, dpset)
    }

    #[tokio::test]
    async fn emits_vm_port_ready_only_once_every_precondition_holds() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let (bus, networks, tunnels, dpset) = wire().await;

                let received = Rc::new(RefCell::new(Vec::new()));
                let received_clone = received.clone();
                bus.register_brick(
                    "sink",
                    vec![HandlerEntry::new(
                        bus::EventKind::VmPort,
                        StateSet::All,
                        Box::new(move |event, _state, _bus| {
                            let received = received_clone.clone();
                            Box::pin(async move {
                                received.borrow_mut().push(event);
                                Ok(())
                            })
                        }),
                    )],
                );

                let mut session = SimulatedSession::new(Dpid(1));
                session.set_port(PortNo(2), PortState::LIVE);
                dpset.borrow_mut().insert(Box::new(session));

                let net = NetworkId::from("netA");
                networks.borrow_mut().create_network(net.clone()).unwrap();

                // Port bound, but no MAC and no tunnel key yet — not ready.
                let ev = networks.borrow_mut().create_port(net.clone(), Dpid(1), PortNo(2)).unwrap();
                bus.send_event_to_observers(Event::Network(ev), DispatcherState::Main).await;
                tokio::task::yield_now().await;
                assert!(received.borrow().is_empty());

                // MAC registered, still no key — not ready.
                let ev = networks.borrow_mut().create_mac(&net, Dpid(1), PortNo(2), mac("02:00:00:00:00:01")).unwrap();
                bus.send_event_to_observers(Event::Network(ev), DispatcherState::Main).await;
                tokio::task::yield_now().await;
                assert!(received.borrow().is_empty());

                // Key registered last — now every precondition holds.
                let ev = tunnels.borrow_mut().register_key(net.clone(), TunnelKey(100)).unwrap();
                bus.send_event_to_observers(Event::Tunnel(ev), DispatcherState::Main).await;
                tokio::task::yield_now().await;
                tokio::task::yield_now().await;

                assert_eq!(received.borrow().len(), 1);
                assert!(matches!(&received.borrow()[0], Event::VmPort { add: true, .. }));
            })
            .await;
    }

    #[tokio::test]
    async fn tunnel_sentinel_network_emits_tunnel_port_not_vm_port() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let (bus, networks, tunnels, dpset) = wire().await;

                let received = Rc::new(RefCell::new(Vec::new()));
                let received_clone = received.clone();
                bus.register_brick(
                    "sink",
                    vec![
                        HandlerEntry::new(bus::EventKind::TunnelPort, StateSet::All, {
                            let received = received_clone.clone();
                            Box::new(move |event, _state, _bus| {
                                let received = received.clone();
                                Box::pin(async move {
                                    received.borrow_mut().push(event);
                                    Ok(())
                                })
                            })
                        }),
                        HandlerEntry::new(bus::EventKind::VmPort, StateSet::All, {
                            let received = received_clone.clone();
                            Box::new(move |event, _state, _bus| {
                                let received = received.clone();
                                Box::pin(async move {
                                    received.borrow_mut().push(event);
                                    Ok(())
                                })
                            })
                        }),
                    ],
                );

                let mut s1 = SimulatedSession::new(Dpid(1));
                s1.set_port(PortNo(5), PortState::LIVE);
                dpset.borrow_mut().insert(Box::new(s1));

                let gre = NetworkId::from(NetworkId::VPORT_GRE);
                let ev = networks.borrow_mut().create_port(gre, Dpid(1), PortNo(5)).unwrap();
                bus.send_event_to_observers(Event::Network(ev), DispatcherState::Main).await;
                tokio::task::yield_now().await;
                // No remote dpid registered yet — must not fire.
                assert!(received.borrow().is_empty());

                let ev = tunnels.borrow_mut().register_tunnel_port(Dpid(1), Dpid(2), PortNo(5)).unwrap();
                bus.send_event_to_observers(Event::Tunnel(ev), DispatcherState::Main).await;
                tokio::task::yield_now().await;
                tokio::task::yield_now().await;

                assert_eq!(received.borrow().len(), 1);
                assert!(matches!(&received.borrow()[0], Event::TunnelPort { add: true, .. }));
            })
            .await;
    }
}
