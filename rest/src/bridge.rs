use std::cell::RefCell;
use std::rc::Rc;

use bus::{Bus, DispatcherState, Event};
use ovs::{Dpid, MacAddress, PortNo};
use stores::{NetworkId, NetworkStore, StoreError, StoreResult, TunnelKey, TunnelsStore};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

/// What a successful command returns, beyond a bare `200`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RestOutcome {
    Empty,
    Strings(Vec<String>),
    TunnelKey(Option<u32>),
}

type Reply = oneshot::Sender<StoreResult<RestOutcome>>;

/// Every mutation or query a route handler can ask the bridge brick to run
/// against the stores it owns. Carries its own reply channel rather than
/// returning a future, since the command itself has to cross from axum's
/// `Send` world onto the bus's single-threaded one.
pub enum RestCommand {
    ListNetworks { reply: Reply },
    CreateNetwork { net: NetworkId, reply: Reply },
    UpdateNetwork { net: NetworkId, reply: Reply },
    RemoveNetwork { net: NetworkId, reply: Reply },
    ListPorts { net: NetworkId, reply: Reply },
    CreatePort { net: NetworkId, dpid: Dpid, port: PortNo, reply: Reply },
    UpdatePort { net: NetworkId, dpid: Dpid, port: PortNo, reply: Reply },
    RemovePort { net: NetworkId, dpid: Dpid, port: PortNo, reply: Reply },
    ListMacs { net: NetworkId, dpid: Dpid, port: PortNo, reply: Reply },
    CreateMac { net: NetworkId, dpid: Dpid, port: PortNo, mac: MacAddress, reply: Reply },
    UpdateMac { net: NetworkId, dpid: Dpid, port: PortNo, mac: MacAddress, reply: Reply },
    GetTunnelKey { net: NetworkId, reply: Reply },
    CreateTunnelKey { net: NetworkId, key: TunnelKey, reply: Reply },
    UpdateTunnelKey { net: NetworkId, key: TunnelKey, reply: Reply },
    DeleteTunnelKey { net: NetworkId, reply: Reply },
    ListTunnelPorts { dpid: Dpid, reply: Reply },
    CreateTunnelPort { dpid: Dpid, remote_dpid: Dpid, port: PortNo, reply: Reply },
    UpdateTunnelPort { dpid: Dpid, remote_dpid: Dpid, port: PortNo, reply: Reply },
}

/// A cheap, `Send + Sync` handle axum handlers hold in their app state. The
/// stores it addresses never leave the bridge's own task.
#[derive(Clone)]
pub struct RestHandle {
    tx: mpsc::Sender<RestCommand>,
}

impl RestHandle {
    pub async fn call(&self, make_command: impl FnOnce(Reply) -> RestCommand) -> StoreResult<RestOutcome> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(make_command(reply_tx)).await.is_err() {
            warn!("REST bridge brick is gone, dropping request");
            return Err(StoreError::NotFound);
        }
        reply_rx.await.unwrap_or(Err(StoreError::NotFound))
    }
}

/// The brick that actually owns the network and tunnel stores on behalf of
/// the HTTP surface. Lives on the same `LocalSet` as every other brick;
/// `run` is its dispatch loop.
pub struct RestBridge {
    networks: Rc<RefCell<NetworkStore>>,
    tunnels: Rc<RefCell<TunnelsStore>>,
    bus: Bus,
    rx: mpsc::Receiver<RestCommand>,
}

impl RestBridge {
    pub fn new(networks: Rc<RefCell<NetworkStore>>, tunnels: Rc<RefCell<TunnelsStore>>, bus: Bus) -> (Self, RestHandle) {
        let (tx, rx) = mpsc::channel(bus::MAILBOX_CAPACITY);
        (RestBridge { networks, tunnels, bus, rx }, RestHandle { tx })
    }

    pub async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            self.handle(command).await;
        }
    }

    async fn handle(&mut self, command: RestCommand) {
        match command {
            RestCommand::ListNetworks { reply } => {
                let names = self.networks.borrow().list_networks().into_iter().map(|n| n.0).collect();
                let _ = reply.send(Ok(RestOutcome::Strings(names)));
            }
            RestCommand::CreateNetwork { net, reply } => {
                let outcome = self.networks.borrow_mut().create_network(net);
                self.finish(outcome.map(Event::Network), reply).await;
            }
            RestCommand::UpdateNetwork { net, reply } => {
                let outcome = self.networks.borrow_mut().update_network(net).map(|opt| opt.map(Event::Network));
                self.finish_optional(outcome, reply).await;
            }
            RestCommand::RemoveNetwork { net, reply } => {
                let outcome = self.networks.borrow_mut().remove_network(&net);
                self.finish(outcome.map(Event::Network), reply).await;
            }
            RestCommand::ListPorts { net, reply } => {
                let outcome = self.networks.borrow().list_ports(&net);
                let outcome = outcome.map(|ports| {
                    RestOutcome::Strings(ports.into_iter().map(|(dpid, port)| format!("{dpid}_{port}")).collect())
                });
                let _ = reply.send(outcome);
            }
            RestCommand::CreatePort { net, dpid, port, reply } => {
                let outcome = self.networks.borrow_mut().create_port(net, dpid, port);
                self.finish(outcome.map(Event::Network), reply).await;
            }
            RestCommand::UpdatePort { net, dpid, port, reply } => {
                let outcome = self.networks.borrow_mut().update_port(net, dpid, port).map(|opt| opt.map(Event::Network));
                self.finish_optional(outcome, reply).await;
            }
            RestCommand::RemovePort { net, dpid, port, reply } => {
                let outcome = self.networks.borrow_mut().remove_port(&net, dpid, port);
                self.finish(outcome.map(Event::Network), reply).await;
            }
            RestCommand::ListMacs { net, dpid, port, reply } => {
                let store = self.networks.borrow();
                let outcome = match store.list_ports(&net) {
                    Err(error) => Err(error),
                    Ok(ports) if !ports.contains(&(dpid, port)) => Err(StoreError::NotFound),
                    Ok(_) => Ok(RestOutcome::Strings(store.mac_of(&net, dpid, port).into_iter().map(|m| m.to_string()).collect())),
                };
                let _ = reply.send(outcome);
            }
            RestCommand::CreateMac { net, dpid, port, mac, reply } => {
                let outcome = self.networks.borrow_mut().create_mac(&net, dpid, port, mac);
                self.finish(outcome.map(Event::Network), reply).await;
            }
            RestCommand::UpdateMac { net, dpid, port, mac, reply } => {
                let already = self.networks.borrow().mac_of(&net, dpid, port) == Some(mac);
                if already {
                    let _ = reply.send(Ok(RestOutcome::Empty));
                    return;
                }
                let outcome = self.networks.borrow_mut().create_mac(&net, dpid, port, mac);
                self.finish(outcome.map(Event::Network), reply).await;
            }
            RestCommand::GetTunnelKey { net, reply } => {
                let key = self.tunnels.borrow().get_key(&net);
                let _ = reply.send(Ok(RestOutcome::TunnelKey(key.map(|k| k.0))));
            }
            RestCommand::CreateTunnelKey { net, key, reply } => {
                let outcome = self.tunnels.borrow_mut().register_key(net, key);
                self.finish(outcome.map(Event::Tunnel), reply).await;
            }
            RestCommand::UpdateTunnelKey { net, key, reply } => {
                let already = self.tunnels.borrow().get_key(&net) == Some(key);
                if already {
                    let _ = reply.send(Ok(RestOutcome::Empty));
                    return;
                }
                let outcome = self.tunnels.borrow_mut().register_key(net, key);
                self.finish(outcome.map(Event::Tunnel), reply).await;
            }
            RestCommand::DeleteTunnelKey { net, reply } => {
                let outcome = self.tunnels.borrow_mut().delete_key(&net);
                self.finish(outcome.map(Event::Tunnel), reply).await;
            }
            RestCommand::ListTunnelPorts { dpid, reply } => {
                let ports = self
                    .tunnels
                    .borrow()
                    .tunnel_ports_on(dpid)
                    .into_iter()
                    .map(|(remote, port)| format!("{remote}_{port}"))
                    .collect();
                let _ = reply.send(Ok(RestOutcome::Strings(ports)));
            }
            RestCommand::CreateTunnelPort { dpid, remote_dpid, port, reply } => {
                let outcome = self.tunnels.borrow_mut().register_tunnel_port(dpid, remote_dpid, port);
                self.finish(outcome.map(Event::Tunnel), reply).await;
            }
            RestCommand::UpdateTunnelPort { dpid, remote_dpid, port, reply } => {
                let already = self.tunnels.borrow().get_port(dpid, remote_dpid) == Ok(port);
                if already {
                    let _ = reply.send(Ok(RestOutcome::Empty));
                    return;
                }
                let outcome = self.tunnels.borrow_mut().register_tunnel_port(dpid, remote_dpid, port);
                self.finish(outcome.map(Event::Tunnel), reply).await;
            }
        }
    }

    /// Publishes the event on success, replies, and reports `Empty` either way
    /// (the caller only needed the event for the bus side-effect).
    async fn finish(&self, outcome: StoreResult<Event>, reply: Reply) {
        match outcome {
            Ok(event) => {
                self.bus.send_event_to_observers(event, DispatcherState::Main).await;
                let _ = reply.send(Ok(RestOutcome::Empty));
            }
            Err(error) => {
                let _ = reply.send(Err(error));
            }
        }
    }

    /// Same as [`Self::finish`] but for the idempotent upsert methods, which
    /// return `Ok(None)` instead of an error when the mutation was a no-op.
    async fn finish_optional(&self, outcome: StoreResult<Option<Event>>, reply: Reply) {
        match outcome {
            Ok(Some(event)) => {
                self.bus.send_event_to_observers(event, DispatcherState::Main).await;
                let _ = reply.send(Ok(RestOutcome::Empty));
            }
            Ok(None) => {
                let _ = reply.send(Ok(RestOutcome::Empty));
            }
            Err(error) => {
                let _ = reply.send(Err(error));
            }
        }
    }
}
