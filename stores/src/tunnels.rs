use std::collections::HashMap;

use ovs::{Dpid, PortNo};

use crate::error::{StoreError, StoreResult};
use crate::network::NetworkId;

/// The 32-bit GRE key that identifies a tenant network on the wire. `0` is
/// reserved and never assigned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TunnelKey(pub u32);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TunnelStoreEvent {
    KeyAdded { net: NetworkId, key: TunnelKey },
    KeyDeleted { net: NetworkId, key: TunnelKey },
    TunnelPortAdded { dpid: Dpid, remote_dpid: Dpid, port: PortNo },
}

/// Tunnel-key bindings (one key per tenant network, bijective) and the local
/// GRE tunnel ports that carry traffic to each known peer datapath.
#[derive(Default)]
pub struct TunnelsStore {
    key_by_net: HashMap<NetworkId, TunnelKey>,
    net_by_key: HashMap<TunnelKey, NetworkId>,
    port_by_peer: HashMap<(Dpid, Dpid), PortNo>,
    peer_by_port: HashMap<(Dpid, PortNo), Dpid>,
}

impl TunnelsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_key(&mut self, net: NetworkId, key: TunnelKey) -> StoreResult<TunnelStoreEvent> {
        if key.0 == 0 {
            return Err(StoreError::Reserved);
        }
        if self.key_by_net.contains_key(&net) {
            return Err(StoreError::AlreadyExists);
        }
        if self.net_by_key.contains_key(&key) {
            return Err(StoreError::Conflict);
        }
        self.key_by_net.insert(net.clone(), key);
        self.net_by_key.insert(key, net.clone());
        Ok(TunnelStoreEvent::KeyAdded { net, key })
    }

    pub fn delete_key(&mut self, net: &NetworkId) -> StoreResult<TunnelStoreEvent> {
        let key = self.key_by_net.remove(net).ok_or(StoreError::NotFound)?;
        self.net_by_key.remove(&key);
        Ok(TunnelStoreEvent::KeyDeleted { net: net.clone(), key })
    }

    pub fn get_key(&self, net: &NetworkId) -> Option<TunnelKey> {
        self.key_by_net.get(net).copied()
    }

    pub fn get_network(&self, key: TunnelKey) -> Option<&NetworkId> {
        self.net_by_key.get(&key)
    }

    pub fn register_tunnel_port(&mut self, dpid: Dpid, remote_dpid: Dpid, port: PortNo) -> StoreResult<TunnelStoreEvent> {
        match self.port_by_peer.get(&(dpid, remote_dpid)) {
            Some(p) if *p == port => return Err(StoreError::AlreadyExists),
            Some(_) => return Err(StoreError::Conflict),
            None => {}
        }
        if self.peer_by_port.contains_key(&(dpid, port)) {
            return Err(StoreError::Conflict);
        }
        self.port_by_peer.insert((dpid, remote_dpid), port);
        self.peer_by_port.insert((dpid, port), remote_dpid);
        Ok(TunnelStoreEvent::TunnelPortAdded { dpid, remote_dpid, port })
    }

    pub fn get_port(&self, dpid: Dpid, remote_dpid: Dpid) -> StoreResult<PortNo> {
        self.port_by_peer.get(&(dpid, remote_dpid)).copied().ok_or(StoreError::NotFound)
    }

    pub fn get_remote_dpid(&self, dpid: Dpid, port: PortNo) -> Option<Dpid> {
        self.peer_by_port.get(&(dpid, port)).copied()
    }

    /// Every tunnel port known on `dpid`, as `(remote_dpid, port)` pairs.
    pub fn tunnel_ports_on(&self, dpid: Dpid) -> Vec<(Dpid, PortNo)> {
        self.peer_by_port
            .iter()
            .filter(|((d, _), _)| *d == dpid)
            .map(|((_, port), remote)| (*remote, *port))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> NetworkId {
        NetworkId::from(s)
    }

    #[test]
    fn key_is_bijective() {
        let mut store = TunnelsStore::new();
        store.register_key(net("a"), TunnelKey(100)).unwrap();
        assert_eq!(store.register_key(net("b"), TunnelKey(100)), Err(StoreError::Conflict));
        assert_eq!(store.register_key(net("a"), TunnelKey(200)), Err(StoreError::AlreadyExists));
    }

    #[test]
    fn zero_key_is_reserved() {
        let mut store = TunnelsStore::new();
        assert_eq!(store.register_key(net("a"), TunnelKey(0)), Err(StoreError::Reserved));
    }

    #[test]
    fn key_reusable_after_delete() {
        let mut store = TunnelsStore::new();
        store.register_key(net("a"), TunnelKey(100)).unwrap();
        store.delete_key(&net("a")).unwrap();
        store.register_key(net("b"), TunnelKey(100)).unwrap();
        assert_eq!(store.get_key(&net("b")), Some(TunnelKey(100)));
    }

    #[test]
    fn tunnel_port_lookup_is_symmetric() {
        let mut store = TunnelsStore::new();
        store.register_tunnel_port(Dpid(1), Dpid(2), PortNo(5)).unwrap();
        assert_eq!(store.get_port(Dpid(1), Dpid(2)), Ok(PortNo(5)));
        assert_eq!(store.get_remote_dpid(Dpid(1), PortNo(5)), Some(Dpid(2)));
    }

    #[test]
    fn missing_tunnel_port_is_not_found() {
        let store = TunnelsStore::new();
        assert_eq!(store.get_port(Dpid(1), Dpid(9)), Err(StoreError::NotFound));
    }
}
