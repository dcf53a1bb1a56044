use std::collections::{HashMap, HashSet};
use std::fmt;

use ovs::{Dpid, MacAddress, PortNo};

use crate::error::{StoreError, StoreResult};

/// An opaque tenant network identifier, or one of the reserved sentinels that
/// never name a tenant network.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetworkId(pub String);

impl NetworkId {
    pub const EXTERNAL: &'static str = "__NW_ID_EXTERNAL";
    /// The sentinel network id that marks a port as a GRE tunnel endpoint rather
    /// than a VM port.
    pub const VPORT_GRE: &'static str = "__NW_ID_VPORT_GRE";
    pub const UNKNOWN: &'static str = "__NW_ID_UNKNOWN";

    pub fn is_reserved(&self) -> bool {
        matches!(self.0.as_str(), Self::EXTERNAL | Self::VPORT_GRE | Self::UNKNOWN)
    }

    pub fn is_tunnel_sentinel(&self) -> bool {
        self.0 == Self::VPORT_GRE
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NetworkId {
    fn from(s: &str) -> Self {
        NetworkId(s.to_string())
    }
}

impl From<String> for NetworkId {
    fn from(s: String) -> Self {
        NetworkId(s)
    }
}

/// The full semantic delta of a successful [`NetworkStore`] mutation. Every
/// mutation publishes exactly one of these: never a reference into the
/// store's internal state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetworkStoreEvent {
    NetworkCreated { net: NetworkId },
    NetworkRemoved { net: NetworkId },
    PortAdded { net: NetworkId, dpid: Dpid, port: PortNo },
    /// `mac` is the MAC that was registered on this port immediately before
    /// removal, if any — carried here because the store no longer has it to
    /// look up once the port is gone.
    PortRemoved { net: NetworkId, dpid: Dpid, port: PortNo, mac: Option<MacAddress> },
    MacAdded { net: NetworkId, dpid: Dpid, port: PortNo, mac: MacAddress },
}

#[derive(Default)]
struct NetworkEntry {
    ports: HashMap<(Dpid, PortNo), Option<MacAddress>>,
}

/// Tenant network membership: which `(dpid, port)` pairs belong to which
/// network, and which MAC (if any) is registered on each. A `(dpid, port)`
/// belongs to at most one network; a MAC is unique within a network.
#[derive(Default)]
pub struct NetworkStore {
    networks: HashMap<NetworkId, NetworkEntry>,
    port_owner: HashMap<(Dpid, PortNo), NetworkId>,
}

impl NetworkStore {
    /// The GRE tunnel-endpoint sentinel is never created by REST — `create_network`
    /// rejects reserved ids outright — so it has to already exist as a row a port
    /// can bind into, or tunnel ports could never be registered at all.
    pub fn new() -> Self {
        let mut store = Self::default();
        store.networks.insert(NetworkId::from(NetworkId::VPORT_GRE), NetworkEntry::default());
        store
    }

    pub fn create_network(&mut self, net: NetworkId) -> StoreResult<NetworkStoreEvent> {
        if net.is_reserved() {
            return Err(StoreError::Reserved);
        }
        if self.networks.contains_key(&net) {
            return Err(StoreError::AlreadyExists);
        }
        self.networks.insert(net.clone(), NetworkEntry::default());
        Ok(NetworkStoreEvent::NetworkCreated { net })
    }

    /// Idempotent upsert: succeeds (with no event) if `net` already exists,
    /// otherwise behaves like [`Self::create_network`].
    pub fn update_network(&mut self, net: NetworkId) -> StoreResult<Option<NetworkStoreEvent>> {
        if net.is_reserved() {
            return Err(StoreError::Reserved);
        }
        if self.networks.contains_key(&net) {
            return Ok(None);
        }
        self.networks.insert(net.clone(), NetworkEntry::default());
        Ok(Some(NetworkStoreEvent::NetworkCreated { net }))
    }

    pub fn remove_network(&mut self, net: &NetworkId) -> StoreResult<NetworkStoreEvent> {
        let entry = self.networks.get(net).ok_or(StoreError::NotFound)?;
        if !entry.ports.is_empty() {
            return Err(StoreError::Conflict);
        }
        self.networks.remove(net);
        Ok(NetworkStoreEvent::NetworkRemoved { net: net.clone() })
    }

    pub fn create_port(&mut self, net: NetworkId, dpid: Dpid, port: PortNo) -> StoreResult<NetworkStoreEvent> {
        if !self.networks.contains_key(&net) {
            return Err(StoreError::NotFound);
        }
        match self.port_owner.get(&(dpid, port)) {
            Some(owner) if *owner == net => return Err(StoreError::AlreadyExists),
            Some(_) => return Err(StoreError::Conflict),
            None => {}
        }
        self.port_owner.insert((dpid, port), net.clone());
        self.networks.get_mut(&net).unwrap().ports.insert((dpid, port), None);
        Ok(NetworkStoreEvent::PortAdded { net, dpid, port })
    }

    /// Idempotent bind: succeeds (with no event) if `(dpid, port)` is already
    /// bound to `net`.
    pub fn update_port(&mut self, net: NetworkId, dpid: Dpid, port: PortNo) -> StoreResult<Option<NetworkStoreEvent>> {
        if !self.networks.contains_key(&net) {
            return Err(StoreError::NotFound);
        }
        match self.port_owner.get(&(dpid, port)) {
            Some(owner) if *owner == net => Ok(None),
            Some(_) => Err(StoreError::Conflict),
            None => {
                self.port_owner.insert((dpid, port), net.clone());
                self.networks.get_mut(&net).unwrap().ports.insert((dpid, port), None);
                Ok(Some(NetworkStoreEvent::PortAdded { net, dpid, port }))
            }
        }
    }

    pub fn remove_port(&mut self, net: &NetworkId, dpid: Dpid, port: PortNo) -> StoreResult<NetworkStoreEvent> {
        let entry = self.networks.get_mut(net).ok_or(StoreError::NotFound)?;
        let mac = match entry.ports.remove(&(dpid, port)) {
            Some(mac) => mac,
            None => return Err(StoreError::NotFound),
        };
        self.port_owner.remove(&(dpid, port));
        Ok(NetworkStoreEvent::PortRemoved { net: net.clone(), dpid, port, mac })
    }

    pub fn create_mac(&mut self, net: &NetworkId, dpid: Dpid, port: PortNo, mac: MacAddress) -> StoreResult<NetworkStoreEvent> {
        let entry = self.networks.get_mut(net).ok_or(StoreError::NotFound)?;
        let current = entry.ports.get(&(dpid, port)).ok_or(StoreError::NotFound)?;
        if let Some(existing) = current {
            return if *existing == mac { Err(StoreError::AlreadyExists) } else { Err(StoreError::Conflict) };
        }
        if entry.ports.values().any(|m| *m == Some(mac)) {
            return Err(StoreError::Conflict);
        }
        entry.ports.insert((dpid, port), Some(mac));
        Ok(NetworkStoreEvent::MacAdded { net: net.clone(), dpid, port, mac })
    }

    pub fn list_ports(&self, net: &NetworkId) -> StoreResult<Vec<(Dpid, PortNo)>> {
        let entry = self.networks.get(net).ok_or(StoreError::NotFound)?;
        Ok(entry.ports.keys().copied().collect())
    }

    pub fn list_networks(&self) -> Vec<NetworkId> {
        self.networks.keys().cloned().collect()
    }

    pub fn get_dpids(&self, net: &NetworkId) -> HashSet<Dpid> {
        match self.networks.get(net) {
            Some(entry) => entry.ports.keys().map(|(dpid, _)| *dpid).collect(),
            None => HashSet::new(),
        }
    }

    pub fn network_of(&self, dpid: Dpid, port: PortNo) -> Option<&NetworkId> {
        self.port_owner.get(&(dpid, port))
    }

    /// Every port bound on `dpid`, across all networks — used on datapath
    /// reconnect to re-run the readiness predicate for each one without any
    /// REST activity.
    pub fn ports_of_dpid(&self, dpid: Dpid) -> Vec<(Dpid, PortNo)> {
        self.port_owner.keys().filter(|(d, _)| *d == dpid).copied().collect()
    }

    pub fn mac_of(&self, net: &NetworkId, dpid: Dpid, port: PortNo) -> Option<MacAddress> {
        self.networks.get(net)?.ports.get(&(dpid, port)).copied().flatten()
    }

    /// True if `net` still has any `(dpid, port)` members. The tunnel-key and
    /// network deletion fan-outs consult this to decide whether the programmer
    /// has already torn down every flow referencing the key.
    pub fn has_members(&self, net: &NetworkId) -> bool {
        self.networks.get(net).map_or(false, |e| !e.ports.is_empty())
    }

    /// All members of `net`, each with its registered MAC if any — used by the
    /// correlator's tunnel-key and network deletion fan-outs to emit one
    /// `VMPort.del` per previously-ready port.
    pub fn members(&self, net: &NetworkId) -> Vec<(Dpid, PortNo, Option<MacAddress>)> {
        match self.networks.get(net) {
            Some(entry) => entry.ports.iter().map(|(&(dpid, port), &mac)| (dpid, port, mac)).collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> NetworkId {
        NetworkId::from(s)
    }

    #[test]
    fn port_has_single_owner() {
        let mut store = NetworkStore::new();
        store.create_network(net("a")).unwrap();
        store.create_network(net("b")).unwrap();
        store.create_port(net("a"), Dpid(1), PortNo(1)).unwrap();
        assert_eq!(store.create_port(net("b"), Dpid(1), PortNo(1)), Err(StoreError::Conflict));
    }

    #[test]
    fn mac_unique_within_network() {
        let mut store = NetworkStore::new();
        store.create_network(net("a")).unwrap();
        store.create_port(net("a"), Dpid(1), PortNo(1)).unwrap();
        store.create_port(net("a"), Dpid(1), PortNo(2)).unwrap();
        let mac: MacAddress = "02:00:00:00:00:01".parse().unwrap();
        store.create_mac(&net("a"), Dpid(1), PortNo(1), mac).unwrap();
        assert_eq!(store.create_mac(&net("a"), Dpid(1), PortNo(2), mac), Err(StoreError::Conflict));
    }

    #[test]
    fn remove_network_fails_while_ports_bound() {
        let mut store = NetworkStore::new();
        store.create_network(net("a")).unwrap();
        store.create_port(net("a"), Dpid(1), PortNo(1)).unwrap();
        assert_eq!(store.remove_network(&net("a")), Err(StoreError::Conflict));
    }

    #[test]
    fn remove_port_clears_mac() {
        let mut store = NetworkStore::new();
        store.create_network(net("a")).unwrap();
        store.create_port(net("a"), Dpid(1), PortNo(1)).unwrap();
        let mac: MacAddress = "02:00:00:00:00:01".parse().unwrap();
        store.create_mac(&net("a"), Dpid(1), PortNo(1), mac).unwrap();
        store.remove_port(&net("a"), Dpid(1), PortNo(1)).unwrap();
        store.create_port(net("a"), Dpid(1), PortNo(1)).unwrap();
        assert_eq!(store.mac_of(&net("a"), Dpid(1), PortNo(1)), None);
    }

    #[test]
    fn reserved_network_id_rejected() {
        let mut store = NetworkStore::new();
        assert_eq!(store.create_network(net(NetworkId::VPORT_GRE)), Err(StoreError::Reserved));
    }

    #[test]
    fn tunnel_sentinel_network_accepts_ports_without_being_created() {
        let mut store = NetworkStore::new();
        store.create_port(net(NetworkId::VPORT_GRE), Dpid(1), PortNo(5)).unwrap();
        assert_eq!(store.network_of(Dpid(1), PortNo(5)), Some(&net(NetworkId::VPORT_GRE)));
    }

    #[test]
    fn repeated_create_port_is_idempotent_via_update() {
        let mut store = NetworkStore::new();
        store.create_network(net("a")).unwrap();
        let first = store.update_port(net("a"), Dpid(1), PortNo(1)).unwrap();
        assert!(first.is_some());
        let second = store.update_port(net("a"), Dpid(1), PortNo(1)).unwrap();
        assert!(second.is_none());
    }
}
