use std::collections::HashMap;

use ovs::Dpid;

use crate::error::{StoreError, StoreResult};

/// Per-datapath OVSDB/tunnel-endpoint configuration (e.g. the local tunnel
/// source IP), consumed by the external tunnel-port provisioner. This store
/// never publishes events: nothing downstream in this workspace correlates on
/// it, it is purely a bag the provisioner reads.
#[derive(Default)]
pub struct ConfSwitchStore {
    bags: HashMap<Dpid, HashMap<String, String>>,
}

impl ConfSwitchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, dpid: Dpid, key: impl Into<String>, value: impl Into<String>) {
        self.bags.entry(dpid).or_default().insert(key.into(), value.into());
    }

    pub fn get(&self, dpid: Dpid, key: &str) -> StoreResult<&str> {
        self.bags
            .get(&dpid)
            .and_then(|bag| bag.get(key))
            .map(String::as_str)
            .ok_or(StoreError::NotFound)
    }

    pub fn remove(&mut self, dpid: Dpid, key: &str) -> StoreResult<()> {
        self.bags.get_mut(&dpid).and_then(|bag| bag.remove(key)).map(|_| ()).ok_or(StoreError::NotFound)
    }

    pub fn all(&self, dpid: Dpid) -> HashMap<String, String> {
        self.bags.get(&dpid).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_value() {
        let mut store = ConfSwitchStore::new();
        store.set(Dpid(1), "tunnel-ip", "10.0.0.1");
        assert_eq!(store.get(Dpid(1), "tunnel-ip"), Ok("10.0.0.1"));
    }

    #[test]
    fn missing_key_is_not_found() {
        let store = ConfSwitchStore::new();
        assert_eq!(store.get(Dpid(1), "tunnel-ip"), Err(StoreError::NotFound));
    }
}
