//! The authoritative, process-local state for the controller: tenant network
//! membership, tunnel-key/tunnel-port bindings, per-datapath OVSDB config bags,
//! and the set of currently-connected datapaths. Every successful mutation
//! publishes exactly one typed event; failures never do.

pub mod conf_switch;
pub mod dpset;
pub mod error;
pub mod network;
pub mod tunnels;

pub use conf_switch::ConfSwitchStore;
pub use dpset::DpSet;
pub use error::{StoreError, StoreResult};
pub use network::{NetworkId, NetworkStore, NetworkStoreEvent};
pub use tunnels::{TunnelKey, TunnelStoreEvent, TunnelsStore};
