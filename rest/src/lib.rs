//! The `/v1.0` HTTP/JSON surface over the network, port, MAC and tunnel
//! stores.
//!
//! The stores themselves live on the bus's single-threaded cooperative
//! executor, behind `Rc<RefCell<_>>` — not `Send`. Axum's listener, by
//! contrast, wants ordinary `Send + Sync` handler state so it can serve
//! connections from any worker thread. [`RestBridge`] is the seam between the
//! two worlds: it runs as just another brick on the `LocalSet`, consuming
//! [`RestCommand`]s off a plain (`Send`) channel and replying over a oneshot,
//! so no store reference ever has to cross a thread.

mod bridge;
mod handlers;

pub use bridge::{RestBridge, RestCommand, RestHandle, RestOutcome};
pub use handlers::router;
