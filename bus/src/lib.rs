//! The application bus: a single-threaded cooperative event dispatcher that
//! owns brick registration, per-brick mailboxes, fan-out to observers, and
//! request/reply correlation.
//!
//! Every brick is a `tokio::task::spawn_local` task on a current-thread
//! runtime, woken only at its mailbox `recv().await` — there is never more
//! than one brick's handler running at a time, so stores accessed only from
//! brick handlers never need locking.

mod event;
mod state;

pub use event::{Event, EventKind, FlowSummary};
pub use state::{DispatcherState, StateSet};

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

/// Nominal per-brick mailbox capacity. A producer blocks on `send_event` once
/// a brick's mailbox is full; this is the bus's only back-pressure policy.
pub const MAILBOX_CAPACITY: usize = 128;

/// A handler's future. Handlers run single-threaded and inline in the
/// owning brick's dispatch loop, so this carries no `Send` bound.
pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>>>>;

/// A handler closure: takes the event by value (it is cheap to clone) plus
/// the dispatcher state it arrived under and a bus handle, and returns a
/// boxed future so it may itself await sends, requests, or store I/O before
/// resolving — matching the requirement that no suspension point in the
/// system ever needs to block a whole brick's progress on another one.
pub type HandlerFn = Box<dyn FnMut(Event, DispatcherState, Bus) -> HandlerFuture>;

/// One `(event_variant, state_set, handler)` triple, built at brick
/// construction time and handed to [`Bus::register_brick`].
pub struct HandlerEntry {
    pub kind: EventKind,
    pub states: StateSet,
    pub handler: HandlerFn,
}

impl HandlerEntry {
    pub fn new(kind: EventKind, states: impl Into<StateSet>, handler: HandlerFn) -> Self {
        HandlerEntry { kind, states: states.into(), handler }
    }
}

struct Envelope {
    event: Event,
    state: DispatcherState,
}

struct Inner {
    mailboxes: HashMap<String, mpsc::Sender<Envelope>>,
    observers: HashMap<EventKind, Vec<String>>,
    pending: HashMap<u64, oneshot::Sender<Event>>,
    next_request_id: u64,
}

/// An owned handle to the bus. Cheap to clone (an `Rc` underneath); every
/// brick task and every REST handler holds one.
#[derive(Clone)]
pub struct Bus {
    inner: Rc<RefCell<Inner>>,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus {
    pub fn new() -> Self {
        Bus {
            inner: Rc::new(RefCell::new(Inner {
                mailboxes: HashMap::new(),
                observers: HashMap::new(),
                pending: HashMap::new(),
                next_request_id: 0,
            })),
        }
    }

    /// Registers `name` as a brick with the given handler table and spawns its
    /// dispatch loop. `name` must be process-wide unique; re-registering an
    /// existing name is a programming error and panics.
    pub fn register_brick(&self, name: impl Into<String>, mut handlers: Vec<HandlerEntry>) {
        let name = name.into();
        let (tx, mut rx) = mpsc::channel::<Envelope>(MAILBOX_CAPACITY);

        {
            let mut inner = self.inner.borrow_mut();
            assert!(!inner.mailboxes.contains_key(&name), "duplicate brick registration: {name}");
            inner.mailboxes.insert(name.clone(), tx);
            for entry in &handlers {
                inner.observers.entry(entry.kind).or_default().push(name.clone());
            }
        }

        let bus = self.clone();
        let brick_name = name;
        tokio::task::spawn_local(async move {
            while let Some(Envelope { event, state }) = rx.recv().await {
                if matches!(event, Event::Stop) {
                    break;
                }
                let kind = event.kind();
                for entry in handlers.iter_mut() {
                    if entry.kind != kind || !entry.states.matches(state) {
                        continue;
                    }
                    // A handler error is logged with full context and the loop
                    // continues — it never kills the brick.
                    if let Err(error) = (entry.handler)(event.clone(), state, bus.clone()).await {
                        error!(brick = %brick_name, ?kind, ?state, %error, "handler failed");
                    }
                }
            }
        });
    }

    /// Enqueues `event` on `target`'s mailbox, blocking (cooperatively) if it
    /// is full. Silently dropped, with a log entry, if `target` is unknown.
    pub async fn send_event(&self, target: &str, event: Event, state: DispatcherState) {
        let sender = self.inner.borrow().mailboxes.get(target).cloned();
        match sender {
            Some(tx) => {
                if tx.send(Envelope { event, state }).await.is_err() {
                    warn!(target, "brick mailbox closed, event dropped");
                }
            }
            None => warn!(target, "dropped event: no such brick"),
        }
    }

    /// Fans `event` out to every brick that registered a handler for its
    /// variant. Delivery order across observers is unspecified; each
    /// observer's own mailbox stays FIFO.
    pub async fn send_event_to_observers(&self, event: Event, state: DispatcherState) {
        let targets = self.inner.borrow().observers.get(&event.kind()).cloned().unwrap_or_default();
        for target in targets {
            self.send_event(&target, event.clone(), state).await;
        }
    }

    /// Sends a request built from a fresh request id, then blocks the caller
    /// on its own reply channel until the callee calls
    /// [`Bus::reply_to_request`] with the same id.
    pub async fn send_request(&self, target: &str, make_event: impl FnOnce(u64) -> Event, state: DispatcherState) -> Event {
        let (tx, rx) = oneshot::channel();
        let request_id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_request_id;
            inner.next_request_id += 1;
            inner.pending.insert(id, tx);
            id
        };
        self.send_event(target, make_event(request_id), state).await;
        rx.await.expect("reply_to_request must be called exactly once per request")
    }

    /// Delivers `reply` to the caller blocked in [`Bus::send_request`] under
    /// `request_id`. A handler must call this exactly once per request it
    /// receives.
    pub fn reply_to_request(&self, request_id: u64, reply: Event) {
        if let Some(tx) = self.inner.borrow_mut().pending.remove(&request_id) {
            let _ = tx.send(reply);
        }
    }

    /// Delivers a [`Event::Stop`] to every registered brick; each drains its
    /// mailbox up to that point, then exits.
    pub async fn stop_all(&self) {
        let names: Vec<String> = self.inner.borrow().mailboxes.keys().cloned().collect();
        for name in names {
            self.send_event(&name, Event::Stop, DispatcherState::Main).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test]
    async fn observer_fan_out_reaches_every_registered_brick() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let bus = Bus::new();
                let seen_a = Rc::new(Cell::new(0));
                let seen_b = Rc::new(Cell::new(0));

                for seen in [&seen_a, &seen_b] {
                    let seen = seen.clone();
                    bus.register_brick(
                        if Rc::ptr_eq(&seen, &seen_a) { "a" } else { "b" },
                        vec![HandlerEntry::new(
                            EventKind::TunnelKeyGone,
                            StateSet::All,
                            Box::new(move |_event, _state, _bus| {
                                seen.set(seen.get() + 1);
                                Box::pin(async { Ok(()) })
                            }),
                        )],
                    );
                }

                bus.send_event_to_observers(
                    Event::TunnelKeyGone { key: stores::TunnelKey(100) },
                    DispatcherState::Main,
                )
                .await;
                tokio::task::yield_now().await;
                tokio::task::yield_now().await;

                assert_eq!(seen_a.get(), 1);
                assert_eq!(seen_b.get(), 1);
            })
            .await;
    }

    #[tokio::test]
    async fn request_reply_round_trips() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let bus = Bus::new();
                bus.register_brick(
                    "echo",
                    vec![HandlerEntry::new(
                        EventKind::FlowDumpRequest,
                        StateSet::All,
                        Box::new(|event, _state, bus| {
                            Box::pin(async move {
                                if let Event::FlowDumpRequest { request_id, .. } = event {
                                    bus.reply_to_request(request_id, Event::FlowDumpReply { request_id, flows: vec![] });
                                }
                                Ok(())
                            })
                        }),
                    )],
                );

                let reply = bus
                    .send_request(
                        "echo",
                        |request_id| Event::FlowDumpRequest { request_id, dpid: ovs::Dpid(1) },
                        DispatcherState::Main,
                    )
                    .await;
                assert!(matches!(reply, Event::FlowDumpReply { .. }));
            })
            .await;
    }

    #[tokio::test]
    async fn handler_error_does_not_stop_the_brick_loop() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let bus = Bus::new();
                let calls = Rc::new(Cell::new(0));
                let calls_clone = calls.clone();
                bus.register_brick(
                    "flaky",
                    vec![HandlerEntry::new(
                        EventKind::TunnelKeyGone,
                        StateSet::All,
                        Box::new(move |_event, _state, _bus| {
                            calls_clone.set(calls_clone.get() + 1);
                            Box::pin(async { anyhow::bail!("synthetic failure") })
                        }),
                    )],
                );

                for _ in 0..3 {
                    bus.send_event("flaky", Event::TunnelKeyGone { key: stores::TunnelKey(1) }, DispatcherState::Main).await;
                }
                tokio::task::yield_now().await;
                tokio::task::yield_now().await;
                assert_eq!(calls.get(), 3);
            })
            .await;
    }
}
