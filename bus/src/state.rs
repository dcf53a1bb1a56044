/// Per-OpenFlow-session dispatcher state, driven by the handshake handler
/// (external to this crate; part of the contract it relies on). A handler
/// tagged with a [`StateSet`] only fires while its session is in one of the
/// named states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DispatcherState {
    Handshake,
    Config,
    Main,
    Dead,
}

/// The state set a handler is registered under. `All` matches regardless of
/// the event's dispatcher state.
#[derive(Clone, Debug)]
pub enum StateSet {
    All,
    Only(Vec<DispatcherState>),
}

impl StateSet {
    pub fn matches(&self, state: DispatcherState) -> bool {
        match self {
            StateSet::All => true,
            StateSet::Only(states) => states.contains(&state),
        }
    }
}

impl From<DispatcherState> for StateSet {
    fn from(s: DispatcherState) -> Self {
        StateSet::Only(vec![s])
    }
}
