use bitflags::bitflags;

bitflags! {
    /// Mirrors the `OFPPS_*` state bits carried in OpenFlow port-status messages.
    /// Only `LINK_DOWN` is consulted by the controller; the rest are tracked for
    /// completeness and future use.
    #[derive(Default)]
    pub struct PortState: u32 {
        const LINK_DOWN = 1 << 0;
        const BLOCKED   = 1 << 1;
        const LIVE      = 1 << 2;
    }
}

impl PortState {
    pub fn is_link_up(self) -> bool {
        !self.contains(PortState::LINK_DOWN)
    }
}
