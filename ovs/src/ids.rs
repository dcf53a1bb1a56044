use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

/// A 64-bit OpenFlow datapath identifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Dpid(pub u64);

impl fmt::Display for Dpid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for Dpid {
    type Err = ParseIntError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Dpid(u64::from_str_radix(s, 16)?))
    }
}

/// An OpenFlow port number. Values at or above [`PortNo::MAX_REAL`] are reserved
/// by the protocol (`OFPP_*`) and never identify a physical or virtual port.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortNo(pub u32);

impl PortNo {
    pub const MAX_REAL: u32 = 0xffffff00;
    pub const CONTROLLER: PortNo = PortNo(0xfffffffd);
    pub const ALL: PortNo = PortNo(0xfffffffc);

    pub fn is_reserved(self) -> bool {
        self.0 >= Self::MAX_REAL
    }
}

impl fmt::Display for PortNo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PortNo {
    type Err = ParseIntError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(PortNo(s.parse()?))
    }
}

/// A 48-bit Ethernet MAC address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub const BROADCAST: MacAddress = MacAddress([0xff; 6]);
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}: invalid MAC address")]
pub struct MacAddressParseError(String);

impl FromStr for MacAddress {
    type Err = MacAddressParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or_else(|| MacAddressParseError(s.to_string()))?;
            *byte = u8::from_str_radix(part, 16).map_err(|_| MacAddressParseError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(MacAddressParseError(s.to_string()));
        }
        Ok(MacAddress(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_round_trips() {
        let mac: MacAddress = "02:00:00:00:00:01".parse().unwrap();
        assert_eq!(mac.to_string(), "02:00:00:00:00:01");
    }

    #[test]
    fn dpid_formats_as_sixteen_hex_digits() {
        let dpid = Dpid(1);
        assert_eq!(dpid.to_string(), "0000000000000001");
    }

    #[test]
    fn mac_rejects_short_input() {
        assert!("02:00:00".parse::<MacAddress>().is_err());
    }
}
