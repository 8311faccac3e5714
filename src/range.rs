use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnet::{Ipv4AddrRange, Ipv4Net};

use crate::error::SweepError;

/// An IPv4 subnet given in CIDR notation: base address plus prefix mask.
/// Host bits of the input are zeroed, so the range always starts at the
/// network address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Range {
    net: Ipv4Net,
}

impl Ipv4Range {
    pub fn network(&self) -> Ipv4Addr {
        self.net.network()
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        self.net.broadcast()
    }

    pub fn prefix_len(&self) -> u8 {
        self.net.prefix_len()
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.net.contains(&addr)
    }

    /// Every address covered by the mask in strictly increasing order,
    /// network and broadcast addresses included. The iterator is finite
    /// and stops at the range boundary instead of wrapping around.
    pub fn addresses(&self) -> Ipv4AddrRange {
        Ipv4AddrRange::new(self.net.network(), self.net.broadcast())
    }
}

impl FromStr for Ipv4Range {
    type Err = SweepError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        raw.parse::<Ipv4Net>()
            .map(|net| Self { net: net.trunc() })
            .map_err(|e| SweepError::InvalidRangeFormat(raw.to_owned(), e))
    }
}
