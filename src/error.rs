use std::io;
use std::net::Ipv4Addr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("`{0}` is not a valid IPv4 CIDR range")]
    InvalidRangeFormat(String, #[source] ipnet::AddrParseError),
    #[error("failed to set up probe for `{0}`: {1}")]
    ProbeSetupFailure(Ipv4Addr, #[source] io::Error),
    #[error("echo exchange with `{0}` failed: {1}")]
    ProbeTransportFailure(Ipv4Addr, #[source] io::Error),
}
