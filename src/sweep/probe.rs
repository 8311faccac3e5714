use std::io;
use std::marker::PhantomData;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use pnet::packet::icmp::{
    self, echo_reply::EchoReplyPacket, echo_request::MutableEchoRequestPacket, IcmpPacket,
    IcmpTypes,
};
use pnet::packet::Packet;
use socket2::SockAddr;

use crate::error::SweepError;

use super::endpoint::Endpoint;
use super::{Probe, RECV_BUF_SZ};

/// Fixed marker carried as payload by every echo request.
const ECHO_PAYLOAD: &[u8] = b"PINGSWEEPER";
const ECHO_SEQUENCE: u16 = 1;
const REPLY_DEADLINE: Duration = Duration::from_secs(2);

/// Default echo identifier: the id of the running process masked to the
/// 16 bits the wire format has room for.
pub static PROCESS_IDENT: Lazy<u16> = Lazy::new(|| (std::process::id() & 0xffff) as u16);

/// Performs one ICMP echo request/reply exchange per call, over an endpoint
/// opened for that call alone. The endpoint type is never stored, only
/// constructed per call, so the probe stays shareable across probe tasks.
pub struct IcmpProbe<E> {
    ident: u16,
    _endpoint: PhantomData<fn() -> E>,
}

impl<E: Endpoint> IcmpProbe<E> {
    pub fn new(ident: u16) -> Self {
        Self {
            ident,
            _endpoint: PhantomData,
        }
    }

    fn exchange(&self, endpoint: &E, target: Ipv4Addr) -> Result<Duration, SweepError> {
        let request = build_echo_request(self.ident, ECHO_SEQUENCE).ok_or_else(|| {
            SweepError::ProbeSetupFailure(
                target,
                io::Error::new(io::ErrorKind::InvalidData, "could not build echo request"),
            )
        })?;

        let addr: SockAddr = SocketAddr::new(IpAddr::V4(target), 0).into();
        let start = Instant::now();
        endpoint
            .send_to(request.packet(), &addr)
            .map_err(|e| SweepError::ProbeTransportFailure(target, e))?;

        // The deadline is measured from send time. Anything that is not the
        // reply to this exact request is discarded and the wait resumes with
        // whatever window is left.
        let deadline = start + REPLY_DEADLINE;
        let mut reply = [0u8; RECV_BUF_SZ];
        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .filter(|remaining| !remaining.is_zero())
                .ok_or_else(|| {
                    SweepError::ProbeTransportFailure(
                        target,
                        io::Error::new(io::ErrorKind::TimedOut, "no matching echo reply"),
                    )
                })?;
            endpoint
                .set_read_timeout(remaining)
                .map_err(|e| SweepError::ProbeSetupFailure(target, e))?;

            let (sz, from) = endpoint
                .recv(&mut reply)
                .map_err(|e| SweepError::ProbeTransportFailure(target, e))?;
            let rtt = start.elapsed();

            if is_matching_reply(&reply[..sz], self.ident, ECHO_SEQUENCE) {
                return Ok(rtt);
            }

            log::debug!(
                "Discarded non-matching ICMP message from `{}` while probing `{}`",
                from,
                target
            );
        }
    }
}

impl<E: Endpoint> Probe for IcmpProbe<E> {
    fn probe(&self, target: Ipv4Addr) -> Option<Duration> {
        let endpoint = match E::open(REPLY_DEADLINE) {
            Ok(endpoint) => endpoint,
            // Raw sockets usually require a privileged user; the failure is
            // reported but only this one probe degrades to not-alive.
            Err(e) => {
                log::error!("{}", SweepError::ProbeSetupFailure(target, e));
                return None;
            }
        };

        match self.exchange(&endpoint, target) {
            Ok(rtt) => Some(rtt),
            Err(e @ SweepError::ProbeSetupFailure(..)) => {
                log::error!("{}", e);
                None
            }
            Err(e) => {
                log::debug!("{}", e);
                None
            }
        }
    }
}

fn build_echo_request(ident: u16, seq: u16) -> Option<MutableEchoRequestPacket<'static>> {
    let raw = vec![0u8; MutableEchoRequestPacket::minimum_packet_size() + ECHO_PAYLOAD.len()];
    let mut pckt = MutableEchoRequestPacket::owned(raw)?;
    pckt.set_icmp_type(IcmpTypes::EchoRequest);
    pckt.set_identifier(ident);
    pckt.set_sequence_number(seq);
    pckt.set_payload(ECHO_PAYLOAD);

    pckt.set_checksum(0);
    let checksum = icmp::checksum(&IcmpPacket::new(pckt.packet())?);
    pckt.set_checksum(checksum);

    Some(pckt)
}

fn is_matching_reply(raw: &[u8], ident: u16, seq: u16) -> bool {
    let Some(pckt) = IcmpPacket::new(raw) else {
        return false;
    };
    if pckt.get_icmp_type() != IcmpTypes::EchoReply {
        return false;
    }

    let Some(reply) = EchoReplyPacket::new(raw) else {
        return false;
    };
    reply.get_identifier() == ident && reply.get_sequence_number() == seq
}

#[cfg(test)]
mod tests {
    use super::*;

    use pnet::packet::icmp::echo_reply::MutableEchoReplyPacket;
    use pnet::packet::icmp::echo_request::EchoRequestPacket;
    use pnet::packet::icmp::MutableIcmpPacket;

    use crate::sweep::endpoint::tests::{EndpointMock, OnRecv};

    const IDENT: u16 = 0xABCD;

    fn echo_reply_bytes(ident: u16, seq: u16) -> Vec<u8> {
        let raw = vec![0u8; MutableEchoReplyPacket::minimum_packet_size() + ECHO_PAYLOAD.len()];
        let mut pckt = MutableEchoReplyPacket::owned(raw).unwrap();
        pckt.set_icmp_type(IcmpTypes::EchoReply);
        pckt.set_identifier(ident);
        pckt.set_sequence_number(seq);
        pckt.set_payload(ECHO_PAYLOAD);
        pckt.set_checksum(0);
        pckt.set_checksum(icmp::checksum(&IcmpPacket::new(pckt.packet()).unwrap()));
        pckt.packet().to_vec()
    }

    fn destination_unreachable_bytes() -> Vec<u8> {
        let raw = vec![0u8; MutableIcmpPacket::minimum_packet_size() + 4];
        let mut pckt = MutableIcmpPacket::owned(raw).unwrap();
        pckt.set_icmp_type(IcmpTypes::DestinationUnreachable);
        pckt.set_checksum(0);
        pckt.set_checksum(icmp::checksum(&IcmpPacket::new(pckt.packet()).unwrap()));
        pckt.packet().to_vec()
    }

    #[test]
    fn echo_request_is_well_formed() {
        let request = build_echo_request(IDENT, ECHO_SEQUENCE).unwrap();

        let parsed = EchoRequestPacket::new(request.packet()).unwrap();
        assert_eq!(parsed.get_icmp_type(), IcmpTypes::EchoRequest);
        assert_eq!(parsed.get_identifier(), IDENT);
        assert_eq!(parsed.get_sequence_number(), ECHO_SEQUENCE);
        assert_eq!(parsed.payload(), ECHO_PAYLOAD);
        assert_ne!(parsed.get_checksum(), 0);
    }

    #[test]
    fn alive_on_matching_reply() {
        let target = Ipv4Addr::new(127, 0, 0, 1);
        let mock = EndpointMock::new([OnRecv::Icmp(echo_reply_bytes(IDENT, ECHO_SEQUENCE))]);
        let probe = IcmpProbe::<EndpointMock>::new(IDENT);

        let rtt = probe.exchange(&mock, target).unwrap();

        assert!(rtt < REPLY_DEADLINE);
        mock.should_send_number_of_messages(1)
            .should_send_to_address(IpAddr::V4(target));
    }

    #[test]
    fn sends_the_request_to_the_target() {
        let target = Ipv4Addr::new(192, 168, 1, 7);
        let mock = EndpointMock::new([OnRecv::Icmp(echo_reply_bytes(IDENT, ECHO_SEQUENCE))]);
        let probe = IcmpProbe::<EndpointMock>::new(IDENT);

        probe.exchange(&mock, target).unwrap();

        let sent = mock.sent_messages();
        let parsed = EchoRequestPacket::new(&sent[0]).unwrap();
        assert_eq!(parsed.get_identifier(), IDENT);
    }

    #[test]
    fn not_alive_when_nothing_answers() {
        let target = Ipv4Addr::new(10, 0, 0, 9);
        let mock = EndpointMock::new([]);
        let probe = IcmpProbe::<EndpointMock>::new(IDENT);

        let err = probe.exchange(&mock, target).unwrap_err();

        assert!(matches!(err, SweepError::ProbeTransportFailure(addr, _) if addr == target));
    }

    #[test]
    fn not_alive_on_send_failure() {
        let mock = EndpointMock::failing_send();
        let probe = IcmpProbe::<EndpointMock>::new(IDENT);

        let err = probe.exchange(&mock, Ipv4Addr::new(10, 0, 0, 9)).unwrap_err();

        assert!(matches!(err, SweepError::ProbeTransportFailure(..)));
    }

    #[test]
    fn not_alive_on_non_echo_reply() {
        let mock = EndpointMock::new([OnRecv::Icmp(destination_unreachable_bytes())]);
        let probe = IcmpProbe::<EndpointMock>::new(IDENT);

        let result = probe.exchange(&mock, Ipv4Addr::new(10, 0, 0, 9));

        assert!(result.is_err());
    }

    #[test]
    fn not_alive_on_malformed_reply() {
        let mock = EndpointMock::new([OnRecv::Icmp(vec![0xFF, 0x00])]);
        let probe = IcmpProbe::<EndpointMock>::new(IDENT);

        let result = probe.exchange(&mock, Ipv4Addr::new(10, 0, 0, 9));

        assert!(result.is_err());
    }

    #[test]
    fn skips_replies_of_other_probes() {
        let mock = EndpointMock::new([
            OnRecv::Icmp(echo_reply_bytes(IDENT ^ 0x5555, ECHO_SEQUENCE)),
            OnRecv::Icmp(echo_reply_bytes(IDENT, ECHO_SEQUENCE + 1)),
            OnRecv::Icmp(echo_reply_bytes(IDENT, ECHO_SEQUENCE)),
        ]);
        let probe = IcmpProbe::<EndpointMock>::new(IDENT);

        let result = probe.exchange(&mock, Ipv4Addr::new(10, 0, 0, 9));

        assert!(result.is_ok());
    }

    #[test]
    fn not_alive_on_recv_failure() {
        let mock = EndpointMock::new([OnRecv::Fail(io::ErrorKind::ConnectionRefused)]);
        let probe = IcmpProbe::<EndpointMock>::new(IDENT);

        let err = probe.exchange(&mock, Ipv4Addr::new(10, 0, 0, 9)).unwrap_err();

        assert!(matches!(err, SweepError::ProbeTransportFailure(..)));
    }

    #[test]
    fn probe_collapses_failures_to_not_alive() {
        let probe = IcmpProbe::<EndpointMock>::new(IDENT);

        // `EndpointMock::open` yields an endpoint with an empty script, so
        // the exchange times out.
        assert_eq!(probe.probe(Ipv4Addr::new(10, 0, 0, 9)), None);
    }

    #[test]
    fn not_alive_only_after_the_full_deadline() {
        let mock = EndpointMock::silent();
        let probe = IcmpProbe::<EndpointMock>::new(IDENT);

        let start = Instant::now();
        let err = probe.exchange(&mock, Ipv4Addr::new(10, 0, 0, 9)).unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, SweepError::ProbeTransportFailure(..)));
        assert!(elapsed >= REPLY_DEADLINE);
        assert!(elapsed < REPLY_DEADLINE + Duration::from_millis(500));
    }

    #[test]
    fn probe_is_shareable_across_sweep_tasks() {
        let probe = IcmpProbe::<EndpointMock>::new(IDENT);
        let sweeper = crate::sweep::Sweeper::new(probe, 4);

        let mut results = Vec::new();
        sweeper.run("10.0.0.0/28".parse().unwrap(), |host| results.push(host));

        // Every endpoint opens with an empty script, so nothing answers;
        // the point is that the sweep compiles, runs and terminates with
        // the probe shared between worker threads.
        assert!(results.is_empty());
    }
}
