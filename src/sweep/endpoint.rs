use std::io;
use std::net::IpAddr;
use std::time::Duration;

use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::Packet;
use socket2::{Domain, Protocol, SockAddr, Type};

use super::RECV_BUF_SZ;

/// A raw ICMP endpoint owned by a single probe. Opened per exchange and
/// released when the probe finishes, never shared between probes.
pub trait Endpoint {
    fn open(timeout: Duration) -> io::Result<Self>
    where
        Self: Sized;

    fn send_to(&self, buf: &[u8], addr: &SockAddr) -> io::Result<usize>;

    /// Blocks for one inbound ICMP message, already stripped of its IPv4
    /// header, until data arrives or the read timeout elapses.
    fn recv(&self, buf: &mut [u8]) -> io::Result<(usize, IpAddr)>;

    fn set_read_timeout(&self, timeout: Duration) -> io::Result<()>;
}

pub struct RawEndpoint {
    socket: socket2::Socket,
}

impl Endpoint for RawEndpoint {
    fn open(timeout: Duration) -> io::Result<Self> {
        let socket = socket2::Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))?;
        socket.set_read_timeout(Some(timeout))?;

        Ok(RawEndpoint { socket })
    }

    fn send_to(&self, buf: &[u8], addr: &SockAddr) -> io::Result<usize> {
        self.socket.send_to(buf, addr)
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<(usize, IpAddr)> {
        let mut raw = [0u8; RECV_BUF_SZ];

        // socket2 only ever writes into the buffer, which makes the cast to
        // `&mut [MaybeUninit<u8>]` sound:
        // https://docs.rs/socket2/0.4.7/socket2/struct.Socket.html#method.recv
        let (_, from) = self.socket.recv_from(unsafe {
            &mut *(std::ptr::addr_of_mut!(raw) as *mut [u8] as *mut [std::mem::MaybeUninit<u8>])
        })?;

        // A raw socket hands over the whole IP datagram.
        let ip_pckt = Ipv4Packet::new(&raw)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "truncated IPv4 packet"))?;
        let icmp = ip_pckt.payload();
        let sz = icmp.len().min(buf.len());
        buf[..sz].copy_from_slice(&icmp[..sz]);

        let from = from
            .as_socket_ipv4()
            .map(|saddr| IpAddr::V4(*saddr.ip()))
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "non-IPv4 source address"))?;

        Ok((sz, from))
    }

    fn set_read_timeout(&self, timeout: Duration) -> io::Result<()> {
        self.socket.set_read_timeout(Some(timeout))
    }
}
