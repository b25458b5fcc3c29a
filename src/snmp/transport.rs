//! Request/response transport for SNMP messages

use crate::error::{SnmpError, SnmpResult};
use crate::snmp::ber::{self, MessageBuilder};
use crate::snmp::{Request, Response};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

/// Largest datagram we expect back from an agent
const RECV_BUFFER_SIZE: usize = 65_535;

/// Something that can deliver one SNMP request and return the agent's reply.
///
/// Each worker owns exactly one transport, so implementations need not be
/// shareable; they only have to move into the worker thread.
pub trait Transport: Send {
    fn exchange(&mut self, target: IpAddr, community: &str, request: &Request) -> SnmpResult<Response>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn exchange(&mut self, target: IpAddr, community: &str, request: &Request) -> SnmpResult<Response> {
        (**self).exchange(target, community, request)
    }
}

/// Timing and addressing parameters of the UDP transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportOptions {
    pub port: u16,
    pub timeout: Duration,
    pub retries: u32,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            port: 161,
            timeout: Duration::from_millis(1000),
            retries: 1,
        }
    }
}

/// SNMPv2c over UDP
///
/// Sockets are created lazily, one per address family, and reused for every
/// request the owning worker sends.
pub struct UdpTransport {
    options: TransportOptions,
    v4: Option<UdpSocket>,
    v6: Option<UdpSocket>,
    buffer: Vec<u8>,
}

impl UdpTransport {
    pub fn new(options: TransportOptions) -> Self {
        Self {
            options,
            v4: None,
            v6: None,
            buffer: vec![0u8; RECV_BUFFER_SIZE],
        }
    }

    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    fn bind(domain: Domain, local: SocketAddr) -> SnmpResult<UdpSocket> {
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| SnmpError::Socket(format!("cannot create UDP socket: {}", e)))?;
        socket
            .bind(&local.into())
            .map_err(|e| SnmpError::Socket(format!("cannot bind {}: {}", local, e)))?;
        Ok(socket.into())
    }

    fn socket_for(&mut self, target: IpAddr) -> SnmpResult<UdpSocket> {
        let slot = match target {
            IpAddr::V4(_) => &mut self.v4,
            IpAddr::V6(_) => &mut self.v6,
        };

        if slot.is_none() {
            let socket = match target {
                IpAddr::V4(_) => Self::bind(Domain::IPV4, SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0))?,
                IpAddr::V6(_) => Self::bind(Domain::IPV6, SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0))?,
            };
            *slot = Some(socket);
        }

        slot.as_ref()
            .ok_or_else(|| SnmpError::Socket("socket unavailable".to_string()))?
            .try_clone()
            .map_err(|e| SnmpError::Socket(e.to_string()))
    }

    /// Wait for the reply carrying `request_id`, discarding stale datagrams
    fn await_reply(&mut self, socket: &UdpSocket, peer: SocketAddr, request_id: i32) -> SnmpResult<Option<Response>> {
        let deadline = Instant::now() + self.options.timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            socket
                .set_read_timeout(Some(remaining))
                .map_err(|e| SnmpError::Socket(e.to_string()))?;

            let (size, from) = match socket.recv_from(&mut self.buffer) {
                Ok(received) => received,
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    return Ok(None)
                }
                Err(e) => return Err(SnmpError::Socket(format!("receive from {} failed: {}", peer, e))),
            };

            if from.ip() != peer.ip() {
                log::debug!("Ignoring datagram from {} while waiting for {}", from, peer);
                continue;
            }

            let message = ber::decode_message(&self.buffer[..size])?;
            if message.request_id != request_id {
                log::debug!(
                    "Discarding stale reply from {} (request-id {} != {})",
                    peer, message.request_id, request_id
                );
                continue;
            }
            return message.into_response().map(Some);
        }
    }
}

impl Transport for UdpTransport {
    fn exchange(&mut self, target: IpAddr, community: &str, request: &Request) -> SnmpResult<Response> {
        let socket = self.socket_for(target)?;
        let peer = SocketAddr::new(target, self.options.port);
        let attempts = self.options.retries + 1;

        for attempt in 1..=attempts {
            let request_id = rand::random::<i32>() & i32::MAX;
            let packet = MessageBuilder::new(community)
                .request_id(request_id)
                .build_request(request)?;

            socket
                .send_to(&packet, peer)
                .map_err(|e| SnmpError::Socket(format!("send to {} failed: {}", peer, e)))?;

            if let Some(response) = self.await_reply(&socket, peer, request_id)? {
                return Ok(response);
            }
            log::trace!("No reply from {} (attempt {}/{})", peer, attempt, attempts);
        }

        Err(SnmpError::Timeout {
            target,
            attempts,
            timeout: self.options.timeout,
        })
    }
}
