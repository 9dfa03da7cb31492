//! UDP transport
//!
//! A thin connection layer over a single UDP socket. Each datagram starts
//! with a one-byte header:
//!
//! ```text
//! [0]                    connect (answered with [0])
//! [1][channel][payload]  data
//! [2]                    disconnect
//! [3]                    keepalive
//! ```
//!
//! Connections are keyed by source address and dropped after a configurable
//! idle timeout. Reliability and ordering are left to the peers.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use super::{Channel, ConnectionId, NetEvent, Transport};
use crate::error::{RelayError, RelayResult};
use bytes::{Buf, BufMut, BytesMut};
use relay_config::RelayConfig;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

/// Datagram header values
pub mod header {
    pub const CONNECT: u8 = 0;
    pub const DATA: u8 = 1;
    pub const DISCONNECT: u8 = 2;
    pub const KEEPALIVE: u8 = 3;
    /// `[1][channel]`
    pub const DATA_HEADER_LEN: usize = 2;
}

/// Largest UDP payload; anything that fills the receive buffer was truncated
const MAX_DATAGRAM_LEN: usize = 65_535;

/// How often idle connections are swept
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Connection state
#[derive(Debug, Clone)]
struct UdpConnection {
    /// Remote address
    addr: SocketAddr,
    /// Last datagram seen from the remote
    last_seen: Instant,
}

impl UdpConnection {
    fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            last_seen: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    fn is_alive(&self, timeout: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_seen) < timeout
    }
}

/// UDP transport backend
pub struct UdpTransport {
    /// Address to bind in `start`
    listen_addr: String,
    /// Bound socket
    socket: Option<UdpSocket>,
    /// Connections by id
    connections: HashMap<ConnectionId, UdpConnection>,
    /// Connection ids by remote address
    by_addr: HashMap<SocketAddr, ConnectionId>,
    /// Next id to hand out
    next_id: u64,
    /// Events produced while handling a datagram or a sweep
    pending: VecDeque<NetEvent>,
    /// Receive scratch, sized for the largest relay message plus header
    recv_buffer: Vec<u8>,
    /// Send scratch
    send_buffer: BytesMut,
    /// Drop connections silent for this long
    idle_timeout: Duration,
    /// Last idle sweep
    last_sweep: Instant,
}

impl UdpTransport {
    /// Create an unbound transport from relay configuration
    pub fn new(config: &RelayConfig) -> Self {
        Self::with_settings(config.listen_addr(), config.buffer_size, config.idle_timeout())
    }

    /// Create an unbound transport
    pub fn with_settings(listen_addr: impl Into<String>, buffer_size: usize, idle_timeout: Duration) -> Self {
        UdpTransport {
            listen_addr: listen_addr.into(),
            socket: None,
            connections: HashMap::new(),
            by_addr: HashMap::new(),
            next_id: 1,
            pending: VecDeque::new(),
            recv_buffer: vec![0u8; MAX_DATAGRAM_LEN],
            send_buffer: BytesMut::with_capacity(buffer_size + header::DATA_HEADER_LEN),
            idle_timeout,
            last_sweep: Instant::now(),
        }
    }

    /// Bound local address
    pub fn local_addr(&self) -> RelayResult<SocketAddr> {
        match &self.socket {
            Some(socket) => Ok(socket.local_addr()?),
            None => Err(RelayError::Transport("transport not started".to_string())),
        }
    }

    /// Number of live connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn send_raw(&self, datagram: &[u8], addr: SocketAddr) -> io::Result<usize> {
        match &self.socket {
            Some(socket) => socket.try_send_to(datagram, addr),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "transport not started")),
        }
    }

    fn open_connection(&mut self, addr: SocketAddr) -> ConnectionId {
        let connection_id = ConnectionId(self.next_id);
        self.next_id += 1;
        self.connections.insert(connection_id, UdpConnection::new(addr));
        self.by_addr.insert(addr, connection_id);
        debug!(connection_id = %connection_id, addr = %addr, "UDP connection opened");
        connection_id
    }

    fn close_connection(&mut self, connection_id: ConnectionId) -> Option<UdpConnection> {
        let connection = self.connections.remove(&connection_id)?;
        self.by_addr.remove(&connection.addr);
        Some(connection)
    }

    fn handle_datagram(&mut self, mut datagram: BytesMut, from: SocketAddr) -> Option<NetEvent> {
        if datagram.is_empty() {
            return None;
        }
        let kind = datagram.get_u8();
        let known = self.by_addr.get(&from).copied();

        if let Some(connection_id) = known {
            if let Some(connection) = self.connections.get_mut(&connection_id) {
                connection.touch();
            }
        }

        match (kind, known) {
            (header::CONNECT, None) => {
                let connection_id = self.open_connection(from);
                if let Err(e) = self.send_raw(&[header::CONNECT], from) {
                    warn!(addr = %from, error = %e, "Failed to acknowledge UDP connect");
                }
                Some(NetEvent::Connect { connection_id })
            }
            (header::CONNECT, Some(_)) => {
                // Lost ack; answer again without a new event
                let _ = self.send_raw(&[header::CONNECT], from);
                None
            }
            (header::DATA, Some(connection_id)) => {
                if datagram.is_empty() {
                    return None;
                }
                let channel = datagram.get_u8();
                Some(NetEvent::Data {
                    connection_id,
                    channel,
                    payload: datagram,
                })
            }
            (header::DISCONNECT, Some(connection_id)) => {
                self.close_connection(connection_id);
                Some(NetEvent::Disconnect { connection_id })
            }
            (header::KEEPALIVE, Some(_)) => None,
            (_, None) => {
                debug!(addr = %from, kind, "Datagram from unknown address ignored");
                None
            }
            (_, Some(connection_id)) => {
                debug!(connection_id = %connection_id, kind, "Unknown datagram header ignored");
                None
            }
        }
    }

    fn sweep_idle(&mut self, now: Instant) {
        if now.saturating_duration_since(self.last_sweep) < SWEEP_INTERVAL {
            return;
        }
        self.last_sweep = now;

        let timeout = self.idle_timeout;
        let expired: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, connection)| !connection.is_alive(timeout, now))
            .map(|(id, _)| *id)
            .collect();

        for connection_id in expired {
            if let Some(connection) = self.close_connection(connection_id) {
                debug!(connection_id = %connection_id, addr = %connection.addr, "UDP connection timed out");
                self.pending.push_back(NetEvent::Disconnect { connection_id });
            }
        }
    }
}

impl Transport for UdpTransport {
    fn start(&mut self) -> RelayResult<()> {
        let addr = self
            .listen_addr
            .to_socket_addrs()
            .map_err(|e| RelayError::Transport(format!("Invalid listen address {}: {}", self.listen_addr, e)))?
            .next()
            .ok_or_else(|| RelayError::Transport(format!("No address for {}", self.listen_addr)))?;

        let std_socket = std::net::UdpSocket::bind(addr)
            .map_err(|e| RelayError::Transport(format!("Failed to bind UDP {}: {}", addr, e)))?;
        std_socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(std_socket)?;

        info!(addr = %socket.local_addr()?, "UDP transport listening");
        self.socket = Some(socket);
        self.last_sweep = Instant::now();
        Ok(())
    }

    fn poll(&mut self) -> NetEvent {
        if let Some(event) = self.pending.pop_front() {
            return event;
        }

        loop {
            let received = match &self.socket {
                Some(socket) => socket.try_recv_from(&mut self.recv_buffer),
                None => return NetEvent::Nothing,
            };

            match received {
                Ok((len, from)) if len >= self.recv_buffer.len() => {
                    debug!(addr = %from, len, "Truncated datagram dropped");
                }
                Ok((len, from)) => {
                    let datagram = BytesMut::from(&self.recv_buffer[..len]);
                    if let Some(event) = self.handle_datagram(datagram, from) {
                        return event;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    // Typically an ICMP unreachable surfaced on the next read
                    debug!(error = %e, "UDP receive failed");
                    break;
                }
            }
        }

        self.sweep_idle(Instant::now());
        self.pending.pop_front().unwrap_or(NetEvent::Nothing)
    }

    fn send(&mut self, payload: &[u8], channel: Channel, connection_id: ConnectionId) -> RelayResult<()> {
        let addr = self
            .connections
            .get(&connection_id)
            .map(|connection| connection.addr)
            .ok_or_else(|| RelayError::Transport(format!("Unknown connection {}", connection_id)))?;

        let mut datagram = std::mem::take(&mut self.send_buffer);
        datagram.clear();
        datagram.put_u8(header::DATA);
        datagram.put_u8(channel);
        datagram.put_slice(payload);

        let result = self.send_raw(&datagram, addr);
        self.send_buffer = datagram;
        result?;
        Ok(())
    }

    fn disconnect(&mut self, connection_id: ConnectionId) {
        if let Some(connection) = self.close_connection(connection_id) {
            if let Err(e) = self.send_raw(&[header::DISCONNECT], connection.addr) {
                debug!(connection_id = %connection_id, error = %e, "Failed to notify UDP disconnect");
            }
        }
    }

    fn endpoint_of(&self, connection_id: ConnectionId) -> Option<SocketAddr> {
        self.connections.get(&connection_id).map(|connection| connection.addr)
    }

    fn name(&self) -> &'static str {
        "udp"
    }
}
