//! Transport abstraction
//!
//! The relay core never touches sockets. It drives a [`Transport`] that hands
//! out one event per `poll` and accepts sends and disconnects addressed by
//! connection id. Connection ids are owned by the transport and may be
//! reused once a connection is gone.
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


pub mod memory;
pub mod udp;

use crate::error::RelayResult;
use bytes::BytesMut;
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;

pub use memory::{MemoryTransport, SentMessage};
pub use udp::UdpTransport;

/// Transport-assigned connection handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport channel a message travels on
pub type Channel = u8;

/// One transport event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetEvent {
    /// A connection was established
    Connect {
        connection_id: ConnectionId,
    },
    /// A connection went away (closed by the remote or timed out)
    Disconnect {
        connection_id: ConnectionId,
    },
    /// A datagram arrived
    Data {
        connection_id: ConnectionId,
        channel: Channel,
        payload: BytesMut,
    },
    /// Nothing pending
    Nothing,
}

/// Transport backend consumed by the relay dispatcher
///
/// Every call is a synchronous step of the dispatcher loop; `poll` must
/// return promptly, yielding [`NetEvent::Nothing`] when idle.
pub trait Transport {
    /// One-time initialization before the loop starts
    fn start(&mut self) -> RelayResult<()>;

    /// Take the next pending event
    fn poll(&mut self) -> NetEvent;

    /// Send a payload to a connection
    fn send(&mut self, payload: &[u8], channel: Channel, connection_id: ConnectionId) -> RelayResult<()>;

    /// Forcibly close a connection
    fn disconnect(&mut self, connection_id: ConnectionId);

    /// Public endpoint of a connection, if known
    fn endpoint_of(&self, connection_id: ConnectionId) -> Option<SocketAddr>;

    /// Channel used for relay-originated control messages
    fn default_channel(&self) -> Channel {
        0
    }

    /// Backend name for logs
    fn name(&self) -> &'static str;
}
