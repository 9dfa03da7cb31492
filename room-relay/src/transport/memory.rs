//! Loopback transport
//!
//! Events are scripted by the caller and everything the relay sends or
//! disconnects is recorded. Used to embed the relay without sockets and to
//! drive it in tests.
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
use bytes::BytesMut;
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;

/// A message the relay handed to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Recipient
    pub connection_id: ConnectionId,
    /// Channel it was sent on
    pub channel: Channel,
    /// Bytes as sent
    pub payload: Vec<u8>,
}

/// In-memory transport
#[derive(Debug, Default)]
pub struct MemoryTransport {
    /// Events waiting to be polled
    inbound: VecDeque<NetEvent>,
    /// Everything sent so far
    sent: Vec<SentMessage>,
    /// Connections closed by the relay, in order
    disconnected: Vec<ConnectionId>,
    /// Live connections and their endpoints (`None` when unknown)
    connections: HashMap<ConnectionId, Option<SocketAddr>>,
    /// Connections whose sends fail
    failing: HashSet<ConnectionId>,
    /// Channel for control messages
    default_channel: Channel,
    /// Set by `start`
    started: bool,
}

impl MemoryTransport {
    /// Create an empty transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport whose control channel is `channel`
    pub fn with_default_channel(channel: Channel) -> Self {
        MemoryTransport {
            default_channel: channel,
            ..Self::default()
        }
    }

    /// Open a connection with a known endpoint and queue its Connect event
    pub fn connect(&mut self, connection_id: ConnectionId, endpoint: SocketAddr) {
        self.connections.insert(connection_id, Some(endpoint));
        self.inbound.push_back(NetEvent::Connect { connection_id });
    }

    /// Open a connection whose endpoint cannot be resolved
    pub fn connect_without_endpoint(&mut self, connection_id: ConnectionId) {
        self.connections.insert(connection_id, None);
        self.inbound.push_back(NetEvent::Connect { connection_id });
    }

    /// Queue a datagram from a connection
    pub fn push_data(&mut self, connection_id: ConnectionId, channel: Channel, payload: &[u8]) {
        self.inbound.push_back(NetEvent::Data {
            connection_id,
            channel,
            payload: BytesMut::from(payload),
        });
    }

    /// Queue a remote-side disconnect
    pub fn push_disconnect(&mut self, connection_id: ConnectionId) {
        self.connections.remove(&connection_id);
        self.inbound.push_back(NetEvent::Disconnect { connection_id });
    }

    /// Make every send to `connection_id` fail
    pub fn fail_sends_to(&mut self, connection_id: ConnectionId) {
        self.failing.insert(connection_id);
    }

    /// Whether `start` has been called
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Number of events not yet polled
    pub fn pending(&self) -> usize {
        self.inbound.len()
    }

    /// Everything sent so far
    pub fn sent(&self) -> &[SentMessage] {
        &self.sent
    }

    /// Messages sent to one connection
    pub fn sent_to(&self, connection_id: ConnectionId) -> Vec<&SentMessage> {
        self.sent
            .iter()
            .filter(|m| m.connection_id == connection_id)
            .collect()
    }

    /// Drain the send log
    pub fn take_sent(&mut self) -> Vec<SentMessage> {
        std::mem::take(&mut self.sent)
    }

    /// Connections closed by the relay
    pub fn disconnected(&self) -> &[ConnectionId] {
        &self.disconnected
    }

    /// Drain the disconnect log
    pub fn take_disconnected(&mut self) -> Vec<ConnectionId> {
        std::mem::take(&mut self.disconnected)
    }

    /// Whether the connection is still open
    pub fn is_connected(&self, connection_id: ConnectionId) -> bool {
        self.connections.contains_key(&connection_id)
    }
}

impl Transport for MemoryTransport {
    fn start(&mut self) -> RelayResult<()> {
        self.started = true;
        Ok(())
    }

    fn poll(&mut self) -> NetEvent {
        self.inbound.pop_front().unwrap_or(NetEvent::Nothing)
    }

    fn send(&mut self, payload: &[u8], channel: Channel, connection_id: ConnectionId) -> RelayResult<()> {
        if self.failing.contains(&connection_id) {
            return Err(RelayError::Transport(format!(
                "send to connection {} failed",
                connection_id
            )));
        }
        self.sent.push(SentMessage {
            connection_id,
            channel,
            payload: payload.to_vec(),
        });
        Ok(())
    }

    fn disconnect(&mut self, connection_id: ConnectionId) {
        self.connections.remove(&connection_id);
        self.disconnected.push(connection_id);
    }

    fn endpoint_of(&self, connection_id: ConnectionId) -> Option<SocketAddr> {
        self.connections.get(&connection_id).copied().flatten()
    }

    fn default_channel(&self) -> Channel {
        self.default_channel
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
