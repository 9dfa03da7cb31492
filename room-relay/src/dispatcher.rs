//! Relay dispatcher
//!
//! Owns every room plus the host-address registry and turns transport
//! events into room operations. Single-threaded: the dispatcher is the only
//! mutator of rooms and registries, so nothing here is locked.
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


use crate::bandwidth::BandwidthGovernor;
use crate::codec::{self, MessageType};
use crate::error::{RelayError, RelayResult};
use crate::room::{Peer, PeerRole, Removal, Room, RoomId};
use crate::room_id::RoomIdAllocator;
use crate::transport::{Channel, ConnectionId, NetEvent, Transport};
use bytes::BytesMut;
use relay_config::RelayConfig;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{debug, error, info};

/// Room lifecycle logging: `info` with runtime meta logging on, `debug` otherwise
macro_rules! meta {
    ($enabled:expr, $($arg:tt)+) => {
        if $enabled {
            tracing::info!($($arg)+);
        } else {
            tracing::debug!($($arg)+);
        }
    };
}

/// Where a grown peer message is assembled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowTarget {
    /// The received buffer already has room
    InPlace,
    /// The dispatcher's reusable send buffer
    Reusable,
    /// A one-shot allocation within the configured cap
    Temporary,
}

/// Pick a buffer for a message that grows from `received_capacity` to `grown_len`
///
/// `None` means the message must be dropped.
pub fn grow_target(config: &RelayConfig, received_capacity: usize, grown_len: usize) -> Option<GrowTarget> {
    if received_capacity >= grown_len {
        Some(GrowTarget::InPlace)
    } else if config.buffer_size >= grown_len {
        Some(GrowTarget::Reusable)
    } else if config.allow_temporary_alloc && config.max_temporary_alloc >= grown_len {
        Some(GrowTarget::Temporary)
    } else {
        None
    }
}

/// Relay statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    /// Open rooms
    pub rooms: usize,
    /// Joined clients across all rooms
    pub peers: usize,
    /// Rooms reachable by address
    pub addressable_rooms: usize,
}

/// Relay dispatcher
pub struct Dispatcher<T: Transport> {
    /// Transport backend
    transport: T,
    /// Immutable relay configuration
    config: RelayConfig,
    /// Bandwidth policy
    governor: BandwidthGovernor,
    /// All rooms, in creation order
    rooms: Vec<Room>,
    /// Host public endpoint (normalized) to room
    rooms_by_address: HashMap<SocketAddr, RoomId>,
    /// Room id free-list
    room_ids: RoomIdAllocator,
    /// Reusable buffer for grown messages and relay-originated replies
    send_buffer: BytesMut,
}

impl<T: Transport> Dispatcher<T> {
    /// Create a dispatcher over `transport`
    pub fn new(transport: T, config: RelayConfig) -> Self {
        Dispatcher {
            transport,
            governor: BandwidthGovernor::from_config(&config),
            send_buffer: BytesMut::with_capacity(config.buffer_size),
            config,
            rooms: Vec::new(),
            rooms_by_address: HashMap::new(),
            room_ids: RoomIdAllocator::new(),
        }
    }

    /// Start the transport. Failure here is fatal for the process.
    pub fn start(&mut self) -> RelayResult<()> {
        info!(transport = self.transport.name(), "Starting relay transport");
        self.transport.start()
    }

    /// Drain every pending transport event
    ///
    /// Returns the number of events handled. A failure while handling one
    /// event is logged and the loop moves on to the next.
    pub fn run_tick(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let event = self.transport.poll();
            if event == NetEvent::Nothing {
                break;
            }
            handled += 1;
            if let Err(e) = self.handle_event(event, Instant::now()) {
                debug_assert!(
                    !matches!(e, RelayError::InvalidRoom(_)),
                    "dispatcher reached a destroyed room: {}",
                    e
                );
                error!(error = %e, "Error during relay loop");
            }
        }
        handled
    }

    /// Handle one event as of `now`
    pub fn handle_event(&mut self, event: NetEvent, now: Instant) -> RelayResult<()> {
        match event {
            NetEvent::Connect { connection_id } => {
                debug!(connection_id = %connection_id, "Peer connected");
                Ok(())
            }
            NetEvent::Disconnect { connection_id } => {
                meta!(self.config.enable_runtime_meta_logging, connection_id = %connection_id, "Peer disconnected");
                self.handle_disconnect(connection_id);
                Ok(())
            }
            NetEvent::Data { connection_id, channel, payload } => {
                self.handle_data(connection_id, channel, payload, now)
            }
            NetEvent::Nothing => Ok(()),
        }
    }

    fn handle_data(
        &mut self,
        connection_id: ConnectionId,
        channel: Channel,
        payload: BytesMut,
        now: Instant,
    ) -> RelayResult<()> {
        match codec::message_type(&payload) {
            Some(MessageType::StartServer) => self.handle_start_server(connection_id, now),
            Some(MessageType::ConnectToServer) => self.handle_connect_to_server(connection_id, &payload, now),
            Some(MessageType::Data) => self.handle_relay_data(connection_id, channel, payload, now),
            Some(MessageType::ClientDisconnect) => {
                self.handle_client_disconnect(connection_id, &payload);
                Ok(())
            }
            Some(MessageType::AddressReport) | None => {
                debug!(connection_id = %connection_id, len = payload.len(), "Unexpected message ignored");
                Ok(())
            }
        }
    }

    fn handle_start_server(&mut self, connection_id: ConnectionId, now: Instant) -> RelayResult<()> {
        if self.is_seated(connection_id) {
            debug!(connection_id = %connection_id, "StartServer from seated connection ignored");
            return Ok(());
        }

        let endpoint = self.transport.endpoint_of(connection_id).map(codec::normalize_endpoint);
        if let Some(endpoint) = endpoint {
            if self.rooms_by_address.contains_key(&endpoint) {
                debug!(connection_id = %connection_id, endpoint = %endpoint, "Address already hosts a room");
                return Ok(());
            }
        }

        let room_id = self.room_ids.allocate();
        self.rooms.push(Room::new(room_id, Peer::host(connection_id, now)));

        let Some(endpoint) = endpoint else {
            meta!(
                self.config.enable_runtime_meta_logging,
                room_id = %room_id,
                connection_id = %connection_id,
                "Room opened without a resolvable endpoint"
            );
            return Ok(());
        };

        self.rooms_by_address.insert(endpoint, room_id);
        meta!(
            self.config.enable_runtime_meta_logging,
            room_id = %room_id,
            connection_id = %connection_id,
            endpoint = %endpoint,
            "Room opened"
        );

        if self.config.report_host_address {
            codec::encode_address_report(&mut self.send_buffer, endpoint);
            let channel = self.transport.default_channel();
            self.transport.send(&self.send_buffer, channel, connection_id)?;
        }
        Ok(())
    }

    fn handle_connect_to_server(&mut self, connection_id: ConnectionId, payload: &[u8], now: Instant) -> RelayResult<()> {
        if self.is_seated(connection_id) || self.address_hosts_room(connection_id) {
            debug!(connection_id = %connection_id, "ConnectToServer from seated connection ignored");
            return Ok(());
        }

        let Some(target) = codec::read_trailing_endpoint(payload) else {
            debug!(connection_id = %connection_id, len = payload.len(), "Undersized ConnectToServer ignored");
            return Ok(());
        };

        meta!(
            self.config.enable_runtime_meta_logging,
            connection_id = %connection_id,
            target = %target,
            "Connection requested"
        );

        let Some(room_id) = self.rooms_by_address.get(&target).copied() else {
            debug!(connection_id = %connection_id, target = %target, "No room at requested address");
            return Ok(());
        };
        let Some(room) = self.rooms.iter_mut().find(|room| room.id() == room_id) else {
            return Ok(());
        };

        room.admit_peer(&mut self.transport, Peer::client(connection_id, now))?;
        meta!(
            self.config.enable_runtime_meta_logging,
            room_id = %room_id,
            connection_id = %connection_id,
            "Connection approved"
        );
        Ok(())
    }

    fn handle_relay_data(
        &mut self,
        connection_id: ConnectionId,
        channel: Channel,
        mut payload: BytesMut,
        now: Instant,
    ) -> RelayResult<()> {
        let Some((index, role)) = self.find_room(connection_id) else {
            debug!(connection_id = %connection_id, "Data from unseated connection ignored");
            return Ok(());
        };

        match role {
            PeerRole::Host => {
                let Some(destination) = codec::read_trailing_connection_id(&payload) else {
                    debug!(connection_id = %connection_id, len = payload.len(), "Undersized host data ignored");
                    return Ok(());
                };

                let room = &mut self.rooms[index];
                if room.has_peer(destination)? != Some(PeerRole::Client) {
                    debug!(
                        room_id = %room.id(),
                        destination = %destination,
                        "Host addressed a connection outside its room"
                    );
                    return Ok(());
                }

                codec::strip_connection_id(&mut payload);
                room.forward(
                    &mut self.transport,
                    &self.governor,
                    destination,
                    connection_id,
                    channel,
                    &payload,
                    now,
                )?;
            }
            PeerRole::Client => {
                let grown_len = codec::grown_len(payload.len());
                let mut temporary;
                let buffer: &mut BytesMut = match grow_target(&self.config, payload.capacity(), grown_len) {
                    Some(GrowTarget::InPlace) => &mut payload,
                    Some(GrowTarget::Reusable) => {
                        self.send_buffer.clear();
                        self.send_buffer.extend_from_slice(&payload);
                        &mut self.send_buffer
                    }
                    Some(GrowTarget::Temporary) => {
                        temporary = BytesMut::with_capacity(grown_len);
                        temporary.extend_from_slice(&payload);
                        &mut temporary
                    }
                    None => {
                        debug!(connection_id = %connection_id, len = grown_len, "Message too large to relay, dropped");
                        return Ok(());
                    }
                };

                codec::append_connection_id(buffer, connection_id);

                let room = &mut self.rooms[index];
                let host = room.host_id();
                room.forward(
                    &mut self.transport,
                    &self.governor,
                    host,
                    connection_id,
                    channel,
                    buffer,
                    now,
                )?;
            }
        }
        Ok(())
    }

    fn handle_client_disconnect(&mut self, connection_id: ConnectionId, payload: &[u8]) {
        let Some(target) = codec::read_trailing_connection_id(payload) else {
            debug!(connection_id = %connection_id, len = payload.len(), "Undersized ClientDisconnect ignored");
            return;
        };

        meta!(
            self.config.enable_runtime_meta_logging,
            connection_id = %connection_id,
            target = %target,
            "Client disconnect request"
        );

        let Some(index) = self
            .rooms
            .iter()
            .position(|room| room.is_valid() && room.host_id() == connection_id)
        else {
            debug!(connection_id = %connection_id, "ClientDisconnect from a non-host ignored");
            return;
        };

        let removal = self.rooms[index].disconnect_peer(&mut self.transport, target, true);
        if let Removal::RoomClosed(_) = removal {
            self.close_room(index);
        }
    }

    fn handle_disconnect(&mut self, connection_id: ConnectionId) {
        for index in 0..self.rooms.len() {
            match self.rooms[index].disconnect_peer(&mut self.transport, connection_id, false) {
                Removal::NotMember => continue,
                Removal::Peer => {
                    meta!(
                        self.config.enable_runtime_meta_logging,
                        room_id = %self.rooms[index].id(),
                        connection_id = %connection_id,
                        "Peer left room"
                    );
                }
                Removal::RoomClosed(_) => self.close_room(index),
            }
            // A connection sits in at most one room
            break;
        }
    }

    /// Drop a torn-down room from every registry and release its id
    fn close_room(&mut self, index: usize) {
        let room = self.rooms.remove(index);
        let room_id = room.id();
        self.rooms_by_address.retain(|_, id| *id != room_id);
        self.room_ids.release(room_id);
        meta!(
            self.config.enable_runtime_meta_logging,
            room_id = %room_id,
            host = %room.host_id(),
            "Room closed"
        );
    }

    /// Index and role of the room holding `connection_id`
    ///
    /// Torn-down rooms never stay in `rooms`, so an invalid room simply
    /// matches nothing here.
    fn find_room(&self, connection_id: ConnectionId) -> Option<(usize, PeerRole)> {
        self.rooms.iter().enumerate().find_map(|(index, room)| {
            debug_assert!(room.is_valid(), "destroyed room {} left in registry", room.id());
            room.has_peer(connection_id)
                .ok()
                .flatten()
                .map(|role| (index, role))
        })
    }

    fn is_seated(&self, connection_id: ConnectionId) -> bool {
        self.find_room(connection_id).is_some()
    }

    fn address_hosts_room(&self, connection_id: ConnectionId) -> bool {
        self.transport
            .endpoint_of(connection_id)
            .map(codec::normalize_endpoint)
            .is_some_and(|endpoint| self.rooms_by_address.contains_key(&endpoint))
    }

    /// Room holding `connection_id`, and the role it has there
    pub fn room_of(&self, connection_id: ConnectionId) -> Option<(RoomId, PeerRole)> {
        self.find_room(connection_id)
            .map(|(index, role)| (self.rooms[index].id(), role))
    }

    /// Room registered for a host endpoint
    pub fn room_at(&self, endpoint: SocketAddr) -> Option<RoomId> {
        self.rooms_by_address
            .get(&codec::normalize_endpoint(endpoint))
            .copied()
    }

    /// Room by id
    pub fn room(&self, room_id: RoomId) -> Option<&Room> {
        self.rooms.iter().find(|room| room.id() == room_id)
    }

    /// All open rooms, oldest first
    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    /// Current statistics
    pub fn stats(&self) -> RelayStats {
        RelayStats {
            rooms: self.rooms.len(),
            peers: self.rooms.iter().map(Room::peer_count).sum(),
            addressable_rooms: self.rooms_by_address.len(),
        }
    }

    /// Relay configuration
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Transport backend
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Transport backend, mutably
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Close every room, disconnecting hosts and peers
    pub fn shutdown(&mut self) {
        while let Some(room) = self.rooms.last_mut() {
            let host = room.host_id();
            room.disconnect_peer(&mut self.transport, host, true);
            self.transport.disconnect(host);
            self.close_room(self.rooms.len() - 1);
        }
        info!("All rooms closed");
    }
}
