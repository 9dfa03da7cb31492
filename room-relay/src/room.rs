//! Rooms
//!
//! A room pairs one host with the peers that joined it. The room owns its
//! peer table and talks to the transport for acknowledgements, forwarding
//! and forced disconnects; registry bookkeeping stays with the dispatcher.
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


use crate::bandwidth::{BandwidthGovernor, Verdict};
use crate::codec;
use crate::error::{RelayError, RelayResult};
use crate::transport::{Channel, ConnectionId, Transport};
use bytes::BytesMut;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub use crate::room_id::RoomId;

/// Role of a peer inside its room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// Registered the room with StartServer
    Host,
    /// Joined through ConnectToServer
    Client,
}

/// One endpoint known to the relay
#[derive(Debug, Clone)]
pub struct Peer {
    /// Transport connection
    pub connection_id: ConnectionId,
    /// Fixed at creation
    pub role: PeerRole,
    /// Admission time
    pub connected_at: Instant,
    /// Bytes relayed to or on behalf of this peer since admission
    pub outgoing_bytes: u64,
}

impl Peer {
    /// Create the host of a new room
    pub fn host(connection_id: ConnectionId, now: Instant) -> Self {
        Peer {
            connection_id,
            role: PeerRole::Host,
            connected_at: now,
            outgoing_bytes: 0,
        }
    }

    /// Create a joining client
    pub fn client(connection_id: ConnectionId, now: Instant) -> Self {
        Peer {
            connection_id,
            role: PeerRole::Client,
            connected_at: now,
            outgoing_bytes: 0,
        }
    }

    /// Time since admission
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.connected_at)
    }
}

/// What `disconnect_peer` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// Connection is not part of this room; try the next one
    NotMember,
    /// A client was removed
    Peer,
    /// The host left and the room was torn down. The caller must drop the
    /// room from its registries and release the id.
    RoomClosed(RoomId),
}

impl Removal {
    /// True when the connection belonged to the room
    pub fn removed(&self) -> bool {
        !matches!(self, Removal::NotMember)
    }
}

/// A host and its joined peers
#[derive(Debug)]
pub struct Room {
    /// Room identifier
    room_id: RoomId,
    /// Host peer, immutable for the room's life
    host: Peer,
    /// Joined clients by connection id
    peers: HashMap<ConnectionId, Peer>,
    /// False once torn down
    valid: bool,
    /// Scratch for acknowledgements and notifications
    control: BytesMut,
}

impl Room {
    /// Create a room owned by `host`
    pub fn new(room_id: RoomId, host: Peer) -> Self {
        Room {
            room_id,
            host,
            peers: HashMap::new(),
            valid: true,
            control: BytesMut::with_capacity(codec::ENDPOINT_MESSAGE_LEN),
        }
    }

    /// Room identifier
    pub fn id(&self) -> RoomId {
        self.room_id
    }

    /// Host connection id
    pub fn host_id(&self) -> ConnectionId {
        self.host.connection_id
    }

    /// Host peer
    pub fn host(&self) -> &Peer {
        &self.host
    }

    /// Joined client, if present
    pub fn peer(&self, connection_id: ConnectionId) -> Option<&Peer> {
        self.peers.get(&connection_id)
    }

    /// Joined client ids
    pub fn peer_ids(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.peers.keys().copied()
    }

    /// Number of joined clients (host excluded)
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// False once the room has been torn down
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    fn ensure_valid(&self) -> RelayResult<()> {
        if self.valid {
            Ok(())
        } else {
            Err(RelayError::InvalidRoom(self.room_id))
        }
    }

    /// Look up a connection. `Some(role)` when it belongs to this room.
    pub fn has_peer(&self, connection_id: ConnectionId) -> RelayResult<Option<PeerRole>> {
        self.ensure_valid()?;

        if self.host.connection_id == connection_id {
            return Ok(Some(PeerRole::Host));
        }
        Ok(self.peers.get(&connection_id).map(|peer| peer.role))
    }

    /// Seat a new client and acknowledge it to both sides
    ///
    /// The client gets a bare `[tag]`; the host gets `[conn:8][tag]` so it
    /// learns the id it must address replies to.
    pub fn admit_peer<T: Transport + ?Sized>(&mut self, transport: &mut T, peer: Peer) -> RelayResult<()> {
        self.ensure_valid()?;

        let channel = transport.default_channel();
        let peer_id = peer.connection_id;

        codec::encode_connect_ack(&mut self.control);
        if let Err(e) = transport.send(&self.control, channel, peer_id) {
            warn!(room_id = %self.room_id, connection_id = %peer_id, error = %e, "Failed to acknowledge join to peer");
        }

        codec::encode_connect_ack_for_host(&mut self.control, peer_id);
        if let Err(e) = transport.send(&self.control, channel, self.host.connection_id) {
            warn!(room_id = %self.room_id, connection_id = %peer_id, error = %e, "Failed to announce join to host");
        }

        self.peers.insert(peer_id, Peer {
            role: PeerRole::Client,
            ..peer
        });
        Ok(())
    }

    /// Relay `payload` to `to` on behalf of `from`
    ///
    /// The non-host endpoint is the taxed peer: it is checked against the
    /// governor first and, when over its limit, dropped and the payload
    /// discarded. Returns whether the payload was handed to the transport.
    #[allow(clippy::too_many_arguments)]
    pub fn forward<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        governor: &BandwidthGovernor,
        to: ConnectionId,
        from: ConnectionId,
        channel: Channel,
        payload: &[u8],
        now: Instant,
    ) -> RelayResult<bool> {
        self.ensure_valid()?;

        let taxed = if from == self.host.connection_id { to } else { from };

        if let Some(peer) = self.peers.get_mut(&taxed) {
            if let Verdict::Exceeded { rate, limit, in_grace_period } = governor.check(peer, now) {
                warn!(
                    room_id = %self.room_id,
                    connection_id = %taxed,
                    rate,
                    limit,
                    in_grace_period,
                    "Bandwidth exceeded, peer disconnected"
                );
                self.disconnect_peer(transport, taxed, true);
                return Ok(false);
            }
            // Counts relay overhead (the spliced id and tag) too
            peer.outgoing_bytes += payload.len() as u64;
        }

        match transport.send(payload, channel, to) {
            Ok(()) => Ok(true),
            Err(e) => {
                debug!(room_id = %self.room_id, to = %to, error = %e, "Forward failed");
                Ok(false)
            }
        }
    }

    /// Remove a connection from the room
    ///
    /// - host: every client is force-disconnected, the peer table cleared and
    ///   the room invalidated (`RoomClosed`).
    /// - client: force-disconnected when `host_initiated`, otherwise the host
    ///   is told with a ClientDisconnect message. Either way it is removed.
    /// - anything else: `NotMember`.
    pub fn disconnect_peer<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        connection_id: ConnectionId,
        host_initiated: bool,
    ) -> Removal {
        if !self.valid {
            return Removal::NotMember;
        }

        if self.host.connection_id == connection_id {
            for peer_id in self.peers.keys() {
                transport.disconnect(*peer_id);
            }
            self.peers.clear();
            self.valid = false;
            return Removal::RoomClosed(self.room_id);
        }

        if self.peers.remove(&connection_id).is_none() {
            return Removal::NotMember;
        }

        if host_initiated {
            transport.disconnect(connection_id);
        } else {
            codec::encode_client_disconnect(&mut self.control, connection_id);
            let channel = transport.default_channel();
            if let Err(e) = transport.send(&self.control, channel, self.host.connection_id) {
                warn!(room_id = %self.room_id, connection_id = %connection_id, error = %e, "Failed to notify host of peer disconnect");
            }
        }

        Removal::Peer
    }
}
