//! Room relay for NAT traversal
//!
//! A host registers a room with the relay; peers join by naming the host's
//! public address. The relay forwards trailer-tagged data between them,
//! polices per-peer bandwidth and tears rooms down when hosts leave.
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

pub mod bandwidth;
pub mod codec;
pub mod dispatcher;
pub mod error;
pub mod room;
pub mod room_id;
pub mod transport;

pub use bandwidth::{BandwidthGovernor, Verdict};
pub use codec::MessageType;
pub use dispatcher::{Dispatcher, RelayStats};
pub use error::{RelayError, RelayResult};
pub use room::{Peer, PeerRole, Room, RoomId};
pub use transport::{Channel, ConnectionId, MemoryTransport, NetEvent, Transport, UdpTransport};
