//! Relay wire codec
//!
//! Relay messages are trailer-tagged: the message type is the last byte of
//! the datagram and every fixed-width field sits in a window counted
//! backward from the end. Forwarding grows or shrinks a payload by working
//! at the tail only, so the application bytes in front are never moved.
//!
//! ```text
//! StartServer        [tag]
//! ConnectToServer    [...][addr:16][port:2][tag]     peer -> relay
//!                    [tag]                           relay -> peer (ack)
//!                    [conn:8][tag]                   relay -> host (ack)
//! Data               [payload][conn:8][tag]          host -> relay, relay -> host
//!                    [payload][tag]                  relay -> peer
//! ClientDisconnect   [conn:8][tag]
//! AddressReport      [addr:16][port:2][tag]          relay -> host
//! ```
//!
//! All integers are little-endian. Addresses are always 16 bytes; IPv4 is
//! carried in its IPv6-mapped form.
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


use crate::transport::ConnectionId;
use bytes::{Buf, BufMut, BytesMut};
use std::fmt;
use std::net::{IpAddr, Ipv6Addr, SocketAddr, SocketAddrV6};

/// Width of the message type tag
pub const TAG_LEN: usize = 1;
/// Width of a connection id on the wire
pub const CONNECTION_ID_LEN: usize = 8;
/// Width of an address on the wire
pub const ADDRESS_LEN: usize = 16;
/// Width of a port on the wire
pub const PORT_LEN: usize = 2;
/// `[addr:16][port:2][tag]`
pub const ENDPOINT_MESSAGE_LEN: usize = ADDRESS_LEN + PORT_LEN + TAG_LEN;
/// `[conn:8][tag]`
pub const CONNECTION_ID_MESSAGE_LEN: usize = CONNECTION_ID_LEN + TAG_LEN;

/// Message type carried in the trailing byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Register as host of a new room
    StartServer = 0,
    /// Join the room hosted at an address (and its acknowledgement)
    ConnectToServer = 1,
    /// Relayed application data
    Data = 2,
    /// Drop, or notify the drop of, a peer
    ClientDisconnect = 3,
    /// Tells a host its public endpoint
    AddressReport = 4,
}

impl MessageType {
    /// Wire value
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageType::StartServer),
            1 => Ok(MessageType::ConnectToServer),
            2 => Ok(MessageType::Data),
            3 => Ok(MessageType::ClientDisconnect),
            4 => Ok(MessageType::AddressReport),
            other => Err(other),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::StartServer => "start_server",
            MessageType::ConnectToServer => "connect_to_server",
            MessageType::Data => "data",
            MessageType::ClientDisconnect => "client_disconnect",
            MessageType::AddressReport => "address_report",
        };
        f.write_str(name)
    }
}

/// Decode the trailing tag. `None` for an empty buffer or an unknown tag.
pub fn message_type(buf: &[u8]) -> Option<MessageType> {
    buf.last().and_then(|tag| MessageType::try_from(*tag).ok())
}

/// Read the connection id window that sits directly in front of the tag
pub fn read_trailing_connection_id(buf: &[u8]) -> Option<ConnectionId> {
    if buf.len() < CONNECTION_ID_MESSAGE_LEN {
        return None;
    }
    let start = buf.len() - CONNECTION_ID_MESSAGE_LEN;
    let mut window = &buf[start..start + CONNECTION_ID_LEN];
    Some(ConnectionId(window.get_u64_le()))
}

/// Read the `[addr:16][port:2]` window in front of the tag
///
/// The result is always in normalized (IPv6-mapped) form so it can be
/// compared against [`normalize_endpoint`] keys.
pub fn read_trailing_endpoint(buf: &[u8]) -> Option<SocketAddr> {
    if buf.len() < ENDPOINT_MESSAGE_LEN {
        return None;
    }
    let start = buf.len() - ENDPOINT_MESSAGE_LEN;
    let mut window = &buf[start..buf.len() - TAG_LEN];

    let mut octets = [0u8; ADDRESS_LEN];
    window.copy_to_slice(&mut octets);
    let port = window.get_u16_le();

    Some(SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::from(octets), port, 0, 0)))
}

/// Map an endpoint into the IPv6 form used on the wire and as registry key
pub fn normalize_endpoint(addr: SocketAddr) -> SocketAddr {
    let ip = match addr.ip() {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    };
    SocketAddr::V6(SocketAddrV6::new(ip, addr.port(), 0, 0))
}

fn address_octets(addr: &SocketAddr) -> [u8; ADDRESS_LEN] {
    match addr.ip() {
        IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
        IpAddr::V6(v6) => v6.octets(),
    }
}

/// `[tag]`
pub fn encode_start_server(buf: &mut BytesMut) {
    buf.clear();
    buf.put_u8(MessageType::StartServer.as_byte());
}

/// `[payload][addr:16][port:2][tag]`, the join request a peer sends
pub fn encode_connect_request(buf: &mut BytesMut, payload: &[u8], target: SocketAddr) {
    buf.clear();
    buf.put_slice(payload);
    buf.put_slice(&address_octets(&target));
    buf.put_u16_le(target.port());
    buf.put_u8(MessageType::ConnectToServer.as_byte());
}

/// `[tag]`, join acknowledgement for the new peer
pub fn encode_connect_ack(buf: &mut BytesMut) {
    buf.clear();
    buf.put_u8(MessageType::ConnectToServer.as_byte());
}

/// `[conn:8][tag]`, join acknowledgement telling the host who joined
pub fn encode_connect_ack_for_host(buf: &mut BytesMut, peer: ConnectionId) {
    buf.clear();
    buf.put_u64_le(peer.0);
    buf.put_u8(MessageType::ConnectToServer.as_byte());
}

/// `[conn:8][tag]`
pub fn encode_client_disconnect(buf: &mut BytesMut, peer: ConnectionId) {
    buf.clear();
    buf.put_u64_le(peer.0);
    buf.put_u8(MessageType::ClientDisconnect.as_byte());
}

/// `[addr:16][port:2][tag]`
pub fn encode_address_report(buf: &mut BytesMut, endpoint: SocketAddr) {
    buf.clear();
    buf.put_slice(&address_octets(&endpoint));
    buf.put_u16_le(endpoint.port());
    buf.put_u8(MessageType::AddressReport.as_byte());
}

/// `[payload][conn:8][tag]`, the host's addressed data message
pub fn encode_addressed_data(buf: &mut BytesMut, payload: &[u8], destination: ConnectionId) {
    buf.clear();
    buf.put_slice(payload);
    buf.put_u64_le(destination.0);
    buf.put_u8(MessageType::Data.as_byte());
}

/// `[payload][tag]`, plain data a peer sends
pub fn encode_data(buf: &mut BytesMut, payload: &[u8]) {
    buf.clear();
    buf.put_slice(payload);
    buf.put_u8(MessageType::Data.as_byte());
}

/// Length of a message once a connection id has been spliced in before its tag
pub fn grown_len(len: usize) -> usize {
    len + CONNECTION_ID_LEN
}

/// Grow: replace the trailing tag with `[conn:8][tag]`
///
/// The tag is preserved. Every byte in front of it is left untouched.
/// An empty buffer is left as is.
pub fn append_connection_id(buf: &mut BytesMut, id: ConnectionId) {
    let Some(&tag) = buf.last() else {
        return;
    };
    buf.truncate(buf.len() - TAG_LEN);
    buf.reserve(CONNECTION_ID_LEN + TAG_LEN);
    buf.put_u64_le(id.0);
    buf.put_u8(tag);
}

/// Shrink: drop the connection id window in front of the tag
///
/// Returns the removed id, or `None` (buffer untouched) when the buffer is
/// too short to carry one.
pub fn strip_connection_id(buf: &mut BytesMut) -> Option<ConnectionId> {
    let id = read_trailing_connection_id(buf)?;
    let tag = buf[buf.len() - TAG_LEN];
    buf.truncate(buf.len() - CONNECTION_ID_MESSAGE_LEN);
    buf.put_u8(tag);
    Some(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn bytes(data: &[u8]) -> BytesMut {
        BytesMut::from(data)
    }

    #[test]
    fn test_message_type_is_last_byte() {
        assert_eq!(message_type(&[0]), Some(MessageType::StartServer));
        assert_eq!(message_type(&[9, 9, 2]), Some(MessageType::Data));
        assert_eq!(message_type(&[2, 2, 3]), Some(MessageType::ClientDisconnect));
        assert_eq!(message_type(&[]), None);
        assert_eq!(message_type(&[42]), None);
    }

    #[test]
    fn test_read_trailing_connection_id() {
        let mut buf = BytesMut::new();
        encode_addressed_data(&mut buf, b"hello", ConnectionId(0x0102_0304_0506_0708));

        assert_eq!(buf.len(), 5 + 8 + 1);
        assert_eq!(&buf[5..13], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(
            read_trailing_connection_id(&buf),
            Some(ConnectionId(0x0102_0304_0506_0708))
        );
        assert_eq!(read_trailing_connection_id(&buf[..8]), None);
    }

    #[test]
    fn test_connect_request_layout() {
        let target: SocketAddr = "192.168.1.20:7777".parse().unwrap();
        let mut buf = BytesMut::new();
        encode_connect_request(&mut buf, b"xy", target);

        assert_eq!(buf.len(), 2 + ENDPOINT_MESSAGE_LEN);
        // ::ffff:192.168.1.20
        assert_eq!(&buf[2..12], &[0u8; 10]);
        assert_eq!(&buf[12..14], &[0xff, 0xff]);
        assert_eq!(&buf[14..18], &[192, 168, 1, 20]);
        // 7777 = 0x1e61, little-endian
        assert_eq!(&buf[18..20], &[0x61, 0x1e]);
        assert_eq!(buf[20], MessageType::ConnectToServer.as_byte());

        assert_eq!(read_trailing_endpoint(&buf), Some(normalize_endpoint(target)));
    }

    #[test]
    fn test_read_trailing_endpoint_rejects_short_buffer() {
        assert_eq!(read_trailing_endpoint(&[1u8; ENDPOINT_MESSAGE_LEN - 1]), None);
    }

    #[test]
    fn test_normalize_endpoint_maps_ipv4() {
        let v4 = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 9000);
        let mapped: SocketAddr = "[::ffff:10.0.0.1]:9000".parse().unwrap();
        assert_eq!(normalize_endpoint(v4), mapped);
        assert_eq!(normalize_endpoint(mapped), mapped);
    }

    #[test]
    fn test_control_message_layouts() {
        let mut buf = BytesMut::new();

        encode_start_server(&mut buf);
        assert_eq!(&buf[..], &[0]);

        encode_connect_ack(&mut buf);
        assert_eq!(&buf[..], &[1]);

        encode_connect_ack_for_host(&mut buf, ConnectionId(5));
        assert_eq!(&buf[..], &[5, 0, 0, 0, 0, 0, 0, 0, 1]);

        encode_client_disconnect(&mut buf, ConnectionId(258));
        assert_eq!(&buf[..], &[2, 1, 0, 0, 0, 0, 0, 0, 3]);

        let endpoint: SocketAddr = "1.2.3.4:258".parse().unwrap();
        encode_address_report(&mut buf, endpoint);
        assert_eq!(buf.len(), ENDPOINT_MESSAGE_LEN);
        assert_eq!(&buf[12..16], &[1, 2, 3, 4]);
        assert_eq!(&buf[16..18], &[2, 1]);
        assert_eq!(buf[18], MessageType::AddressReport.as_byte());
    }

    #[test]
    fn test_append_connection_id_keeps_payload() {
        let mut buf = bytes(&[10, 20, 30, MessageType::Data.as_byte()]);
        append_connection_id(&mut buf, ConnectionId(7));

        assert_eq!(buf.len(), grown_len(4));
        assert_eq!(&buf[..3], &[10, 20, 30]);
        assert_eq!(read_trailing_connection_id(&buf), Some(ConnectionId(7)));
        assert_eq!(message_type(&buf), Some(MessageType::Data));
    }

    #[test]
    fn test_append_connection_id_on_empty_buffer() {
        let mut buf = BytesMut::new();
        append_connection_id(&mut buf, ConnectionId(7));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_strip_connection_id() {
        let mut buf = BytesMut::new();
        encode_addressed_data(&mut buf, &[1, 2, 3], ConnectionId(99));

        assert_eq!(strip_connection_id(&mut buf), Some(ConnectionId(99)));
        assert_eq!(&buf[..], &[1, 2, 3, MessageType::Data.as_byte()]);
    }

    #[test]
    fn test_strip_connection_id_with_empty_payload() {
        let mut buf = BytesMut::new();
        encode_addressed_data(&mut buf, &[], ConnectionId(1));

        assert_eq!(strip_connection_id(&mut buf), Some(ConnectionId(1)));
        assert_eq!(&buf[..], &[MessageType::Data.as_byte()]);
    }

    #[test]
    fn test_strip_connection_id_leaves_short_buffer() {
        let mut buf = bytes(&[1, 2, 3, 2]);
        assert_eq!(strip_connection_id(&mut buf), None);
        assert_eq!(&buf[..], &[1, 2, 3, 2]);
    }
}
