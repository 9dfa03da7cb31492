//! Integration Tests for the Relay Room Flow
//!
//! Drives a dispatcher through an in-memory transport:
//! 1. Host registers a room
//! 2. Peer joins by the host's address
//! 3. Data flows both ways with connection ids spliced in and out
//! 4. Host kicks the peer, then leaves and the room is torn down

use bytes::BytesMut;
use relay_config::RelayConfig;
use room_relay::codec;
use room_relay::{ConnectionId, Dispatcher, MemoryTransport, MessageType, PeerRole, RoomId};
use std::net::SocketAddr;

const HOST: ConnectionId = ConnectionId(1);
const ALICE: ConnectionId = ConnectionId(2);
const BOB: ConnectionId = ConnectionId(3);

fn addr(s: &str) -> SocketAddr {
    s.parse().expect("valid socket address")
}

fn start_server() -> Vec<u8> {
    let mut buf = BytesMut::new();
    codec::encode_start_server(&mut buf);
    buf.to_vec()
}

fn connect_to(target: SocketAddr) -> Vec<u8> {
    let mut buf = BytesMut::new();
    codec::encode_connect_request(&mut buf, b"hello", target);
    buf.to_vec()
}

fn relay_with_room() -> Dispatcher<MemoryTransport> {
    // Events carry wall-clock time here; bandwidth policy is covered by unit tests
    let config = RelayConfig {
        bandwidth_limit: 0,
        grace_period_bandwidth_limit: 0,
        ..RelayConfig::default()
    };
    let mut relay = Dispatcher::new(MemoryTransport::new(), config);
    relay.start().expect("memory transport starts");

    let transport = relay.transport_mut();
    transport.connect(HOST, addr("203.0.113.1:4000"));
    transport.connect(ALICE, addr("198.51.100.1:5000"));
    transport.connect(BOB, addr("198.51.100.2:5000"));
    transport.push_data(HOST, 0, &start_server());
    transport.push_data(ALICE, 0, &connect_to(addr("203.0.113.1:4000")));
    transport.push_data(BOB, 0, &connect_to(addr("[::ffff:203.0.113.1]:4000")));
    relay.run_tick();
    relay
}

#[test]
fn test_join_acknowledgements() {
    let relay = relay_with_room();
    let transport = relay.transport();

    // Host: address report, then one join notice per peer
    let to_host = transport.sent_to(HOST);
    assert_eq!(to_host.len(), 3);
    assert_eq!(codec::message_type(&to_host[0].payload), Some(MessageType::AddressReport));
    assert_eq!(codec::read_trailing_connection_id(&to_host[1].payload), Some(ALICE));
    assert_eq!(codec::read_trailing_connection_id(&to_host[2].payload), Some(BOB));

    for peer in [ALICE, BOB] {
        let acks = transport.sent_to(peer);
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].payload, vec![MessageType::ConnectToServer.as_byte()]);
        assert_eq!(relay.room_of(peer), Some((RoomId(0), PeerRole::Client)));
    }
    assert_eq!(relay.stats().peers, 2);
}

#[test]
fn test_data_round_trip_through_host() {
    let mut relay = relay_with_room();
    relay.transport_mut().take_sent();

    let mut message = BytesMut::new();
    codec::encode_data(&mut message, b"ping");
    relay.transport_mut().push_data(ALICE, 2, &message);
    relay.run_tick();

    let to_host = relay.transport_mut().take_sent();
    assert_eq!(to_host.len(), 1);
    assert_eq!(to_host[0].connection_id, HOST);
    assert_eq!(to_host[0].channel, 2);
    assert_eq!(&to_host[0].payload[..4], b"ping");
    let sender = codec::read_trailing_connection_id(&to_host[0].payload).expect("sender id");
    assert_eq!(sender, ALICE);

    // Host answers the id it was given
    codec::encode_addressed_data(&mut message, b"pong", sender);
    relay.transport_mut().push_data(HOST, 2, &message);
    relay.run_tick();

    let to_alice = relay.transport_mut().take_sent();
    assert_eq!(to_alice.len(), 1);
    assert_eq!(to_alice[0].connection_id, ALICE);
    assert_eq!(to_alice[0].payload, b"pong\x02".to_vec());
}

#[test]
fn test_peers_cannot_reach_each_other_directly() {
    let mut relay = relay_with_room();
    relay.transport_mut().take_sent();

    // A peer's trailing bytes are never read as a destination
    let mut message = BytesMut::new();
    codec::encode_addressed_data(&mut message, b"sneaky", BOB);
    relay.transport_mut().push_data(ALICE, 0, &message);
    relay.run_tick();

    let sent = relay.transport().sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].connection_id, HOST);
}

#[test]
fn test_host_kick_then_leave() {
    let mut relay = relay_with_room();
    relay.transport_mut().take_sent();

    let mut kick = BytesMut::new();
    codec::encode_client_disconnect(&mut kick, ALICE);
    relay.transport_mut().push_data(HOST, 0, &kick);
    relay.run_tick();

    assert_eq!(relay.transport().disconnected(), &[ALICE]);
    assert_eq!(relay.room_of(ALICE), None);
    assert_eq!(relay.stats().peers, 1);

    relay.transport_mut().push_disconnect(HOST);
    relay.run_tick();

    assert_eq!(relay.transport().disconnected(), &[ALICE, BOB]);
    assert_eq!(relay.stats().rooms, 0);
    assert_eq!(relay.room_at(addr("203.0.113.1:4000")), None);
}

#[test]
fn test_rooms_are_isolated() {
    let mut relay = relay_with_room();
    let other_host = ConnectionId(10);
    let carol = ConnectionId(11);

    let transport = relay.transport_mut();
    transport.connect(other_host, addr("203.0.113.2:4000"));
    transport.connect(carol, addr("198.51.100.3:5000"));
    transport.push_data(other_host, 0, &start_server());
    transport.push_data(carol, 0, &connect_to(addr("203.0.113.2:4000")));
    relay.run_tick();

    assert_eq!(relay.room_of(other_host), Some((RoomId(1), PeerRole::Host)));
    assert_eq!(relay.room_of(carol), Some((RoomId(1), PeerRole::Client)));
    relay.transport_mut().take_sent();

    // The first host cannot address a peer of the second room
    let mut message = BytesMut::new();
    codec::encode_addressed_data(&mut message, b"x", carol);
    relay.transport_mut().push_data(HOST, 0, &message);
    relay.run_tick();
    assert!(relay.transport().sent().is_empty());

    // Closing the first room leaves the second alone
    relay.transport_mut().push_disconnect(HOST);
    relay.run_tick();
    assert_eq!(relay.stats().rooms, 1);
    assert_eq!(relay.room_of(carol), Some((RoomId(1), PeerRole::Client)));
}
