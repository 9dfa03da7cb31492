//! Load Tests for the Room Relay
//!
//! Pushes many rooms and messages through an in-memory transport to check
//! registry bookkeeping under churn.
//!
//! Run with: cargo test --test load_test --release -- --ignored

use bytes::BytesMut;
use relay_config::RelayConfig;
use room_relay::codec;
use room_relay::{ConnectionId, Dispatcher, MemoryTransport, MessageType};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Instant;

fn endpoint(n: u64) -> SocketAddr {
    let ip = Ipv4Addr::from(0x0a00_0000 + n as u32);
    SocketAddr::from((ip, 4000))
}

#[test]
#[ignore] // Run manually
fn test_room_churn() {
    let rooms = 1000u64;
    let peers_per_room = 8u64;
    let config = RelayConfig {
        bandwidth_limit: 0,
        grace_period_bandwidth_limit: 0,
        enable_runtime_meta_logging: false,
        ..RelayConfig::default()
    };
    let mut relay = Dispatcher::new(MemoryTransport::new(), config);
    let start = Instant::now();

    let mut request = BytesMut::new();
    for room in 0..rooms {
        let host = ConnectionId(room * 100);
        relay.transport_mut().connect(host, endpoint(room));
        relay.transport_mut().push_data(host, 0, &[MessageType::StartServer.as_byte()]);
        for p in 1..=peers_per_room {
            let peer = ConnectionId(room * 100 + p);
            relay.transport_mut().connect(peer, endpoint(100_000 + room * 100 + p));
            codec::encode_connect_request(&mut request, &[], endpoint(room));
            relay.transport_mut().push_data(peer, 0, &request);
        }
    }
    relay.run_tick();
    assert_eq!(relay.stats().rooms, rooms as usize);
    assert_eq!(relay.stats().peers, (rooms * peers_per_room) as usize);

    let mut message = BytesMut::new();
    codec::encode_data(&mut message, &[0u8; 256]);
    for room in 0..rooms {
        for p in 1..=peers_per_room {
            relay.transport_mut().push_data(ConnectionId(room * 100 + p), 0, &message);
        }
    }
    relay.transport_mut().take_sent();
    relay.run_tick();
    assert_eq!(relay.transport().sent().len(), (rooms * peers_per_room) as usize);

    // Tear every other room down and rebuild: released ids are reused
    for room in (0..rooms).step_by(2) {
        relay.transport_mut().push_disconnect(ConnectionId(room * 100));
    }
    relay.run_tick();
    assert_eq!(relay.stats().rooms, (rooms / 2) as usize);

    for room in (0..rooms).step_by(2) {
        let host = ConnectionId(1_000_000 + room);
        relay.transport_mut().connect(host, endpoint(room));
        relay.transport_mut().push_data(host, 0, &[MessageType::StartServer.as_byte()]);
    }
    relay.run_tick();
    assert_eq!(relay.stats().rooms, rooms as usize);
    assert!(relay.rooms().iter().all(|room| room.id().0 < rooms));

    println!("Room churn with {} rooms took {:?}", rooms, start.elapsed());
}
