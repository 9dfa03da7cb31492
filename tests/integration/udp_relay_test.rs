//! End-to-End Test over UDP
//!
//! Runs the dispatcher on a loopback UDP transport and talks to it with
//! plain sockets speaking the datagram header protocol.

use relay_config::RelayConfig;
use room_relay::codec;
use room_relay::transport::udp::header;
use room_relay::{Dispatcher, MessageType, UdpTransport};
use bytes::BytesMut;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

fn loopback_config() -> RelayConfig {
    RelayConfig {
        bind_address: "127.0.0.1".to_string(),
        listen_port: 0,
        bandwidth_limit: 0,
        grace_period_bandwidth_limit: 0,
        ..RelayConfig::default()
    }
}

fn client() -> UdpSocket {
    let socket = UdpSocket::bind("127.0.0.1:0").expect("bind client");
    socket.set_nonblocking(true).expect("nonblocking client");
    socket
}

/// Tick the relay until `socket` receives a datagram
async fn pump(relay: &mut Dispatcher<UdpTransport>, socket: &UdpSocket) -> Vec<u8> {
    let mut buf = [0u8; 2048];
    for _ in 0..400 {
        relay.run_tick();
        match socket.recv(&mut buf) {
            Ok(len) => return buf[..len].to_vec(),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Err(e) => panic!("client receive failed: {}", e),
        }
    }
    panic!("no datagram from relay");
}

fn data(channel: u8, message: &[u8]) -> Vec<u8> {
    let mut datagram = vec![header::DATA, channel];
    datagram.extend_from_slice(message);
    datagram
}

#[tokio::test]
async fn test_room_over_udp() {
    let mut relay = Dispatcher::new(UdpTransport::new(&loopback_config()), loopback_config());
    relay.start().expect("relay binds");
    let relay_addr = relay.transport().local_addr().expect("bound");

    let host = client();
    host.connect(relay_addr).expect("host connects");
    let peer = client();
    peer.connect(relay_addr).expect("peer connects");

    // Transport handshake
    host.send(&[header::CONNECT]).unwrap();
    assert_eq!(pump(&mut relay, &host).await, vec![header::CONNECT]);
    peer.send(&[header::CONNECT]).unwrap();
    assert_eq!(pump(&mut relay, &peer).await, vec![header::CONNECT]);

    // Host registers and learns its public endpoint
    host.send(&data(0, &[MessageType::StartServer.as_byte()])).unwrap();
    let report = pump(&mut relay, &host).await;
    assert_eq!(report[0], header::DATA);
    let host_addr: SocketAddr = host.local_addr().unwrap();
    assert_eq!(
        codec::read_trailing_endpoint(&report[header::DATA_HEADER_LEN..]),
        Some(codec::normalize_endpoint(host_addr))
    );

    // Peer joins by that endpoint
    let mut request = BytesMut::new();
    codec::encode_connect_request(&mut request, &[], host_addr);
    peer.send(&data(0, &request)).unwrap();
    let ack = pump(&mut relay, &peer).await;
    assert_eq!(&ack[header::DATA_HEADER_LEN..], &[MessageType::ConnectToServer.as_byte()]);
    let notice = pump(&mut relay, &host).await;
    let peer_id = codec::read_trailing_connection_id(&notice[header::DATA_HEADER_LEN..]).expect("peer id");

    // Peer to host
    let mut message = BytesMut::new();
    codec::encode_data(&mut message, b"hi");
    peer.send(&data(3, &message)).unwrap();
    let relayed = pump(&mut relay, &host).await;
    assert_eq!(relayed[1], 3);
    let relayed = &relayed[header::DATA_HEADER_LEN..];
    assert_eq!(&relayed[..2], b"hi");
    assert_eq!(codec::read_trailing_connection_id(relayed), Some(peer_id));

    // Host to peer
    codec::encode_addressed_data(&mut message, b"yo", peer_id);
    host.send(&data(3, &message)).unwrap();
    let relayed = pump(&mut relay, &peer).await;
    assert_eq!(&relayed[header::DATA_HEADER_LEN..], b"yo\x02");

    // Host leaves; the peer is dropped by the relay
    host.send(&[header::DISCONNECT]).unwrap();
    assert_eq!(pump(&mut relay, &peer).await, vec![header::DISCONNECT]);
    assert_eq!(relay.stats().rooms, 0);
}
