//! Receive loop behaviour on a real loopback socket

use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;

use sndlink::audio::ReorderBuffer;
use sndlink::codec::PcmCodec;
use sndlink::constants::{FRAME_BYTES, HEADER_SIZE};
use sndlink::error::{Error, NetworkError};
use sndlink::network::bind_socket;
use sndlink::pipeline::{run_receiver, PlayoutSession};
use sndlink::protocol;

async fn wait_for(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2 s");
}

#[test]
fn test_header_only_datagram_is_malformed() {
    let err = protocol::decode(&[0u8; HEADER_SIZE]).unwrap_err();
    assert!(matches!(err, NetworkError::MalformedPacket { len: 8 }));

    let session = PlayoutSession::new(ReorderBuffer::new(8, 1), Duration::from_millis(20));
    let err = session
        .on_datagram(&[0u8; 5], &mut PcmCodec, std::time::Instant::now())
        .unwrap_err();
    assert!(matches!(err, Error::Network(NetworkError::MalformedPacket { len: 5 })));
}

#[tokio::test]
async fn test_receive_loop_survives_malformed_datagram() {
    let socket = bind_socket("127.0.0.1:0".parse().unwrap(), None).unwrap();
    let socket = UdpSocket::from_std(socket).unwrap();
    let addr = socket.local_addr().unwrap();

    let session = Arc::new(PlayoutSession::new(
        ReorderBuffer::new(16, 1),
        Duration::from_millis(20),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let receiver = tokio::spawn(run_receiver(socket, session.clone(), PcmCodec, shutdown_rx));

    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sender.send_to(&[1, 2, 3, 4, 5], addr).await.unwrap();

    let valid = protocol::encode(1, &[0u8; FRAME_BYTES]).unwrap();
    sender.send_to(&valid, addr).await.unwrap();

    wait_for(|| {
        let stats = session.stats();
        stats.received == 1 && stats.malformed == 1
    })
    .await;

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), receiver)
        .await
        .expect("receive loop did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_receive_loop_stops_when_sender_dropped() {
    let socket = bind_socket("127.0.0.1:0".parse().unwrap(), None).unwrap();
    let socket = UdpSocket::from_std(socket).unwrap();

    let session = Arc::new(PlayoutSession::new(
        ReorderBuffer::new(16, 1),
        Duration::from_millis(20),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let receiver = tokio::spawn(run_receiver(socket, session, PcmCodec, shutdown_rx));

    drop(shutdown_tx);
    tokio::time::timeout(Duration::from_secs(2), receiver)
        .await
        .expect("receive loop did not stop")
        .unwrap();
}
