//! Integration tests for the relay infrastructure

use ferry_relay::broker::{ROLE_RECEIVER, ROLE_SENDER};
use ferry_relay::{Broker, BrokerClient, ChannelRecord, LaneRelay, RelayError, connect_lane};
use ferry_transport::{TcpTransport, Transport};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

async fn lane_relay(ports: usize) -> Vec<String> {
    let relay = LaneRelay::bind("127.0.0.1", &vec![0; ports]).await.unwrap();
    let addrs = relay
        .local_addrs()
        .unwrap()
        .iter()
        .map(ToString::to_string)
        .collect();
    tokio::spawn(relay.run());
    addrs
}

#[tokio::test]
async fn test_many_rooms_pair_independently() {
    let addr = lane_relay(1).await.remove(0);

    let mut tasks = Vec::new();
    for room in 0..8 {
        for side in 0..2u8 {
            let addr = addr.clone();
            tasks.push(tokio::spawn(async move {
                let token = format!("room-{room}");
                let mut lane = connect_lane(&addr, &token, Duration::from_secs(5))
                    .await
                    .unwrap();
                lane.stream.write_all(&[room, side]).await.unwrap();
                let mut got = [0u8; 2];
                lane.stream.read_exact(&mut got).await.unwrap();
                assert_eq!(got, [room, 1 - side]);
            }));
        }
    }
    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test]
async fn test_framed_transport_over_relay() {
    let addr = lane_relay(1).await.remove(0);

    let peer = {
        let addr = addr.clone();
        tokio::spawn(async move {
            let lane = connect_lane(&addr, "framed", Duration::from_secs(5))
                .await
                .unwrap();
            let t = TcpTransport::from_tcp(lane.stream);
            let msg = t.receive().await.unwrap();
            t.send(&msg).await.unwrap();
        })
    };

    let lane = connect_lane(&addr, "framed", Duration::from_secs(5))
        .await
        .unwrap();
    let t = TcpTransport::from_tcp(lane.stream);
    let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 253) as u8).collect();
    t.send(&payload).await.unwrap();
    assert_eq!(t.receive().await.unwrap(), payload);
    peer.await.unwrap();
}

#[tokio::test]
async fn test_no_counterpart_times_out() {
    let addr = lane_relay(1).await.remove(0);
    let started = std::time::Instant::now();
    let result = connect_lane(&addr, "alone", Duration::from_millis(200)).await;
    assert!(matches!(result, Err(RelayError::NoCounterpart)));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_broker_session_exchange() {
    let broker = Broker::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let url = format!("ws://{}", broker.local_addr().unwrap());
    tokio::spawn(broker.run());

    let (mut sender, _) = BrokerClient::open(&url, Some("session"), ROLE_SENDER, Some("ristretto255"))
        .await
        .unwrap();
    let (mut receiver, ready) = BrokerClient::open(&url, Some("session"), ROLE_RECEIVER, None)
        .await
        .unwrap();
    assert!(ready.transfer_ready);
    assert_eq!(ready.curve.as_deref(), Some("ristretto255"));
    let _ = sender.next_record().await.unwrap();

    sender
        .update(ChannelRecord {
            encrypted_file_meta_data: Some("c2VhbGVk".into()),
            ..ChannelRecord::default()
        })
        .await
        .unwrap();
    let state = receiver.next_record().await.unwrap();
    assert_eq!(state.encrypted_file_meta_data.as_deref(), Some("c2VhbGVk"));
    let _ = sender.next_record().await.unwrap();

    receiver
        .update(ChannelRecord {
            file_received: true,
            ..ChannelRecord::default()
        })
        .await
        .unwrap();
    assert!(sender.next_record().await.unwrap().file_received);

    // Sender hangs up; the receiver is disconnected too.
    sender.close().await.unwrap();
    let mut outcome = receiver.next_record().await;
    while let Ok(record) = outcome {
        assert!(record.file_received);
        outcome = receiver.next_record().await;
    }
    assert!(matches!(outcome, Err(RelayError::Closed)));
}
