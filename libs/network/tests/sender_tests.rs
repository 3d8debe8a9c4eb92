//! Sender tests against real TCP listeners

use std::time::Duration;

use codec::{decode_frame, DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE};
use network::listener::read_frame;
use network::test_utils::ChannelHandler;
use network::{
    Diagnostics, DiagnosticEvent, Listener, ListenerConfig, ResilientSender, SenderConfig,
    SenderConnectionState, SimpleSender, TransportError,
};
use tokio::net::TcpListener;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

/// A port that was free a moment ago
async fn vacant_port() -> u16 {
    let reserved = TcpListener::bind("127.0.0.1:0").await.unwrap();
    reserved.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_simple_sender_writes_frames() {
    let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = server.local_addr().unwrap().port();

    let mut sender = SimpleSender::connect_tcp("127.0.0.1", port, false, SenderConfig::default())
        .await
        .unwrap();
    let (mut stream, _) = server.accept().await.unwrap();

    sender.send(&[0, 3, 1, 2]).await.unwrap();
    let (sealed, _) = read_frame(&mut stream, DEFAULT_MAX_FRAME_SIZE)
        .await
        .unwrap()
        .unwrap();
    let mut frame = (sealed.len() as u32).to_be_bytes().to_vec();
    frame.extend_from_slice(&sealed);
    assert_eq!(frame.len(), LENGTH_PREFIX_SIZE + 4 + 16);

    let message = decode_frame(&frame).unwrap();
    assert_eq!(message.type_id(), 3);
    assert_eq!(&message.body()[..], &[1, 2]);
    assert_eq!(sender.state(), SenderConnectionState::Connected);
}

#[tokio::test]
async fn test_simple_sender_gives_up_on_closed_port() {
    let port = vacant_port().await;
    let (diagnostics, events) = Diagnostics::channel();
    let config = SenderConfig::with_limits(Some(2), Some(2), Duration::from_millis(5))
        .with_diagnostics(diagnostics);

    let err = SimpleSender::connect_tcp("127.0.0.1", port, false, config)
        .await
        .err()
        .expect("nothing is listening");
    assert!(matches!(err, TransportError::RetriesExhausted { attempts: 3, .. }));

    let refusals = events
        .try_iter()
        .filter(|e| matches!(e, DiagnosticEvent::ConnectionRefused { .. }))
        .count();
    assert_eq!(refusals, 3);
}

#[tokio::test]
async fn test_resilient_sender_waits_for_late_listener() {
    let port = vacant_port().await;
    let config = SenderConfig::with_limits(None, Some(3), Duration::from_millis(20)).blocking(false);
    let sender = ResilientSender::start_tcp("127.0.0.1", port, false, config)
        .await
        .unwrap();

    sender.send(&[0, 1, 10]).unwrap();
    sender.send(&[0, 1, 11]).unwrap();
    assert!(!sender.is_connected());

    tokio::time::sleep(Duration::from_millis(50)).await;
    let (handler, mut rx) = ChannelHandler::channel();
    let listener = Listener::start(ListenerConfig::tcp([port]), handler)
        .await
        .unwrap();

    timeout(WAIT, sender.wait_connected()).await.unwrap().unwrap();
    for expected in [10u8, 11] {
        let message = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(message.body(), &[expected]);
    }
    assert_eq!(sender.queued(), 0);
    listener.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_resilient_sender_resumes_after_pause() {
    let port = vacant_port().await;
    let config = SenderConfig::with_limits(Some(1), Some(3), Duration::from_millis(10)).blocking(false);
    let mut sender = ResilientSender::start_tcp("127.0.0.1", port, false, config)
        .await
        .unwrap();
    sender.send(&[0, 1, 20]).unwrap();
    sender.send(&[0, 1, 21]).unwrap();

    let mut states = sender.subscribe();
    timeout(WAIT, states.wait_for(|s| *s == SenderConnectionState::Paused))
        .await
        .unwrap()
        .unwrap();
    assert!(sender.is_paused());
    assert!(sender.is_alive());
    assert_eq!(sender.queued(), 2);

    let (handler, mut rx) = ChannelHandler::channel();
    let listener = Listener::start(ListenerConfig::tcp([port]), handler)
        .await
        .unwrap();
    sender.resume();

    timeout(WAIT, sender.wait_connected()).await.unwrap().unwrap();
    for expected in [20u8, 21] {
        let message = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(message.body(), &[expected]);
    }
    assert_eq!(sender.queued(), 0);

    sender.stop().await;
    assert_eq!(sender.state(), SenderConnectionState::Stopped);
    assert!(!sender.is_alive());
    assert!(matches!(sender.send(&[0, 1, 22]), Err(TransportError::Stopped)));
    listener.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_resilient_sender_stop_discards_queue() {
    let port = vacant_port().await;
    let config = SenderConfig::with_limits(Some(0), Some(3), Duration::from_millis(10)).blocking(false);
    let mut sender = ResilientSender::start_tcp("127.0.0.1", port, false, config)
        .await
        .unwrap();
    sender.send(&[0, 1, 30]).unwrap();

    let mut states = sender.subscribe();
    timeout(WAIT, states.wait_for(|s| *s == SenderConnectionState::Paused))
        .await
        .unwrap()
        .unwrap();
    sender.stop().await;

    let (handler, mut rx) = ChannelHandler::channel();
    let listener = Listener::start(ListenerConfig::tcp([port]), handler)
        .await
        .unwrap();
    sender.resume();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(rx.try_recv().is_err());
    assert_eq!(listener.stats().snapshot().connections, 0);
    assert_eq!(sender.state(), SenderConnectionState::Stopped);
    listener.shutdown().await.unwrap();
}
