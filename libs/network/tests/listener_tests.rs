//! Listener tests over real loopback sockets

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use codec::{encode_frame, encode_payload, ChannelPorts, ChannelRegistry, ChecksumMode, RawCodec};
use network::test_utils::ChannelHandler;
use network::{
    ConcurrencyModel, DecoupledListener, InboundMessage, InlineListener, Listener, ListenerConfig,
    SenderConfig, SimpleSender, UdpSender,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn loopback(addr: SocketAddr) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], addr.port()))
}

async fn next(rx: &mut UnboundedReceiver<InboundMessage>) -> InboundMessage {
    timeout(WAIT, rx.recv())
        .await
        .expect("message within timeout")
        .expect("handler still alive")
}

#[tokio::test]
async fn test_tcp_inline_delivers_per_port() {
    let (handler, mut rx) = ChannelHandler::channel();
    let listener = InlineListener::start(ListenerConfig::tcp([0, 0]), handler)
        .await
        .unwrap();
    let addrs = listener.local_addrs().to_vec();
    assert_eq!(addrs.len(), 2);

    let mut first = TcpStream::connect(loopback(addrs[0])).await.unwrap();
    let mut second = TcpStream::connect(loopback(addrs[1])).await.unwrap();
    first.write_all(&encode_frame(1, b"skaimot")).await.unwrap();
    let message = next(&mut rx).await;
    assert_eq!(message.port, addrs[0].port());
    assert_eq!(message.type_id(), Some(1));
    assert_eq!(message.body(), b"skaimot");
    assert!(message.peer_addr.is_some());

    second.write_all(&encode_frame(2, b"pose")).await.unwrap();
    let message = next(&mut rx).await;
    assert_eq!(message.port, addrs[1].port());
    assert_eq!(message.body(), b"pose");

    let stats = listener.shutdown().await.unwrap();
    assert_eq!(stats.messages, 2);
    assert_eq!(stats.connections, 2);
}

#[tokio::test]
async fn test_corrupt_frame_skipped_connection_survives() {
    let (handler, mut rx) = ChannelHandler::channel();
    let listener = Listener::start(ListenerConfig::tcp([0]), handler)
        .await
        .unwrap();
    let addr = loopback(listener.local_addrs()[0]);

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(&encode_payload(&[0, 3, 1, 1], ChecksumMode::Corrupt))
        .await
        .unwrap();
    stream.write_all(&encode_frame(3, b"ok")).await.unwrap();

    let message = next(&mut rx).await;
    assert_eq!(message.body(), b"ok");
    assert_eq!(listener.stats().snapshot().checksum_failures, 1);
    listener.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_oversized_frame_closes_connection_only() {
    let (handler, mut rx) = ChannelHandler::channel();
    let listener = Listener::start(ListenerConfig::tcp([0]).with_max_frame_size(64), handler)
        .await
        .unwrap();
    let addr = loopback(listener.local_addrs()[0]);

    let mut greedy = TcpStream::connect(addr).await.unwrap();
    greedy.write_all(&10_000u32.to_be_bytes()).await.unwrap();
    let mut buf = [0u8; 1];
    let read = timeout(WAIT, greedy.read(&mut buf)).await.unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));

    let mut polite = TcpStream::connect(addr).await.unwrap();
    polite.write_all(&encode_frame(4, b"fine")).await.unwrap();
    assert_eq!(next(&mut rx).await.body(), b"fine");
    listener.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_types_dropped_with_registry() {
    let mut registry = ChannelRegistry::new();
    registry
        .register(RawCodec::new(5, "GLOBALTRACK", ChannelPorts::single(7020)))
        .unwrap();
    let (handler, mut rx) = ChannelHandler::channel();
    let listener = Listener::start(
        ListenerConfig::tcp([0]).with_registry(Arc::new(registry)),
        handler,
    )
    .await
    .unwrap();
    let addr = loopback(listener.local_addrs()[0]);

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(&encode_frame(99, b"stray")).await.unwrap();
    stream.write_all(&encode_frame(5, b"track")).await.unwrap();

    let message = next(&mut rx).await;
    assert_eq!(message.type_id(), Some(5));
    assert_eq!(listener.stats().snapshot().unknown_types, 1);
    listener.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_decoupled_records_what_it_delivers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("session.skaibin");
    let (handler, mut rx) = ChannelHandler::channel();
    let listener = DecoupledListener::start(
        ListenerConfig::tcp([0]).record_to(&path, false),
        handler,
    )
    .await
    .unwrap();
    let port = listener.local_addrs()[0].port();

    let mut sender = SimpleSender::connect_tcp("127.0.0.1", port, false, SenderConfig::default())
        .await
        .unwrap();
    for i in 0..3u8 {
        sender.send(&[0, 2, i]).await.unwrap();
    }
    for i in 0..3u8 {
        assert_eq!(next(&mut rx).await.body(), &[i]);
    }

    listener.shutdown().await.unwrap();
    let parsed = recording::read_recording(&path).unwrap();
    assert!(parsed.truncated.is_none());
    assert_eq!(parsed.entries.len(), 3);
    assert!(parsed.entries.iter().all(|e| e.port == port));
    assert_eq!(&parsed.entries[2].payload[..], &[0, 2, 2]);
    assert!(parsed.entries[0].timestamp <= parsed.entries[2].timestamp);
}

#[tokio::test]
async fn test_udp_reassembles_fragmented_messages() {
    for model in [ConcurrencyModel::Inline, ConcurrencyModel::Decoupled] {
        let (handler, mut rx) = ChannelHandler::channel();
        let listener = Listener::start(ListenerConfig::udp([0]).with_model(model), handler)
            .await
            .unwrap();
        let addr = loopback(listener.local_addrs()[0]);

        let sender = UdpSender::bind(addr).await.unwrap();
        let mut payload = vec![0u8, 4];
        payload.extend((0..10_000u32).map(|i| (i % 253) as u8));
        sender.send(&payload).await.unwrap();
        sender
            .send_with(&[0, 4, 0xEE], ChecksumMode::Corrupt)
            .await
            .unwrap();
        sender.send(&[0, 4, 0xAB]).await.unwrap();

        let message = next(&mut rx).await;
        assert_eq!(&message.payload[..], &payload[..]);
        assert_eq!(next(&mut rx).await.body(), &[0xAB]);
        assert_eq!(listener.stats().snapshot().checksum_failures, 1);
        listener.shutdown().await.unwrap();
    }
}

#[tokio::test]
async fn test_closure_handler() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let listener = Listener::start(ListenerConfig::tcp([0]), move |m: InboundMessage| {
        let _ = tx.send(m.payload.len());
    })
    .await
    .unwrap();
    let addr = loopback(listener.local_addrs()[0]);

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(&encode_frame(1, b"12345")).await.unwrap();
    assert_eq!(timeout(WAIT, rx.recv()).await.unwrap(), Some(7));
    listener.shutdown().await.unwrap();
}
