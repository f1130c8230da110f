use super::server::StreamServerBuilder;
use super::*;
use crate::config::{HomecamConfig, StreamConfig};
use crate::session::{Broadcaster, Delivery, FrameSink, SessionRegistry};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

fn test_config() -> StreamConfig {
    let mut config = HomecamConfig::default().stream;
    config.ip = "127.0.0.1".to_string();
    config.port = 0;
    config.send_backlog = 2;
    config.max_backlog_drops = 3;
    config
}

fn test_server() -> (StreamServer, Arc<Broadcaster>) {
    let broadcaster = Arc::new(Broadcaster::new(Arc::new(SessionRegistry::new())));
    let server = StreamServerBuilder::new()
        .config(test_config())
        .broadcaster(broadcaster.clone())
        .build()
        .unwrap();
    (server, broadcaster)
}

async fn read_http_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).await.unwrap();
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_stream_server_builder() {
    let (server, _) = test_server();

    assert_eq!(server.config.ip, "127.0.0.1");
    assert_eq!(server.config.send_backlog, 2);
    assert!(server.registry().is_empty());
}

#[tokio::test]
async fn test_builder_validation() {
    let broadcaster = Arc::new(Broadcaster::new(Arc::new(SessionRegistry::new())));

    assert!(StreamServerBuilder::new()
        .broadcaster(broadcaster)
        .build()
        .is_err());
    assert!(StreamServerBuilder::new()
        .config(test_config())
        .build()
        .is_err());
}

#[tokio::test]
async fn test_viewer_backlog_drops_then_disconnects() {
    let stats = Arc::new(StreamStats::default());
    let cancel = CancellationToken::new();
    let (viewer, mut backlog) = ViewerConnection::new(
        SocketAddr::from(([127, 0, 0, 1], 9000)),
        2,
        3,
        cancel.clone(),
        stats.clone(),
    );

    assert_eq!(viewer.try_send(Bytes::from_static(b"a")), Delivery::Queued);
    assert_eq!(viewer.try_send(Bytes::from_static(b"b")), Delivery::Queued);
    assert_eq!(viewer.try_send(Bytes::from_static(b"c")), Delivery::Dropped);

    // Draining resets the drop streak
    assert_eq!(backlog.recv().await.unwrap(), Bytes::from_static(b"a"));
    assert_eq!(viewer.try_send(Bytes::from_static(b"d")), Delivery::Queued);

    assert_eq!(viewer.try_send(Bytes::from_static(b"e")), Delivery::Dropped);
    assert_eq!(viewer.try_send(Bytes::from_static(b"f")), Delivery::Dropped);
    assert_eq!(viewer.try_send(Bytes::from_static(b"g")), Delivery::Closed);

    assert!(cancel.is_cancelled());
    assert!(viewer.is_closed());
    assert_eq!(stats.snapshot().slow_disconnects, 1);
    assert_eq!(viewer.try_send(Bytes::from_static(b"h")), Delivery::Closed);
}

#[tokio::test]
async fn test_viewer_reports_closed_receiver() {
    let (viewer, backlog) = ViewerConnection::new(
        SocketAddr::from(([127, 0, 0, 1], 9001)),
        4,
        3,
        CancellationToken::new(),
        Arc::new(StreamStats::default()),
    );
    drop(backlog);

    assert_eq!(viewer.try_send(Bytes::from_static(b"a")), Delivery::Closed);
}

#[tokio::test]
async fn test_health_endpoint() {
    let (server, _) = test_server();
    let server = Arc::new(server);
    let listener = server.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serving = tokio::spawn({
        let server = server.clone();
        async move { server.serve(listener).await }
    });

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200 OK"), "{}", response);
    assert!(response.contains("\"status\":\"healthy\""));
    assert!(response.contains("\"viewers\":0"));

    server.shutdown();
    tokio::time::timeout(Duration::from_secs(5), serving)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_websocket_viewer_receives_broadcast() {
    let (server, broadcaster) = test_server();
    let server = Arc::new(server);
    let listener = server.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serving = tokio::spawn({
        let server = server.clone();
        async move { server.serve(listener).await }
    });

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(
            b"GET /live HTTP/1.1\r\n\
              Host: localhost\r\n\
              Connection: Upgrade\r\n\
              Upgrade: websocket\r\n\
              Sec-WebSocket-Version: 13\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
        )
        .await
        .unwrap();
    let head = read_http_head(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 101"), "{}", head);

    let registry = server.registry().clone();
    wait_until(|| registry.len() == 1).await;

    assert_eq!(broadcaster.broadcast(Bytes::from_static(b"jpeg-bytes")), 1);

    // Unmasked binary frame with a short payload
    let mut frame = [0u8; 12];
    stream.read_exact(&mut frame).await.unwrap();
    assert_eq!(frame[0], 0x82);
    assert_eq!(frame[1] as usize, b"jpeg-bytes".len());
    assert_eq!(&frame[2..], b"jpeg-bytes");

    server.shutdown();
    assert!(registry.is_empty());
    tokio::time::timeout(Duration::from_secs(5), serving)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let stats = server.stats.clone();
    wait_until(|| stats.snapshot().active_viewers == 0).await;
    let snapshot = server.stats();
    assert_eq!(snapshot.total_connections, 1);
    assert_eq!(snapshot.frames_sent, 1);
}
