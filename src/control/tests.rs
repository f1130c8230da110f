use super::*;
use crate::config::ControlConfig;
use crate::error::ControlError;
use std::time::Duration;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

#[test]
fn test_message_parsing() {
    assert_eq!(ControlMessage::parse(b"PING").unwrap(), ControlMessage::Ping);
    assert_eq!(ControlMessage::parse(b"EXIT").unwrap(), ControlMessage::Exit);
    assert!(matches!(
        ControlMessage::parse(b"ping"),
        Err(ControlError::Unexpected { .. })
    ));
    assert_eq!(ControlMessage::Pong.to_string(), "PONG");
}

#[tokio::test]
async fn test_frames_use_native_endian_length() {
    let (mut supervisor, homecam) = duplex(64);
    let server = tokio::spawn(serve_control(homecam));

    let mut request = Vec::new();
    request.extend_from_slice(&4u32.to_ne_bytes());
    request.extend_from_slice(b"PING");
    supervisor.write_all(&request).await.unwrap();

    let mut reply = [0u8; 8];
    supervisor.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply[..4], &4u32.to_ne_bytes());
    assert_eq!(&reply[4..], b"PONG");

    drop(supervisor);
    assert_eq!(server.await.unwrap().unwrap(), ControlOutcome::Closed);
}

#[tokio::test]
async fn test_probe_then_exit() {
    let (supervisor, homecam) = duplex(64);
    let server = tokio::spawn(serve_control(homecam));
    let mut client = ControlClient::new(supervisor);

    client.probe(Duration::from_secs(1)).await.unwrap();
    client.probe(Duration::from_secs(1)).await.unwrap();
    client.request_exit().await.unwrap();

    assert_eq!(server.await.unwrap().unwrap(), ControlOutcome::ExitRequested);
}

#[tokio::test]
async fn test_unknown_message_is_ignored() {
    let (supervisor, homecam) = duplex(64);
    let server = tokio::spawn(serve_control(homecam));
    let mut framed = tokio_util::codec::Framed::new(supervisor, control_codec());

    framed.send(Bytes::from_static(b"HELLO")).await.unwrap();
    let mut client = ControlClient::new(framed.into_inner());
    client.probe(Duration::from_secs(1)).await.unwrap();

    drop(client);
    assert_eq!(server.await.unwrap().unwrap(), ControlOutcome::Closed);
}

#[tokio::test]
async fn test_probe_times_out_without_answer() {
    // Nobody serves the other end
    let (supervisor, _silent) = duplex(64);
    let mut client = ControlClient::new(supervisor);

    let result = client.probe(Duration::from_millis(50)).await;
    assert!(matches!(
        result,
        Err(ControlError::Unresponsive { millis: 50 })
    ));
}

#[tokio::test]
async fn test_heartbeat_uses_configured_timeout() {
    let (supervisor, _silent) = duplex(64);
    let config = ControlConfig {
        socket: None,
        probe_timeout_ms: 40,
    };
    let mut client = ControlClient::from_config(supervisor, &config);
    assert_eq!(client.probe_timeout(), Duration::from_millis(40));

    let result = client.heartbeat().await;
    assert!(matches!(
        result,
        Err(ControlError::Unresponsive { millis: 40 })
    ));
}

#[test]
fn test_default_heartbeat_timeout() {
    let (supervisor, _homecam) = duplex(64);
    let client = ControlClient::new(supervisor);
    assert_eq!(client.probe_timeout(), Duration::from_millis(3000));
}

#[tokio::test]
async fn test_probe_reports_closed_channel() {
    let (supervisor, homecam) = duplex(64);
    drop(homecam);
    let mut client = ControlClient::new(supervisor);

    assert!(client.probe(Duration::from_secs(1)).await.is_err());
}
