//! End-to-end tests over real sockets on the loopback interface.
//!
//! A fake hub runs `tokio_tungstenite::accept_async` on a local listener and
//! answers each command through a per-test script, so the whole stack runs
//! unmodified: WebSocket transport, dispatcher, event bus and session.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;

use hub_client::application::{HubSession, SessionError};
use hub_client::domain::config::{DiscoverySettings, SessionSettings};
use hub_client::domain::HubEndpoint;
use hub_client::infrastructure::discovery::LocalAddressSource;
use hub_client::infrastructure::{CommandError, DiscoveryService};
use hub_core::protocol::commands::{
    RUN_ACTIVITY, START_ACTIVITY_FINISHED_NOTIFY, START_ACTIVITY_NOTIFY, SYNC_CONFIGURATION,
};
use hub_core::{DeviceIdentity, OutboundCommand, StatusCode};

// ── Fake hub ──────────────────────────────────────────────────────────────────

/// What the fake hub does with one received command: send frames back, or
/// drop the connection (`None`).
type Script = Box<dyn FnMut(OutboundCommand) -> Option<Vec<String>> + Send>;

/// Serves exactly one WebSocket client on a loopback port.
async fn spawn_hub(mut script: Script) -> HubEndpoint {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = tokio_tungstenite::accept_async(stream)
            .await
            .expect("handshake");

        while let Some(Ok(message)) = ws.next().await {
            let Message::Text(text) = message else {
                continue;
            };
            let cmd = OutboundCommand::parse(&text).expect("command frame");
            match script(cmd) {
                Some(frames) => {
                    for frame in frames {
                        ws.send(Message::Text(frame)).await.expect("send");
                    }
                }
                None => return,
            }
        }
    });

    HubEndpoint {
        host: "127.0.0.1".to_string(),
        port,
        domain: "svcs.myharmony.com".to_string(),
        remote_id: "1234".to_string(),
    }
}

fn reply(cmd: &OutboundCommand, code: u32, msg: &str, data: serde_json::Value) -> String {
    json!({"cmd": cmd.name, "id": cmd.id, "code": code, "msg": msg, "data": data}).to_string()
}

async fn connect(endpoint: &HubEndpoint) -> HubSession {
    let settings = SessionSettings {
        command_timeout_ms: 5_000,
        activity_timeout_ms: 5_000,
        ..SessionSettings::default()
    };
    HubSession::connect(endpoint, DeviceIdentity::new("it", "hubctl", "test"), settings)
        .await
        .expect("connect")
}

fn configuration() -> serde_json::Value {
    json!({
        "activity": [
            {"id": "-1", "label": "PowerOff"},
            {"id": "31", "label": "Watch TV", "isAVActivity": true}
        ],
        "device": [{"id": "d1", "label": "TV", "manufacturer": "Sony", "model": "KD-55"}],
        "sequence": []
    })
}

// ── Session over WebSocket ────────────────────────────────────────────────────

#[tokio::test]
async fn test_sync_configuration_over_websocket() {
    // Arrange
    let endpoint = spawn_hub(Box::new(|cmd: OutboundCommand| {
        assert_eq!(cmd.name, SYNC_CONFIGURATION);
        Some(vec![reply(&cmd, 200, "OK", configuration())])
    }))
    .await;
    let session = connect(&endpoint).await;

    // Act
    let hub = session.sync_configuration().await.expect("sync");

    // Assert
    assert_eq!(hub.activities.len(), 2);
    assert_eq!(hub.find_device("kd-55").map(|d| d.id.as_str()), Some("d1"));
    session.disconnect().await;
}

#[tokio::test]
async fn test_hub_error_code_becomes_protocol_error() {
    let endpoint = spawn_hub(Box::new(|cmd: OutboundCommand| {
        Some(vec![reply(&cmd, 500, "Internal Server Error", json!(null))])
    }))
    .await;
    let session = connect(&endpoint).await;

    let result = session.sync_configuration().await;

    match result {
        Err(SessionError::Command(CommandError::Protocol { code, message })) => {
            assert_eq!(code, StatusCode(500.0));
            assert_eq!(message, "Internal Server Error");
        }
        other => panic!("expected protocol error, got {other:?}"),
    }
    session.disconnect().await;
}

#[tokio::test]
async fn test_replies_out_of_order_reach_their_callers() {
    // Arrange: hold the first command's reply until the second arrives.
    let held: Arc<Mutex<Option<OutboundCommand>>> = Arc::new(Mutex::new(None));
    let endpoint = spawn_hub(Box::new(move |cmd: OutboundCommand| {
        let mut held = held.lock().unwrap();
        match held.take() {
            None => {
                *held = Some(cmd);
                Some(Vec::new())
            }
            Some(first) => Some(vec![
                reply(&cmd, 200, "OK", json!({"activityId": "-1"})),
                reply(&first, 404, "Not Found", json!(null)),
            ]),
        }
    }))
    .await;
    let session = Arc::new(connect(&endpoint).await);

    // Act
    let first = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.change_channel("7").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = session.update_state().await;
    let first = first.await.expect("join");

    // Assert
    assert_eq!(second.expect("state").running_activity_id(), None);
    assert!(matches!(
        first,
        Err(SessionError::Command(CommandError::Protocol { code, .. })) if code == StatusCode(404.0)
    ));
    session.disconnect().await;
}

#[tokio::test]
async fn test_start_activity_with_progress_over_websocket() {
    // Arrange
    let endpoint = spawn_hub(Box::new(|cmd: OutboundCommand| {
        if cmd.name == SYNC_CONFIGURATION {
            return Some(vec![reply(&cmd, 200, "OK", configuration())]);
        }
        assert_eq!(cmd.name, RUN_ACTIVITY);
        assert_eq!(cmd.params["activityId"], "31");
        Some(vec![
            reply(&cmd, 200, "OK", json!(null)),
            json!({"cmd": START_ACTIVITY_NOTIFY, "id": cmd.id, "code": 100,
                   "data": {"deviceId": "d1", "done": 1, "total": 4}})
            .to_string(),
            json!({"cmd": START_ACTIVITY_NOTIFY, "id": cmd.id, "code": 100,
                   "data": {"deviceId": "d1", "done": 4, "total": 4}})
            .to_string(),
            json!({"type": "connect.stateDigest?notify", "data": {"activityId": "31"}}).to_string(),
            json!({"cmd": START_ACTIVITY_FINISHED_NOTIFY, "id": cmd.id, "code": 200, "msg": "OK",
                   "data": {"activityId": "31", "errorCode": "200", "errorString": "OK"}})
            .to_string(),
        ])
    }))
    .await;
    let session = connect(&endpoint).await;
    session.sync_configuration().await.expect("sync");
    let activity = session.find_activity("Watch TV").expect("activity");
    let mut progress = Vec::new();

    // Act
    session
        .start_activity(&activity, |p| progress.push(p.fraction()))
        .await
        .expect("activity started");

    // Assert
    assert_eq!(progress, vec![0.25, 1.0]);
    assert_eq!(session.events().subscriber_count(), 0);
    session.disconnect().await;
}

#[tokio::test]
async fn test_hub_dropping_connection_fails_pending_command() {
    let endpoint = spawn_hub(Box::new(|_: OutboundCommand| None)).await;
    let session = connect(&endpoint).await;

    let result = session.sync_configuration().await;

    assert!(matches!(
        result,
        Err(SessionError::Command(CommandError::Connection(_)))
    ));
    assert!(session.dispatcher().is_closed());
    assert!(session.events().is_closed());
}

// ── Discovery over loopback ───────────────────────────────────────────────────

struct Loopback;

impl LocalAddressSource for Loopback {
    fn local_ipv4(&self) -> Option<Ipv4Addr> {
        Some(Ipv4Addr::LOCALHOST)
    }
}

#[tokio::test]
async fn test_discovery_reports_announcing_hub() {
    // Arrange: the "hub" listens for the probe on UDP and calls back over TCP.
    let hub_udp = tokio::net::UdpSocket::bind("127.0.0.1:0").await.expect("udp bind");
    let settings = DiscoverySettings {
        listen_port: 0,
        broadcast_port: hub_udp.local_addr().expect("addr").port(),
        rebroadcast_interval_ms: 100,
        broadcast_address: "127.0.0.1".to_string(),
        fallback_multicast_address: "127.0.0.1".to_string(),
        ..DiscoverySettings::default()
    };
    let service = DiscoveryService::with_address_source(settings, Arc::new(Loopback));
    let mut found = service.subscribe();
    service.start().await.expect("start");

    // Act
    let mut buf = [0u8; 512];
    let (len, _) = hub_udp.recv_from(&mut buf).await.expect("probe");
    let probe = hub_core::Probe::parse(&String::from_utf8_lossy(&buf[..len])).expect("probe text");
    let callback = SocketAddr::from((probe.address, probe.listen_port));
    let mut stream = TcpStream::connect(callback).await.expect("call back");
    stream
        .write_all(b"uuid:hub-42;ip:127.0.0.1;port:8088;remoteId:1234;friendlyName:Living Room;")
        .await
        .expect("announce");
    stream.shutdown().await.expect("shutdown");

    // Assert
    let peer = tokio::time::timeout(Duration::from_secs(5), found.recv())
        .await
        .expect("peer in time")
        .expect("peer");
    assert_eq!(peer.id, "hub-42");
    assert_eq!(peer.remote_id.as_deref(), Some("1234"));
    assert_eq!(peer.display_name(), "Living Room");
    service.stop().await;
    assert!(!service.is_running().await);
}
