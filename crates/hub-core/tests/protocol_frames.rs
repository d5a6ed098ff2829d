//! Integration tests for the hub-core wire formats.
//!
//! These drive the public API the way the client crate does: build a command
//! with a fresh correlation id, parse it as the hub would, answer it, and
//! classify the answer.

use hub_core::domain::hub::{ActivityFinished, ActivityProgress, HubConfiguration, StateDigest};
use hub_core::protocol::commands::{
    EmptyParams, FormatParams, GET_STATE_DIGEST, START_ACTIVITY_FINISHED_NOTIFY,
    SYNC_CONFIGURATION,
};
use hub_core::{
    CorrelationIdGenerator, DeviceIdentity, DiscoveredPeer, Envelope, OutboundCommand, Probe,
    StatusCode,
};

fn generator() -> CorrelationIdGenerator {
    CorrelationIdGenerator::with_key(DeviceIdentity::new("f00d", "linux", "x86_64"), 250)
}

/// Builds the reply a hub would send for `cmd`.
fn hub_reply(cmd: &OutboundCommand, code: f64, msg: &str, data: &str) -> String {
    format!(
        r#"{{"cmd":"{}","id":"{}","code":{},"msg":"{}","data":{}}}"#,
        cmd.name, cmd.id, code, msg, data
    )
}

#[test]
fn test_sync_command_reaches_hub_with_matching_id() {
    let ids = generator();
    let cmd = OutboundCommand::new(SYNC_CONFIGURATION, ids.next_id(), &EmptyParams {})
        .expect("build");

    let on_the_wire = cmd.encode().expect("encode");
    let seen_by_hub = OutboundCommand::parse(&on_the_wire).expect("hub parses");

    assert_eq!(seen_by_hub.name, SYNC_CONFIGURATION);
    assert_eq!(seen_by_hub.id, "f00d#linux#x86_64-250-0");
    assert_eq!(seen_by_hub.params, serde_json::json!({}));
}

#[test]
fn test_config_reply_decodes_into_configuration() {
    let ids = generator();
    let cmd = OutboundCommand::new(SYNC_CONFIGURATION, ids.next_id(), &EmptyParams {})
        .expect("build");
    let reply = hub_reply(
        &cmd,
        200.0,
        "OK",
        r#"{"activity":[{"id":"100","label":"Watch TV"}],"device":[]}"#,
    );

    let envelope = Envelope::decode(&reply).expect("decode");
    let config: HubConfiguration = envelope.payload().decode().expect("payload");

    assert_eq!(envelope.correlation_id(), Some(cmd.id.as_str()));
    assert_eq!(config.activities[0].label, "Watch TV");
}

#[test]
fn test_replies_in_sequence_keep_their_own_codes() {
    let a = Envelope::decode(r#"{"cmd":"x","id":"A","code":200}"#).expect("A");
    let b = Envelope::decode(r#"{"cmd":"x","id":"B","code":404}"#).expect("B");

    assert_eq!(a.correlation_id(), Some("A"));
    assert!(a.code().is_success());
    assert_eq!(b.correlation_id(), Some("B"));
    assert_eq!(b.code(), StatusCode(404.0));
    assert!(!b.code().is_success());
}

#[test]
fn test_state_digest_reply() {
    let ids = generator();
    let cmd = OutboundCommand::new(GET_STATE_DIGEST, ids.next_id(), &FormatParams::json())
        .expect("build");
    let reply = hub_reply(&cmd, 200.0, "OK", r#"{"activityId":"100","hubSwVersion":"4.15"}"#);

    let digest: StateDigest = Envelope::decode(&reply)
        .expect("decode")
        .payload()
        .decode()
        .expect("digest");

    assert_eq!(digest.running_activity_id(), Some("100"));
}

#[test]
fn test_activity_notifications_decode() {
    let progress = Envelope::decode(
        r#"{"cmd":"harmony.engine?helpdiscretes","id":"run-1","code":100,"data":{"deviceId":"9","done":1,"total":2}}"#,
    )
    .expect("progress");
    let finished = Envelope::decode(
        r#"{"type":"harmony.engine?startActivityFinished","data":{"activityId":"100","errorCode":200,"errorString":"OK"}}"#,
    )
    .expect("finished");

    let step: ActivityProgress = progress.payload().decode().expect("progress data");
    let done: ActivityFinished = finished.payload().decode().expect("finished data");

    assert!(progress.code().is_progress());
    assert_eq!(step.fraction(), 0.5);
    assert_eq!(finished.topic(), START_ACTIVITY_FINISHED_NOTIFY);
    assert!(done.error_code.is_success());
}

#[test]
fn test_probe_decodes_on_receiving_side() {
    let probe = Probe::parse("_service._tcp.local.\n5446\n192.168.1.10\nstring").expect("probe");

    assert_eq!(probe.listen_port, 5446);
    assert_eq!(probe.address.to_string(), "192.168.1.10");
    assert_eq!(Probe::parse(&probe.encode()).expect("reparse"), probe);
}

#[test]
fn test_peer_announcement_parses() {
    let peer = DiscoveredPeer::parse(
        "friendlyName:Den;uuid:u-1;ip:10.1.1.5;port:5222;remoteId:42;",
        None,
    )
    .expect("peer");

    assert_eq!(peer.id, "u-1");
    assert_eq!(peer.remote_id.as_deref(), Some("42"));
}
