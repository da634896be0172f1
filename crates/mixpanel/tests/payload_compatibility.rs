//! Tests to verify payloads match the Mixpanel HTTP API format.
//!
//! These tests build messages through the public builders and check the
//! JSON structure the track and engage endpoints expect.

use mixpanel::{
    build_event_message, build_profile_message, DeviceInfo, Identity, MemoryStore, Message,
    MessageKind, MixpanelBuilder, ProfileAction, Properties,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn identity() -> Identity {
    let mut identity = Identity::new(Arc::new(MemoryStore::new()));
    identity.set_token("tok");
    identity.collect_referrer_properties(
        &DeviceInfo::current()
            .os_version("10.2")
            .app_version("1.0.0")
            .model("Q10")
            .device_id("PIN-1"),
    );
    identity
}

fn props(value: Value) -> Properties {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected object"),
    }
}

#[test]
fn test_event_json_structure() {
    let payload = build_event_message(
        "Level Complete",
        props(json!({"Level Number": 9})),
        &identity(),
    )
    .unwrap();

    let json: Value = serde_json::from_slice(&payload).unwrap();

    // Only `event` and `properties` at the top level
    assert_eq!(json.as_object().unwrap().len(), 2);
    assert_eq!(json["event"], "Level Complete");

    let properties = &json["properties"];
    assert_eq!(properties["Level Number"], 9);
    assert_eq!(properties["token"], "tok");
    assert_eq!(properties["distinct_id"], "PIN-1");
    assert!(properties["time"].is_i64());
    assert_eq!(properties["mp_lib"], "rust");
    assert_eq!(properties["$os_version"], "10.2");
    assert_eq!(properties["$app_version"], "1.0.0");
    assert_eq!(properties["$model"], "Q10");
}

#[test]
fn test_event_time_is_seconds() {
    let payload = build_event_message("open", Properties::new(), &identity()).unwrap();
    let json: Value = serde_json::from_slice(&payload).unwrap();

    // Seconds, not milliseconds
    let time = json["properties"]["time"].as_i64().unwrap();
    assert!(time < 10_000_000_000);
}

#[test]
fn test_profile_json_structure() {
    let payload = build_profile_message(
        &ProfileAction::Set,
        props(json!({"Address": "1313 Mockingbird Lane"})),
        &identity(),
    )
    .unwrap();

    let json: Value = serde_json::from_slice(&payload).unwrap();

    assert_eq!(json["$set"]["Address"], "1313 Mockingbird Lane");
    assert_eq!(json["$set"]["$model"], "Q10");
    assert_eq!(json["$token"], "tok");
    assert_eq!(json["$distinct_id"], "PIN-1");

    // Milliseconds for profile updates
    let time = json["$time"].as_i64().unwrap();
    assert!(time > 10_000_000_000);
}

#[test]
fn test_profile_actions_use_mixpanel_verbs() {
    let cases = [
        (ProfileAction::Set, "$set"),
        (ProfileAction::SetOnce, "$set_once"),
        (ProfileAction::Add, "$add"),
        (ProfileAction::Delete, "$delete"),
        (ProfileAction::from("$unset"), "$unset"),
    ];

    for (action, verb) in cases {
        let payload = build_profile_message(&action, Properties::new(), &identity()).unwrap();
        let json: Value = serde_json::from_slice(&payload).unwrap();
        assert!(json.get(verb).is_some(), "missing {verb}");
    }
}

#[test]
fn test_delete_carries_no_device_metadata() {
    let payload =
        build_profile_message(&ProfileAction::Delete, Properties::new(), &identity()).unwrap();
    let json: Value = serde_json::from_slice(&payload).unwrap();

    assert_eq!(json["$delete"], json!({}));
}

#[test]
fn test_request_url_structure() {
    let config = MixpanelBuilder::new("tok")
        .api_host("https://api.example.com/")
        .build_config()
        .unwrap();

    let event = Message::new(MessageKind::Event, br#"{"event":"open"}"#.to_vec());
    let url = event.to_request(&config).unwrap();
    assert_eq!(url.path(), "/track/");

    let (key, value) = url.query_pairs().next().unwrap();
    assert_eq!(key, "data");
    assert_eq!(value, "eyJldmVudCI6Im9wZW4ifQ==");

    let profile = Message::new(MessageKind::Profile, b"{}".to_vec());
    assert_eq!(profile.to_request(&config).unwrap().path(), "/engage/");
}
