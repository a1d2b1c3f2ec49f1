//! Envelope Tests
//!
//! Tests for the wire envelope and its decode boundary:
//! - Field naming on the wire
//! - Classification into server types and app destinations
//! - Malformed input handling

use deskhub_core::{
    codec, AgentReply, AgentRequest, Destination, Envelope, Error, ServerType, CLIENT_APP,
};
use serde_json::json;

// ============================================================================
// Decoding
// ============================================================================

#[test]
fn test_decode_full_envelope() {
    let raw = json!({
        "app": "weather",
        "type": "data",
        "request": "update",
        "payload": {"temp": 21},
        "clientId": "X"
    });
    let env = codec::decode(raw.to_string().as_bytes()).expect("decode failed");

    assert_eq!(env.app, "weather");
    assert_eq!(env.kind, "data");
    assert_eq!(env.request(), Some("update"));
    assert_eq!(env.payload, Some(json!({"temp": 21})));
    assert_eq!(env.client_id.as_deref(), Some("X"));
}

#[test]
fn test_decode_optional_fields_absent() {
    let env = codec::decode(br#"{"app":"server","type":"ping"}"#).expect("decode failed");
    assert!(env.request.is_none());
    assert!(env.payload.is_none());
    assert!(env.client_id.is_none());
}

#[test]
fn test_decode_garbage_is_malformed() {
    for raw in [&b"not json"[..], b"[]", b"{}", br#"{"type":"x"}"#] {
        let err = codec::decode(raw).unwrap_err();
        assert!(
            matches!(err, Error::MalformedEnvelope(_)),
            "expected MalformedEnvelope for {:?}, got {:?}",
            String::from_utf8_lossy(raw),
            err
        );
    }
}

#[test]
fn test_encode_omits_absent_fields() {
    let env = Envelope::new(CLIENT_APP, "pong");
    let text = String::from_utf8(codec::encode(&env).unwrap().to_vec()).unwrap();
    assert_eq!(text, r#"{"app":"client","type":"pong"}"#);
}

// ============================================================================
// Classification
// ============================================================================

#[test]
fn test_every_server_type_classifies() {
    for server_type in ServerType::ALL {
        let env = Envelope::new("server", server_type.as_str());
        assert_eq!(env.destination().unwrap(), Destination::Server(server_type));
    }
}

#[test]
fn test_server_type_is_case_insensitive() {
    let env = Envelope::new("server", "CONFIG");
    assert_eq!(
        env.destination().unwrap(),
        Destination::Server(ServerType::Config)
    );
}

#[test]
fn test_agent_vocabulary() {
    for name in ["start", "end", "clear", "fetch", "delete"] {
        assert_eq!(AgentRequest::parse(name).map(|r| r.as_str()), Some(name));
    }
    assert!(AgentRequest::parse("binary").is_none());

    for name in ["response", "context", "token", "disconnect"] {
        assert_eq!(AgentReply::parse(name).map(|r| r.as_str()), Some(name));
    }
    assert!(AgentReply::parse("start").is_none());
}

#[test]
fn test_error_recoverability() {
    assert!(Error::NoRoute("X".into()).is_recoverable());
    assert!(!Error::MalformedEnvelope("x".into()).is_recoverable());
    assert!(!Error::Unauthorized {
        app: "a".into(),
        kind: "agent".into()
    }
    .is_recoverable());
}
