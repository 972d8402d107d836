//! Unary calls against the loopback server

mod common;

use common::{bridge, bridge_with, payload, update, DeviceUpdate, TestServer};
use leapbrush_bridge::{BridgeError, StatusCode, UnaryMethod};
use prost::Message;

#[test]
fn test_update_device_round_trip() {
    let server = TestServer::start();
    let bridge = bridge();
    let conn = bridge.connect(&server.address()).unwrap();

    let sent = update(7);
    let response = bridge
        .unary(conn, UnaryMethod::UpdateDevice, payload(&sent))
        .unwrap();

    assert_eq!(DeviceUpdate::decode(response.as_bytes()).unwrap(), sent);
    bridge.close(conn);
}

#[test]
fn test_rpc_round_trip_preserves_unknown_fields() {
    let server = TestServer::start();
    let bridge = bridge();
    let conn = bridge.connect(&server.address()).unwrap();

    // field 99 is unknown to every message in this service
    let mut bytes = update(1).encode_to_vec();
    bytes.extend_from_slice(&[0x98, 0x06, 0x2a]);
    let request = bridge.request(&bytes).unwrap();

    let response = bridge.unary(conn, UnaryMethod::Rpc, request).unwrap();
    assert_eq!(response.as_bytes(), bytes.as_slice());
}

#[test]
fn test_server_error_surfaces_as_rpc_failure() {
    let server = TestServer::start();
    let bridge = bridge();
    let conn = bridge.connect(&server.address()).unwrap();

    let err = bridge
        .unary(conn, UnaryMethod::UpdateDevice, leapbrush_bridge::Payload::empty())
        .unwrap_err();
    match err {
        BridgeError::Rpc { code, message } => {
            assert_eq!(code, tonic::Code::Unavailable);
            assert!(message.contains("device offline"));
        }
        other => panic!("expected rpc failure, got {:?}", other),
    }
}

#[test]
fn test_secure_address_never_falls_back_to_plaintext() {
    let server = TestServer::start();
    let bridge = bridge();

    let err = bridge
        .connect(&format!("ssl://http://{}", server.address()))
        .unwrap_err();
    assert_eq!(err.code(), StatusCode::InvalidParameter);

    // a TLS channel to a plaintext server must not get a response through
    match bridge.connect(&format!("ssl://{}", server.address())) {
        Ok(conn) => {
            let result = bridge.unary(conn, UnaryMethod::Rpc, payload(&update(1)));
            assert!(result.is_err(), "call succeeded over a plaintext server");
        }
        Err(e) => assert_eq!(e.code(), StatusCode::InvalidParameter),
    }
    assert!(server.observed.unary_requests.lock().unwrap().is_empty());
}

#[test]
fn test_unreachable_server_fails_the_call_not_the_connect() {
    let bridge = bridge();
    // port 1 is never listening
    let conn = bridge.connect("127.0.0.1:1").unwrap();

    let err = bridge.unary(conn, UnaryMethod::Rpc, payload(&update(1))).unwrap_err();
    assert_eq!(err.code(), StatusCode::Rpc);
}

#[test]
fn test_call_on_zero_or_closed_handle() {
    let server = TestServer::start();
    let bridge = bridge();

    let err = bridge.unary(0, UnaryMethod::Rpc, payload(&update(1))).unwrap_err();
    assert_eq!(err.code(), StatusCode::InvalidHandle);

    let conn = bridge.connect(&server.address()).unwrap();
    assert!(bridge.close(conn));
    assert!(!bridge.close(conn));

    let err = bridge.unary(conn, UnaryMethod::Rpc, payload(&update(1))).unwrap_err();
    assert_eq!(err.code(), StatusCode::InvalidHandle);
    assert!(server.observed.unary_requests.lock().unwrap().is_empty());
}

#[test]
fn test_malformed_request_strict_and_lenient() {
    let server = TestServer::start();
    // truncated length-delimited field
    let malformed = [0x0a, 0x10, 0x01];

    let strict = bridge();
    assert_eq!(
        strict.request(&malformed).unwrap_err().code(),
        StatusCode::MalformedPayload
    );

    let lenient = bridge_with(|config| config.payload.strict = false);
    let conn = lenient.connect(&server.address()).unwrap();
    let request = lenient.request(&malformed).unwrap();
    let response = lenient.unary(conn, UnaryMethod::Rpc, request).unwrap();

    assert!(response.is_empty());
    assert_eq!(*server.observed.unary_requests.lock().unwrap(), vec![Vec::<u8>::new()]);
}

#[test]
fn test_deadline_and_metadata_from_config() {
    let server = TestServer::start();
    let bridge = bridge_with(|config| {
        config.channel.request_timeout_ms = 100;
        config
            .channel
            .metadata
            .insert("x-delay-ms".to_string(), "2000".to_string());
    });
    let conn = bridge.connect(&server.address()).unwrap();

    let err = bridge.unary(conn, UnaryMethod::Rpc, payload(&update(1))).unwrap_err();
    // either side may give up first
    assert!(
        matches!(
            err,
            BridgeError::Rpc { code: tonic::Code::DeadlineExceeded, .. } | BridgeError::Cancelled
        ),
        "unexpected error {:?}",
        err
    );
}

#[test]
fn test_concurrent_calls_share_one_connection() {
    let server = TestServer::start();
    let bridge = bridge();
    let conn = bridge.connect(&server.address()).unwrap();

    std::thread::scope(|scope| {
        for sequence in 0..8u64 {
            let bridge = &bridge;
            scope.spawn(move || {
                let sent = update(sequence);
                let response = bridge.unary(conn, UnaryMethod::Rpc, payload(&sent)).unwrap();
                assert_eq!(DeviceUpdate::decode(response.as_bytes()).unwrap(), sent);
            });
        }
    });

    assert_eq!(server.observed.unary_requests.lock().unwrap().len(), 8);
}
