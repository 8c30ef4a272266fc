#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Edge-case tests for the frame codec, cipher and command envelopes
//! Tests boundary conditions and malformed input from misbehaving devices

use miio_protocol::config::HEADER_SIZE;
use miio_protocol::core::command::{DeviceReply, MiioResponse, QueuedCommand};
use miio_protocol::error::{FrameFault, MiioError};
use miio_protocol::utils::crypto::{parse_token, MiioCrypto};
use miio_protocol::MiioMessage;
use serde_json::json;

const TOKEN: [u8; 16] = [0x33; 16];

// ============================================================================
// FRAME CODEC EDGE CASES
// ============================================================================

#[test]
fn test_hello_is_exact() {
    let hello = MiioMessage::hello();
    assert_eq!(hello.len(), HEADER_SIZE);
    assert_eq!(&hello[..4], &[0x21, 0x31, 0x00, 0x20]);
    assert!(hello[4..].iter().all(|b| *b == 0xFF));
}

#[test]
fn test_empty_datagram() {
    assert!(matches!(
        MiioMessage::parse(&[]),
        Err(MiioError::InvalidFrame(FrameFault::TooShort))
    ));
}

#[test]
fn test_header_minus_one_byte() {
    let hello = MiioMessage::hello();
    assert!(matches!(
        MiioMessage::parse(&hello[..HEADER_SIZE - 1]),
        Err(MiioError::InvalidFrame(FrameFault::TooShort))
    ));
}

#[test]
fn test_wrong_magic() {
    let mut frame = MiioMessage::encode(&[0, 0, 0, 1], 1, &TOKEN, b"payload")
        .unwrap()
        .to_vec();
    frame[0] = 0x12;
    assert!(matches!(
        MiioMessage::parse(&frame),
        Err(MiioError::InvalidFrame(FrameFault::BadMagic))
    ));
}

#[test]
fn test_length_field_larger_than_datagram() {
    let mut frame = MiioMessage::encode(&[0, 0, 0, 1], 1, &TOKEN, b"payload")
        .unwrap()
        .to_vec();
    frame[2] = 0x7F;
    let err = MiioMessage::parse(&frame).unwrap_err();
    assert!(err.is_discardable());
}

#[test]
fn test_trailing_garbage_is_length_mismatch() {
    let mut frame = MiioMessage::encode(&[0, 0, 0, 1], 1, &TOKEN, b"payload")
        .unwrap()
        .to_vec();
    frame.push(0);
    assert!(matches!(
        MiioMessage::decode(&frame, &TOKEN),
        Err(MiioError::InvalidFrame(FrameFault::LengthMismatch))
    ));
}

#[test]
fn test_wrong_token_fails_checksum() {
    let frame = MiioMessage::encode(&[0, 0, 0, 1], 1, &TOKEN, b"payload").unwrap();
    let err = MiioMessage::decode(&frame, &[0x34; 16]).unwrap_err();
    assert_eq!(err.reason(), "Checksum Error");
    assert!(!err.is_discardable());
}

#[test]
fn test_hello_reply_skips_checksum() {
    let reply = MiioMessage::hello_reply(&[1, 2, 3, 4], 99, None);
    let decoded = MiioMessage::decode(&reply, &TOKEN).unwrap();
    assert!(decoded.is_handshake());
    assert_eq!(decoded.announced_token(), None);
    assert_eq!(decoded.timestamp(), 99);
}

#[test]
fn test_timestamp_extremes() {
    for stamp in [0u32, 1, u32::MAX] {
        let frame = MiioMessage::encode(&[9, 9, 9, 9], stamp, &TOKEN, b"x").unwrap();
        assert_eq!(MiioMessage::decode(&frame, &TOKEN).unwrap().timestamp(), stamp);
    }
}

// ============================================================================
// CIPHER EDGE CASES
// ============================================================================

#[test]
fn test_encrypt_empty_plaintext() {
    let crypto = MiioCrypto::new(&TOKEN);
    let encrypted = crypto.encrypt(b"").unwrap();
    assert_eq!(encrypted.len(), 16);
    assert_eq!(crypto.decrypt(&encrypted).unwrap(), "");
}

#[test]
fn test_block_aligned_plaintext_gets_full_padding_block() {
    let crypto = MiioCrypto::new(&TOKEN);
    let encrypted = crypto.encrypt(&[b'a'; 32]).unwrap();
    assert_eq!(encrypted.len(), 48);
}

#[test]
fn test_decrypt_unaligned_ciphertext() {
    let crypto = MiioCrypto::new(&TOKEN);
    assert!(matches!(
        crypto.decrypt(&[0u8; 15]),
        Err(MiioError::CryptoError(_))
    ));
}

#[test]
fn test_decrypt_with_wrong_token() {
    let encrypted = MiioCrypto::new(&TOKEN).encrypt(b"{\"id\":1}").unwrap();
    // Wrong keys almost always break the padding; when they do not, the
    // plaintext is still garbage
    match MiioCrypto::new(&[0x99; 16]).decrypt(&encrypted) {
        Err(e) => assert_eq!(e.reason(), "Crypto Error"),
        Ok(text) => assert_ne!(text, "{\"id\":1}"),
    }
}

#[test]
fn test_trailing_nuls_are_stripped() {
    let crypto = MiioCrypto::new(&TOKEN);
    let encrypted = crypto.encrypt(b"{\"id\":1,\"result\":[]}\0\0").unwrap();
    assert_eq!(crypto.decrypt(&encrypted).unwrap(), "{\"id\":1,\"result\":[]}");
}

#[test]
fn test_token_parsing_is_case_insensitive() {
    assert_eq!(
        parse_token("AABBCCDDEEFF00112233445566778899").unwrap(),
        parse_token("aabbccddeeff00112233445566778899").unwrap()
    );
    assert!(parse_token("aabbccddeeff0011223344556677889").is_err());
    assert_eq!(parse_token("").unwrap(), [0u8; 16]);
}

// ============================================================================
// COMMAND ENVELOPE EDGE CASES
// ============================================================================

#[test]
fn test_empty_params_array() {
    let command = QueuedCommand::new(1, "miIO.info", "[]").unwrap();
    assert!(command.request().contains("\"params\":[]"));
}

#[test]
fn test_unicode_params() {
    let command = QueuedCommand::new(2, "set_name", r#"["Wohnzimmer ☀"]"#).unwrap();
    let reply = DeviceReply::parse(command.request()).unwrap();
    assert_eq!(reply.payload["params"][0], "Wohnzimmer ☀");
}

#[test]
fn test_null_params_rejected() {
    assert!(QueuedCommand::new(1, "get_prop", "null").is_err());
}

#[test]
fn test_whitespace_method_rejected() {
    assert!(QueuedCommand::new(1, "   ", "[]").is_err());
}

#[test]
fn test_device_error_payload_is_kept() {
    let reply =
        DeviceReply::parse(r#"{"id":7,"error":{"code":-5001,"message":"invalid arg"}}"#).unwrap();
    let command = QueuedCommand::new(7, "set_power", r#"["maybe"]"#).unwrap();
    let response = MiioResponse::success(&command, reply.payload);
    assert!(response.is_error());
    assert_eq!(response.payload["error"]["code"], json!(-5001));
    assert!(response.result().is_none());
}

#[test]
fn test_reply_without_id() {
    let reply = DeviceReply::parse(r#"{"result":["ok"]}"#).unwrap();
    assert_eq!(reply.id, None);
}

#[test]
fn test_response_serializes_for_hosts() {
    let command = QueuedCommand::new(3, "get_prop", "[]").unwrap();
    let response = MiioResponse::error(&command, "No Response");
    let text = serde_json::to_string(&response).unwrap();
    assert!(text.contains("\"method\":\"get_prop\""));
    let back: MiioResponse = serde_json::from_str(&text).unwrap();
    assert_eq!(back, response);
}
