//! Mi IO wire frame.
//!
//! Every datagram exchanged with a device is one frame:
//!
//! ```text
//! [Magic(2)=0x2131] [Length(2)] [Unknown(4)] [DeviceId(4)] [Stamp(4)] [Checksum(16)] [Body(N)]
//! ```
//!
//! `Length` covers the whole frame. `Checksum` is
//! `MD5(header[0..16] || token || body)`. Handshake frames (the ping) carry no
//! body: the request is the magic, the length and 28 bytes of `0xFF`; the reply
//! puts the real device id and clock into the header and, on devices that have
//! not been provisioned yet, the token into the checksum slot.

use crate::config::{HEADER_SIZE, MAGIC_BYTES, MAX_DATAGRAM_SIZE};
use crate::error::{constants, FrameFault, MiioError, Result};
use crate::utils::crypto::{is_placeholder_token, md5_digest, Token};
use bytes::{BufMut, Bytes, BytesMut};

/// `unknown` word of a command frame
const UNKNOWN_COMMAND: u32 = 0x0000_0000;

/// `unknown` word of a handshake request
const UNKNOWN_HELLO: u32 = 0xFFFF_FFFF;

/// Device id sentinel used before the real id is known
pub const UNKNOWN_DEVICE_ID: [u8; 4] = [0xFF; 4];

/// A decoded Mi IO frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiioMessage {
    unknown: u32,
    device_id: [u8; 4],
    timestamp: u32,
    checksum: [u8; 16],
    body: Bytes,
}

impl MiioMessage {
    /// Build a command frame around an already encrypted body.
    ///
    /// # Errors
    /// `MiioError::InvalidCommand` when the frame would not fit the 16-bit
    /// length field.
    pub fn encode(
        device_id: &[u8; 4],
        timestamp: u32,
        token: &Token,
        body: &[u8],
    ) -> Result<Bytes> {
        let total = HEADER_SIZE + body.len();
        if total > MAX_DATAGRAM_SIZE {
            return Err(MiioError::InvalidCommand(format!(
                "{}: {total} bytes",
                constants::ERR_FRAME_TOO_LARGE
            )));
        }
        let mut buf = BytesMut::with_capacity(total);
        put_header(&mut buf, total, UNKNOWN_COMMAND, device_id, timestamp);

        let checksum = frame_checksum(&buf[..16], token, body);
        buf.put_slice(&checksum);
        buf.put_slice(body);
        Ok(buf.freeze())
    }

    /// Build the 32-byte handshake request. Needs neither token nor device id.
    pub fn hello() -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        put_header(&mut buf, HEADER_SIZE, UNKNOWN_HELLO, &UNKNOWN_DEVICE_ID, u32::MAX);
        buf.put_slice(&[0xFF; 16]);
        buf.freeze()
    }

    /// Build a handshake reply as a device would send it. `token` fills the
    /// checksum slot; `None` leaves it as `0xFF` filler.
    pub fn hello_reply(device_id: &[u8; 4], timestamp: u32, token: Option<&Token>) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        put_header(&mut buf, HEADER_SIZE, UNKNOWN_COMMAND, device_id, timestamp);
        match token {
            Some(token) => buf.put_slice(token),
            None => buf.put_slice(&[0xFF; 16]),
        }
        buf.freeze()
    }

    /// Parse the frame structure without verifying the checksum.
    ///
    /// This is all a handshake reply needs, since it carries no body.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(MiioError::InvalidFrame(FrameFault::TooShort));
        }
        if data[..2] != MAGIC_BYTES {
            return Err(MiioError::InvalidFrame(FrameFault::BadMagic));
        }

        let declared = u16::from_be_bytes([data[2], data[3]]) as usize;
        if declared != data.len() {
            return Err(MiioError::InvalidFrame(FrameFault::LengthMismatch));
        }

        let unknown = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let device_id = [data[8], data[9], data[10], data[11]];
        let timestamp = u32::from_be_bytes([data[12], data[13], data[14], data[15]]);
        let mut checksum = [0u8; 16];
        checksum.copy_from_slice(&data[16..HEADER_SIZE]);

        Ok(Self {
            unknown,
            device_id,
            timestamp,
            checksum,
            body: Bytes::copy_from_slice(&data[HEADER_SIZE..]),
        })
    }

    /// Parse and, when the frame has a body, verify its checksum against `token`.
    pub fn decode(data: &[u8], token: &Token) -> Result<Self> {
        let message = Self::parse(data)?;
        if message.body.is_empty() {
            return Ok(message);
        }

        let expected = frame_checksum(&data[..16], token, &message.body);
        if expected != message.checksum {
            return Err(MiioError::InvalidFrame(FrameFault::ChecksumMismatch));
        }
        Ok(message)
    }

    pub fn unknown(&self) -> u32 {
        self.unknown
    }

    pub fn device_id(&self) -> [u8; 4] {
        self.device_id
    }

    /// Device clock in seconds
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn checksum(&self) -> &[u8; 16] {
        &self.checksum
    }

    /// Encrypted body
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Handshake frames carry no body
    pub fn is_handshake(&self) -> bool {
        self.body.is_empty()
    }

    /// Token a not yet provisioned device reveals in its handshake reply
    pub fn announced_token(&self) -> Option<Token> {
        if self.is_handshake() && !is_placeholder_token(&self.checksum) {
            Some(self.checksum)
        } else {
            None
        }
    }
}

// `total` is at most MAX_DATAGRAM_SIZE
fn put_header(buf: &mut BytesMut, total: usize, unknown: u32, device_id: &[u8; 4], stamp: u32) {
    buf.put_slice(&MAGIC_BYTES);
    buf.put_u16(total as u16);
    buf.put_u32(unknown);
    buf.put_slice(device_id);
    buf.put_u32(stamp);
}

fn frame_checksum(header: &[u8], token: &Token, body: &[u8]) -> [u8; 16] {
    let mut digest_input = Vec::with_capacity(header.len() + token.len() + body.len());
    digest_input.extend_from_slice(header);
    digest_input.extend_from_slice(token);
    digest_input.extend_from_slice(body);
    md5_digest(&digest_input)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    const TOKEN: Token = [0x11; 16];
    const DEVICE: [u8; 4] = [0x01, 0x02, 0x03, 0x04];

    #[test]
    fn command_frame_roundtrip() {
        let body = vec![0xAB; 48];
        let frame = MiioMessage::encode(&DEVICE, 1234, &TOKEN, &body).unwrap();
        assert_eq!(frame.len(), HEADER_SIZE + 48);
        assert_eq!(&frame[..2], &MAGIC_BYTES);
        assert_eq!(u16::from_be_bytes([frame[2], frame[3]]) as usize, frame.len());

        let decoded = MiioMessage::decode(&frame, &TOKEN).unwrap();
        assert_eq!(decoded.device_id(), DEVICE);
        assert_eq!(decoded.timestamp(), 1234);
        assert_eq!(decoded.body().as_ref(), body.as_slice());
        assert!(!decoded.is_handshake());
    }

    #[test]
    fn hello_is_the_fixed_sentinel() {
        let hello = MiioMessage::hello();
        let mut expected = vec![0x21, 0x31, 0x00, 0x20];
        expected.extend_from_slice(&[0xFF; 28]);
        assert_eq!(hello.as_ref(), expected.as_slice());

        let parsed = MiioMessage::parse(&hello).unwrap();
        assert!(parsed.is_handshake());
        assert_eq!(parsed.device_id(), UNKNOWN_DEVICE_ID);
        assert_eq!(parsed.announced_token(), None);
    }

    #[test]
    fn hello_reply_reveals_token() {
        let reply = MiioMessage::hello_reply(&DEVICE, 99, Some(&TOKEN));
        let parsed = MiioMessage::parse(&reply).unwrap();
        assert_eq!(parsed.device_id(), DEVICE);
        assert_eq!(parsed.timestamp(), 99);
        assert_eq!(parsed.announced_token(), Some(TOKEN));

        let anonymous = MiioMessage::hello_reply(&DEVICE, 99, None);
        assert_eq!(MiioMessage::parse(&anonymous).unwrap().announced_token(), None);
    }

    #[test]
    fn short_frame_is_rejected() {
        let result = MiioMessage::parse(&[0x21, 0x31, 0x00]);
        assert!(matches!(
            result,
            Err(MiioError::InvalidFrame(FrameFault::TooShort))
        ));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut frame = MiioMessage::hello().to_vec();
        frame[0] = 0x00;
        assert!(matches!(
            MiioMessage::parse(&frame),
            Err(MiioError::InvalidFrame(FrameFault::BadMagic))
        ));
    }

    #[test]
    fn declared_length_larger_than_buffer_is_rejected() {
        let mut frame = MiioMessage::encode(&DEVICE, 1, &TOKEN, &[0u8; 16])
            .unwrap()
            .to_vec();
        frame[3] = frame[3].wrapping_add(10);
        assert!(matches!(
            MiioMessage::decode(&frame, &TOKEN),
            Err(MiioError::InvalidFrame(FrameFault::LengthMismatch))
        ));
    }

    #[test]
    fn every_checksum_byte_is_verified() {
        let frame = MiioMessage::encode(&DEVICE, 7, &TOKEN, &[0x42; 32]).unwrap();
        for i in 16..HEADER_SIZE {
            let mut corrupted = frame.to_vec();
            corrupted[i] ^= 0x01;
            assert!(
                matches!(
                    MiioMessage::decode(&corrupted, &TOKEN),
                    Err(MiioError::InvalidFrame(FrameFault::ChecksumMismatch))
                ),
                "byte {i} not covered"
            );
        }
    }

    #[test]
    fn wrong_token_fails_checksum() {
        let frame = MiioMessage::encode(&DEVICE, 7, &TOKEN, &[0x42; 32]).unwrap();
        assert!(MiioMessage::decode(&frame, &[0x22; 16]).is_err());
    }

    #[test]
    fn largest_frame_keeps_its_length_field() {
        let body = vec![0u8; MAX_DATAGRAM_SIZE - HEADER_SIZE];
        let frame = MiioMessage::encode(&DEVICE, 1, &TOKEN, &body).unwrap();
        assert_eq!(frame.len(), MAX_DATAGRAM_SIZE);
        assert_eq!(u16::from_be_bytes([frame[2], frame[3]]) as usize, frame.len());
        assert!(MiioMessage::decode(&frame, &TOKEN).is_ok());
    }

    #[test]
    fn oversized_body_is_refused_instead_of_wrapping() {
        let body = vec![0u8; 65_536];
        assert!(matches!(
            MiioMessage::encode(&DEVICE, 1, &TOKEN, &body),
            Err(MiioError::InvalidCommand(_))
        ));
    }
}
