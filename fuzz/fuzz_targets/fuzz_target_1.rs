#![no_main]

use libfuzzer_sys::fuzz_target;
use miio_protocol::utils::crypto::MiioCrypto;
use miio_protocol::MiioMessage;

fuzz_target!(|data: &[u8]| {
    // Untrusted datagrams must never panic the frame codec or the cipher
    let _ = MiioMessage::parse(data);
    if let Ok(message) = MiioMessage::decode(data, &[0x5A; 16]) {
        let _ = MiioCrypto::new(&[0x5A; 16]).decrypt(message.body());
    }
});
