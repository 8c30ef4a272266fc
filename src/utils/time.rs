//! Wall clock helpers and device clock offset arithmetic.
//!
//! Devices reject frames whose timestamp drifts too far from their own clock,
//! so every reply updates an offset (`device - local`, in seconds) that is
//! applied to the timestamp of every outgoing frame.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current local time in whole seconds since the UNIX epoch. A clock set
/// before 1970 reads as zero.
pub fn unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Offset between a device timestamp and the local clock
pub fn clock_offset(device_timestamp: u32, local_seconds: i64) -> i64 {
    i64::from(device_timestamp) - local_seconds
}

/// Timestamp to put into an outgoing frame given the negotiated offset.
/// The result wraps into the 32-bit field the wire format carries.
pub fn device_timestamp(local_seconds: i64, offset: i64) -> u32 {
    local_seconds.wrapping_add(offset) as u32
}
