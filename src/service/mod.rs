//! # Service Layer
//!
//! The host-facing surface: one [`MiioCommunication`] per device.

pub mod device;

pub use device::{DeviceEndpoint, MiioCommunication};
