//! ignitor-test-harness: mock transports and a controller emulator for
//! testing the ignitor remote link.
//!
//! [`MockTransport`] replays scripted request/response pairs for exact
//! byte-level assertions. [`MockController`] emulates the controller
//! firmware so the engine can run freely against it, with fault injection
//! for lost, corrupted, and misaligned replies.

pub mod mock_device;
pub mod mock_serial;

pub use mock_device::{DeviceRecord, Firmware, MockController};
pub use mock_serial::MockTransport;
