//! Transport trait for the remote link.
//!
//! The [`Transport`] trait abstracts over the physical link to the ignition
//! controller. The serial port implementation lives in `ignitor-transport`;
//! `ignitor-test-harness` provides scripted and emulated transports.
//!
//! The request/reply engine in `ignitor-remote` operates on a `Transport`
//! rather than directly on a serial port, so the same scheduler runs against
//! real hardware and against deterministic mocks.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level duplex channel to the controller.
///
/// Implementations handle buffering and physical-layer errors only. Frame
/// alignment, checksums, and transaction sequencing belong to the engine.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write raw bytes to the controller.
    ///
    /// Implementations should return once all bytes have been handed to the
    /// underlying device (serial TX buffer).
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Read whatever bytes have arrived into `buf`.
    ///
    /// Returns the number of bytes read, which may be less than a full
    /// frame. Waits up to `timeout` for data; returns
    /// [`Error::Timeout`](crate::error::Error::Timeout) if nothing arrives.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport.
    ///
    /// After calling `close()`, subsequent `send()` and `receive()` calls
    /// should return [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently open.
    fn is_connected(&self) -> bool;
}
