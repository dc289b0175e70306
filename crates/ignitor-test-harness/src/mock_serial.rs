//! Scripted mock transport for deterministic protocol tests.
//!
//! [`MockTransport`] implements the [`Transport`] trait with pre-loaded
//! request/response pairs. It checks that the engine sends exactly the
//! expected frames, in order, and hands back canned replies. For free-running
//! tests against a behaving device use
//! [`MockController`](crate::MockController) instead.
//!
//! # Example
//!
//! ```
//! use ignitor_test_harness::MockTransport;
//!
//! let mut mock = MockTransport::new();
//! // GET RPM, answered with 1620 rpm.
//! mock.expect(&[0xAA, 0x01, 0x00, 0x00, 0x00, 0x00, 0xAB],
//!             &[0xAA, 0x01, 0x54, 0x06, 0x00, 0x00, 0x05]);
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;

use ignitor_core::error::{Error, Result};
use ignitor_core::transport::Transport;

/// A pre-loaded request/response pair for the mock transport.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact bytes we expect to be sent.
    request: Vec<u8>,
    /// The bytes to return when the matching request is received.
    response: Vec<u8>,
}

/// A mock [`Transport`] for testing the engine without hardware.
///
/// Expectations are consumed in order. When `send()` is called, the sent
/// data is recorded and matched against the next expectation; its response
/// is queued for `receive()`. A send that matches nothing fails with
/// [`Error::Protocol`].
///
/// `receive()` with nothing queued waits out its timeout before returning
/// [`Error::Timeout`], the way a quiet serial line does.
#[derive(Debug)]
pub struct MockTransport {
    /// Ordered queue of expected request/response pairs.
    expectations: VecDeque<Expectation>,
    /// Bytes waiting to be returned by `receive()`.
    incoming: VecDeque<u8>,
    /// Largest number of bytes one `receive()` call returns.
    chunk_size: usize,
    /// Whether the transport is "connected".
    connected: bool,
    /// Log of all bytes sent through this transport.
    sent_log: Vec<Vec<u8>>,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            expectations: VecDeque::new(),
            incoming: VecDeque::new(),
            chunk_size: usize::MAX,
            connected: true,
            sent_log: Vec::new(),
        }
    }

    /// Add an expected request/response pair.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// Queue bytes that arrive without being asked for (line noise, a reply
    /// to a request sent before a reconnect).
    pub fn inject(&mut self, bytes: &[u8]) {
        self.incoming.extend(bytes);
    }

    /// Deliver incoming bytes at most `n` at a time.
    pub fn set_chunk_size(&mut self, n: usize) {
        self.chunk_size = n.max(1);
    }

    /// All data sent through this transport, one element per `send()`.
    pub fn sent_data(&self) -> &[Vec<u8>] {
        &self.sent_log
    }

    /// Number of expectations not yet consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.expectations.len()
    }

    /// Set the connected state. While disconnected, `send()` and `receive()`
    /// return [`Error::NotConnected`].
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        self.sent_log.push(data.to_vec());

        let expectation = self
            .expectations
            .pop_front()
            .ok_or_else(|| Error::Protocol("no more expectations in mock transport".into()))?;
        if data != expectation.request.as_slice() {
            return Err(Error::Protocol(format!(
                "unexpected send data: expected {:02X?}, got {:02X?}",
                expectation.request, data
            )));
        }
        self.incoming.extend(expectation.response);
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        if self.incoming.is_empty() {
            tokio::time::sleep(timeout).await;
            return Err(Error::Timeout);
        }

        let n = self.incoming.len().min(buf.len()).min(self.chunk_size);
        for (slot, byte) in buf.iter_mut().zip(self.incoming.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.incoming.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
