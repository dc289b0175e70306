//! LinkBuilder -- fluent builder for constructing [`RemoteLink`] instances.
//!
//! Separates configuration from construction so that callers can set up
//! serial port parameters and protocol timing before the transport is
//! opened.
//!
//! # Example
//!
//! ```no_run
//! use ignitor_remote::builder::LinkBuilder;
//! use ignitor_remote::revisions::cdi;
//! use std::time::Duration;
//!
//! # async fn example() -> ignitor_core::Result<()> {
//! let link = LinkBuilder::new(cdi())
//!     .serial_port("/dev/ttyUSB0")
//!     .reply_timeout(Duration::from_millis(300))
//!     .build()
//!     .await?;
//! link.save_memory()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use ignitor_core::error::{Error, Result};
use ignitor_core::transport::Transport;

use crate::io::IoConfig;
use crate::link::RemoteLink;
use crate::revisions::Revision;
use crate::scheduler::{TransactionScheduler, DEFAULT_REPLY_TIMEOUT};

/// Default interval between send attempts.
pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_millis(50);

/// Default upper bound on one transport read.
pub const DEFAULT_READ_PERIOD: Duration = Duration::from_millis(10);

/// Default capacity of the event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Fluent builder for [`RemoteLink`].
///
/// Everything but the serial port has a default, so the simplest usage is:
///
/// ```ignore
/// let link = LinkBuilder::new(timing_meter())
///     .serial_port("/dev/ttyUSB0")
///     .build()
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct LinkBuilder {
    revision: Revision,
    serial_port: Option<String>,
    baud_rate: Option<u32>,
    poll_period: Duration,
    read_period: Duration,
    reply_timeout: Duration,
    verify_after_store: bool,
    event_capacity: usize,
}

impl LinkBuilder {
    /// Create a new builder for the given firmware revision.
    pub fn new(revision: Revision) -> Self {
        LinkBuilder {
            revision,
            serial_port: None,
            baud_rate: None,
            poll_period: DEFAULT_POLL_PERIOD,
            read_period: DEFAULT_READ_PERIOD,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            verify_after_store: false,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Set the serial port path (e.g. `/dev/ttyUSB0` or `COM3`).
    pub fn serial_port(mut self, port: &str) -> Self {
        self.serial_port = Some(port.to_string());
        self
    }

    /// Override the revision's default baud rate.
    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.baud_rate = Some(baud);
        self
    }

    /// Interval between send attempts (default: 50ms).
    pub fn poll_period(mut self, period: Duration) -> Self {
        self.poll_period = period;
        self
    }

    /// Upper bound on one transport read (default: 10ms).
    pub fn read_period(mut self, period: Duration) -> Self {
        self.read_period = period;
        self
    }

    /// How long to wait for a reply before abandoning a transaction
    /// (default: 500ms).
    pub fn reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Re-read the table after every store (default: false).
    pub fn verify_after_store(mut self, verify: bool) -> Self {
        self.verify_after_store = verify;
        self
    }

    /// Capacity of the event channel (default: 256).
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("poll_period", self.poll_period),
            ("read_period", self.read_period),
            ("reply_timeout", self.reply_timeout),
        ] {
            if value.is_zero() {
                return Err(Error::InvalidParameter(format!("{name} must be non-zero")));
            }
        }
        if self.event_capacity == 0 {
            return Err(Error::InvalidParameter(
                "event_capacity must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Build a [`RemoteLink`] with a caller-provided transport.
    ///
    /// This is the entry point for tests (pass a `MockController` or
    /// `MockTransport` from `ignitor-test-harness`) and for callers that
    /// manage the transport themselves.
    pub async fn build_with_transport(self, transport: Box<dyn Transport>) -> Result<RemoteLink> {
        self.validate()?;

        let mut scheduler = TransactionScheduler::new(Arc::new(self.revision), self.reply_timeout);
        scheduler.set_verify_after_store(self.verify_after_store);

        let config = IoConfig {
            poll_period: self.poll_period,
            read_period: self.read_period,
        };
        Ok(RemoteLink::new(
            transport,
            scheduler,
            config,
            self.event_capacity,
        ))
    }

    /// Build a [`RemoteLink`] over a serial port.
    ///
    /// Requires that [`serial_port()`](Self::serial_port) has been called.
    /// The baud rate defaults to the revision's if not overridden.
    pub async fn build(self) -> Result<RemoteLink> {
        self.validate()?;
        let port = self
            .serial_port
            .as_ref()
            .ok_or_else(|| Error::InvalidParameter("serial_port is required for build()".into()))?;
        let baud = self.baud_rate.unwrap_or(self.revision.default_baud_rate);

        let transport = ignitor_transport::SerialTransport::open(port, baud).await?;
        self.build_with_transport(Box::new(transport)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revisions::{cdi, timing_meter};
    use ignitor_test_harness::MockController;

    #[tokio::test(start_paused = true)]
    async fn builder_defaults() {
        let link = LinkBuilder::new(cdi())
            .build_with_transport(Box::new(MockController::cdi()))
            .await
            .unwrap();
        assert_eq!(link.revision().name, "cdi");
        assert_eq!(link.records().len(), 11);
        assert!(link.shift().is_none());
    }

    #[tokio::test]
    async fn serial_port_required_for_build() {
        let result = LinkBuilder::new(cdi()).build().await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn zero_durations_rejected() {
        let result = LinkBuilder::new(cdi())
            .reply_timeout(Duration::ZERO)
            .build_with_transport(Box::new(MockController::cdi()))
            .await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));

        let result = LinkBuilder::new(cdi())
            .poll_period(Duration::ZERO)
            .build_with_transport(Box::new(MockController::cdi()))
            .await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn missing_port_is_transport_error() {
        let result = LinkBuilder::new(timing_meter())
            .serial_port("/dev/ignitor-does-not-exist")
            .build()
            .await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn verify_after_store_refetches() {
        let device = MockController::timing_meter();
        let link = LinkBuilder::new(timing_meter())
            .poll_period(Duration::from_millis(20))
            .verify_after_store(true)
            .build_with_transport(Box::new(device.clone()))
            .await
            .unwrap();

        while link.state().is_transferring() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        link.begin_store().unwrap();
        while device.request_count(0x82) < 11 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        while link.state().is_transferring() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(device.request_count(0x02), 22);
    }
}
