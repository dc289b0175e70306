//! Transport implementations for the ignitor remote link.
//!
//! This crate provides the concrete serial implementation of the
//! [`Transport`](ignitor_core::Transport) trait from `ignitor-core`. Port
//! enumeration and selection are left to the application.
//!
//! # Example
//!
//! ```no_run
//! use ignitor_transport::SerialTransport;
//! use ignitor_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> ignitor_core::Result<()> {
//! let mut transport = SerialTransport::open("/dev/ttyUSB0", 19_200).await?;
//! let mut buf = [0u8; 64];
//! let n = transport.receive(&mut buf, Duration::from_millis(10)).await?;
//! # Ok(())
//! # }
//! ```

pub mod serial;

pub use serial::{DataBits, Parity, SerialConfig, SerialTransport, StopBits, DEFAULT_BAUD_RATE};
