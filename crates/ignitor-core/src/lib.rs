//! ignitor-core: Core traits, types, and error definitions for the ignitor
//! remote link.
//!
//! This crate defines the protocol-agnostic pieces shared by the serial
//! transport, the request/reply engine, and the test harness. Presentation
//! code depends on these types without pulling in a concrete transport.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level communication channel
//! - [`LinkEvent`] -- readings and status notifications pushed to the UI
//! - [`Command`] / [`Direction`] -- the closed set of remote commands
//! - [`LinkStats`] -- link-health counters
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod transport;
pub mod types;

// Re-export key types at crate root for ergonomic `use ignitor_core::*`.
pub use error::{Error, Result};
pub use events::LinkEvent;
pub use transport::Transport;
pub use types::*;
