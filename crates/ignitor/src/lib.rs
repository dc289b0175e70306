//! # ignitor
//!
//! Host-side link to a motorcycle ignition controller over a serial line.
//!
//! This is the facade crate. It re-exports the pieces applications need so
//! that a single dependency is enough:
//!
//! | Crate                 | Purpose                                        |
//! |-----------------------|------------------------------------------------|
//! | `ignitor-core`        | Commands, events, errors, the `Transport` trait |
//! | `ignitor-transport`   | Serial port transport (19200 8N1)              |
//! | `ignitor-remote`      | Frame codec, scheduler, timing-table transfer  |
//! | **`ignitor`**         | This facade crate -- re-exports everything     |
//!
//! ## Firmware revisions
//!
//! Each controller firmware speaks its own dialect of the same 7-byte frame
//! protocol. The dialect is described by a [`Revision`] capability table;
//! pick one with [`revision_by_name`] or the constructors in
//! [`remote::revisions`].
//!
//! ## Event subscription
//!
//! Readings and status changes arrive as [`LinkEvent`]s on a broadcast
//! channel:
//!
//! ```no_run
//! use ignitor::{LinkBuilder, LinkEvent};
//!
//! # async fn example() -> ignitor::Result<()> {
//! let link = LinkBuilder::new(ignitor::remote::revisions::cdi())
//!     .serial_port("/dev/ttyUSB0")
//!     .build()
//!     .await?;
//! let mut events = link.subscribe();
//! while let Ok(event) = events.recv().await {
//!     match event {
//!         LinkEvent::Reading { quantity, value } => println!("{quantity}: {value}"),
//!         LinkEvent::RecordsFetched => println!("{:?}", link.records()),
//!         other => println!("{other:?}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub use ignitor_core::*;

/// Request/reply protocol engine.
pub mod remote {
    pub use ignitor_remote::*;
}

pub use ignitor_remote::{LinkBuilder, RecordTable, RemoteLink, Revision, TimingRecord, TransferState};
pub use ignitor_transport::{SerialConfig, SerialTransport};

/// Names of every known firmware revision.
///
/// # Example
///
/// ```
/// assert!(ignitor::revision_names().contains(&"cdi"));
/// ```
pub fn revision_names() -> Vec<&'static str> {
    ignitor_remote::revisions::all()
        .iter()
        .map(|rev| rev.name)
        .collect()
}

/// Look up a firmware revision by name (case-insensitive).
pub fn revision_by_name(name: &str) -> Option<Revision> {
    ignitor_remote::revisions::by_name(name)
}
