//! Asynchronous link event types.
//!
//! Events are emitted by the request/reply engine through a
//! [`tokio::sync::broadcast`] channel. The presentation layer subscribes to
//! them for live readings and status-bar messages instead of polling the
//! engine.

use crate::types::{Command, Quantity};

/// An event emitted by the remote link.
///
/// Delivery is best-effort through a bounded broadcast channel; a slow
/// consumer may miss readings, which are superseded on the next poll anyway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A single-value GET reply arrived.
    Reading {
        /// What the value measures.
        quantity: Quantity,
        /// The decoded value.
        value: u32,
    },

    /// One timing-table slot was read from the controller.
    RecordFetched {
        /// Slot index.
        slot: usize,
        /// RPM breakpoint of the slot.
        rpm: u16,
        /// Raw timing value as stored on the controller.
        timing_raw: u16,
    },

    /// Every slot of the timing table has been read.
    RecordsFetched,

    /// The controller acknowledged one slot of a table store.
    RecordStored {
        /// Slot index.
        slot: usize,
    },

    /// The controller acknowledged every slot of a table store.
    TimingsAcknowledged,

    /// The controller acknowledged a single-value SET command.
    WriteAcknowledged {
        /// The acknowledged command.
        command: Command,
        /// The value echoed back by the controller.
        value: u32,
    },

    /// No reply arrived in time; the transaction was abandoned.
    ReplyTimeout {
        /// The command that went unanswered.
        command: Command,
    },

    /// Writing to the transport failed.
    TransportError {
        /// Human-readable description of the failure.
        message: String,
    },

    /// The engine is attached to a (new) transport.
    Connected,

    /// The engine stopped talking to its transport.
    Disconnected,
}
