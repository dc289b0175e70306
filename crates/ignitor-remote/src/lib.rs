//! Request/reply protocol engine for the ignition controller's remote link.
//!
//! The controller speaks a small fixed-format binary protocol over a serial
//! line: 7-byte frames, one reply per request, no sequence numbers. This
//! crate provides:
//!
//! - **Frame codec** ([`codec`]) -- encode and decode frames, verify the
//!   additive checksum, interpret payloads.
//! - **Reply framer** ([`framer`]) -- reassemble frames from an arbitrarily
//!   chunked byte stream and resynchronise after garbage.
//! - **Revisions** ([`revisions`]) -- capability tables for every known
//!   firmware revision: opcodes, payload layouts, table geometry, bounds.
//! - **Timing table** ([`record`]) and its **transfer state machine**
//!   ([`transfer`]) -- fetch or store the table one slot per round trip.
//! - **Scheduler** ([`scheduler`]) -- the half-duplex latch logic that keeps
//!   at most one frame in flight and abandons lost transactions.
//! - **RemoteLink** ([`link`]) -- handle to the async IO task that owns the
//!   transport, built with [`LinkBuilder`] ([`builder`]).
//!
//! # Example
//!
//! ```
//! use ignitor_remote::codec::{decode_frame, encode_frame, Frame};
//! use ignitor_remote::revisions::timing_meter;
//! use ignitor_core::Command;
//!
//! // SET LED on, timing-meter firmware
//! let rev = timing_meter();
//! let opcode = rev.spec(Command::SetLed).unwrap().opcode;
//! let bytes = encode_frame(&Frame::with_value(opcode, 1));
//! assert_eq!(bytes, vec![0xAA, 0x05, 0x01, 0x00, 0x00, 0x00, 0xB0]);
//! assert_eq!(decode_frame(&bytes).unwrap().value8(), 1);
//! ```

pub mod builder;
pub mod codec;
pub mod framer;
mod io;
pub mod link;
pub mod record;
pub mod revisions;
pub mod scheduler;
pub mod transfer;

pub use builder::LinkBuilder;
pub use link::RemoteLink;
pub use record::{RecordTable, TimingRecord};
pub use revisions::Revision;
pub use transfer::TransferState;
