//! Timing-table transfer state machine.
//!
//! The controller's timing table is moved one slot per round trip. While no
//! transfer is running the engine cycles through the revision's poll list.
//! The machine decides what the next request is and interprets the replies
//! that belong to a transfer; it never touches the transport and knows
//! nothing about latches or timeouts.
//!
//! ```text
//!   FetchShift ──GetShift reply──▶ FetchRecords(0) ──slot i──▶ FetchRecords(i+1)
//!                                        │                          │
//!                                        └──────── i+1 == N ────────┴──▶ SteadyPoll(0)
//!
//!   SteadyPoll ──begin_store──▶ StoreRecords(0) ──ack i──▶ … ──ack N-1──▶ SteadyPoll(0)
//! ```
//!
//! A lost reply does not advance the cursor, so the next poll tick simply
//! asks for the same slot again.

use std::fmt;
use std::sync::Arc;

use ignitor_core::{Command, Error, LinkEvent, Result};
use tracing::debug;

use crate::codec::{Frame, RecordPayload};
use crate::record::{RecordTable, TimingRecord};
use crate::revisions::{PayloadLayout, Revision};

/// Where the transfer machine currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Reading the reference shift before the table (CDI firmware).
    FetchShift,
    /// Reading slot `cursor` of the table.
    FetchRecords { cursor: usize },
    /// No transfer; cycling through the poll list at `index`.
    SteadyPoll { index: usize },
    /// Writing slot `cursor` of the table.
    StoreRecords { cursor: usize },
}

impl TransferState {
    /// Whether a table transfer (in either direction) is running.
    pub fn is_transferring(&self) -> bool {
        !matches!(self, TransferState::SteadyPoll { .. })
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferState::FetchShift => write!(f, "fetching shift"),
            TransferState::FetchRecords { cursor } => write!(f, "fetching slot {cursor}"),
            TransferState::SteadyPoll { .. } => write!(f, "polling"),
            TransferState::StoreRecords { cursor } => write!(f, "storing slot {cursor}"),
        }
    }
}

/// A frame the machine wants sent, with the logical command it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub command: Command,
    pub frame: Frame,
}

/// Timing-table transfer state machine.
#[derive(Debug, Clone)]
pub struct RecordTransfer {
    revision: Arc<Revision>,
    state: TransferState,
    table: RecordTable,
    verify_after_store: bool,
}

impl RecordTransfer {
    /// Create a machine in the revision's startup state with an empty table.
    pub fn new(revision: Arc<Revision>) -> Self {
        let state = revision.startup_state();
        let table = RecordTable::new(revision.record_slots);
        Self {
            revision,
            state,
            table,
            verify_after_store: false,
        }
    }

    /// Re-read the whole table after a store instead of returning to
    /// polling.
    pub fn set_verify_after_store(&mut self, verify: bool) {
        self.verify_after_store = verify;
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn table(&self) -> &RecordTable {
        &self.table
    }

    pub fn revision(&self) -> &Revision {
        &self.revision
    }

    /// Build the next request and advance the poll cursor.
    ///
    /// Returns `None` only if the revision lacks a command the current state
    /// needs, which the capability tables rule out.
    pub fn next_request(&mut self) -> Option<Request> {
        match self.state {
            TransferState::FetchShift => self.simple_request(Command::GetShift),
            TransferState::FetchRecords { cursor } => {
                let spec = self.revision.spec(Command::GetRecord)?;
                let frame = Frame::record(
                    spec.opcode,
                    RecordPayload {
                        slot: cursor as u8,
                        ..Default::default()
                    },
                );
                Some(Request {
                    command: Command::GetRecord,
                    frame,
                })
            }
            TransferState::SteadyPoll { index } => {
                let list_len = self.revision.poll_list.len();
                let command = *self.revision.poll_list.get(index % list_len.max(1))?;
                self.state = TransferState::SteadyPoll {
                    index: (index + 1) % list_len,
                };
                self.simple_request(command)
            }
            TransferState::StoreRecords { cursor } => {
                let spec = self.revision.spec(Command::SetRecord)?;
                let record = self.table.get(cursor)?;
                let frame = Frame::record(
                    spec.opcode,
                    RecordPayload {
                        slot: cursor as u8,
                        value: record.timing_raw as u8,
                        rpm: record.rpm,
                    },
                );
                Some(Request {
                    command: Command::SetRecord,
                    frame,
                })
            }
        }
    }

    fn simple_request(&self, command: Command) -> Option<Request> {
        let spec = self.revision.spec(command)?;
        let frame = match spec.layout {
            PayloadLayout::Record => Frame::record(spec.opcode, RecordPayload::default()),
            _ => Frame::with_value(spec.opcode, 0),
        };
        Some(Request { command, frame })
    }

    /// Feed a GET reply.
    pub fn on_reply(&mut self, command: Command, frame: &Frame) -> Vec<LinkEvent> {
        let mut events = Vec::new();
        match command {
            Command::GetShift => {
                let shift = frame.value8() as u16;
                self.table.set_shift(Some(shift));
                if self.state == TransferState::FetchShift {
                    debug!(shift, "shift received, fetching timing table");
                    self.state = self.fetch_start();
                }
            }
            Command::GetRecord => {
                let TransferState::FetchRecords { cursor } = self.state else {
                    debug!(state = %self.state, "record reply outside fetch, ignored");
                    return events;
                };
                let payload = frame.record_payload();
                if payload.slot as usize != cursor {
                    debug!(cursor, slot = payload.slot, "record reply for other slot, ignored");
                    return events;
                }
                let record = TimingRecord {
                    rpm: payload.rpm,
                    timing_raw: payload.value as u16,
                };
                if self.table.set(cursor, record).is_err() {
                    return events;
                }
                events.push(LinkEvent::RecordFetched {
                    slot: cursor,
                    rpm: record.rpm,
                    timing_raw: record.timing_raw,
                });
                if cursor + 1 >= self.table.len() {
                    debug!("timing table fetched");
                    self.state = TransferState::SteadyPoll { index: 0 };
                    events.push(LinkEvent::RecordsFetched);
                } else {
                    self.state = TransferState::FetchRecords { cursor: cursor + 1 };
                }
            }
            _ => {}
        }
        events
    }

    /// Feed a SET acknowledgement.
    pub fn on_ack(&mut self, command: Command, frame: &Frame) -> Vec<LinkEvent> {
        let mut events = Vec::new();
        match command {
            Command::SetRecord => {
                let TransferState::StoreRecords { cursor } = self.state else {
                    debug!(state = %self.state, "record ack outside store, ignored");
                    return events;
                };
                let slot = frame.record_payload().slot as usize;
                if slot != cursor {
                    debug!(cursor, slot, "record ack for other slot, ignored");
                    return events;
                }
                events.push(LinkEvent::RecordStored { slot });
                if cursor + 1 >= self.table.len() {
                    events.push(LinkEvent::TimingsAcknowledged);
                    self.state = if self.verify_after_store {
                        debug!("timing table stored, verifying");
                        TransferState::FetchRecords { cursor: 0 }
                    } else {
                        debug!("timing table stored");
                        TransferState::SteadyPoll { index: 0 }
                    };
                } else {
                    self.state = TransferState::StoreRecords { cursor: cursor + 1 };
                }
            }
            Command::SetShift => {
                self.table.set_shift(Some(frame.value8() as u16));
                if matches!(
                    self.state,
                    TransferState::SteadyPoll { .. } | TransferState::FetchShift
                ) {
                    self.state = self.fetch_start();
                }
            }
            _ => {}
        }
        events
    }

    fn fetch_start(&self) -> TransferState {
        if self.revision.has_records() {
            TransferState::FetchRecords { cursor: 0 }
        } else {
            TransferState::SteadyPoll { index: 0 }
        }
    }

    /// A new transfer may only start from steady polling, with a table.
    fn check_can_begin(&self) -> Result<()> {
        if !self.revision.has_records() {
            return Err(Error::Unsupported(format!(
                "timing table on {} firmware",
                self.revision.name
            )));
        }
        if self.state.is_transferring() {
            debug!(state = %self.state, "transfer already running");
            return Err(Error::Busy);
        }
        Ok(())
    }

    /// Start reading the whole table from slot 0.
    ///
    /// Refused with [`Error::Busy`] while another transfer is running, so a
    /// half-written store is never abandoned.
    pub fn begin_fetch(&mut self) -> Result<()> {
        self.check_can_begin()?;
        self.state = TransferState::FetchRecords { cursor: 0 };
        Ok(())
    }

    /// Start writing the whole table from slot 0.
    ///
    /// Refused with [`Error::Busy`] until the table has been read. Every
    /// slot is validated first; on failure nothing changes.
    pub fn begin_store(&mut self) -> Result<()> {
        self.check_can_begin()?;
        self.table.validate(&self.revision)?;
        self.state = TransferState::StoreRecords { cursor: 0 };
        Ok(())
    }

    /// Edit one slot of the local table.
    pub fn set_record(&mut self, slot: usize, record: TimingRecord) -> Result<()> {
        if self.state.is_transferring() {
            return Err(Error::Busy);
        }
        self.table.set(slot, record)
    }

    /// Return to the startup state. The table contents are kept.
    pub fn reset(&mut self) {
        self.state = self.revision.startup_state();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revisions::{angle_probe, cdi, timing_meter};

    fn machine(revision: Revision) -> RecordTransfer {
        RecordTransfer::new(Arc::new(revision))
    }

    fn record_reply(opcode: u8, slot: usize, value: u8, rpm: u16) -> Frame {
        Frame::record(
            opcode,
            RecordPayload {
                slot: slot as u8,
                value,
                rpm,
            },
        )
    }

    fn fetch_all(m: &mut RecordTransfer, opcode: u8) {
        for slot in 0..m.table().len() {
            let req = m.next_request().unwrap();
            assert_eq!(req.command, Command::GetRecord);
            assert_eq!(req.frame.record_payload().slot as usize, slot);
            m.on_reply(
                Command::GetRecord,
                &record_reply(opcode, slot, slot as u8, 1000 + slot as u16 * 240),
            );
        }
    }

    #[test]
    fn cdi_startup_reads_shift_then_table() {
        let mut m = machine(cdi());
        assert_eq!(m.state(), TransferState::FetchShift);
        let req = m.next_request().unwrap();
        assert_eq!(req.command, Command::GetShift);
        assert_eq!(req.frame.command, 0x22);

        // Until the reply arrives the same request is repeated.
        assert_eq!(m.next_request().unwrap().command, Command::GetShift);

        m.on_reply(Command::GetShift, &Frame::with_value(0x22, 25));
        assert_eq!(m.table().shift(), Some(25));
        assert_eq!(m.state(), TransferState::FetchRecords { cursor: 0 });
    }

    #[test]
    fn fetch_fills_every_slot_in_order() {
        let mut m = machine(timing_meter());
        assert_eq!(m.state(), TransferState::FetchRecords { cursor: 0 });

        let mut events = Vec::new();
        for slot in 0..11 {
            let req = m.next_request().unwrap();
            assert_eq!(req.frame.command, 0x02);
            assert_eq!(req.frame.record_payload().slot as usize, slot);
            events.extend(m.on_reply(
                Command::GetRecord,
                &record_reply(0x02, slot, 10 + slot as u8, 1000 + slot as u16),
            ));
        }

        assert_eq!(m.state(), TransferState::SteadyPoll { index: 0 });
        assert_eq!(events.last(), Some(&LinkEvent::RecordsFetched));
        assert_eq!(events.len(), 12);
        for slot in 0..11 {
            let rec = m.table().get(slot).unwrap();
            assert_eq!(rec.rpm, 1000 + slot as u16);
            assert_eq!(rec.timing_raw, 10 + slot as u16);
        }
    }

    #[test]
    fn record_reply_for_wrong_slot_is_ignored() {
        let mut m = machine(timing_meter());
        m.next_request();
        let events = m.on_reply(Command::GetRecord, &record_reply(0x02, 3, 9, 2000));
        assert!(events.is_empty());
        assert_eq!(m.state(), TransferState::FetchRecords { cursor: 0 });
        assert_eq!(m.table().get(3).unwrap(), TimingRecord::default());
    }

    #[test]
    fn lost_reply_repeats_same_slot() {
        let mut m = machine(timing_meter());
        fetch_all(&mut m, 0x02);
        m.begin_fetch().unwrap();
        let first = m.next_request().unwrap();
        let again = m.next_request().unwrap();
        assert_eq!(first, again);
    }

    #[test]
    fn steady_poll_cycles_poll_list() {
        let mut m = machine(angle_probe());
        let commands: Vec<_> = (0..5).map(|_| m.next_request().unwrap().command).collect();
        assert_eq!(
            commands,
            vec![
                Command::GetSpeed,
                Command::GetAngle,
                Command::GetSpeed,
                Command::GetAngle,
                Command::GetSpeed
            ]
        );
    }

    #[test]
    fn store_sends_each_slot_and_returns_to_polling() {
        let mut m = machine(timing_meter());
        fetch_all(&mut m, 0x02);
        m.set_record(
            4,
            TimingRecord {
                rpm: 2500,
                timing_raw: 17,
            },
        )
        .unwrap();
        m.begin_store().unwrap();

        let mut events = Vec::new();
        for slot in 0..11 {
            let req = m.next_request().unwrap();
            assert_eq!(req.command, Command::SetRecord);
            assert_eq!(req.frame.command, 0x82);
            let payload = req.frame.record_payload();
            assert_eq!(payload.slot as usize, slot);
            if slot == 4 {
                assert_eq!(payload.rpm, 2500);
                assert_eq!(payload.value, 17);
            }
            events.extend(m.on_ack(Command::SetRecord, &req.frame));
        }

        assert_eq!(m.state(), TransferState::SteadyPoll { index: 0 });
        assert_eq!(events.len(), 12);
        assert_eq!(events[4], LinkEvent::RecordStored { slot: 4 });
        assert_eq!(events.last(), Some(&LinkEvent::TimingsAcknowledged));
    }

    #[test]
    fn verify_after_store_refetches() {
        let mut m = machine(timing_meter());
        m.set_verify_after_store(true);
        fetch_all(&mut m, 0x02);
        m.begin_store().unwrap();
        for _ in 0..11 {
            let req = m.next_request().unwrap();
            m.on_ack(Command::SetRecord, &req.frame);
        }
        assert_eq!(m.state(), TransferState::FetchRecords { cursor: 0 });
    }

    #[test]
    fn invalid_table_blocks_store() {
        let mut m = machine(cdi());
        m.on_reply(Command::GetShift, &Frame::with_value(0x22, 10));
        fetch_all(&mut m, 0x21);
        m.set_record(
            2,
            TimingRecord {
                rpm: 6000,
                timing_raw: 0,
            },
        )
        .unwrap();

        let result = m.begin_store();
        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(m.state(), TransferState::SteadyPoll { index: 0 });
    }

    #[test]
    fn edits_are_refused_during_transfer() {
        let mut m = machine(timing_meter());
        let result = m.set_record(0, TimingRecord::default());
        assert!(matches!(result, Err(Error::Busy)));
    }

    #[test]
    fn store_refused_until_table_is_read() {
        let mut m = machine(cdi());
        assert!(matches!(m.begin_store(), Err(Error::Busy)));
        assert_eq!(m.state(), TransferState::FetchShift);

        m.on_reply(Command::GetShift, &Frame::with_value(0x22, 10));
        m.next_request();
        m.on_reply(Command::GetRecord, &record_reply(0x21, 0, 3, 60));
        assert!(matches!(m.begin_store(), Err(Error::Busy)));
        assert!(matches!(m.begin_fetch(), Err(Error::Busy)));
        assert_eq!(m.state(), TransferState::FetchRecords { cursor: 1 });
    }

    #[test]
    fn fetch_refused_during_store() {
        let mut m = machine(timing_meter());
        fetch_all(&mut m, 0x02);
        m.begin_store().unwrap();
        let req = m.next_request().unwrap();
        m.on_ack(Command::SetRecord, &req.frame);

        assert!(matches!(m.begin_fetch(), Err(Error::Busy)));
        assert!(matches!(m.begin_store(), Err(Error::Busy)));
        assert_eq!(m.state(), TransferState::StoreRecords { cursor: 1 });
    }

    #[test]
    fn table_operations_unsupported_without_table() {
        let mut m = machine(angle_probe());
        assert!(matches!(m.begin_fetch(), Err(Error::Unsupported(_))));
        assert!(matches!(m.begin_store(), Err(Error::Unsupported(_))));
    }

    #[test]
    fn shift_ack_refetches_table() {
        let mut m = machine(cdi());
        m.on_reply(Command::GetShift, &Frame::with_value(0x22, 10));
        fetch_all(&mut m, 0x21);
        assert_eq!(m.state(), TransferState::SteadyPoll { index: 0 });

        m.on_ack(Command::SetShift, &Frame::with_value(0xA2, 14));
        assert_eq!(m.table().shift(), Some(14));
        assert_eq!(m.state(), TransferState::FetchRecords { cursor: 0 });
    }

    #[test]
    fn reset_returns_to_startup_state() {
        let mut m = machine(cdi());
        m.on_reply(Command::GetShift, &Frame::with_value(0x22, 10));
        m.next_request();
        m.on_reply(Command::GetRecord, &record_reply(0x21, 0, 3, 60));
        assert_eq!(m.state(), TransferState::FetchRecords { cursor: 1 });
        m.reset();
        assert_eq!(m.state(), TransferState::FetchShift);
    }
}
