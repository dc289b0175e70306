//! Half-duplex transaction scheduler.
//!
//! The controller answers every request with exactly one reply and cannot
//! queue, so the host must never have more than one frame in flight. The
//! scheduler enforces that with two latches, one for GET requests and one
//! for SET writes; a new frame is only released when both are idle.
//!
//! Each poll tick the scheduler picks the next frame: a pending operator
//! write if there is one, otherwise whatever the [`RecordTransfer`] machine
//! asks for. Sending arms a reply deadline. A matching reply releases the
//! latch; if the deadline passes first the transaction is abandoned and the
//! next tick moves on. Nothing is ever resent by the scheduler itself.
//!
//! The scheduler is synchronous and owns no I/O. The IO task locks it around
//! each transition and does the actual reads and writes with the lock
//! released.

use std::sync::Arc;
use std::time::Duration;

use ignitor_core::{Command, Direction, Error, LinkEvent, LinkStats, Quantity, Result};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::codec::{encode_frame, Frame};
use crate::record::{RecordTable, TimingRecord};
use crate::revisions::Revision;
use crate::transfer::{RecordTransfer, TransferState};

/// Default time to wait for a reply before abandoning a transaction.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_millis(500);

/// State of one direction's outstanding transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Latch {
    /// Nothing outstanding.
    Idle,
    /// A frame was sent and its reply has not arrived.
    AwaitingReply { command: Command, opcode: u8 },
}

impl Latch {
    pub fn is_idle(&self) -> bool {
        matches!(self, Latch::Idle)
    }

    fn command(&self) -> Option<Command> {
        match self {
            Latch::Idle => None,
            Latch::AwaitingReply { command, .. } => Some(*command),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingWrite {
    command: Command,
    frame: Frame,
}

/// Request/reply transaction scheduler.
#[derive(Debug)]
pub struct TransactionScheduler {
    revision: Arc<Revision>,
    transfer: RecordTransfer,
    request: Latch,
    write: Latch,
    pending_write: Option<PendingWrite>,
    deadline: Option<Instant>,
    reply_timeout: Duration,
    connected: bool,
    stats: LinkStats,
}

impl TransactionScheduler {
    /// Create a scheduler for `revision`. It starts disconnected.
    pub fn new(revision: Arc<Revision>, reply_timeout: Duration) -> Self {
        Self {
            transfer: RecordTransfer::new(revision.clone()),
            revision,
            request: Latch::Idle,
            write: Latch::Idle,
            pending_write: None,
            deadline: None,
            reply_timeout,
            connected: false,
            stats: LinkStats::default(),
        }
    }

    pub fn set_verify_after_store(&mut self, verify: bool) {
        self.transfer.set_verify_after_store(verify);
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Whether no transaction is outstanding in either direction.
    pub fn is_idle(&self) -> bool {
        self.request.is_idle() && self.write.is_idle()
    }

    pub fn request_latch(&self) -> Latch {
        self.request
    }

    pub fn write_latch(&self) -> Latch {
        self.write
    }

    /// When the outstanding transaction times out, if one is outstanding.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    /// Record bytes the framer dropped while resynchronising.
    pub fn add_discarded(&mut self, bytes: u64) {
        self.stats.bytes_discarded += bytes;
    }

    pub fn revision(&self) -> &Revision {
        &self.revision
    }

    pub fn transfer_state(&self) -> TransferState {
        self.transfer.state()
    }

    pub fn table(&self) -> &RecordTable {
        self.transfer.table()
    }

    pub fn has_pending_write(&self) -> bool {
        self.pending_write.is_some()
    }

    // -----------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------

    /// Pick the next frame to send, if the channel is free.
    ///
    /// Returns the encoded bytes; the caller must write them and report a
    /// failure through [`on_send_failed`](Self::on_send_failed).
    pub fn poll_tick(&mut self, now: Instant) -> Option<Vec<u8>> {
        if !self.connected || !self.is_idle() {
            return None;
        }

        let (command, frame) = match self.pending_write.take() {
            Some(write) => (write.command, write.frame),
            None => {
                let request = self.transfer.next_request()?;
                (request.command, request.frame)
            }
        };

        let latch = Latch::AwaitingReply {
            command,
            opcode: frame.command,
        };
        match command.direction() {
            Direction::Get => self.request = latch,
            Direction::Set => self.write = latch,
        }
        self.deadline = Some(now + self.reply_timeout);
        self.stats.frames_sent += 1;

        trace!(%command, opcode = frame.command, "sending request");
        Some(encode_frame(&frame))
    }

    /// Queue a single-value SET command for the next free tick.
    ///
    /// Never blocks. Only one write is held; a newer one replaces an older
    /// one that has not gone out yet.
    pub fn enqueue_write(&mut self, command: Command, value: u32) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        let spec = *self.revision.require(command)?;
        if spec.direction() != Direction::Set || command.is_record() {
            return Err(Error::Unsupported(format!(
                "{command} is not a single-value write"
            )));
        }
        if value > spec.layout.max_value() {
            return Err(Error::Validation(format!(
                "{command} value {value} above {}",
                spec.layout.max_value()
            )));
        }
        if command == Command::SetShift {
            let (min, max) = (self.revision.timing_min as u32, self.revision.value_max as u32);
            if value < min || value > max {
                return Err(Error::Validation(format!(
                    "shift {value} outside {min}..={max}"
                )));
            }
        }

        let frame = Frame::with_value(spec.opcode, value);
        if let Some(old) = self.pending_write.replace(PendingWrite { command, frame }) {
            debug!(replaced = %old.command, by = %command, "pending write superseded");
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Receiving
    // -----------------------------------------------------------------

    /// Process a decoded reply.
    pub fn on_frame(&mut self, frame: &Frame, _now: Instant) -> Vec<LinkEvent> {
        let Some(spec) = self.revision.by_opcode(frame.command).copied() else {
            self.stats.unknown_commands += 1;
            warn!(
                opcode = frame.command,
                direction = %Direction::of(frame.command),
                "reply with unknown command, dropped"
            );
            return Vec::new();
        };

        let latch = match spec.direction() {
            Direction::Get => &mut self.request,
            Direction::Set => &mut self.write,
        };
        let matched = matches!(*latch, Latch::AwaitingReply { opcode, .. } if opcode == frame.command);
        if matched {
            *latch = Latch::Idle;
            self.deadline = None;
            self.stats.replies_accepted += 1;
        } else {
            self.stats.stray_replies += 1;
            debug!(command = %spec.command, "reply without matching request");
        }

        let mut events = Vec::new();
        match spec.direction() {
            Direction::Get => {
                if let Some(quantity) = Quantity::for_command(spec.command) {
                    events.push(LinkEvent::Reading {
                        quantity,
                        value: spec.layout.decode(frame),
                    });
                }
                events.extend(self.transfer.on_reply(spec.command, frame));
            }
            // Stray acks never touch transfer state.
            Direction::Set if matched => {
                if !spec.command.is_record() {
                    events.push(LinkEvent::WriteAcknowledged {
                        command: spec.command,
                        value: spec.layout.decode(frame),
                    });
                }
                events.extend(self.transfer.on_ack(spec.command, frame));
            }
            Direction::Set => {}
        }
        events
    }

    /// Count a candidate frame that failed to decode. Latches are untouched;
    /// the deadline takes care of the lost reply.
    pub fn on_decode_error(&mut self, error: &Error) {
        match error {
            Error::ChecksumMismatch { .. } => self.stats.checksum_failures += 1,
            e if e.is_frame_error() => self.stats.header_failures += 1,
            _ => {
                warn!(%error, "unexpected error reported as decode failure");
                return;
            }
        }
        debug!(%error, "dropping undecodable frame");
    }

    /// Abandon the outstanding transaction if its deadline has passed.
    pub fn on_timeout(&mut self, now: Instant) -> Vec<LinkEvent> {
        match self.deadline {
            Some(deadline) if now >= deadline => {}
            _ => return Vec::new(),
        }
        let command = self.write.command().or(self.request.command());
        self.request = Latch::Idle;
        self.write = Latch::Idle;
        self.deadline = None;

        match command {
            Some(command) => {
                self.stats.reply_timeouts += 1;
                debug!(%command, "reply timeout");
                vec![LinkEvent::ReplyTimeout { command }]
            }
            None => Vec::new(),
        }
    }

    /// Abandon the transaction whose frame could not be written.
    pub fn on_send_failed(&mut self, error: &Error) -> Vec<LinkEvent> {
        self.request = Latch::Idle;
        self.write = Latch::Idle;
        self.deadline = None;
        self.stats.transport_errors += 1;
        warn!(%error, "failed to send request");
        vec![LinkEvent::TransportError {
            message: error.to_string(),
        }]
    }

    // -----------------------------------------------------------------
    // Table transfer
    // -----------------------------------------------------------------

    pub fn begin_fetch(&mut self) -> Result<()> {
        self.transfer.begin_fetch()
    }

    pub fn begin_store(&mut self) -> Result<()> {
        self.transfer.begin_store()
    }

    pub fn set_record(&mut self, slot: usize, record: TimingRecord) -> Result<()> {
        self.transfer.set_record(slot, record)
    }

    /// Forget all transaction state, as after a transport swap.
    pub fn reset(&mut self) {
        self.request = Latch::Idle;
        self.write = Latch::Idle;
        self.deadline = None;
        if self.pending_write.take().is_some() {
            debug!("pending write dropped on reset");
        }
        self.transfer.reset();
    }
}
