//! RemoteLink -- handle to a running request/reply engine.
//!
//! The handle is what the presentation layer talks to. Writes are queued,
//! never awaited: [`RemoteLink::set_led`] and friends return as soon as the
//! request is validated, and the outcome arrives later as a
//! [`LinkEvent::WriteAcknowledged`] or [`LinkEvent::ReplyTimeout`] on the
//! event stream. Table and reading state can be inspected at any time.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use ignitor_core::error::{Error, Result};
use ignitor_core::events::LinkEvent;
use ignitor_core::transport::Transport;
use ignitor_core::types::{Command, LinkStats};

use crate::io::{self, IoConfig, LinkIo, SharedScheduler};
use crate::record::TimingRecord;
use crate::revisions::Revision;
use crate::scheduler::TransactionScheduler;
use crate::transfer::TransferState;

/// A connected ignition controller.
///
/// Constructed via [`LinkBuilder`](crate::builder::LinkBuilder). Dropping the
/// handle stops the IO task.
pub struct RemoteLink {
    io: LinkIo,
    revision: Arc<Revision>,
    scheduler: SharedScheduler,
    event_tx: broadcast::Sender<LinkEvent>,
}

impl Drop for RemoteLink {
    fn drop(&mut self) {
        self.io.cancel.cancel();
        self.io.task.abort();
    }
}

impl RemoteLink {
    /// Create a link and spawn its IO task.
    ///
    /// Called by [`LinkBuilder`](crate::builder::LinkBuilder); callers
    /// should use the builder API instead.
    pub(crate) fn new(
        transport: Box<dyn Transport>,
        mut scheduler: TransactionScheduler,
        config: IoConfig,
        event_capacity: usize,
    ) -> Self {
        let revision = Arc::new(scheduler.revision().clone());
        scheduler.set_connected(true);
        let scheduler: SharedScheduler = Arc::new(std::sync::Mutex::new(scheduler));
        let (event_tx, _) = broadcast::channel(event_capacity);
        let io = io::spawn_io_task(transport, config, scheduler.clone(), event_tx.clone());
        debug!(revision = revision.name, "remote link started");
        Self {
            io,
            revision,
            scheduler,
            event_tx,
        }
    }

    /// The firmware revision this link was built for.
    pub fn revision(&self) -> &Revision {
        &self.revision
    }

    /// Subscribe to link events.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.event_tx.subscribe()
    }

    // -----------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------

    /// Queue a single-value SET command for the next free poll tick.
    pub fn enqueue_write(&self, command: Command, value: u32) -> Result<()> {
        io::lock(&self.scheduler).enqueue_write(command, value)
    }

    /// Switch the status LED.
    pub fn set_led(&self, on: bool) -> Result<()> {
        self.enqueue_write(Command::SetLed, on as u32)
    }

    /// Write the ignition angle.
    pub fn set_angle(&self, angle: u32) -> Result<()> {
        self.enqueue_write(Command::SetAngle, angle)
    }

    /// Write the reference shift. Once acknowledged, the table is re-read
    /// because its effective timings have moved.
    pub fn set_shift(&self, shift: u8) -> Result<()> {
        self.enqueue_write(Command::SetShift, shift as u32)
    }

    /// Commit the controller's table to non-volatile memory.
    pub fn save_memory(&self) -> Result<()> {
        self.enqueue_write(Command::SaveMemory, 0)
    }

    // -----------------------------------------------------------------
    // Timing table
    // -----------------------------------------------------------------

    /// Re-read the whole timing table from the controller. Refused with
    /// [`Error::Busy`] while a fetch or store is running.
    pub fn begin_fetch(&self) -> Result<()> {
        io::lock(&self.scheduler).begin_fetch()
    }

    /// Write the local timing table to the controller, slot by slot. Refused
    /// with [`Error::Busy`] until the table has been read and while another
    /// transfer is running.
    pub fn begin_store(&self) -> Result<()> {
        io::lock(&self.scheduler).begin_store()
    }

    /// Edit one slot of the local table. Refused with [`Error::Busy`] while a
    /// transfer is running.
    pub fn set_record(&self, slot: usize, record: TimingRecord) -> Result<()> {
        io::lock(&self.scheduler).set_record(slot, record)
    }

    /// Edit one slot in terms of effective timing rather than raw value.
    ///
    /// On firmware with an RPM grid the breakpoint must sit on it.
    pub fn set_timing(&self, slot: usize, rpm: u16, timing: u16) -> Result<()> {
        let mut s = io::lock(&self.scheduler);
        let timing_raw = s.table().raw_for_timing(&self.revision, timing)?;
        if rpm > self.revision.rpm_max {
            return Err(Error::InvalidParameter(format!(
                "rpm {rpm} above {}",
                self.revision.rpm_max
            )));
        }
        let step = self.revision.rpm_step;
        if step > 0 && rpm % step != 0 {
            return Err(Error::InvalidParameter(format!(
                "rpm {rpm} not a multiple of {step}"
            )));
        }
        s.set_record(slot, TimingRecord { rpm, timing_raw })
    }

    /// Snapshot of the local timing table.
    pub fn records(&self) -> Vec<TimingRecord> {
        io::lock(&self.scheduler).table().records().to_vec()
    }

    /// Effective timing of every slot (see
    /// [`RecordTable::computed_value`](crate::record::RecordTable::computed_value)).
    pub fn computed_values(&self) -> Vec<Option<i32>> {
        let s = io::lock(&self.scheduler);
        let table = s.table();
        (0..table.len()).map(|slot| table.computed_value(slot)).collect()
    }

    /// Reference shift, once known.
    pub fn shift(&self) -> Option<u16> {
        io::lock(&self.scheduler).table().shift()
    }

    // -----------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------

    /// Current transfer state.
    pub fn state(&self) -> TransferState {
        io::lock(&self.scheduler).transfer_state()
    }

    /// Link-health counters.
    pub fn stats(&self) -> LinkStats {
        io::lock(&self.scheduler).stats()
    }

    /// Whether no transaction is outstanding.
    pub fn is_idle(&self) -> bool {
        io::lock(&self.scheduler).is_idle()
    }

    // -----------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------

    /// Switch to a new transport (the operator picked another port).
    ///
    /// Latches, deadline, pending write, and transfer cursor are reset in
    /// one step before the new transport is used. The old transport is
    /// returned unclosed.
    pub async fn reconnect(&self, transport: Box<dyn Transport>) -> Result<Box<dyn Transport>> {
        self.io.reconnect(transport).await
    }

    /// Stop the IO task and recover the transport.
    pub async fn shutdown(mut self) -> Result<Box<dyn Transport>> {
        self.io.shutdown().await
    }
}
