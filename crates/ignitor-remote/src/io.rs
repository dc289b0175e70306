//! IO task for the remote link.
//!
//! A single spawned task owns the transport and drives the
//! [`TransactionScheduler`]. Its `select!` loop services, in priority order:
//!
//! 1. cancellation,
//! 2. control requests from the handle (transport swap, shutdown),
//! 3. the reply deadline of the outstanding transaction,
//! 4. the poll tick, which may release the next request frame,
//! 5. reading whatever the controller sent.
//!
//! The scheduler sits behind a `std::sync::Mutex` shared with the handle.
//! The lock is taken for each state transition only and is never held
//! across a transport `send` or `receive`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use ignitor_core::error::{Error, Result};
use ignitor_core::events::LinkEvent;
use ignitor_core::transport::Transport;

use crate::codec::decode_frame;
use crate::framer::ReplyFramer;
use crate::scheduler::TransactionScheduler;

/// Scheduler shared between the IO task and the link handle.
pub(crate) type SharedScheduler = Arc<Mutex<TransactionScheduler>>;

/// Lock the scheduler. A panic while holding the lock leaves plain data
/// behind, so a poisoned lock is still usable.
pub(crate) fn lock(scheduler: &SharedScheduler) -> MutexGuard<'_, TransactionScheduler> {
    scheduler.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Timing configuration for the IO task.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IoConfig {
    /// Interval between send attempts.
    pub poll_period: Duration,
    /// Upper bound on a single transport read.
    pub read_period: Duration,
}

/// A control request sent from the link handle to the IO task.
pub(crate) enum Control {
    /// Swap in a new transport; the old one is handed back.
    Reconnect {
        transport: Box<dyn Transport>,
        reply: oneshot::Sender<Box<dyn Transport>>,
    },
    /// Graceful shutdown; returns the transport.
    Shutdown {
        reply: oneshot::Sender<Box<dyn Transport>>,
    },
}

/// Handle to the IO task. Stored inside `RemoteLink`.
pub(crate) struct LinkIo {
    pub control_tx: mpsc::Sender<Control>,
    pub cancel: CancellationToken,
    pub task: JoinHandle<()>,
}

impl LinkIo {
    /// Swap the transport and get the previous one back.
    pub async fn reconnect(&self, transport: Box<dyn Transport>) -> Result<Box<dyn Transport>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.control_tx
            .send(Control::Reconnect {
                transport,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::NotConnected)?;
        reply_rx.await.map_err(|_| Error::NotConnected)
    }

    /// Stop the IO task and recover the transport.
    pub async fn shutdown(&mut self) -> Result<Box<dyn Transport>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self
            .control_tx
            .send(Control::Shutdown { reply: reply_tx })
            .await;
        let transport = reply_rx.await.map_err(|_| Error::NotConnected)?;
        let _ = (&mut self.task).await;
        Ok(transport)
    }
}

/// Spawn the IO task. The caller marks the scheduler connected first so
/// writes can be queued before the task gets to run.
pub(crate) fn spawn_io_task(
    transport: Box<dyn Transport>,
    config: IoConfig,
    scheduler: SharedScheduler,
    event_tx: broadcast::Sender<LinkEvent>,
) -> LinkIo {
    let (control_tx, control_rx) = mpsc::channel::<Control>(8);
    let cancel = CancellationToken::new();

    let task = tokio::spawn(io_loop(
        transport,
        config,
        scheduler,
        event_tx,
        control_rx,
        cancel.clone(),
    ));

    LinkIo {
        control_tx,
        cancel,
        task,
    }
}

fn publish(event_tx: &broadcast::Sender<LinkEvent>, events: Vec<LinkEvent>) {
    for event in events {
        // No subscribers is fine; readings are superseded on the next poll.
        let _ = event_tx.send(event);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Run every complete frame in the framer through the scheduler.
fn drain_frames(
    framer: &mut ReplyFramer,
    scheduler: &SharedScheduler,
    event_tx: &broadcast::Sender<LinkEvent>,
) {
    let mut events = Vec::new();
    {
        let mut s = lock(scheduler);
        let now = Instant::now();
        while let Some(raw) = framer.try_extract_frame() {
            trace!(frame = ?raw, "<- frame");
            match decode_frame(&raw) {
                Ok(frame) => events.extend(s.on_frame(&frame, now)),
                Err(e) => {
                    s.on_decode_error(&e);
                    framer.reject(&raw);
                }
            }
        }
        s.add_discarded(framer.take_discarded());
    }
    publish(event_tx, events);
}

/// The main IO loop.
async fn io_loop(
    mut transport: Box<dyn Transport>,
    config: IoConfig,
    scheduler: SharedScheduler,
    event_tx: broadcast::Sender<LinkEvent>,
    mut control_rx: mpsc::Receiver<Control>,
    cancel: CancellationToken,
) {
    let mut framer = ReplyFramer::new();
    let mut poll = tokio::time::interval(config.poll_period);
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut buf = [0u8; 64];
    let mut read_failing = false;

    publish(&event_tx, vec![LinkEvent::Connected]);

    loop {
        let deadline = lock(&scheduler).next_deadline();

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("IO task cancelled");
                break;
            }

            ctrl = control_rx.recv() => {
                match ctrl {
                    Some(Control::Reconnect { transport: new, reply }) => {
                        {
                            let mut s = lock(&scheduler);
                            s.reset();
                            s.set_connected(true);
                        }
                        framer.clear();
                        read_failing = false;
                        let old = std::mem::replace(&mut transport, new);
                        debug!("transport swapped");
                        let _ = reply.send(old);
                        publish(&event_tx, vec![LinkEvent::Disconnected, LinkEvent::Connected]);
                    }
                    Some(Control::Shutdown { reply }) => {
                        debug!("IO task shutdown requested");
                        {
                            let mut s = lock(&scheduler);
                            s.set_connected(false);
                            s.reset();
                        }
                        publish(&event_tx, vec![LinkEvent::Disconnected]);
                        let _ = reply.send(transport);
                        return;
                    }
                    None => {
                        debug!("link handle dropped, exiting IO task");
                        break;
                    }
                }
            }

            _ = sleep_until(deadline) => {
                let events = lock(&scheduler).on_timeout(Instant::now());
                publish(&event_tx, events);
            }

            _ = poll.tick() => {
                let request = lock(&scheduler).poll_tick(Instant::now());
                if let Some(bytes) = request {
                    trace!(frame = ?bytes, "-> frame");
                    if let Err(e) = transport.send(&bytes).await {
                        let events = lock(&scheduler).on_send_failed(&e);
                        publish(&event_tx, events);
                    }
                }
            }

            received = async {
                match transport.receive(&mut buf, config.read_period).await {
                    Ok(n) => Some(n),
                    Err(Error::Timeout) => None,
                    Err(e) => {
                        if !read_failing {
                            warn!(error = %e, "transport read failed");
                            read_failing = true;
                        }
                        tokio::time::sleep(config.read_period).await;
                        None
                    }
                }
            } => {
                if let Some(n) = received {
                    read_failing = false;
                    framer.feed(&buf[..n]);
                    drain_frames(&mut framer, &scheduler, &event_tx);
                }
            }
        }
    }

    lock(&scheduler).set_connected(false);
    publish(&event_tx, vec![LinkEvent::Disconnected]);
}
