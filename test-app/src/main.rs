// ignitor test application -- CLI tool for exercising the remote link
// against a real controller or the built-in emulator.
//
// Usage:
//   ignitor-test-app list
//   ignitor-test-app --revision cdi info
//   ignitor-test-app --revision cdi --port /dev/ttyUSB0 monitor --duration 10
//   ignitor-test-app --revision timing_meter --mock led on
//   ignitor-test-app --revision angle_probe --port COM3 angle 25
//   ignitor-test-app --revision cdi --port /dev/ttyUSB0 shift 7
//   ignitor-test-app --revision cdi --port /dev/ttyUSB0 records fetch
//   ignitor-test-app --revision cdi --mock records set 3 2100 18 --save
//
// Logging goes to stderr through tracing-subscriber; set RUST_LOG (e.g.
// RUST_LOG=ignitor_remote=trace) to see every frame on the wire.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use ignitor::remote::revisions;
use ignitor::{Command as RemoteCommand, LinkBuilder, LinkEvent, RemoteLink, Revision};
use ignitor_test_harness::{Firmware, MockController};

/// How long a single write may take before we give up waiting for its
/// acknowledgement. Well above the engine's own reply timeout.
const WRITE_WAIT: Duration = Duration::from_secs(3);

/// Upper bound on a whole-table transfer.
const TRANSFER_WAIT: Duration = Duration::from_secs(15);

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// ignitor test application -- exercises the ignition controller link from
/// the command line.
#[derive(Parser)]
#[command(name = "ignitor-test-app", version, about)]
struct Cli {
    /// Firmware revision: angle_probe, timing_meter, cdi.
    /// Required for all commands except `list`.
    #[arg(long)]
    revision: Option<String>,

    /// Serial port path (e.g. /dev/ttyUSB0, COM3).
    /// Required unless --mock is used.
    #[arg(long)]
    port: Option<String>,

    /// Override the revision's default baud rate.
    #[arg(long)]
    baud: Option<u32>,

    /// Interval between send attempts, in milliseconds.
    #[arg(long)]
    poll_ms: Option<u64>,

    /// Reply timeout, in milliseconds.
    #[arg(long)]
    reply_timeout_ms: Option<u64>,

    /// Re-read the timing table after every store.
    #[arg(long)]
    verify: bool,

    /// Talk to the built-in controller emulator instead of a serial port.
    #[arg(long)]
    mock: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List all known firmware revisions.
    List,

    /// Print the command table of the selected revision.
    Info,

    /// Subscribe to link events and print them in real time.
    Monitor {
        /// Duration in seconds (0 = run for an hour).
        #[arg(long, default_value_t = 0)]
        duration: u64,
    },

    /// Switch the status LED (timing_meter only).
    Led {
        #[arg(value_enum)]
        state: OnOff,
    },

    /// Write the ignition angle (angle_probe only).
    Angle {
        /// Angle value as understood by the firmware.
        value: u32,
    },

    /// Write the reference shift angle (cdi only), then re-read the table.
    Shift {
        /// Shift in degrees.
        value: u8,
    },

    /// Commit the controller's timing table to non-volatile memory (cdi only).
    Save,

    /// Timing table operations.
    Records {
        #[command(subcommand)]
        action: RecordsAction,
    },
}

#[derive(Subcommand)]
enum RecordsAction {
    /// Read the whole table and print it.
    Fetch,

    /// Edit one slot and store the whole table.
    Set {
        /// Slot index.
        slot: usize,
        /// RPM breakpoint.
        rpm: u16,
        /// Effective timing in degrees.
        timing: u16,
        /// Commit to non-volatile memory after the store (cdi only).
        #[arg(long)]
        save: bool,
    },

    /// Write the table as currently read back to the controller.
    Store,
}

#[derive(Clone, Copy, ValueEnum)]
enum OnOff {
    On,
    Off,
}

// ---------------------------------------------------------------------------
// Link construction
// ---------------------------------------------------------------------------

fn lookup_revision(cli: &Cli) -> Result<Revision> {
    let name = cli
        .revision
        .as_deref()
        .context("--revision is required for this command")?;
    revisions::by_name(name).with_context(|| {
        let known: Vec<_> = revisions::all().iter().map(|r| r.name).collect();
        format!("unknown revision '{name}' (known: {})", known.join(", "))
    })
}

fn firmware_for(revision: &Revision) -> Result<Firmware> {
    match revision.name {
        "angle_probe" => Ok(Firmware::AngleProbe),
        "timing_meter" => Ok(Firmware::TimingMeter),
        "cdi" => Ok(Firmware::Cdi),
        other => bail!("no emulator for revision '{other}'"),
    }
}

async fn create_link(cli: &Cli) -> Result<RemoteLink> {
    let revision = lookup_revision(cli)?;
    let name = revision.name;
    let firmware = firmware_for(&revision);

    let mut builder = LinkBuilder::new(revision).verify_after_store(cli.verify);
    if let Some(ms) = cli.poll_ms {
        builder = builder.poll_period(Duration::from_millis(ms));
    }
    if let Some(ms) = cli.reply_timeout_ms {
        builder = builder.reply_timeout(Duration::from_millis(ms));
    }
    if let Some(baud) = cli.baud {
        builder = builder.baud_rate(baud);
    }

    if cli.mock {
        let device = MockController::new(firmware?);
        device.set_rpm(1850);
        device.set_shift(40);
        let link = builder
            .build_with_transport(Box::new(device))
            .await
            .context("failed to build link with emulated controller")?;
        println!("Connected (emulator) -- {name}");
        Ok(link)
    } else {
        let port = cli
            .port
            .as_deref()
            .context("--port is required when not using --mock")?;
        let link = builder
            .serial_port(port)
            .build()
            .await
            .with_context(|| format!("failed to open serial port {port}"))?;
        println!("Connected to {port} -- {name}");
        Ok(link)
    }
}

// ---------------------------------------------------------------------------
// Event helpers
// ---------------------------------------------------------------------------

/// Wait for the acknowledgement of a queued write. Returns the echoed value.
async fn await_write(
    events: &mut broadcast::Receiver<LinkEvent>,
    command: RemoteCommand,
) -> Result<u32> {
    let outcome = tokio::time::timeout(WRITE_WAIT, async {
        loop {
            match events.recv().await {
                Ok(LinkEvent::WriteAcknowledged { command: c, value }) if c == command => {
                    return Ok(value);
                }
                Ok(LinkEvent::ReplyTimeout { command: c }) if c == command => {
                    bail!("controller did not acknowledge {command}");
                }
                Ok(LinkEvent::TransportError { message }) => {
                    bail!("transport error while sending {command}: {message}");
                }
                Ok(event) => debug!(?event, "ignored while waiting for ack"),
                Err(RecvError::Lagged(n)) => debug!(missed = n, "event receiver lagged"),
                Err(RecvError::Closed) => bail!("link closed"),
            }
        }
    })
    .await;

    outcome.with_context(|| format!("no outcome for {command} within {WRITE_WAIT:?}"))?
}

/// Wait until no table transfer is running.
async fn await_transfer(link: &RemoteLink) -> Result<()> {
    tokio::time::timeout(TRANSFER_WAIT, async {
        while link.state().is_transferring() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .with_context(|| {
        format!(
            "timing table transfer stuck in {} after {TRANSFER_WAIT:?}",
            link.state()
        )
    })
}

fn print_table(link: &RemoteLink) {
    if let Some(shift) = link.shift() {
        println!("Shift: {shift}");
    }
    println!("{:>4}  {:>6}  {:>5}  {:>6}", "slot", "rpm", "raw", "timing");
    for (slot, (record, timing)) in link
        .records()
        .iter()
        .zip(link.computed_values())
        .enumerate()
    {
        let timing = timing.map_or_else(|| "-".to_string(), |t| t.to_string());
        println!(
            "{slot:>4}  {:>6}  {:>5}  {timing:>6}",
            record.rpm, record.timing_raw
        );
    }
}

fn print_stats(link: &RemoteLink) {
    let stats = link.stats();
    println!("Link statistics:");
    println!("  frames sent:        {}", stats.frames_sent);
    println!("  replies accepted:   {}", stats.replies_accepted);
    println!("  stray replies:      {}", stats.stray_replies);
    println!("  decode failures:    {}", stats.decode_failures());
    println!("  unknown commands:   {}", stats.unknown_commands);
    println!("  bytes discarded:    {}", stats.bytes_discarded);
    println!("  reply timeouts:     {}", stats.reply_timeouts);
    println!("  transport errors:   {}", stats.transport_errors);
}

// ---------------------------------------------------------------------------
// Command implementations
// ---------------------------------------------------------------------------

fn cmd_list() -> Result<()> {
    println!("{:<14} {:>6} {:>6} {:>6}", "revision", "baud", "slots", "shift");
    for rev in revisions::all() {
        println!(
            "{:<14} {:>6} {:>6} {:>6}",
            rev.name,
            rev.default_baud_rate,
            rev.record_slots,
            if rev.has_shift() { "yes" } else { "no" }
        );
    }
    Ok(())
}

fn cmd_info(revision: &Revision) -> Result<()> {
    println!("Revision:   {}", revision.name);
    println!("Baud rate:  {}", revision.default_baud_rate);
    println!("Slots:      {}", revision.record_slots);
    if revision.has_records() {
        println!("RPM max:    {}", revision.rpm_max);
        println!(
            "Timing:     {}..={} (raw max {})",
            revision.timing_min, revision.timing_max, revision.value_max
        );
    }
    let poll: Vec<String> = revision.poll_list.iter().map(|c| c.to_string()).collect();
    println!("Poll list:  {}", poll.join(", "));
    println!();
    println!("{:<12} {:>6} {:>4}  layout", "command", "opcode", "dir");
    for spec in &revision.commands {
        println!(
            "{:<12} {:>#6x} {:>4}  {:?}",
            spec.command.to_string(),
            spec.opcode,
            spec.direction().to_string(),
            spec.layout
        );
    }
    Ok(())
}

async fn cmd_monitor(link: &RemoteLink, duration_secs: u64) -> Result<()> {
    let mut events = link.subscribe();
    println!("Monitoring link events...");

    let run_for = if duration_secs > 0 {
        Duration::from_secs(duration_secs)
    } else {
        Duration::from_secs(3600)
    };
    let deadline = Instant::now() + run_for;

    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Ok(LinkEvent::Reading { quantity, value })) => {
                println!("[reading] {quantity} = {value}");
            }
            Ok(Ok(LinkEvent::RecordsFetched)) => {
                println!("[table] fetched");
                print_table(link);
            }
            Ok(Ok(event)) => println!("[event] {event:?}"),
            Ok(Err(RecvError::Lagged(n))) => {
                println!("[warning] missed {n} events (consumer too slow)");
            }
            Ok(Err(RecvError::Closed)) => {
                println!("Event channel closed.");
                break;
            }
            Err(_) => {
                println!("Monitor duration elapsed.");
                break;
            }
        }
    }

    print_stats(link);
    Ok(())
}

async fn cmd_write(link: &RemoteLink, command: RemoteCommand, value: u32) -> Result<()> {
    let mut events = link.subscribe();
    link.enqueue_write(command, value)
        .with_context(|| format!("{command} {value} refused"))?;
    let echoed = await_write(&mut events, command).await?;
    println!("{command} acknowledged (value {echoed})");
    Ok(())
}

async fn cmd_shift(link: &RemoteLink, shift: u8) -> Result<()> {
    let mut events = link.subscribe();
    link.set_shift(shift)
        .with_context(|| format!("shift {shift} refused"))?;
    let echoed = await_write(&mut events, RemoteCommand::SetShift).await?;
    println!("Shift acknowledged ({echoed}); re-reading table");
    // The ack flips the transfer into a fetch before the event goes out.
    await_transfer(link).await?;
    print_table(link);
    Ok(())
}

async fn cmd_records_fetch(link: &RemoteLink) -> Result<()> {
    await_transfer(link).await?;
    link.begin_fetch().context("cannot fetch timing table")?;
    await_transfer(link).await?;
    print_table(link);
    Ok(())
}

async fn cmd_records_store(link: &RemoteLink) -> Result<()> {
    let mut events = link.subscribe();
    link.begin_store().context("cannot store timing table")?;

    tokio::time::timeout(TRANSFER_WAIT, async {
        loop {
            match events.recv().await {
                Ok(LinkEvent::RecordStored { slot }) => println!("  slot {slot} stored"),
                Ok(LinkEvent::TimingsAcknowledged) => return Ok(()),
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => bail!("link closed during store"),
            }
        }
    })
    .await
    .context("timing table store did not finish")??;

    await_transfer(link).await?;
    println!("Timing table stored");
    Ok(())
}

async fn cmd_records_set(
    link: &RemoteLink,
    slot: usize,
    rpm: u16,
    timing: u16,
    save: bool,
) -> Result<()> {
    // Edits are refused while the startup fetch is still running.
    await_transfer(link).await?;
    link.set_timing(slot, rpm, timing)
        .with_context(|| format!("slot {slot}: rpm {rpm} timing {timing} rejected"))?;
    cmd_records_store(link).await?;
    if save {
        cmd_write(link, RemoteCommand::SaveMemory, 0).await?;
    }
    print_table(link);
    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.mock && cli.port.is_some() {
        bail!("--mock and --port are mutually exclusive");
    }

    // Neither command needs a connection.
    match &cli.command {
        Command::List => return cmd_list(),
        Command::Info => return cmd_info(&lookup_revision(&cli)?),
        _ => {}
    }

    let link = create_link(&cli).await?;
    info!(revision = link.revision().name, "link up");

    let result = match &cli.command {
        Command::Monitor { duration } => cmd_monitor(&link, *duration).await,
        Command::Led { state } => {
            let on = matches!(state, OnOff::On);
            cmd_write(&link, RemoteCommand::SetLed, on as u32).await
        }
        Command::Angle { value } => cmd_write(&link, RemoteCommand::SetAngle, *value).await,
        Command::Shift { value } => cmd_shift(&link, *value).await,
        Command::Save => cmd_write(&link, RemoteCommand::SaveMemory, 0).await,
        Command::Records { action } => match action {
            RecordsAction::Fetch => cmd_records_fetch(&link).await,
            RecordsAction::Set {
                slot,
                rpm,
                timing,
                save,
            } => cmd_records_set(&link, *slot, *rpm, *timing, *save).await,
            RecordsAction::Store => {
                await_transfer(&link).await?;
                cmd_records_store(&link).await
            }
        },
        Command::List | Command::Info => unreachable!("handled above"),
    };

    link.shutdown().await.ok();
    result
}
