//! Firmware revision capability tables.
//!
//! The controller firmware went through several protocol revisions that
//! share the frame format but disagree on opcodes, payload widths, and
//! which commands exist at all. Each revision is described by a
//! [`Revision`] value holding its command table, timing-table geometry, and
//! value bounds. The engine consults the table for every frame it builds or
//! interprets; nothing revision-specific is hard-coded elsewhere.
//!
//! Revisions are defined as factory functions that return a fully populated
//! [`Revision`]:
//!
//! | Revision       | RPM     | Table    | Shift | Writes                              |
//! |----------------|---------|----------|-------|-------------------------------------|
//! | `angle_probe`  | speed   | none     | no    | angle                               |
//! | `timing_meter` | u32     | 11 slots | no    | table, LED                          |
//! | `cdi`          | u16     | 11 slots | yes   | table, shift, commit to memory      |

use ignitor_core::{Command, Direction, Error, Result};

use crate::transfer::TransferState;

/// How a command's 4-byte payload is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadLayout {
    /// No payload; all four bytes are zero.
    Empty,
    /// A single on/off byte (`0` or `1`).
    Flag,
    /// One unsigned byte.
    Value8,
    /// One little-endian `u16`.
    Value16,
    /// One little-endian `u32`.
    Value32,
    /// A timing-table slot: index, value, RPM.
    Record,
}

impl PayloadLayout {
    /// Largest value that fits this layout.
    pub fn max_value(&self) -> u32 {
        match self {
            PayloadLayout::Empty => 0,
            PayloadLayout::Flag => 1,
            PayloadLayout::Value8 => u8::MAX as u32,
            PayloadLayout::Value16 => u16::MAX as u32,
            PayloadLayout::Value32 | PayloadLayout::Record => u32::MAX,
        }
    }

    /// Decode a reply value according to this layout.
    pub fn decode(&self, frame: &crate::codec::Frame) -> u32 {
        match self {
            PayloadLayout::Empty => 0,
            PayloadLayout::Flag | PayloadLayout::Value8 => frame.value8() as u32,
            PayloadLayout::Value16 => frame.value16() as u32,
            PayloadLayout::Value32 | PayloadLayout::Record => frame.value32(),
        }
    }
}

/// One entry of a revision's command table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    /// Logical command.
    pub command: Command,
    /// Command byte on the wire.
    pub opcode: u8,
    /// Payload interpretation.
    pub layout: PayloadLayout,
}

impl CommandSpec {
    const fn new(command: Command, opcode: u8, layout: PayloadLayout) -> Self {
        Self {
            command,
            opcode,
            layout,
        }
    }

    /// Direction of this command. Taken from the logical command, not from
    /// the opcode's top bit.
    pub fn direction(&self) -> Direction {
        self.command.direction()
    }
}

/// Static description of one firmware protocol revision.
#[derive(Debug, Clone, PartialEq)]
pub struct Revision {
    /// Short identifier, also accepted by [`by_name`].
    pub name: &'static str,
    /// Default serial baud rate.
    pub default_baud_rate: u32,
    /// Command table.
    pub commands: Vec<CommandSpec>,
    /// Number of timing-table slots (zero if the revision has no table).
    pub record_slots: usize,
    /// Commands cycled through while idle.
    pub poll_list: Vec<Command>,
    /// Largest RPM breakpoint a slot may hold.
    pub rpm_max: u16,
    /// Grid that operator-entered RPM breakpoints must sit on; 0 for none.
    pub rpm_step: u16,
    /// Smallest computed timing value accepted for a store.
    pub timing_min: u16,
    /// Largest computed timing value accepted for a store.
    pub timing_max: u16,
    /// Largest raw value the controller accepts in a slot.
    pub value_max: u16,
}

impl Revision {
    /// Look up the table entry for a logical command.
    pub fn spec(&self, command: Command) -> Option<&CommandSpec> {
        self.commands.iter().find(|s| s.command == command)
    }

    /// Look up the table entry for a wire opcode.
    pub fn by_opcode(&self, opcode: u8) -> Option<&CommandSpec> {
        self.commands.iter().find(|s| s.opcode == opcode)
    }

    /// Whether the revision implements `command`.
    pub fn supports(&self, command: Command) -> bool {
        self.spec(command).is_some()
    }

    /// Whether the controller exposes a reference shift angle.
    pub fn has_shift(&self) -> bool {
        self.supports(Command::GetShift)
    }

    /// Whether the controller has a timing table.
    pub fn has_records(&self) -> bool {
        self.record_slots > 0
    }

    /// The transfer state the engine starts in (and returns to on reset).
    ///
    /// Controllers with a shift read it before the table, controllers with
    /// only a table read the table, everything else polls straight away.
    pub fn startup_state(&self) -> TransferState {
        if self.has_shift() {
            TransferState::FetchShift
        } else if self.has_records() {
            TransferState::FetchRecords { cursor: 0 }
        } else {
            TransferState::SteadyPoll { index: 0 }
        }
    }

    /// Look up the table entry for a command, failing if it is missing.
    pub fn require(&self, command: Command) -> Result<&CommandSpec> {
        self.spec(command).ok_or_else(|| {
            Error::Unsupported(format!("{command} on {} firmware", self.name))
        })
    }
}

/// All known revisions.
pub fn all() -> Vec<Revision> {
    vec![angle_probe(), timing_meter(), cdi()]
}

/// Find a revision by its [`Revision::name`].
pub fn by_name(name: &str) -> Option<Revision> {
    all()
        .into_iter()
        .find(|r| r.name.eq_ignore_ascii_case(name))
}

// ---------------------------------------------------------------------------
// Revision definitions
// ---------------------------------------------------------------------------

/// Angle-probe firmware.
///
/// The earliest bench build: reports shaft speed and ignition angle and
/// accepts an angle write. No timing table.
pub fn angle_probe() -> Revision {
    Revision {
        name: "angle_probe",
        default_baud_rate: 19_200,
        commands: vec![
            CommandSpec::new(Command::GetSpeed, 0x01, PayloadLayout::Value32),
            CommandSpec::new(Command::GetAngle, 0x02, PayloadLayout::Value32),
            CommandSpec::new(Command::SetAngle, 0x81, PayloadLayout::Value32),
        ],
        record_slots: 0,
        poll_list: vec![Command::GetSpeed, Command::GetAngle],
        rpm_max: 0,
        rpm_step: 0,
        timing_min: 0,
        timing_max: 0,
        value_max: 0,
    }
}

/// Timing-meter firmware.
///
/// Measures RPM, stores an 11-point timing table, and drives a status LED.
/// Note that SET LED uses opcode `0x05`, which does not carry the SET bit.
pub fn timing_meter() -> Revision {
    Revision {
        name: "timing_meter",
        default_baud_rate: 19_200,
        commands: vec![
            CommandSpec::new(Command::GetRpm, 0x01, PayloadLayout::Value32),
            CommandSpec::new(Command::GetRecord, 0x02, PayloadLayout::Record),
            CommandSpec::new(Command::SetRecord, 0x82, PayloadLayout::Record),
            CommandSpec::new(Command::SetLed, 0x05, PayloadLayout::Flag),
        ],
        record_slots: 11,
        poll_list: vec![Command::GetRpm],
        rpm_max: 10_000,
        rpm_step: 0,
        timing_min: 5,
        timing_max: 30,
        value_max: 30,
    }
}

/// Capacitor-discharge ignition firmware.
///
/// Table values are stored relative to a reference shift angle: the
/// effective timing of a slot is `shift - raw`. Table writes only reach
/// flash after [`Command::SaveMemory`].
pub fn cdi() -> Revision {
    Revision {
        name: "cdi",
        default_baud_rate: 19_200,
        commands: vec![
            CommandSpec::new(Command::GetRpm, 0x01, PayloadLayout::Value16),
            CommandSpec::new(Command::GetRecord, 0x21, PayloadLayout::Record),
            CommandSpec::new(Command::GetShift, 0x22, PayloadLayout::Value8),
            CommandSpec::new(Command::SetRecord, 0xA1, PayloadLayout::Record),
            CommandSpec::new(Command::SetShift, 0xA2, PayloadLayout::Value8),
            CommandSpec::new(Command::SaveMemory, 0xAF, PayloadLayout::Empty),
        ],
        record_slots: 11,
        poll_list: vec![Command::GetRpm],
        rpm_max: 5_100,
        rpm_step: 60,
        timing_min: 5,
        timing_max: 32,
        value_max: 180,
    }
}
