//! Core types used throughout the ignitor workspace.
//!
//! These types describe the remote protocol independently of any one
//! firmware revision: which commands exist, which way they point, and what
//! the readings mean. Opcode assignments live in the per-revision capability
//! tables in `ignitor-remote`.

use std::fmt;
use std::str::FromStr;

/// Direction of a command: a data query or a configuration write.
///
/// On the wire the top bit of the command byte usually carries this
/// (`0` = GET, `1` = SET), but revisions may assign opcodes that do not
/// follow the convention, so the capability table is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Host asks the controller for a value; the reply carries data.
    Get,
    /// Host writes a value; the reply acknowledges it.
    Set,
}

impl Direction {
    /// Bit of the command byte that selects SET.
    pub const SET_BIT: u8 = 0x80;

    /// Classify a raw command byte by its direction bit.
    pub fn of(command_byte: u8) -> Self {
        if command_byte & Self::SET_BIT != 0 {
            Direction::Set
        } else {
            Direction::Get
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Get => write!(f, "GET"),
            Direction::Set => write!(f, "SET"),
        }
    }
}

/// The closed set of remote commands across all firmware revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Shaft speed (angle-probe firmware).
    GetSpeed,
    /// Ignition angle (angle-probe firmware).
    GetAngle,
    /// Engine RPM (or RPS on early CDI builds).
    GetRpm,
    /// One slot of the timing table.
    GetRecord,
    /// CDI reference shift angle.
    GetShift,
    /// Write the ignition angle.
    SetAngle,
    /// Switch the status LED.
    SetLed,
    /// Write one slot of the timing table.
    SetRecord,
    /// Write the CDI reference shift angle.
    SetShift,
    /// Commit the timing table to non-volatile memory.
    SaveMemory,
}

impl Command {
    /// All commands, in declaration order.
    pub const ALL: [Command; 10] = [
        Command::GetSpeed,
        Command::GetAngle,
        Command::GetRpm,
        Command::GetRecord,
        Command::GetShift,
        Command::SetAngle,
        Command::SetLed,
        Command::SetRecord,
        Command::SetShift,
        Command::SaveMemory,
    ];

    /// Whether this command queries data or writes configuration.
    pub fn direction(&self) -> Direction {
        match self {
            Command::GetSpeed
            | Command::GetAngle
            | Command::GetRpm
            | Command::GetRecord
            | Command::GetShift => Direction::Get,
            Command::SetAngle
            | Command::SetLed
            | Command::SetRecord
            | Command::SetShift
            | Command::SaveMemory => Direction::Set,
        }
    }

    /// Whether this command carries a timing-table slot.
    pub fn is_record(&self) -> bool {
        matches!(self, Command::GetRecord | Command::SetRecord)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Command::GetSpeed => "get-speed",
            Command::GetAngle => "get-angle",
            Command::GetRpm => "get-rpm",
            Command::GetRecord => "get-record",
            Command::GetShift => "get-shift",
            Command::SetAngle => "set-angle",
            Command::SetLed => "set-led",
            Command::SetRecord => "set-record",
            Command::SetShift => "set-shift",
            Command::SaveMemory => "save-memory",
        };
        write!(f, "{s}")
    }
}

/// Error returned when a string cannot be parsed into a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCommandError(String);

impl fmt::Display for ParseCommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown command: {}", self.0)
    }
}

impl std::error::Error for ParseCommandError {}

impl FromStr for Command {
    type Err = ParseCommandError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "get-speed" => Ok(Command::GetSpeed),
            "get-angle" => Ok(Command::GetAngle),
            "get-rpm" | "get-rps" => Ok(Command::GetRpm),
            "get-record" => Ok(Command::GetRecord),
            "get-shift" => Ok(Command::GetShift),
            "set-angle" => Ok(Command::SetAngle),
            "set-led" => Ok(Command::SetLed),
            "set-record" => Ok(Command::SetRecord),
            "set-shift" => Ok(Command::SetShift),
            "save-memory" | "save-mem" => Ok(Command::SaveMemory),
            _ => Err(ParseCommandError(s.to_string())),
        }
    }
}

/// The physical quantity carried by a single-value GET reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantity {
    /// Shaft speed as reported by the angle-probe firmware.
    Speed,
    /// Ignition angle.
    Angle,
    /// Engine revolutions per minute.
    Rpm,
    /// CDI reference shift angle.
    Shift,
}

impl Quantity {
    /// The quantity reported by a GET command, if it reports a single value.
    pub fn for_command(command: Command) -> Option<Quantity> {
        match command {
            Command::GetSpeed => Some(Quantity::Speed),
            Command::GetAngle => Some(Quantity::Angle),
            Command::GetRpm => Some(Quantity::Rpm),
            Command::GetShift => Some(Quantity::Shift),
            _ => None,
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantity::Speed => write!(f, "speed"),
            Quantity::Angle => write!(f, "angle"),
            Quantity::Rpm => write!(f, "rpm"),
            Quantity::Shift => write!(f, "shift"),
        }
    }
}

/// Link-health counters maintained by the request/reply engine.
///
/// Corrupted and lost frames never stop polling, so these counters are the
/// only place where a degrading link becomes visible.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Request frames written to the transport.
    pub frames_sent: u64,
    /// Valid replies that completed the in-flight transaction.
    pub replies_accepted: u64,
    /// Valid replies that did not match the in-flight transaction.
    pub stray_replies: u64,
    /// Candidate frames rejected for a bad checksum.
    pub checksum_failures: u64,
    /// Candidate frames rejected for a bad header or length.
    pub header_failures: u64,
    /// Replies carrying an opcode the revision does not know.
    pub unknown_commands: u64,
    /// Bytes dropped while resynchronising on the header byte.
    pub bytes_discarded: u64,
    /// Transactions abandoned because no reply arrived in time.
    pub reply_timeouts: u64,
    /// Transport write failures.
    pub transport_errors: u64,
}

impl LinkStats {
    /// Total number of frames that failed to decode.
    pub fn decode_failures(&self) -> u64 {
        self.checksum_failures + self.header_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_from_top_bit() {
        assert_eq!(Direction::of(0x01), Direction::Get);
        assert_eq!(Direction::of(0x22), Direction::Get);
        assert_eq!(Direction::of(0x81), Direction::Set);
        assert_eq!(Direction::of(0xAF), Direction::Set);
    }

    #[test]
    fn command_directions() {
        assert_eq!(Command::GetRecord.direction(), Direction::Get);
        assert_eq!(Command::SetLed.direction(), Direction::Set);
        assert_eq!(Command::SaveMemory.direction(), Direction::Set);
    }

    #[test]
    fn command_display_round_trip() {
        for cmd in Command::ALL {
            let parsed: Command = cmd.to_string().parse().unwrap();
            assert_eq!(parsed, cmd);
        }
    }

    #[test]
    fn command_parse_aliases() {
        assert_eq!("GET_RPS".parse::<Command>().unwrap(), Command::GetRpm);
        assert_eq!("save-mem".parse::<Command>().unwrap(), Command::SaveMemory);
        assert!("launch".parse::<Command>().is_err());
    }

    #[test]
    fn quantity_for_command() {
        assert_eq!(Quantity::for_command(Command::GetRpm), Some(Quantity::Rpm));
        assert_eq!(Quantity::for_command(Command::GetShift), Some(Quantity::Shift));
        assert_eq!(Quantity::for_command(Command::GetRecord), None);
        assert_eq!(Quantity::for_command(Command::SetAngle), None);
    }

    #[test]
    fn stats_decode_failures() {
        let stats = LinkStats {
            checksum_failures: 3,
            header_failures: 2,
            ..Default::default()
        };
        assert_eq!(stats.decode_failures(), 5);
    }
}
