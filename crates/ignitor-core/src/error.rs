//! Error types for the ignitor remote link.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport failures, frame-level decode
//! failures, validation failures, and connection-state errors are all
//! captured here.
//!
//! Frame-level variants ([`Error::ChecksumMismatch`], [`Error::HeaderMismatch`],
//! [`Error::Timeout`]) are absorbed by the IO task and only show up in the
//! link statistics. Validation and connection errors are returned to the
//! caller so the operator can see them.

/// The error type for all ignitor operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (serial port open/read/write failure).
    #[error("transport error: {0}")]
    Transport(String),

    /// A protocol-level error (wrong frame length, unexpected reply).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The trailing checksum byte does not match the additive sum of the
    /// preceding bytes.
    #[error("checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    ChecksumMismatch {
        /// Checksum computed over the received bytes.
        expected: u8,
        /// Checksum byte carried by the frame.
        actual: u8,
    },

    /// The first byte of a frame is not the protocol header sentinel.
    #[error("header mismatch: got 0x{0:02X}")]
    HeaderMismatch(u8),

    /// No valid reply arrived within the reply timeout.
    ///
    /// This typically indicates the controller is powered off, the baud
    /// rate is wrong, or the reply was corrupted on the wire.
    #[error("timeout waiting for reply")]
    Timeout,

    /// A value supplied by the operator is outside the allowed range.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A record transfer is in progress and the requested change would
    /// interfere with it.
    #[error("record transfer in progress")]
    Busy,

    /// The requested command is not supported by this protocol revision.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// An invalid parameter was passed to a builder or API call.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The transport is not open.
    #[error("not connected")]
    NotConnected,

    /// The connection to the controller was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` for errors caused by a corrupted or misaligned frame.
    ///
    /// These are dropped by the engine and retried on the next poll cycle.
    pub fn is_frame_error(&self) -> bool {
        matches!(
            self,
            Error::ChecksumMismatch { .. } | Error::HeaderMismatch(_) | Error::Protocol(_)
        )
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_transport() {
        let e = Error::Transport("port busy".into());
        assert_eq!(e.to_string(), "transport error: port busy");
    }

    #[test]
    fn error_display_checksum_mismatch() {
        let e = Error::ChecksumMismatch {
            expected: 0xB0,
            actual: 0x0B,
        };
        assert_eq!(e.to_string(), "checksum mismatch: expected 0xB0, got 0x0B");
    }

    #[test]
    fn error_display_header_mismatch() {
        let e = Error::HeaderMismatch(0x55);
        assert_eq!(e.to_string(), "header mismatch: got 0x55");
    }

    #[test]
    fn error_display_timeout() {
        assert_eq!(Error::Timeout.to_string(), "timeout waiting for reply");
    }

    #[test]
    fn error_display_validation() {
        let e = Error::Validation("slot 3: computed value -2 is negative".into());
        assert_eq!(
            e.to_string(),
            "validation failed: slot 3: computed value -2 is negative"
        );
    }

    #[test]
    fn error_display_busy() {
        assert_eq!(Error::Busy.to_string(), "record transfer in progress");
    }

    #[test]
    fn error_display_not_connected() {
        assert_eq!(Error::NotConnected.to_string(), "not connected");
    }

    #[test]
    fn frame_errors_are_classified() {
        assert!(Error::HeaderMismatch(0x00).is_frame_error());
        assert!(Error::ChecksumMismatch {
            expected: 1,
            actual: 2
        }
        .is_frame_error());
        assert!(Error::Protocol("short frame".into()).is_frame_error());
        assert!(!Error::Timeout.is_frame_error());
        assert!(!Error::Validation("x".into()).is_frame_error());
        assert!(!Error::NotConnected.is_frame_error());
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("pipe broken"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
