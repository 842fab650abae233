use core::fmt;

/// Errors returned by the BLE stack.
#[derive(Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Packet specified an invalid length value or was too short.
    ///
    /// This indicates a protocol violation, so the connection should
    /// considered lost (if one is currently established).
    InvalidLength,

    /// Invalid value supplied for field.
    InvalidValue,

    /// Unexpectedly reached EOF while reading or writing data.
    ///
    /// This is returned when the application tries to fit too much data into a
    /// PDU or other fixed-size buffer, and also when reaching EOF prematurely
    /// while reading data from a buffer.
    Eof,

    /// Parsing didn't consume the entire buffer.
    IncompleteParse,

    /// A ring buffer had no free slot (or no contiguous space) left.
    QueueFull,

    /// A ring buffer was asked for data it didn't have.
    QueueEmpty,

    /// A buffer supplied by the radio or application was too small to hold the
    /// requested PDU.
    BufferTooSmall,

    /// The radio failed to set up an encryption session (bad key, hardware
    /// fault, or an unsupported cipher configuration).
    EncryptionSetupFailed,

    /// The shared prepared-write queue is already owned by another connection.
    QueueInUse,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Error::InvalidLength => "invalid length value specified",
            Error::InvalidValue => "invalid value for field",
            Error::Eof => "end of buffer",
            Error::IncompleteParse => "excess data in buffer",
            Error::QueueFull => "no space left in ring buffer",
            Error::QueueEmpty => "no data available in ring buffer",
            Error::BufferTooSmall => "supplied buffer too small for PDU",
            Error::EncryptionSetupFailed => "radio failed to set up encryption",
            Error::QueueInUse => "prepared-write queue is owned by another connection",
        })
    }
}
