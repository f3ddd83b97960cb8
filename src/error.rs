use crate::value::GenerationId;

/// Errors that may occur while decoding on-disk structures
#[derive(Debug)]
#[non_exhaustive]
pub enum DecodeError {
    /// Buffer or file ended before the structure was complete
    UnexpectedEof,

    /// The file trailer does not carry the expected magic value
    BadMagic {
        /// The magic value that was found instead
        got: u32,
    },

    /// An offset or length points outside the file or block
    OutOfBounds(&'static str),

    /// A structurally invalid value was encountered
    Malformed(&'static str),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DecodeError({self:?})")
    }
}

/// Represents errors that can occur in the storage engine
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// A sorted table file failed validation
    ///
    /// The file is quarantined when this happens during startup.
    CorruptTable {
        /// Generation of the offending table file
        generation: GenerationId,

        /// What exactly failed to decode
        error: DecodeError,
    },

    /// Operation was issued after [`crate::Database::close`]
    Closed,

    /// The database degraded to read-only after persistent background I/O failure
    ReadOnly,

    /// A new write-ahead log could not be allocated during memtable rotation
    Capacity(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HeftyDbError: {self:?}")
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) | Self::Capacity(e) => Some(e),
            Self::CorruptTable { .. } | Self::Closed | Self::ReadOnly => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Crate result
pub type Result<T> = std::result::Result<T, Error>;
