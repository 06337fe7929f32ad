//! Error and result types shared across the engine.

use std::fmt;

/// Everything that can go wrong inside the engine or at its edges.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// The operation did not complete and may be retried, typically
    /// because the engine shut down underneath it or a newer request
    /// superseded it.
    Abort,
    /// Malformed bytes on disk or in flight: a failed decode, a checksum
    /// mismatch, or an impossible internal value.
    InvalidData(String),
    /// A caller handed in something unusable, such as an unknown column
    /// family or a split key outside its shard.
    InvalidInput(String),
    /// The filesystem reported a failure.
    IO(String),
    /// An insert reached a structure that no longer accepts writes, such
    /// as a frozen memtable or a published L0 table.
    ReadOnly,
    /// The engine has begun shutting down and refuses new submissions.
    Shutdown,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Abort => write!(f, "aborted, retry the operation"),
            Error::InvalidData(msg) => write!(f, "malformed data: {msg}"),
            Error::InvalidInput(msg) => write!(f, "bad input: {msg}"),
            Error::IO(msg) => write!(f, "i/o failure: {msg}"),
            Error::ReadOnly => write!(f, "target no longer accepts writes"),
            Error::Shutdown => write!(f, "engine is shutting down"),
        }
    }
}

/// Builds an [`Error::InvalidData`] from format arguments, converted into
/// whatever the surrounding expression needs (an `Error` or an `Err`).
#[macro_export]
macro_rules! errdata {
    ($($arg:tt)*) => {
        $crate::error::Error::InvalidData(format!($($arg)*)).into()
    };
}

/// Builds an [`Error::InvalidInput`] from format arguments, converted into
/// whatever the surrounding expression needs (an `Error` or an `Err`).
#[macro_export]
macro_rules! errinput {
    ($($arg:tt)*) => {
        $crate::error::Error::InvalidInput(format!($($arg)*)).into()
    };
}

/// Shorthand result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Lets the error macros above expand to a `return` value in functions
/// returning [`Result`], without an `Err(...)` wrapper at every call site.
impl<T> From<Error> for Result<T> {
    fn from(err: Error) -> Self {
        Err(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::IO(err.to_string())
    }
}

/// A panicked or cancelled worker task surfaces as an engine fault.
impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::IO(format!("worker task failed: {err}"))
    }
}
