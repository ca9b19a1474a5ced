//! Error types for child process management
//!
//! Every error maps to a stable negative numeric code so that a host
//! binding can branch on the number without matching message strings.

use std::io;
use thiserror::Error;

/// Stable numeric error codes exposed to callers.
///
/// The discriminants are the negated Linux errno values and must never
/// change between releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// Bad redirect kind, empty argument vector, unsupported target
    InvalidArgument = -22,
    /// A wait ran out of time before the child exited
    TimedOut = -110,
    /// The other end of a pipe is gone
    BrokenPipe = -32,
    /// Allocation failure while building argv/env arrays
    OutOfMemory = -12,
    /// A non-blocking operation could not make progress right now
    WouldBlock = -11,
}

/// Code reported for OS errors that carry no errno.
pub const UNKNOWN: i32 = -1;

impl ErrorCode {
    /// All named codes, in constant-table order.
    pub const ALL: [ErrorCode; 5] = [
        ErrorCode::InvalidArgument,
        ErrorCode::TimedOut,
        ErrorCode::BrokenPipe,
        ErrorCode::OutOfMemory,
        ErrorCode::WouldBlock,
    ];

    /// Raw numeric value
    pub const fn as_raw(self) -> i32 {
        self as i32
    }

    /// Look up a named code from its raw value
    pub fn from_raw(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_raw() == code)
    }

    /// Human-readable description
    pub const fn message(self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "invalid argument",
            ErrorCode::TimedOut => "operation timed out",
            ErrorCode::BrokenPipe => "broken pipe",
            ErrorCode::OutOfMemory => "out of memory",
            ErrorCode::WouldBlock => "resource temporarily unavailable",
        }
    }
}

/// Child process errors
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Rejected before any OS resource was touched
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Building the argument or environment array failed to allocate
    #[error("Out of memory while building process arguments")]
    OutOfMemory,

    /// Wait exceeded its timeout; the child is still running
    #[error("Timed out waiting for process")]
    TimedOut,

    /// Read or write against a stream the child (or caller) closed
    #[error("Broken pipe")]
    BrokenPipe,

    /// Nothing to read or no room to write right now
    #[error("Operation would block")]
    WouldBlock,

    /// The OS refused to start the process
    #[error("Failed to spawn process: {0}")]
    Spawn(#[source] io::Error),

    /// Any other OS-level failure
    #[error("I/O error: {0}")]
    Io(#[source] io::Error),
}

impl ProcessError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        ProcessError::InvalidArgument(msg.into())
    }

    /// Stable numeric code for this error
    pub fn code(&self) -> i32 {
        match self {
            ProcessError::InvalidArgument(_) => ErrorCode::InvalidArgument.as_raw(),
            ProcessError::OutOfMemory => ErrorCode::OutOfMemory.as_raw(),
            ProcessError::TimedOut => ErrorCode::TimedOut.as_raw(),
            ProcessError::BrokenPipe => ErrorCode::BrokenPipe.as_raw(),
            ProcessError::WouldBlock => ErrorCode::WouldBlock.as_raw(),
            ProcessError::Spawn(e) | ProcessError::Io(e) => os_code(e),
        }
    }

    /// Split into the `(message, code)` pair a host binding reports
    pub fn into_parts(self) -> (String, i32) {
        let code = self.code();
        (self.to_string(), code)
    }

    /// True for the two outcomes a polling loop expects on every call
    pub fn is_transient(&self) -> bool {
        matches!(self, ProcessError::TimedOut | ProcessError::WouldBlock)
    }
}

impl From<io::Error> for ProcessError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::BrokenPipe => ProcessError::BrokenPipe,
            io::ErrorKind::WouldBlock => ProcessError::WouldBlock,
            io::ErrorKind::OutOfMemory => ProcessError::OutOfMemory,
            io::ErrorKind::TimedOut => ProcessError::TimedOut,
            _ => ProcessError::Io(e),
        }
    }
}

#[cfg(unix)]
impl From<nix::errno::Errno> for ProcessError {
    fn from(errno: nix::errno::Errno) -> Self {
        io::Error::from_raw_os_error(errno as i32).into()
    }
}

fn os_code(e: &io::Error) -> i32 {
    e.raw_os_error().map_or(UNKNOWN, |errno| -errno)
}

/// Human-readable string for an error code.
///
/// Returns `None` for non-negative values, which are exit codes rather
/// than errors.
pub fn strerror(code: i32) -> Option<String> {
    if code >= 0 {
        return None;
    }
    if let Some(named) = ErrorCode::from_raw(code) {
        return Some(named.message().to_string());
    }
    if code == UNKNOWN {
        return Some("unknown error".to_string());
    }
    Some(io::Error::from_raw_os_error(-code).to_string())
}

/// Result type for child process operations
pub type Result<T> = std::result::Result<T, ProcessError>;
