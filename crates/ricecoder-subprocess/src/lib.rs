//! # ricecoder-subprocess
//!
//! **Purpose**: Poll-driven child process core for scripting hosts
//!
//! Spawns child processes and drives them from a single owner without an
//! event loop: every status check is a zero-timeout poll, reads and writes
//! never block, and only an explicit wait with a timeout may sleep.
//!
//! ## Features
//!
//! - **Spawning**: argument vector, working directory, extended environment,
//!   per-stream redirects (pipe, inherit, discard, stderr into stdout)
//! - **Non-blocking I/O**: bounded reads and partial writes on the child's pipes
//! - **Wait**: zero, finite, infinite or until-deadline timeouts
//! - **Deadlines**: a child that outlives its deadline is killed on the next poll
//! - **Stop sequences**: SIGTERM→SIGKILL escalation; release always reaps
//! - **Stable codes**: numeric stream, redirect, wait and error constants
//!   for host bindings
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ricecoder_subprocess::{spawn, Redirect, SpawnOptions, Stream, WaitTimeout};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let options = SpawnOptions::new().with_stderr(Redirect::MergeStdout);
//! let mut child = spawn(&["cat"], &options)?;
//!
//! child.write(b"hello")?;
//! child.close_stream(Stream::Stdin)?;
//!
//! let code = child.wait(WaitTimeout::Infinite)?;
//! let output = child.read(Stream::Stdout, 4096)?;
//! # Ok(())
//! # }
//! ```

#[cfg(not(unix))]
compile_error!("ricecoder-subprocess only supports Unix targets");

pub mod child;
pub mod config;
pub mod env;
pub mod error;
pub mod pipe;
pub mod stop;
pub mod stream;

pub use child::{ProcessHandle, DEFAULT_READ_SIZE};
pub use config::{SpawnOptions, WaitTimeout};
pub use env::{serialize_argv, Environment};
pub use error::{strerror, ErrorCode, ProcessError, Result};
pub use stop::{StopAction, StopSequence, StopStep};
pub use stream::{Redirect, Stream};

/// Spawn a process; see [`ProcessHandle::spawn`]
pub fn spawn<S: AsRef<str>>(argv: &[S], options: &SpawnOptions) -> Result<ProcessHandle> {
    ProcessHandle::spawn(argv, options)
}

/// Numeric identifiers callers branch on. Values never change.
pub mod constants {
    use crate::error::ErrorCode;
    use crate::stream::{Redirect, Stream};

    pub use crate::config::{WAIT_DEADLINE, WAIT_INFINITE};

    pub const ERROR_INVAL: i32 = ErrorCode::InvalidArgument.as_raw();
    pub const ERROR_TIMEDOUT: i32 = ErrorCode::TimedOut.as_raw();
    pub const ERROR_PIPE: i32 = ErrorCode::BrokenPipe.as_raw();
    pub const ERROR_NOMEM: i32 = ErrorCode::OutOfMemory.as_raw();
    pub const ERROR_WOULDBLOCK: i32 = ErrorCode::WouldBlock.as_raw();

    pub const STREAM_STDIN: i32 = Stream::Stdin.as_raw();
    pub const STREAM_STDOUT: i32 = Stream::Stdout.as_raw();
    pub const STREAM_STDERR: i32 = Stream::Stderr.as_raw();

    pub const REDIRECT_DEFAULT: i32 = Redirect::Default.as_raw();
    pub const REDIRECT_PIPE: i32 = Redirect::Pipe.as_raw();
    pub const REDIRECT_PARENT: i32 = Redirect::Inherit.as_raw();
    pub const REDIRECT_DISCARD: i32 = Redirect::Discard.as_raw();
    pub const REDIRECT_STDOUT: i32 = Redirect::MergeStdout.as_raw();
}

pub use constants::*;
