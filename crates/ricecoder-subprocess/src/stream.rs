//! Standard stream identifiers and redirect kinds

use std::fs::File;
use std::io;
use std::os::fd::{AsFd, OwnedFd};
use std::process::Stdio;

use nix::errno::Errno;
use serde::{Deserialize, Serialize};

use crate::error::{ProcessError, Result};
use crate::pipe::Pipe;

/// One of the child's three standard streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Stream {
    Stdin = 0,
    Stdout = 1,
    Stderr = 2,
}

impl Stream {
    /// Stable numeric value of this stream
    pub const fn as_raw(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for Stream {
    type Error = ProcessError;

    fn try_from(raw: i32) -> Result<Self> {
        match raw {
            0 => Ok(Stream::Stdin),
            1 => Ok(Stream::Stdout),
            2 => Ok(Stream::Stderr),
            other => Err(ProcessError::invalid(format!("unknown stream {other}"))),
        }
    }
}

/// Where a standard stream of the child is connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum Redirect {
    /// Binding default, resolves to [`Redirect::Pipe`]
    #[default]
    Default = 0,
    /// Non-blocking pipe owned by the handle
    Pipe = 1,
    /// Share the caller's own descriptor
    Inherit = 2,
    /// Null device
    Discard = 3,
    /// Stderr only: write into whatever stdout is connected to
    MergeStdout = 4,
}

// Raw kinds 5..=7 name redirection to handles, FILE* and paths.
const LAST_RAW_TARGET: i32 = 7;

impl Redirect {
    /// Stable numeric value of this redirect kind
    pub const fn as_raw(self) -> i32 {
        self as i32
    }

    /// Fails if this kind can't be used for `stream`.
    pub fn check(self, stream: Stream) -> Result<()> {
        if self == Redirect::MergeStdout && stream != Stream::Stderr {
            return Err(ProcessError::invalid(format!(
                "only stderr can be merged into stdout, not {stream:?}"
            )));
        }
        Ok(())
    }

    fn resolved(self) -> Redirect {
        match self {
            Redirect::Default => Redirect::Pipe,
            other => other,
        }
    }
}

impl TryFrom<i32> for Redirect {
    type Error = ProcessError;

    fn try_from(raw: i32) -> Result<Self> {
        match raw {
            0 => Ok(Redirect::Default),
            1 => Ok(Redirect::Pipe),
            2 => Ok(Redirect::Inherit),
            3 => Ok(Redirect::Discard),
            4 => Ok(Redirect::MergeStdout),
            5..=LAST_RAW_TARGET => Err(ProcessError::invalid(
                "redirecting to handles, files and paths is not supported",
            )),
            other => Err(ProcessError::invalid(format!("unknown redirect kind {other}"))),
        }
    }
}

/// `Stdio` assignments for one spawn, plus the parent-side read end of a
/// pipe this module had to create itself (merged stdout/stderr).
pub(crate) struct StdioPlan {
    pub stdin: Stdio,
    pub stdout: Stdio,
    pub stderr: Stdio,
    pub merged_reader: Option<Pipe>,
}

fn simple(redirect: Redirect) -> Stdio {
    match redirect.resolved() {
        Redirect::Inherit => Stdio::inherit(),
        Redirect::Discard => Stdio::null(),
        _ => Stdio::piped(),
    }
}

/// Our stdout duplicated for a merged child, or `None` when it is closed.
///
/// A closed stdout stays closed in the child, and what the child merges
/// into it is lost.
fn inherited_stdout(dup: io::Result<OwnedFd>) -> io::Result<Option<OwnedFd>> {
    match dup {
        Ok(fd) => Ok(Some(fd)),
        Err(e) if e.raw_os_error() == Some(Errno::EBADF as i32) => Ok(None),
        Err(e) => Err(e),
    }
}

fn null_device() -> io::Result<OwnedFd> {
    File::options().write(true).open("/dev/null").map(OwnedFd::from)
}

/// Translate the three redirects into `Stdio` values.
///
/// Everything opened here is owned by the returned plan, so a failure
/// part-way drops what was already opened.
pub(crate) fn plan(stdin: Redirect, stdout: Redirect, stderr: Redirect) -> Result<StdioPlan> {
    stdin.check(Stream::Stdin)?;
    stdout.check(Stream::Stdout)?;
    stderr.check(Stream::Stderr)?;

    let stdin = simple(stdin);

    if stderr != Redirect::MergeStdout {
        return Ok(StdioPlan {
            stdin,
            stdout: simple(stdout),
            stderr: simple(stderr),
            merged_reader: None,
        });
    }

    // Both descriptors must point at the same open file.
    let (stdout_fd, merged_reader) = match stdout.resolved() {
        Redirect::Inherit => match inherited_stdout(io::stdout().as_fd().try_clone_to_owned())? {
            Some(fd) => (fd, None),
            None => {
                return Ok(StdioPlan {
                    stdin,
                    stdout: Stdio::inherit(),
                    stderr: Stdio::null(),
                    merged_reader: None,
                })
            }
        },
        Redirect::Discard => (null_device()?, None),
        _ => {
            let (reader, writer) = Pipe::pair()?;
            (writer, Some(reader))
        }
    };
    let stderr_fd = stdout_fd.try_clone()?;

    Ok(StdioPlan {
        stdin,
        stdout: Stdio::from(stdout_fd),
        stderr: Stdio::from(stderr_fd),
        merged_reader,
    })
}
