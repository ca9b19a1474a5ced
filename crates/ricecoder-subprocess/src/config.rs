//! Spawn options and wait timeouts

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::env::Environment;
use crate::error::{ProcessError, Result};
use crate::stream::{Redirect, Stream};

/// Raw wait value meaning "block until exit"
pub const WAIT_INFINITE: i64 = -1;
/// Raw wait value meaning "block until the spawn deadline"
pub const WAIT_DEADLINE: i64 = -2;

/// Options for spawning a child process.
///
/// Field names follow the host binding's option table, so a table
/// serialized to JSON or TOML deserializes directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpawnOptions {
    /// Deadline after which the child may be killed (milliseconds on the wire)
    #[serde(rename = "timeout", with = "millis")]
    pub deadline: Option<Duration>,
    /// Working directory (None = current dir)
    pub cwd: Option<PathBuf>,
    pub stdin: Redirect,
    pub stdout: Redirect,
    pub stderr: Redirect,
    /// Variables added to the inherited environment
    pub env: Environment,
}

impl SpawnOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set deadline; zero means none
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = (!deadline.is_zero()).then_some(deadline);
        self
    }

    /// Run the child in `cwd`
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Set the stdin redirect
    pub fn with_stdin(mut self, redirect: Redirect) -> Self {
        self.stdin = redirect;
        self
    }

    /// Set the stdout redirect
    pub fn with_stdout(mut self, redirect: Redirect) -> Self {
        self.stdout = redirect;
        self
    }

    /// Set the stderr redirect
    pub fn with_stderr(mut self, redirect: Redirect) -> Self {
        self.stderr = redirect;
        self
    }

    /// Add environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key, value);
        self
    }

    /// Redirect configured for `stream`
    pub fn redirect(&self, stream: Stream) -> Redirect {
        match stream {
            Stream::Stdin => self.stdin,
            Stream::Stdout => self.stdout,
            Stream::Stderr => self.stderr,
        }
    }

    /// Reject anything that can't be spawned, before touching the OS
    pub fn validate(&self) -> Result<()> {
        for stream in [Stream::Stdin, Stream::Stdout, Stream::Stderr] {
            self.redirect(stream).check(stream)?;
        }
        if let Some(cwd) = &self.cwd {
            if cwd.as_os_str().is_empty() {
                return Err(ProcessError::invalid("working directory is empty"));
            }
            if cwd.to_string_lossy().contains('\0') {
                return Err(ProcessError::invalid("working directory contains NUL"));
            }
        }
        self.env.validate()
    }
}

mod millis {
    use super::*;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> std::result::Result<S::Ok, S::Error> {
        d.map(|d| d.as_millis() as u64).unwrap_or(0).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<Duration>, D::Error> {
        let ms = Option::<u64>::deserialize(d)?.unwrap_or(0);
        Ok((ms > 0).then(|| Duration::from_millis(ms)))
    }
}

/// How long a wait may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTimeout {
    /// Block at most this long; zero never blocks
    Duration(Duration),
    /// Block until the child exits
    Infinite,
    /// Block until the child exits or its spawn deadline passes
    Deadline,
}

impl WaitTimeout {
    pub const NONBLOCKING: WaitTimeout = WaitTimeout::Duration(Duration::ZERO);

    pub fn millis(ms: u64) -> Self {
        WaitTimeout::Duration(Duration::from_millis(ms))
    }

    /// Convert a caller integer: milliseconds, or one of the sentinels
    pub fn from_raw(raw: i64) -> Result<Self> {
        match raw {
            WAIT_INFINITE => Ok(WaitTimeout::Infinite),
            WAIT_DEADLINE => Ok(WaitTimeout::Deadline),
            ms if ms >= 0 => Ok(WaitTimeout::millis(ms as u64)),
            other => Err(ProcessError::invalid(format!("invalid wait timeout {other}"))),
        }
    }
}

impl Default for WaitTimeout {
    fn default() -> Self {
        WaitTimeout::NONBLOCKING
    }
}

impl From<Duration> for WaitTimeout {
    fn from(d: Duration) -> Self {
        WaitTimeout::Duration(d)
    }
}
