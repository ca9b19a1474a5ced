//! Process handle: spawn, lifecycle and non-blocking stdio

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, Command, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::{
    config::{SpawnOptions, WaitTimeout},
    env::serialize_argv,
    error::{ProcessError, Result, UNKNOWN},
    pipe::Pipe,
    stop::{StopAction, StopSequence},
    stream::{self, Stream},
};

/// Default `max_size` for reads
pub const DEFAULT_READ_SIZE: usize = 4096;

const POLL_INTERVAL_MIN: Duration = Duration::from_millis(1);
const POLL_INTERVAL_MAX: Duration = Duration::from_millis(20);
/// How long a deadline kill may wait for the child to be reaped
const DEADLINE_REAP_GRACE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessState {
    Running,
    Exited(i32),
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| -sig))
        .unwrap_or(UNKNOWN)
}

/// A spawned child process with its pipes and cached exit state.
///
/// All operations are non-blocking except waits with a non-zero timeout.
/// Dropping the handle releases it.
#[derive(Debug)]
pub struct ProcessHandle {
    /// `None` once released
    child: Option<Child>,
    pid: u32,
    state: ProcessState,
    deadline: Option<Instant>,
    /// SIGKILL already sent because the deadline passed
    deadline_killed: bool,
    stdin: Option<Pipe>,
    stdout: Option<Pipe>,
    stderr: Option<Pipe>,
}

impl ProcessHandle {
    /// Start a process.
    ///
    /// `argv[0]` is the executable. Either a running handle comes back or
    /// an error does; nothing is left behind on failure.
    ///
    /// # Examples
    /// ```no_run
    /// use ricecoder_subprocess::{ProcessHandle, SpawnOptions, WaitTimeout};
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let mut child = ProcessHandle::spawn(&["echo", "hello"], &SpawnOptions::new())?;
    /// let code = child.wait(WaitTimeout::Infinite)?;
    /// assert_eq!(code, 0);
    /// # Ok(())
    /// # }
    /// ```
    pub fn spawn<S: AsRef<str>>(argv: &[S], options: &SpawnOptions) -> Result<Self> {
        let argv = serialize_argv(argv)?;
        options.validate()?;
        let env = options.env.resolve()?;
        let plan = stream::plan(options.stdin, options.stdout, options.stderr)?;

        debug!(
            command = %argv[0].to_string_lossy(),
            args = argv.len() - 1,
            cwd = ?options.cwd,
            deadline = ?options.deadline,
            "Spawning process"
        );

        let mut cmd = Command::new(OsStr::from_bytes(argv[0].as_bytes()));
        cmd.args(argv[1..].iter().map(|arg| OsStr::from_bytes(arg.as_bytes())));
        cmd.env_clear().envs(&env);
        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(plan.stdin).stdout(plan.stdout).stderr(plan.stderr);

        let spawned = cmd.spawn();
        // The command still holds the child's ends of our own pipes.
        drop(cmd);
        let mut child = spawned.map_err(ProcessError::Spawn)?;
        let pid = child.id();

        let pipes = (|| -> Result<_> {
            let stdin = child.stdin.take().map(Pipe::from_fd).transpose()?;
            let stdout = match plan.merged_reader {
                Some(reader) => Some(reader),
                None => child.stdout.take().map(Pipe::from_fd).transpose()?,
            };
            let stderr = child.stderr.take().map(Pipe::from_fd).transpose()?;
            Ok((stdin, stdout, stderr))
        })();

        let (stdin, stdout, stderr) = match pipes {
            Ok(pipes) => pipes,
            Err(e) => {
                warn!(pid = %pid, error = %e, "Pipe setup failed, killing fresh child");
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };

        info!(pid = %pid, command = %argv[0].to_string_lossy(), "Process spawned");

        Ok(Self {
            child: Some(child),
            pid,
            state: ProcessState::Running,
            deadline: options.deadline.map(|d| Instant::now() + d),
            deadline_killed: false,
            stdin,
            stdout,
            stderr,
        })
    }

    /// Get process ID; stays valid after release
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Instant after which the child gets killed, if a deadline was set
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Check if process is still running
    pub fn running(&mut self) -> bool {
        if let Err(e) = self.poll(WaitTimeout::NONBLOCKING) {
            debug!(pid = %self.pid, error = %e, "Status check failed");
        }
        self.state == ProcessState::Running
    }

    /// Exit code, or `None` while the child is still running.
    ///
    /// Negative values mean the child was killed by signal `-code`.
    pub fn returncode(&mut self) -> Option<i32> {
        if let Err(e) = self.poll(WaitTimeout::NONBLOCKING) {
            debug!(pid = %self.pid, error = %e, "Status check failed");
        }
        match self.state {
            ProcessState::Exited(code) => Some(code),
            ProcessState::Running => None,
        }
    }

    fn exited(&mut self, status: ExitStatus) -> i32 {
        let code = exit_code(status);
        self.state = ProcessState::Exited(code);
        debug!(pid = %self.pid, code, "Process exited");
        code
    }

    fn try_reap(&mut self) -> Result<Option<i32>> {
        let Some(child) = self.child.as_mut() else {
            return Ok(None);
        };
        match child.try_wait()? {
            Some(status) => Ok(Some(self.exited(status))),
            None => Ok(None),
        }
    }

    fn deadline_pending(&self) -> Option<Instant> {
        self.deadline.filter(|_| !self.deadline_killed)
    }

    /// SIGKILL once, then give the kernel a short, bounded window to let
    /// us reap. `Ok(None)` if the child is still there afterwards.
    fn enforce_deadline(&mut self) -> Result<Option<i32>> {
        let Some(child) = self.child.as_mut() else {
            return Ok(None);
        };
        warn!(pid = %self.pid, "Deadline passed, killing process");
        child.kill()?;
        self.deadline_killed = true;

        let until = Instant::now() + DEADLINE_REAP_GRACE;
        loop {
            if let Some(code) = self.try_reap()? {
                return Ok(Some(code));
            }
            let now = Instant::now();
            if now >= until {
                warn!(pid = %self.pid, "Killed process not reaped yet");
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL_MIN.min(until - now));
        }
    }

    /// Last resort on release: SIGKILL and a blocking reap, so no zombie
    /// outlives the handle.
    fn reap_after_kill(&mut self) {
        let Some(child) = self.child.as_mut() else {
            return;
        };
        if let Err(e) = child.kill() {
            warn!(pid = %self.pid, error = %e, "Final kill failed, leaving process unreaped");
            return;
        }
        match child.wait() {
            Ok(status) => {
                let code = self.exited(status);
                debug!(pid = %self.pid, code, "Reaped after final kill");
            }
            Err(e) => warn!(pid = %self.pid, error = %e, "Failed to reap killed process"),
        }
    }

    /// Reap the child if it exits within `timeout`.
    ///
    /// `Ok(None)` means it is still running, which is not an error. If the
    /// spawn deadline passes while polling, the child is killed and reaped.
    pub fn poll(&mut self, timeout: WaitTimeout) -> Result<Option<i32>> {
        if let ProcessState::Exited(code) = self.state {
            return Ok(Some(code));
        }
        if self.child.is_none() {
            return Ok(None);
        }

        let start = Instant::now();
        let until = match timeout {
            WaitTimeout::Duration(d) => Some(start + d),
            WaitTimeout::Infinite => None,
            WaitTimeout::Deadline => self.deadline,
        };

        let mut interval = POLL_INTERVAL_MIN;
        loop {
            if let Some(code) = self.try_reap()? {
                return Ok(Some(code));
            }

            if self.deadline_pending().is_some_and(|d| Instant::now() >= d) {
                if let Some(code) = self.enforce_deadline()? {
                    return Ok(Some(code));
                }
            }
            let now = Instant::now();
            if until.is_some_and(|u| now >= u) {
                return Ok(None);
            }

            let mut nap = interval;
            for limit in [until, self.deadline_pending()].into_iter().flatten() {
                nap = nap.min(limit - now);
            }
            thread::sleep(nap);
            interval = (interval * 2).min(POLL_INTERVAL_MAX);
        }
    }

    /// Wait for the exit code.
    ///
    /// Zero timeout never blocks; [`WaitTimeout::Infinite`] blocks until
    /// exit. Still running afterwards is [`ProcessError::TimedOut`].
    pub fn wait(&mut self, timeout: impl Into<WaitTimeout>) -> Result<i32> {
        self.poll(timeout.into())?.ok_or(ProcessError::TimedOut)
    }

    /// Same as [`wait`](Self::wait) but sleeps on the tokio timer between
    /// checks instead of blocking the thread.
    pub async fn wait_async(&mut self, timeout: impl Into<WaitTimeout>) -> Result<i32> {
        let start = Instant::now();
        let until = match timeout.into() {
            WaitTimeout::Duration(d) => Some(start + d),
            WaitTimeout::Infinite => None,
            WaitTimeout::Deadline => self.deadline,
        };

        let mut interval = POLL_INTERVAL_MIN;
        loop {
            if let Some(code) = self.poll(WaitTimeout::NONBLOCKING)? {
                return Ok(code);
            }
            if self.child.is_none() {
                return Err(ProcessError::TimedOut);
            }
            let now = Instant::now();
            if until.is_some_and(|u| now >= u) {
                return Err(ProcessError::TimedOut);
            }
            let nap = until.map_or(interval, |u| interval.min(u - now));
            tokio::time::sleep(nap).await;
            interval = (interval * 2).min(POLL_INTERVAL_MAX);
        }
    }

    fn send_signal(&mut self, sig: Signal) -> Result<()> {
        // Never signal a pid we already reaped.
        if self.child.is_none() || self.state != ProcessState::Running {
            return Ok(());
        }
        debug!(pid = %self.pid, signal = sig.as_str(), "Sending signal");
        signal::kill(Pid::from_raw(self.pid as i32), sig)?;
        let _ = self.poll(WaitTimeout::NONBLOCKING);
        Ok(())
    }

    /// Ask the child to exit (SIGTERM). Does not wait.
    pub fn terminate(&mut self) -> Result<()> {
        self.send_signal(Signal::SIGTERM)
    }

    /// Force the child to exit (SIGKILL). Does not wait.
    pub fn kill(&mut self) -> Result<()> {
        self.send_signal(Signal::SIGKILL)
    }

    /// Run a stop sequence, returning as soon as the child is reaped.
    ///
    /// `Ok(None)` means every step ran and the child is still there.
    pub fn stop(&mut self, sequence: StopSequence) -> Result<Option<i32>> {
        for step in sequence.steps() {
            if let Some(code) = self.poll(WaitTimeout::NONBLOCKING)? {
                return Ok(Some(code));
            }
            debug!(pid = %self.pid, action = ?step.action, timeout = ?step.timeout, "Stop step");
            match step.action {
                StopAction::Terminate => self.terminate()?,
                StopAction::Kill => self.kill()?,
                StopAction::Wait | StopAction::Noop => {}
            }
            if let Some(code) = self.poll(WaitTimeout::Duration(step.timeout))? {
                return Ok(Some(code));
            }
        }
        Ok(None)
    }

    /// Stop the child if needed and free the process and its pipes.
    ///
    /// Safe to call any number of times; only the first call does work.
    pub fn release(&mut self) {
        if self.child.is_none() {
            return;
        }

        if self.state == ProcessState::Running {
            match self.stop(StopSequence::release()) {
                Ok(Some(code)) => debug!(pid = %self.pid, code, "Stopped on release"),
                Ok(None) => {
                    warn!(pid = %self.pid, "Process survived release sequence");
                    self.reap_after_kill();
                }
                Err(e) => {
                    warn!(pid = %self.pid, error = %e, "Failed to stop process on release");
                    self.reap_after_kill();
                }
            }
        }

        self.stdin = None;
        self.stdout = None;
        self.stderr = None;
        self.child = None;
        info!(pid = %self.pid, "Process released");
    }

    /// Whether [`release`](Self::release) already ran
    pub fn is_released(&self) -> bool {
        self.child.is_none()
    }

    fn output_pipe(&mut self, stream: Stream) -> Result<&mut Option<Pipe>> {
        match stream {
            Stream::Stdout => Ok(&mut self.stdout),
            Stream::Stderr => Ok(&mut self.stderr),
            Stream::Stdin => Err(ProcessError::invalid("stdin is not readable")),
        }
    }

    /// Read up to `max_size` bytes without blocking.
    ///
    /// An empty buffer means no data right now. When the child closes the
    /// stream the pipe is dropped and [`ProcessError::BrokenPipe`] is
    /// returned, as it is for every later read.
    pub fn read(&mut self, stream: Stream, max_size: usize) -> Result<Vec<u8>> {
        let pid = self.pid;
        let slot = self.output_pipe(stream)?;
        let pipe = slot.as_mut().ok_or(ProcessError::BrokenPipe)?;
        if max_size == 0 {
            return Ok(Vec::new());
        }
        match pipe.read(max_size) {
            Err(ProcessError::BrokenPipe) => {
                debug!(pid = %pid, stream = ?stream, "Stream reached end");
                *slot = None;
                Err(ProcessError::BrokenPipe)
            }
            other => other,
        }
    }

    /// [`read`](Self::read) from stdout
    pub fn read_stdout(&mut self, max_size: usize) -> Result<Vec<u8>> {
        self.read(Stream::Stdout, max_size)
    }

    /// [`read`](Self::read) from stderr
    pub fn read_stderr(&mut self, max_size: usize) -> Result<Vec<u8>> {
        self.read(Stream::Stderr, max_size)
    }

    /// Write to the child's stdin without blocking.
    ///
    /// Returns how many bytes were accepted, possibly fewer than
    /// `data.len()` (zero when the pipe is full).
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        let pipe = self.stdin.as_mut().ok_or(ProcessError::BrokenPipe)?;
        match pipe.write(data) {
            Err(ProcessError::BrokenPipe) => {
                debug!(pid = %self.pid, "Stdin closed by child");
                self.stdin = None;
                Err(ProcessError::BrokenPipe)
            }
            other => other,
        }
    }

    /// Close our end of a stream. Closing stdin delivers EOF to the child.
    pub fn close_stream(&mut self, stream: Stream) -> Result<()> {
        let slot = match stream {
            Stream::Stdin => &mut self.stdin,
            Stream::Stdout => &mut self.stdout,
            Stream::Stderr => &mut self.stderr,
        };
        slot.take().ok_or(ProcessError::BrokenPipe)?;
        debug!(pid = %self.pid, stream = ?stream, "Stream closed");
        Ok(())
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.release();
    }
}
