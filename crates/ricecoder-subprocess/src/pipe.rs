//! Parent-side pipe ends in non-blocking mode

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, OwnedFd};

use nix::fcntl::{fcntl, FcntlArg, OFlag};

use crate::error::{ProcessError, Result};

/// Caller's end of one of the child's standard streams.
#[derive(Debug)]
pub struct Pipe {
    file: File,
}

fn set_nonblocking(fd: &OwnedFd) -> Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL)?);
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

// Both ends are close-on-exec from creation.
#[cfg(not(any(target_os = "macos", target_os = "ios")))]
fn cloexec_pipe() -> Result<(OwnedFd, OwnedFd)> {
    Ok(nix::unistd::pipe2(OFlag::O_CLOEXEC)?)
}

// No pipe2 on Apple targets.
#[cfg(any(target_os = "macos", target_os = "ios"))]
fn cloexec_pipe() -> Result<(OwnedFd, OwnedFd)> {
    use nix::fcntl::FdFlag;

    let (reader, writer) = nix::unistd::pipe()?;
    for fd in [&reader, &writer] {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    }
    Ok((reader, writer))
}

impl Pipe {
    /// Take ownership of a descriptor and switch it to non-blocking mode.
    pub fn from_fd(fd: impl Into<OwnedFd>) -> Result<Self> {
        let fd = fd.into();
        set_nonblocking(&fd)?;
        Ok(Self { file: File::from(fd) })
    }

    /// A fresh close-on-exec pipe: non-blocking read end for the parent,
    /// blocking write end for the child.
    pub(crate) fn pair() -> Result<(Pipe, OwnedFd)> {
        let (reader, writer) = cloexec_pipe()?;
        Ok((Pipe::from_fd(reader)?, writer))
    }

    /// Read at most `max_size` bytes.
    ///
    /// `Ok` with an empty buffer means nothing is available yet.
    /// End of stream is reported as [`ProcessError::BrokenPipe`].
    pub fn read(&mut self, max_size: usize) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(max_size)
            .map_err(|_| ProcessError::OutOfMemory)?;
        buf.resize(max_size, 0);

        loop {
            match self.file.read(&mut buf) {
                Ok(0) if max_size > 0 => return Err(ProcessError::BrokenPipe),
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(buf);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    buf.clear();
                    return Ok(buf);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Write as much of `data` as the pipe accepts right now.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        loop {
            match self.file.write(data) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(0),
                Err(e) => return Err(e.into()),
            }
        }
    }
}
