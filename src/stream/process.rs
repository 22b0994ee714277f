//! Endpoint over a child process's stdin and stdout
//!
//! The endpoint is valid while both pipes are open and the child is running
//! or still has output queued. Once it turns invalid it stays invalid.
//! Dropping it kills and reaps the child.

use std::ffi::OsStr;
use std::io;
use std::os::fd::BorrowedFd;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use super::{Endpoint, Stream};
use crate::error::{Error, Result};
use crate::transport::{ChildPipe, Pipe};

/// A running child process seen as a byte stream
///
/// Reads come from the child's stdout and writes go to its stdin. Stderr is
/// inherited.
#[derive(Debug)]
pub struct ProcessStream {
    pipes: Stream<ChildPipe>,
    child: Child,
    paused: bool,
}

impl ProcessStream {
    /// Spawn `program` with no arguments
    pub fn spawn(program: impl AsRef<OsStr>) -> Result<Self> {
        Self::spawn_command(Command::new(program))
    }

    /// Spawn a prepared command with piped stdin and stdout
    pub fn spawn_command(mut command: Command) -> Result<Self> {
        command.stdin(Stdio::piped()).stdout(Stdio::piped());
        let mut child = command.spawn().map_err(|e| {
            tracing::error!(error = %e, "failed to spawn child process");
            Error::from(e)
        })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            // Both were requested as pipes above
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::Io(io::Error::other("child pipes unavailable")));
        };

        tracing::debug!(pid = child.id(), "spawned child process");
        Ok(Self {
            pipes: Stream::new(Pipe::new(stdout, stdin)),
            child,
            paused: false,
        })
    }

    /// OS process id
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Whether the child has not exited yet
    ///
    /// Reaps the child if it has.
    pub fn running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Whether the child was stopped with [`pause`](Self::pause)
    pub fn paused(&self) -> bool {
        self.paused
    }

    /// Stop the child (SIGSTOP)
    pub fn pause(&mut self) -> bool {
        let stopped = self.signal(libc::SIGSTOP);
        if stopped {
            self.paused = true;
        }
        stopped
    }

    /// Continue a stopped child (SIGCONT)
    pub fn resume(&mut self) -> bool {
        let resumed = self.signal(libc::SIGCONT);
        if resumed {
            self.paused = false;
        }
        resumed
    }

    fn signal(&mut self, signal: libc::c_int) -> bool {
        if !self.running() {
            return false;
        }
        let Ok(pid) = libc::pid_t::try_from(self.child.id()) else {
            return false;
        };
        // SAFETY: kill(2) has no memory-safety preconditions; the pid belongs
        // to our own unreaped child, so it cannot have been recycled.
        let rc = unsafe { libc::kill(pid, signal) };
        if rc != 0 {
            tracing::warn!(pid, signal, error = %io::Error::last_os_error(), "kill failed");
        }
        rc == 0
    }
}

impl Endpoint for ProcessStream {
    fn is_valid(&mut self) -> bool {
        if !self.pipes.is_valid() {
            return false;
        }
        // Output may still be queued in the pipe after the child exits
        if self.running() || self.pipes.can_read(Some(Duration::ZERO)) {
            return true;
        }
        tracing::debug!(pid = self.child.id(), "child process exited");
        self.pipes.close();
        false
    }

    fn close(&mut self) {
        self.pipes.close();
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.is_valid() {
            return Err(Error::ConnectionClosed);
        }
        self.pipes.read_raw(buf)
    }

    fn write_raw(&mut self, buf: &[u8]) -> Result<usize> {
        if !self.is_valid() {
            return Err(Error::ConnectionClosed);
        }
        self.pipes.write_raw(buf)
    }

    fn read_fd(&self) -> Option<BorrowedFd<'_>> {
        self.pipes.read_fd()
    }

    fn write_fd(&self) -> Option<BorrowedFd<'_>> {
        self.pipes.write_fd()
    }
}

impl Drop for ProcessStream {
    fn drop(&mut self) {
        self.pipes.close();
        if self.running() {
            if self.paused {
                self.resume();
            }
            if let Err(e) = self.child.kill() {
                tracing::debug!(error = %e, "failed to kill child process");
            }
        }
        if let Err(e) = self.child.wait() {
            tracing::debug!(error = %e, "failed to reap child process");
        }
    }
}
