use crate::error::{CaptureError, Result};
use std::fmt;
use std::io::{self, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

/// One of the two process-wide standard output streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdStream {
    Stdout,
    Stderr,
}

impl StdStream {
    pub fn fileno(self) -> RawFd {
        match self {
            StdStream::Stdout => libc::STDOUT_FILENO,
            StdStream::Stderr => libc::STDERR_FILENO,
        }
    }

    /// Duplicates whatever this stream is currently bound to.
    ///
    /// The duplicate is close-on-exec, so spawned subprocesses never inherit
    /// saved bindings.
    pub fn duplicate(self) -> Result<OwnedFd> {
        // SAFETY: fd 1 and fd 2 stay open for the life of the process.
        let current = unsafe { BorrowedFd::borrow_raw(self.fileno()) };
        current
            .try_clone_to_owned()
            .map_err(|source| CaptureError::RedirectFailed {
                stream: self,
                source,
            })
    }

    /// Points this stream at `target`.
    fn rebind(self, target: RawFd) -> Result<()> {
        loop {
            if unsafe { libc::dup2(target, self.fileno()) } >= 0 {
                return Ok(());
            }
            let source = io::Error::last_os_error();
            if source.kind() != io::ErrorKind::Interrupted {
                return Err(CaptureError::RedirectFailed {
                    stream: self,
                    source,
                });
            }
        }
    }
}

impl fmt::Display for StdStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StdStream::Stdout => write!(f, "stdout"),
            StdStream::Stderr => write!(f, "stderr"),
        }
    }
}

/// The stdout/stderr bindings that were active before a redirect.
///
/// Restoring puts back exactly these bindings, so a nested capture hands
/// the streams back to the enclosing capture rather than the terminal.
#[derive(Debug)]
pub struct SavedBindings {
    stdout: OwnedFd,
    stderr: OwnedFd,
}

impl SavedBindings {
    /// Saves the current bindings and points stdout and stderr at `target`.
    pub fn redirect(target: BorrowedFd<'_>) -> Result<Self> {
        Self::save()?.point_at(target)
    }

    fn save() -> Result<Self> {
        flush_std_streams();
        Ok(Self {
            stdout: StdStream::Stdout.duplicate()?,
            stderr: StdStream::Stderr.duplicate()?,
        })
    }

    /// If stderr cannot be rebound, stdout is put back before the error is
    /// returned.
    fn point_at(self, target: BorrowedFd<'_>) -> Result<Self> {
        StdStream::Stdout.rebind(target.as_raw_fd())?;
        let rollback = scopeguard::guard(self.stdout.as_raw_fd(), |saved| {
            if let Err(err) = StdStream::Stdout.rebind(saved) {
                tracing::error!("Failed to roll back stdout redirect: {}", err);
            }
        });
        StdStream::Stderr.rebind(target.as_raw_fd())?;
        scopeguard::ScopeGuard::into_inner(rollback);
        Ok(self)
    }

    /// Rebinds stdout and stderr to the saved descriptors and releases them.
    ///
    /// Both streams are attempted even if the first one fails; the first
    /// error is returned.
    pub fn restore(self) -> Result<()> {
        flush_std_streams();
        let stdout = StdStream::Stdout.rebind(self.stdout.as_raw_fd());
        let stderr = StdStream::Stderr.rebind(self.stderr.as_raw_fd());
        stdout.and(stderr)
    }

    pub fn saved(&self, stream: StdStream) -> BorrowedFd<'_> {
        match stream {
            StdStream::Stdout => self.stdout.as_fd(),
            StdStream::Stderr => self.stderr.as_fd(),
        }
    }
}

/// Pushes anything buffered in Rust's stdout/stderr handles to the
/// descriptor they are currently bound to.
fn flush_std_streams() {
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();
}
