use crate::error::{CaptureError, Result};
use portable_pty::{native_pty_system, MasterPty, PtySize};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;

/// A pseudo-terminal whose slave side can be bound to the standard streams.
///
/// Anything writing to the slave descriptor sees a terminal device
/// (`isatty()` is true), so subprocesses keep their interactive output
/// behavior while being captured.
pub struct PtyBridge {
    master: Option<Box<dyn MasterPty + Send>>,
    slave: Option<OwnedFd>,
}

impl PtyBridge {
    pub fn open() -> Result<Self> {
        let (cols, rows) = query_terminal_size().unwrap_or((80, 24));
        let pair = native_pty_system()
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| CaptureError::UnsupportedPlatform {
                reason: format!("{err:#}"),
            })?;

        let tty_name = pair
            .master
            .tty_name()
            .ok_or_else(|| CaptureError::UnsupportedPlatform {
                reason: "pseudo-terminal has no slave device path".to_string(),
            })?;
        let slave = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(&tty_name)
            .map_err(|err| CaptureError::UnsupportedPlatform {
                reason: format!("failed to open {}: {}", tty_name.display(), err),
            })?;
        // Our own descriptor keeps the slave alive from here on.
        drop(pair.slave);

        let slave = OwnedFd::from(slave);
        if let Err(err) = disable_output_processing(&slave) {
            tracing::debug!("Leaving slave output processing enabled: {}", err);
        }

        Ok(Self {
            master: Some(pair.master),
            slave: Some(slave),
        })
    }

    /// The descriptor the standard streams get bound to.
    pub fn slave_fd(&self) -> Option<BorrowedFd<'_>> {
        self.slave.as_ref().map(|fd| fd.as_fd())
    }

    /// A private handle on the master side for the relay thread.
    ///
    /// The handle stays valid after the bridge is closed.
    pub fn clone_reader(&self) -> Result<File> {
        let raw = self
            .master
            .as_ref()
            .and_then(|master| MasterPty::as_raw_fd(&**master))
            .ok_or_else(|| CaptureError::UnsupportedPlatform {
                reason: "pseudo-terminal master has no descriptor".to_string(),
            })?;
        // SAFETY: `raw` belongs to the master we hold for the whole call.
        let master = unsafe { BorrowedFd::borrow_raw(raw) };
        master
            .try_clone_to_owned()
            .map(File::from)
            .map_err(|err| CaptureError::UnsupportedPlatform {
                reason: format!("failed to duplicate pseudo-terminal master: {err}"),
            })
    }

    /// Releases our slave descriptor so the master sees end-of-stream once
    /// every other holder (subprocesses) has exited.
    pub fn close_slave(&mut self) {
        self.slave.take();
    }

    pub fn close(&mut self) {
        self.slave.take();
        self.master.take();
    }

    pub fn is_open(&self) -> bool {
        self.master.is_some() || self.slave.is_some()
    }
}

impl Drop for PtyBridge {
    fn drop(&mut self) {
        self.close();
    }
}

/// Turns off output post-processing (`\n` -> `\r\n`) so captured bytes match
/// what producers wrote.
fn disable_output_processing(fd: &OwnedFd) -> io::Result<()> {
    unsafe {
        let mut termios: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd.as_raw_fd(), &mut termios) != 0 {
            return Err(io::Error::last_os_error());
        }
        termios.c_oflag &= !libc::OPOST;
        if libc::tcsetattr(fd.as_raw_fd(), libc::TCSANOW, &termios) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Query terminal size using ioctl TIOCGWINSZ.
fn query_terminal_size() -> Option<(u16, u16)> {
    unsafe {
        let mut ws: libc::winsize = std::mem::zeroed();
        if libc::ioctl(libc::STDOUT_FILENO, libc::TIOCGWINSZ, &mut ws) == 0
            && ws.ws_col > 0
            && ws.ws_row > 0
        {
            Some((ws.ws_col, ws.ws_row))
        } else {
            None
        }
    }
}
