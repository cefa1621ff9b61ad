//! Capture the standard output and standard error of the current process and
//! of every subprocess it spawns.
//!
//! Both streams are redirected into a pseudo-terminal, so subprocesses still
//! believe they write to an interactive terminal (colors, progress bars),
//! while a background relay thread buffers everything and can echo it to the
//! real terminal as it arrives.
//!
//! ```no_run
//! use capturer::CaptureOutput;
//! use std::io::Write;
//!
//! let mut capture = CaptureOutput::with_relay(false)?;
//! std::io::stdout().write_all(b"hello\n")?;
//! std::process::Command::new("echo").arg("from a child").status()?;
//! assert_eq!(capture.get_lines(false)?, vec!["hello", "from a child"]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! The crate emits `tracing` events but never installs a subscriber. A
//! subscriber that writes to stderr while a capture is active is captured
//! along with everything else.

#![cfg(unix)]

pub mod capture;
pub mod config;
pub mod error;
pub mod pty;

pub use capture::{
    active_captures, capture, interpret_carriage_returns, CaptureBuffer, CaptureOutput,
    SessionState,
};
pub use config::{CaptureConfig, ConfigError, RelayTarget};
pub use error::{CaptureError, Result};
