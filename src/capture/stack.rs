//! Process-wide record of active captures.
//!
//! The standard stream bindings belong to the whole process, so every
//! capture activation and teardown goes through this stack while holding its
//! lock. Sessions are popped strictly in reverse order of activation.

use crate::config::RelayTarget;
use crate::error::{CaptureError, Result};
use crate::pty::StdStream;
use parking_lot::{const_mutex, Mutex, MutexGuard};
use std::fs::File;
use std::os::fd::OwnedFd;

static STACK: Mutex<CaptureStack> = const_mutex(CaptureStack::new());

/// The stdout/stderr bindings that were active before the outermost capture.
struct TerminalBindings {
    stdout: OwnedFd,
    stderr: OwnedFd,
}

impl TerminalBindings {
    fn current() -> Result<Self> {
        Ok(Self {
            stdout: StdStream::Stdout.duplicate()?,
            stderr: StdStream::Stderr.duplicate()?,
        })
    }
}

pub struct CaptureStack {
    sessions: Vec<u64>,
    terminal: Option<TerminalBindings>,
}

impl CaptureStack {
    pub const fn new() -> Self {
        Self {
            sessions: Vec::new(),
            terminal: None,
        }
    }

    /// Locks the process-wide stack.
    pub fn lock() -> MutexGuard<'static, CaptureStack> {
        STACK.lock()
    }

    pub fn depth(&self) -> usize {
        self.sessions.len()
    }

    pub fn top(&self) -> Option<u64> {
        self.sessions.last().copied()
    }

    pub fn push(&mut self, session: u64) {
        self.sessions.push(session);
    }

    /// Fails unless `session` is the innermost active capture.
    pub fn ensure_top(&self, session: u64) -> Result<()> {
        match self.top() {
            Some(top) if top == session => Ok(()),
            top => Err(CaptureError::StackDisciplineViolation {
                session,
                top: top.unwrap_or_default(),
            }),
        }
    }

    /// Removes the innermost session, which must be `session`.
    pub fn pop(&mut self, session: u64) -> Result<()> {
        self.ensure_top(session)?;
        self.sessions.pop();
        self.release_terminal_if_idle();
        Ok(())
    }

    /// Remembers the current stdout/stderr as the real terminal.
    ///
    /// Only the outermost activation records them, whether or not it relays,
    /// so a nested session that relays never writes into an enclosing
    /// capture.
    pub fn save_terminal_if_idle(&mut self) -> Result<()> {
        if self.sessions.is_empty() && self.terminal.is_none() {
            self.terminal = Some(TerminalBindings::current()?);
        }
        Ok(())
    }

    /// A handle on the real terminal for relaying.
    ///
    /// The terminal is whatever stdout/stderr were bound to when the stack
    /// was last empty, so nested captures relay past their enclosing capture.
    pub fn terminal_writer(&mut self, target: RelayTarget) -> Result<File> {
        let terminal = match self.terminal.take() {
            Some(terminal) => terminal,
            None => TerminalBindings::current()?,
        };
        let terminal = self.terminal.insert(terminal);
        let (stream, fd) = match target {
            RelayTarget::Stdout => (StdStream::Stdout, &terminal.stdout),
            RelayTarget::Stderr => (StdStream::Stderr, &terminal.stderr),
        };
        fd.try_clone()
            .map(File::from)
            .map_err(|source| CaptureError::RedirectFailed { stream, source })
    }

    /// Drops the saved terminal bindings once no capture is active.
    pub fn release_terminal_if_idle(&mut self) {
        if self.sessions.is_empty() {
            self.terminal = None;
        }
    }
}

/// Number of captures currently active in this process.
pub fn active_captures() -> usize {
    CaptureStack::lock().depth()
}
