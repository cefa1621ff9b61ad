use crate::capture::stack::CaptureStack;
use crate::capture::text::{decode, interpret_carriage_returns, raw_lines};
use crate::capture::CaptureBuffer;
use crate::config::CaptureConfig;
use crate::error::{CaptureError, Result};
use crate::pty::{PtyBridge, PumpSettings, RelayPump, SavedBindings};
use encoding_rs::Encoding;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a capture session. `Stopped` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Inactive,
    Active,
    Stopped,
}

/// Captures stdout and stderr of this process and its subprocesses.
///
/// While active, both standard streams are bound to a pseudo-terminal and a
/// relay thread copies everything written there into an in-memory buffer
/// (and, when relaying, on to the real terminal). Subprocesses spawned while
/// the session is active inherit the redirected descriptors.
///
/// Dropping the session ends it. Sessions nest: ending an inner session hands
/// the streams back to the enclosing one. Sessions must end in reverse order
/// of activation.
///
/// Reading with `partial = false` ends the session first, so the result is
/// the complete output; later reads return the same snapshot.
pub struct CaptureOutput {
    id: u64,
    config: CaptureConfig,
    encoding: &'static Encoding,
    state: SessionState,
    buffer: CaptureBuffer,
    bridge: Option<PtyBridge>,
    saved: Option<SavedBindings>,
    pump: Option<RelayPump>,
}

impl CaptureOutput {
    /// Creates an inactive session; call [`start`](Self::start) to begin
    /// capturing.
    pub fn new(config: CaptureConfig) -> Result<Self> {
        config.validate()?;
        let encoding = config.text_encoding()?;
        Ok(Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            config,
            encoding,
            state: SessionState::Inactive,
            buffer: CaptureBuffer::new(),
            bridge: None,
            saved: None,
            pump: None,
        })
    }

    /// Starts capturing with default settings (relaying on).
    pub fn begin() -> Result<Self> {
        Self::with_config(CaptureConfig::default())
    }

    /// Starts capturing with default settings and the given relay mode.
    pub fn with_relay(relay: bool) -> Result<Self> {
        Self::with_config(CaptureConfig::with_relay(relay))
    }

    pub fn with_config(config: CaptureConfig) -> Result<Self> {
        let mut session = Self::new(config)?;
        session.start()?;
        Ok(session)
    }

    /// Opens the pseudo-terminal, redirects stdout/stderr into it, starts the
    /// relay and pushes this session onto the capture stack.
    ///
    /// On failure nothing process-wide has changed.
    pub fn start(&mut self) -> Result<()> {
        if self.state != SessionState::Inactive {
            return Err(CaptureError::InvalidState {
                session: self.id,
                state: self.state,
            });
        }

        let mut stack = CaptureStack::lock();
        if let Err(err) = self.activate(&mut stack) {
            stack.release_terminal_if_idle();
            return Err(err);
        }

        tracing::debug!(
            "Capture session {} started (depth {}, relay {})",
            self.id,
            stack.depth(),
            self.config.relay
        );
        Ok(())
    }

    fn activate(&mut self, stack: &mut CaptureStack) -> Result<()> {
        stack.save_terminal_if_idle()?;
        let relay = if self.config.relay {
            Some(stack.terminal_writer(self.config.relay_target)?)
        } else {
            None
        };

        let bridge = PtyBridge::open()?;
        let reader = bridge.clone_reader()?;
        let slave = bridge
            .slave_fd()
            .ok_or_else(|| CaptureError::UnsupportedPlatform {
                reason: "pseudo-terminal slave is closed".to_string(),
            })?;

        let saved = SavedBindings::redirect(slave)?;
        let settings = PumpSettings {
            chunk_size: self.config.chunk_size,
            read_timeout: self.config.read_timeout(),
            read_retries: self.config.read_retries,
        };
        let pump = match RelayPump::start(reader, self.buffer.clone(), relay, settings) {
            Ok(pump) => pump,
            Err(err) => {
                if let Err(restore_err) = saved.restore() {
                    tracing::error!("Failed to restore standard streams: {}", restore_err);
                }
                return Err(err);
            }
        };

        stack.push(self.id);
        self.bridge = Some(bridge);
        self.saved = Some(saved);
        self.pump = Some(pump);
        self.state = SessionState::Active;
        Ok(())
    }

    /// Stops capturing.
    ///
    /// Restores the bindings saved at activation, waits for the relay to
    /// drain, pops this session off the capture stack and closes the
    /// pseudo-terminal. Ending a stopped session does nothing.
    ///
    /// Fails with [`CaptureError::StackDisciplineViolation`] when a session
    /// started after this one is still active; the session then stays active.
    pub fn end(&mut self) -> Result<()> {
        match self.state {
            SessionState::Stopped => return Ok(()),
            SessionState::Inactive => {
                self.state = SessionState::Stopped;
                return Ok(());
            }
            SessionState::Active => {}
        }

        CaptureStack::lock().ensure_top(self.id)?;
        let delay = self.config.termination_delay();
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let mut stack = CaptureStack::lock();
        stack.ensure_top(self.id)?;

        let restored = match self.saved.take() {
            Some(saved) => saved.restore(),
            None => Ok(()),
        };
        if let Some(bridge) = self.bridge.as_mut() {
            bridge.close_slave();
        }
        if let Some(pump) = self.pump.take() {
            let report = pump.finish(self.config.drain_grace());
            tracing::debug!(
                "Capture session {} ended: {} bytes, {} relay failures, drained {}",
                self.id,
                report.bytes,
                report.relay_failures,
                report.drained
            );
        }
        let popped = stack.pop(self.id);
        drop(stack);

        if let Some(mut bridge) = self.bridge.take() {
            bridge.close();
        }
        self.state = SessionState::Stopped;
        restored.and(popped)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn is_capturing(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Captured output as raw bytes.
    ///
    /// With `partial = true` the session keeps capturing and the result may
    /// end mid-line or mid-character.
    pub fn get_bytes(&mut self, partial: bool) -> Result<Vec<u8>> {
        if !partial {
            self.end()?;
        }
        Ok(self.buffer.snapshot())
    }

    /// Captured output as text, with carriage returns interpreted unless the
    /// session's config turns that off.
    pub fn get_text(&mut self, partial: bool) -> Result<String> {
        let text = self.decoded(partial)?;
        if self.config.interpret_carriage_returns {
            Ok(interpret_carriage_returns(&text).join("\n"))
        } else {
            Ok(text)
        }
    }

    /// Captured output split into lines, in the order they were written.
    pub fn get_lines(&mut self, partial: bool) -> Result<Vec<String>> {
        let text = self.decoded(partial)?;
        if self.config.interpret_carriage_returns {
            Ok(interpret_carriage_returns(&text))
        } else {
            Ok(raw_lines(&text))
        }
    }

    /// Decoded output without carriage-return interpretation.
    pub fn get_raw_text(&mut self, partial: bool) -> Result<String> {
        self.decoded(partial)
    }

    /// Decoded output split into lines without carriage-return
    /// interpretation. A lone `\r` still ends a line, so progress frames
    /// come back one per line.
    pub fn get_raw_lines(&mut self, partial: bool) -> Result<Vec<String>> {
        Ok(raw_lines(&self.decoded(partial)?))
    }

    fn decoded(&mut self, partial: bool) -> Result<String> {
        Ok(decode(&self.get_bytes(partial)?, self.encoding))
    }
}

impl Drop for CaptureOutput {
    fn drop(&mut self) {
        if self.state != SessionState::Active {
            return;
        }
        match self.end() {
            Ok(()) => {}
            Err(err @ CaptureError::StackDisciplineViolation { .. }) => {
                tracing::error!("Capture session dropped out of order: {}", err);
                if !thread::panicking() {
                    panic!("{}", err);
                }
            }
            Err(err) => {
                tracing::error!("Failed to end capture session {}: {}", self.id, err);
            }
        }
    }
}

impl std::fmt::Debug for CaptureOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureOutput")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("relay", &self.config.relay)
            .field("encoding", &self.encoding.name())
            .field("captured", &self.buffer.len())
            .finish()
    }
}

/// Runs `body` inside a capture session and returns its result together with
/// the stopped session.
///
/// The session ends even if `body` panics.
pub fn capture<T, F>(config: CaptureConfig, body: F) -> Result<(T, CaptureOutput)>
where
    F: FnOnce(&mut CaptureOutput) -> T,
{
    let mut session = CaptureOutput::with_config(config)?;
    let value = body(&mut session);
    session.end()?;
    Ok((value, session))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_inactive() -> Result<()> {
        let session = CaptureOutput::new(CaptureConfig::with_relay(false))?;
        assert_eq!(session.state(), SessionState::Inactive);
        assert!(!session.is_capturing());
        Ok(())
    }

    #[test]
    fn invalid_config_is_rejected_before_activation() {
        let config = CaptureConfig {
            chunk_size: 0,
            ..CaptureConfig::default()
        };
        assert!(matches!(
            CaptureOutput::new(config),
            Err(CaptureError::Config(_))
        ));
    }

    #[test]
    fn ending_an_inactive_session_stops_it() -> Result<()> {
        let mut session = CaptureOutput::new(CaptureConfig::default())?;
        assert!(session.get_bytes(false)?.is_empty());
        assert_eq!(session.state(), SessionState::Stopped);
        match session.start() {
            Err(CaptureError::InvalidState { state, .. }) => {
                assert_eq!(state, SessionState::Stopped)
            }
            other => panic!("Expected InvalidState, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn session_ids_are_unique() -> Result<()> {
        let a = CaptureOutput::new(CaptureConfig::default())?;
        let b = CaptureOutput::new(CaptureConfig::default())?;
        assert_ne!(a.id(), b.id());
        Ok(())
    }
}
