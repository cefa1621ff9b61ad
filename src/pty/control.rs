use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle phase of a relay thread, driven by the owning session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PumpPhase {
    /// Capturing; idle polls are ignored.
    Running = 0,
    /// Teardown requested; exit at end-of-stream or on the first idle poll.
    Draining = 1,
    /// Grace period expired; exit at the next iteration.
    Halted = 2,
}

/// Shared stop/drain signal between a session and its relay thread.
pub struct PumpControl {
    phase: AtomicU8,
}

impl PumpControl {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(PumpPhase::Running as u8),
        }
    }

    /// Get current phase
    pub fn phase(&self) -> PumpPhase {
        match self.phase.load(Ordering::SeqCst) {
            0 => PumpPhase::Running,
            1 => PumpPhase::Draining,
            _ => PumpPhase::Halted,
        }
    }

    /// Ask the relay to read what is left and stop.
    ///
    /// Never moves a halted relay back to draining.
    pub fn request_drain(&self) {
        let _ = self.phase.compare_exchange(
            PumpPhase::Running as u8,
            PumpPhase::Draining as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    pub fn halt(&self) {
        self.phase.store(PumpPhase::Halted as u8, Ordering::SeqCst);
    }
}

impl Default for PumpControl {
    fn default() -> Self {
        Self::new()
    }
}
