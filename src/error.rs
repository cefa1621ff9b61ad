//! Error types for capture sessions.

use thiserror::Error;

use crate::capture::SessionState;
use crate::config::ConfigError;
use crate::pty::StdStream;

/// Errors that can occur while activating, reading or ending a capture.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The host has no usable pseudo-terminal facility.
    #[error("Pseudo-terminals are not supported on this host: {reason}")]
    UnsupportedPlatform { reason: String },

    /// Duplicating or rebinding a standard stream descriptor failed.
    #[error("Failed to redirect {stream}: {source}")]
    RedirectFailed {
        stream: StdStream,
        #[source]
        source: std::io::Error,
    },

    /// A session was ended while a session started after it is still active.
    #[error("Capture session {session} is not the innermost active capture (top is {top})")]
    StackDisciplineViolation { session: u64, top: u64 },

    /// The session cannot perform the requested transition.
    #[error("Capture session {session} cannot be started from state {state:?}")]
    InvalidState { session: u64, state: SessionState },

    /// The relay thread could not be spawned.
    #[error("Failed to start relay thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// Invalid capture configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T, E = CaptureError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_failure_names_the_stream() {
        let err = CaptureError::RedirectFailed {
            stream: StdStream::Stderr,
            source: std::io::Error::from_raw_os_error(libc::EMFILE),
        };
        let message = err.to_string();
        assert!(message.starts_with("Failed to redirect stderr"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn discipline_violation_mentions_both_sessions() {
        let err = CaptureError::StackDisciplineViolation { session: 3, top: 7 };
        assert_eq!(
            err.to_string(),
            "Capture session 3 is not the innermost active capture (top is 7)"
        );
    }

    #[test]
    fn config_errors_convert() {
        let err: CaptureError = ConfigError::ValidationError {
            message: "chunk_size must be positive".to_string(),
        }
        .into();
        assert!(matches!(err, CaptureError::Config(_)));
    }
}
