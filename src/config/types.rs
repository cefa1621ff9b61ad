use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for one capture session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Relay captured output to the real terminal while capturing (default: true).
    #[serde(default = "default_relay")]
    pub relay: bool,
    /// Which original stream receives relayed output (default: stderr).
    #[serde(default)]
    pub relay_target: RelayTarget,
    /// Maximum number of bytes read from the pseudo-terminal per call (default: 1024).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// How long one relay poll waits for data, in milliseconds (default: 50).
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// How long teardown waits for the relay to drain, in milliseconds (default: 1000).
    #[serde(default = "default_drain_grace_ms")]
    pub drain_grace_ms: u64,
    /// Consecutive read errors tolerated before the relay gives up (default: 3).
    #[serde(default = "default_read_retries")]
    pub read_retries: u32,
    /// Pause before teardown starts, in milliseconds (default: 0).
    #[serde(default)]
    pub termination_delay_ms: u64,
    /// Interpret carriage returns in `get_text`/`get_lines` (default: true).
    #[serde(default = "default_interpret_carriage_returns")]
    pub interpret_carriage_returns: bool,
    /// Label of the character encoding used to decode captured text (default: "utf-8").
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

/// Original stream that relayed output is written to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayTarget {
    Stdout,
    #[default]
    Stderr,
}

fn default_relay() -> bool {
    true
}

fn default_chunk_size() -> usize {
    1024
}

fn default_read_timeout_ms() -> u64 {
    50
}

fn default_drain_grace_ms() -> u64 {
    1000
}

fn default_read_retries() -> u32 {
    3
}

fn default_interpret_carriage_returns() -> bool {
    true
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            relay: default_relay(),
            relay_target: RelayTarget::default(),
            chunk_size: default_chunk_size(),
            read_timeout_ms: default_read_timeout_ms(),
            drain_grace_ms: default_drain_grace_ms(),
            read_retries: default_read_retries(),
            termination_delay_ms: 0,
            interpret_carriage_returns: default_interpret_carriage_returns(),
            encoding: default_encoding(),
        }
    }
}

impl CaptureConfig {
    /// Default settings with relaying switched on or off.
    pub fn with_relay(relay: bool) -> Self {
        Self {
            relay,
            ..Self::default()
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    pub fn termination_delay(&self) -> Duration {
        Duration::from_millis(self.termination_delay_ms)
    }
}
