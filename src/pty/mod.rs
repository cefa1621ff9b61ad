//! Pseudo-terminal plumbing: the PTY pair, standard stream redirection and
//! the relay thread that drains the master side.

mod bridge;
mod control;
mod pump;
mod redirect;

pub use bridge::PtyBridge;
pub use control::{PumpControl, PumpPhase};
pub use pump::{PumpReport, PumpSettings, RelayPump};
pub use redirect::{SavedBindings, StdStream};
