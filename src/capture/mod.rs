//! Capture sessions, their shared buffer and the process-wide capture stack.

mod buffer;
mod session;
mod stack;
mod text;

pub use buffer::CaptureBuffer;
pub use session::{capture, CaptureOutput, SessionState};
pub use stack::active_captures;
pub use text::{decode, interpret_carriage_returns, raw_lines};
