//! Shared helpers for tests that capture the process-wide standard streams.

#![allow(dead_code)]

use capturer::CaptureConfig;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

static MARKER_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Writes straight to fd 1.
///
/// `print!` would be swallowed by the test harness' own output capture.
pub fn write_stdout(text: &str) {
    let mut stdout = io::stdout();
    stdout.write_all(text.as_bytes()).expect("write stdout");
    stdout.flush().expect("flush stdout");
}

/// Writes straight to fd 2.
pub fn write_stderr(text: &str) {
    let mut stderr = io::stderr();
    stderr.write_all(text.as_bytes()).expect("write stderr");
    stderr.flush().expect("flush stderr");
}

/// A unique token that cannot be a substring of another marker.
pub fn marker(label: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();
    let seq = MARKER_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("<{label}-{}-{seq}-{nanos}>", std::process::id())
}

/// Capture settings that keep the test log quiet.
pub fn quiet() -> CaptureConfig {
    CaptureConfig::with_relay(false)
}

/// Polls `condition` until it holds or `timeout` expires.
pub fn wait_for<F: FnMut() -> bool>(mut condition: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

/// Device and inode behind a descriptor, used to check which file a
/// standard stream is bound to.
pub fn binding_of(fd: i32) -> (u64, u64) {
    unsafe {
        let mut stat: libc::stat = std::mem::zeroed();
        assert_eq!(libc::fstat(fd, &mut stat), 0, "fstat({fd}) failed");
        (stat.st_dev as u64, stat.st_ino as u64)
    }
}

pub fn std_bindings() -> ((u64, u64), (u64, u64)) {
    (
        binding_of(libc::STDOUT_FILENO),
        binding_of(libc::STDERR_FILENO),
    )
}

/// Runs `body` with the soft open-file limit lowered to `limit`, so any
/// attempt to open another descriptor fails.
pub fn with_descriptor_limit<T>(limit: u64, body: impl FnOnce() -> T) -> T {
    let mut original = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    unsafe {
        assert_eq!(libc::getrlimit(libc::RLIMIT_NOFILE, &mut original), 0);
        let lowered = libc::rlimit {
            rlim_cur: limit as libc::rlim_t,
            rlim_max: original.rlim_max,
        };
        assert_eq!(libc::setrlimit(libc::RLIMIT_NOFILE, &lowered), 0);
    }
    let value = body();
    unsafe {
        assert_eq!(libc::setrlimit(libc::RLIMIT_NOFILE, &original), 0);
    }
    value
}
