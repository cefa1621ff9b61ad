use crate::capture::CaptureBuffer;
use crate::error::{CaptureError, Result};
use crate::pty::control::{PumpControl, PumpPhase};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Pause between retries of a failed read.
const RETRY_BACKOFF: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy)]
pub struct PumpSettings {
    pub chunk_size: usize,
    pub read_timeout: Duration,
    pub read_retries: u32,
}

/// What a relay thread did over its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpReport {
    pub bytes: u64,
    pub relay_failures: u64,
    /// False when the thread had to be halted after the grace period.
    pub drained: bool,
}

/// Background thread moving bytes from the pseudo-terminal master into a
/// capture buffer, and optionally on to the real terminal.
pub struct RelayPump {
    control: Arc<PumpControl>,
    drained: Receiver<()>,
    thread: Option<thread::JoinHandle<PumpReport>>,
}

impl RelayPump {
    pub fn start(
        reader: File,
        buffer: CaptureBuffer,
        relay: Option<File>,
        settings: PumpSettings,
    ) -> Result<Self> {
        let control = Arc::new(PumpControl::new());
        let (drained_tx, drained) = sync_channel(1);
        let worker = Worker {
            reader,
            buffer,
            relay,
            control: Arc::clone(&control),
            settings,
            report: PumpReport::default(),
        };
        let thread = thread::Builder::new()
            .name("capturer-relay".to_string())
            .spawn(move || worker.run(drained_tx))
            .map_err(CaptureError::Spawn)?;

        Ok(Self {
            control,
            drained,
            thread: Some(thread),
        })
    }

    /// Requests a drain and waits for it, halting the thread if it does not
    /// finish within `grace`.
    pub fn finish(mut self, grace: Duration) -> PumpReport {
        self.control.request_drain();
        let drained = match self.drained.recv_timeout(grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    "Relay did not drain within {:?}; halting with output still pending",
                    grace
                );
                self.control.halt();
                false
            }
        };
        let mut report = self.join();
        report.drained = drained;
        report
    }

    fn join(&mut self) -> PumpReport {
        self.thread
            .take()
            .and_then(|thread| thread.join().ok())
            .unwrap_or_default()
    }
}

impl Drop for RelayPump {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.control.halt();
            let _ = self.join();
        }
    }
}

struct Worker {
    reader: File,
    buffer: CaptureBuffer,
    relay: Option<File>,
    control: Arc<PumpControl>,
    settings: PumpSettings,
    report: PumpReport,
}

impl Worker {
    fn run(mut self, drained: SyncSender<()>) -> PumpReport {
        let mut chunk = vec![0u8; self.settings.chunk_size];
        let mut retries = RetryBudget::new(self.settings.read_retries);

        loop {
            let phase = self.control.phase();
            if phase == PumpPhase::Halted {
                break;
            }

            match wait_readable(&self.reader, self.settings.read_timeout) {
                Ok(true) => {}
                Ok(false) if phase == PumpPhase::Draining => break,
                Ok(false) => continue,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if is_end_of_stream(&err) => break,
                Err(err) => {
                    if retries.exhausted_by(&err) {
                        break;
                    }
                    continue;
                }
            }

            match self.reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(count) => {
                    retries.reset();
                    self.deliver(&chunk[..count]);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) if is_end_of_stream(&err) => break,
                Err(err) => {
                    if retries.exhausted_by(&err) {
                        break;
                    }
                }
            }
        }

        let _ = drained.send(());
        self.report
    }

    fn deliver(&mut self, bytes: &[u8]) {
        self.buffer.append(bytes);
        self.report.bytes += bytes.len() as u64;

        let Some(relay) = self.relay.as_mut() else {
            return;
        };
        if let Err(err) = relay.write_all(bytes) {
            self.report.relay_failures += 1;
            // Only the first failure is logged: a log line on stderr would
            // itself be captured and relayed again.
            if self.report.relay_failures == 1 {
                tracing::warn!("Relaying captured output to the terminal failed: {}", err);
            }
        }
    }
}

/// Consecutive read failures tolerated before the stream is treated as gone.
///
/// Interrupted calls are not failures: `poll` is never restarted after a
/// signal, so any process with a signal handler sees them routinely.
struct RetryBudget {
    limit: u32,
    spent: u32,
}

impl RetryBudget {
    fn new(limit: u32) -> Self {
        Self { limit, spent: 0 }
    }

    fn reset(&mut self) {
        self.spent = 0;
    }

    /// Counts a failed call; true once the budget is spent.
    fn exhausted_by(&mut self, err: &io::Error) -> bool {
        if err.kind() == io::ErrorKind::Interrupted {
            return false;
        }
        self.spent += 1;
        if self.spent > self.limit {
            tracing::debug!(
                "Relay read failed {} times, treating as end of stream: {}",
                self.spent,
                err
            );
            return true;
        }
        thread::sleep(RETRY_BACKOFF);
        false
    }
}

/// `EIO` is what a pseudo-terminal master reports once every slave
/// descriptor is closed.
fn is_end_of_stream(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EIO) | Some(libc::EBADF))
}

fn wait_readable(file: &File, timeout: Duration) -> io::Result<bool> {
    let mut pollfd = libc::pollfd {
        fd: file.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
    let ready = unsafe { libc::poll(&mut pollfd, 1, millis) };
    if ready < 0 {
        return Err(io::Error::last_os_error());
    }
    if ready == 0 {
        return Ok(false);
    }
    if pollfd.revents & libc::POLLNVAL != 0 {
        return Err(io::Error::from_raw_os_error(libc::EBADF));
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::PtyBridge;
    use std::io::{Seek, SeekFrom};
    use std::time::Instant;

    fn settings() -> PumpSettings {
        PumpSettings {
            chunk_size: 16,
            read_timeout: Duration::from_millis(20),
            read_retries: 3,
        }
    }

    fn slave_writer(bridge: &PtyBridge) -> io::Result<File> {
        let slave = bridge
            .slave_fd()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "slave closed"))?;
        Ok(File::from(slave.try_clone_to_owned()?))
    }

    #[test]
    fn pumps_bytes_in_order() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let mut bridge = PtyBridge::open()?;
        let buffer = CaptureBuffer::new();
        let pump = RelayPump::start(bridge.clone_reader()?, buffer.clone(), None, settings())?;

        {
            let mut writer = slave_writer(&bridge)?;
            for line in ["first line\n", "second, longer than one chunk\n", "third\n"] {
                writer.write_all(line.as_bytes())?;
            }
        }
        bridge.close_slave();

        let report = pump.finish(Duration::from_secs(2));
        assert!(report.drained);
        assert_eq!(
            buffer.snapshot(),
            b"first line\nsecond, longer than one chunk\nthird\n"
        );
        assert_eq!(report.bytes, buffer.len() as u64);
        Ok(())
    }

    #[test]
    fn relays_what_it_buffers() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let mut bridge = PtyBridge::open()?;
        let buffer = CaptureBuffer::new();
        let mut relay_file = tempfile::tempfile()?;
        let pump = RelayPump::start(
            bridge.clone_reader()?,
            buffer.clone(),
            Some(relay_file.try_clone()?),
            settings(),
        )?;

        slave_writer(&bridge)?.write_all(b"shown and kept")?;
        bridge.close_slave();
        pump.finish(Duration::from_secs(2));

        relay_file.seek(SeekFrom::Start(0))?;
        let mut relayed = Vec::new();
        relay_file.read_to_end(&mut relayed)?;
        assert_eq!(relayed, b"shown and kept");
        assert_eq!(buffer.snapshot(), b"shown and kept");
        Ok(())
    }

    #[test]
    fn interrupted_calls_do_not_spend_retries() {
        let mut retries = RetryBudget::new(1);
        for _ in 0..10 {
            assert!(!retries.exhausted_by(&io::Error::from(io::ErrorKind::Interrupted)));
        }
        let failure = io::Error::from_raw_os_error(libc::EAGAIN);
        assert!(!retries.exhausted_by(&failure));
        assert!(retries.exhausted_by(&failure));
    }

    #[test]
    fn successful_read_refills_the_budget() {
        let failure = io::Error::from_raw_os_error(libc::EAGAIN);
        let mut retries = RetryBudget::new(2);
        assert!(!retries.exhausted_by(&failure));
        assert!(!retries.exhausted_by(&failure));
        retries.reset();
        assert!(!retries.exhausted_by(&failure));
        assert!(!retries.exhausted_by(&failure));
        assert!(retries.exhausted_by(&failure));
    }

    #[test]
    fn idle_pump_stops_promptly() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let bridge = PtyBridge::open()?;
        let pump = RelayPump::start(bridge.clone_reader()?, CaptureBuffer::new(), None, settings())?;

        // Slave still open: the drain ends on the first idle poll.
        let started = Instant::now();
        let report = pump.finish(Duration::from_secs(2));
        assert!(report.drained);
        assert!(started.elapsed() < Duration::from_secs(1));
        Ok(())
    }
}
