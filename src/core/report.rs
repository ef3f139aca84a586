//! Shared reporting resources
//!
//! One coarse mutex guards everything that both the monitor loop and the
//! pulse-timing thread may touch: the optional verbatim log stream, the
//! last-value-wins clock-correlation sample, and side-channel lines waiting
//! to be drained into the scroll pane. Each lock hold spans a single write
//! or sample update, so the text output channel is never interleaved.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use super::timing::TimeOffsetSample;

/// Prefix marking informational announcements in the log stream
pub const ANNOUNCE_PREFIX: &str = ">>>";

struct RawLog {
    file: File,
    path: PathBuf,
}

#[derive(Default)]
struct ReportInner {
    log: Option<RawLog>,
    sample: Option<TimeOffsetSample>,
    pending: Vec<String>,
}

/// Handle to the shared reporting state
///
/// Clones share the same inner state; the pulse thread holds one clone and
/// the monitor loop another.
#[derive(Clone, Default)]
pub struct ReportHub {
    inner: Arc<Mutex<ReportInner>>,
}

impl ReportHub {
    /// Create an empty hub with no log stream open
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the log stream.
    ///
    /// Startup logging truncates; logging toggled at runtime appends. If a
    /// log is already open this is a contract violation surfaced as an error
    /// rather than a silent truncation.
    pub fn open_log(&self, path: &Path, append: bool) -> io::Result<()> {
        let mut inner = self.inner.lock();
        if inner.log.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "log stream already open",
            ));
        }
        let file = if append {
            OpenOptions::new().create(true).append(true).open(path)?
        } else {
            File::create(path)?
        };
        inner.log = Some(RawLog {
            file,
            path: path.to_path_buf(),
        });
        Ok(())
    }

    /// Close the log stream; returns whether a stream was actually closed.
    ///
    /// Safe to call more than once; only the first call closes anything.
    pub fn close_log(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.log.take() {
            Some(mut log) => {
                let _ = log.file.flush();
                true
            }
            None => false,
        }
    }

    /// Is the log stream open?
    pub fn is_logging(&self) -> bool {
        self.inner.lock().log.is_some()
    }

    /// Path of the open log stream, if any
    pub fn log_path(&self) -> Option<PathBuf> {
        self.inner.lock().log.as_ref().map(|l| l.path.clone())
    }

    /// Append verbatim packet bytes to the log stream.
    ///
    /// Bytes go out exactly as received, binary-transparent. A short write
    /// propagates as an error instead of being asserted away.
    pub fn log_packet(&self, bytes: &[u8]) -> io::Result<()> {
        let mut inner = self.inner.lock();
        if let Some(log) = inner.log.as_mut() {
            log.file.write_all(bytes)?;
        }
        Ok(())
    }

    /// Append an informational announcement line to the log stream
    pub fn log_announce(&self, text: &str) -> io::Result<()> {
        let mut inner = self.inner.lock();
        if let Some(log) = inner.log.as_mut() {
            writeln!(log.file, "{}{}", ANNOUNCE_PREFIX, text)?;
        }
        Ok(())
    }

    /// Publish a clock-correlation sample, replacing any previous one
    pub fn publish_sample(&self, sample: TimeOffsetSample) {
        self.inner.lock().sample = Some(sample);
    }

    /// Most recent clock-correlation sample, if any
    pub fn latest_sample(&self) -> Option<TimeOffsetSample> {
        self.inner.lock().sample
    }

    /// Queue a line from the side channel for the scroll pane
    pub fn push_line(&self, line: &str) {
        self.inner.lock().pending.push(line.to_string());
    }

    /// Drain side-channel lines queued since the last poll
    pub fn drain_lines(&self) -> Vec<String> {
        std::mem::take(&mut self.inner.lock().pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_log_open_close_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.log");
        let hub = ReportHub::new();

        assert!(!hub.is_logging());
        hub.open_log(&path, false).unwrap();
        assert!(hub.is_logging());

        // Opening on top of an open stream is a contract violation
        assert!(hub.open_log(&path, true).is_err());

        assert!(hub.close_log());
        assert!(!hub.close_log());
        assert!(!hub.is_logging());
    }

    #[test]
    fn test_log_binary_transparent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.log");
        let hub = ReportHub::new();

        hub.open_log(&path, false).unwrap();
        hub.log_packet(&[0xb5, 0x62, 0x00, 0xff]).unwrap();
        hub.log_announce("Logging on").unwrap();
        hub.close_log();

        let written = std::fs::read(&path).unwrap();
        assert_eq!(&written[..4], &[0xb5, 0x62, 0x00, 0xff]);
        assert_eq!(&written[4..], b">>>Logging on\n");
    }

    #[test]
    fn test_sample_last_value_wins() {
        let hub = ReportHub::new();
        assert!(hub.latest_sample().is_none());

        let first = TimeOffsetSample {
            device_clock: Utc.timestamp_opt(10, 0).unwrap(),
            system_clock: Utc.timestamp_opt(10, 0).unwrap(),
        };
        let second = TimeOffsetSample {
            device_clock: Utc.timestamp_opt(20, 0).unwrap(),
            system_clock: Utc.timestamp_opt(19, 0).unwrap(),
        };
        hub.publish_sample(first);
        hub.publish_sample(second);

        assert_eq!(hub.latest_sample(), Some(second));
    }

    #[test]
    fn test_pending_lines_drain() {
        let hub = ReportHub::new();
        hub.push_line("---- PULSE ----");
        hub.push_line("---- PULSE ----");

        assert_eq!(hub.drain_lines().len(), 2);
        assert!(hub.drain_lines().is_empty());
    }
}
