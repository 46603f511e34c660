//! Shared transfer status.
//!
//! The state machine publishes its phase and a human-readable status line
//! through a `tokio::sync::watch` channel; byte counters are plain atomics
//! updated by the lane tasks. A UI can either poll [`Status::snapshot`] or
//! await [`Status::changed`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Coarse transfer phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not started
    Idle,
    /// Joining the relay room
    Connecting,
    /// Announce and PAKE
    Handshake,
    /// Exchanging metadata and block list
    Negotiating,
    /// Bulk data on the lanes
    Transferring,
    /// Whole-file hash check
    Verifying,
    /// Finished successfully
    Success,
    /// Ended with an error or cancellation
    Aborted,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Handshake => "handshake",
            Self::Negotiating => "negotiating",
            Self::Transferring => "transferring",
            Self::Verifying => "verifying",
            Self::Success => "success",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

impl Phase {
    /// Whether the transfer has ended.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Aborted)
    }
}

/// Point-in-time view of a transfer
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    /// Current phase
    pub phase: Phase,
    /// Status line, e.g. `Performing PAKE...`
    pub message: String,
    /// Name of the file being moved, once known
    pub file_name: Option<String>,
    /// Bytes moved or skipped so far
    pub bytes_done: u64,
    /// Total file size, once known
    pub bytes_total: u64,
    /// Time since the bulk phase started
    pub elapsed: Option<Duration>,
}

impl StatusSnapshot {
    /// Progress as a fraction in `[0, 1]`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> f64 {
        if self.bytes_total == 0 {
            return if self.phase == Phase::Success { 1.0 } else { 0.0 };
        }
        (self.bytes_done as f64 / self.bytes_total as f64).min(1.0)
    }
}

#[derive(Debug, Clone)]
struct Line {
    phase: Phase,
    message: String,
    file_name: Option<String>,
    started: Option<Instant>,
}

#[derive(Debug)]
struct Inner {
    line: watch::Sender<Line>,
    bytes_done: AtomicU64,
    bytes_total: AtomicU64,
}

/// Cloneable status handle shared between the state machine and observers.
#[derive(Debug, Clone)]
pub struct Status {
    inner: Arc<Inner>,
}

impl Default for Status {
    fn default() -> Self {
        Self::new()
    }
}

impl Status {
    /// Fresh, idle status.
    #[must_use]
    pub fn new() -> Self {
        let (line, _) = watch::channel(Line {
            phase: Phase::Idle,
            message: String::new(),
            file_name: None,
            started: None,
        });
        Self {
            inner: Arc::new(Inner {
                line,
                bytes_done: AtomicU64::new(0),
                bytes_total: AtomicU64::new(0),
            }),
        }
    }

    /// Move to `phase` with a new status line.
    pub fn set(&self, phase: Phase, message: impl Into<String>) {
        let message = message.into();
        self.inner.line.send_modify(|line| {
            if phase == Phase::Transferring && line.started.is_none() {
                line.started = Some(Instant::now());
            }
            line.phase = phase;
            line.message = message;
        });
    }

    /// Record the file being transferred and its size.
    pub fn set_file(&self, name: &str, size: u64) {
        self.inner.bytes_total.store(size, Ordering::Relaxed);
        let name = name.to_string();
        self.inner
            .line
            .send_modify(|line| line.file_name = Some(name));
    }

    /// Count bytes moved (or skipped because already present).
    pub fn add_bytes(&self, n: u64) {
        self.inner.bytes_done.fetch_add(n, Ordering::Relaxed);
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.inner.line.borrow().phase
    }

    /// Current status line.
    #[must_use]
    pub fn message(&self) -> String {
        self.inner.line.borrow().message.clone()
    }

    /// Consistent-enough view for display.
    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        let line = self.inner.line.borrow().clone();
        StatusSnapshot {
            phase: line.phase,
            message: line.message,
            file_name: line.file_name,
            bytes_done: self.inner.bytes_done.load(Ordering::Relaxed),
            bytes_total: self.inner.bytes_total.load(Ordering::Relaxed),
            elapsed: line.started.map(|t| t.elapsed()),
        }
    }

    /// Wait until the phase or status line changes.
    pub async fn changed(&self) {
        let mut rx = self.inner.line.subscribe();
        // The sender lives in `self`, so this only returns on a change.
        let _ = rx.changed().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_updates() {
        let status = Status::new();
        assert_eq!(status.phase(), Phase::Idle);

        status.set(Phase::Handshake, "Performing PAKE...");
        status.set_file("hello.txt", 13);
        status.add_bytes(5);

        let snap = status.snapshot();
        assert_eq!(snap.phase, Phase::Handshake);
        assert_eq!(snap.message, "Performing PAKE...");
        assert_eq!(snap.file_name.as_deref(), Some("hello.txt"));
        assert_eq!(snap.bytes_done, 5);
        assert!(snap.elapsed.is_none());
        assert!((snap.fraction() - 5.0 / 13.0).abs() < 1e-9);
    }

    #[test]
    fn test_elapsed_starts_with_transfer() {
        let status = Status::new();
        status.set(Phase::Transferring, "Sending...");
        assert!(status.snapshot().elapsed.is_some());
        assert!(!status.phase().is_terminal());
        status.set(Phase::Success, "Done");
        assert!(status.phase().is_terminal());
    }

    #[test]
    fn test_empty_file_fraction() {
        let status = Status::new();
        assert!(status.snapshot().fraction().abs() < f64::EPSILON);
        status.set(Phase::Success, "Done");
        assert!((status.snapshot().fraction() - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_changed_wakes_observer() {
        let status = Status::new();
        let observer = {
            let status = status.clone();
            tokio::spawn(async move {
                status.changed().await;
                status.phase()
            })
        };
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        status.set(Phase::Connecting, "Connecting...");
        assert_eq!(observer.await.unwrap(), Phase::Connecting);
    }
}
