//! Transfer progress display driven by the shared transfer status.

use ferry_core::{Phase, Status};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::task::JoinHandle;

const TICK: Duration = Duration::from_millis(100);

/// Progress bar that follows a [`Status`] until the transfer ends.
pub struct TransferProgress {
    bar: ProgressBar,
    task: JoinHandle<()>,
}

impl TransferProgress {
    /// Start following `status`.
    #[must_use]
    pub fn follow(status: Status) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.enable_steady_tick(TICK);
        let task = tokio::spawn(track(bar.clone(), status));
        Self { bar, task }
    }

    /// Stop following and leave the final line on screen.
    pub fn finish(self, msg: String) {
        self.task.abort();
        self.bar.finish_with_message(msg);
    }

    /// Stop following and clear the bar (for errors).
    pub fn abandon(self) {
        self.task.abort();
        self.bar.abandon();
    }
}

async fn track(bar: ProgressBar, status: Status) {
    let mut sized = false;
    loop {
        let snap = status.snapshot();
        if !sized && snap.phase == Phase::Transferring {
            bar.set_length(snap.bytes_total);
            bar.set_style(bar_style());
            sized = true;
        }
        if sized {
            bar.set_position(snap.bytes_done);
        }
        let label = match &snap.file_name {
            Some(name) if sized => format!("{} {name}", snap.message),
            _ => snap.message.clone(),
        };
        bar.set_message(label);
        if snap.phase.is_terminal() {
            break;
        }
        // Byte counters move without a status change, so also poll.
        let _ = tokio::time::timeout(TICK, status.changed()).await;
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

/// Format bytes in human-readable format
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{size:.2} {}", UNITS[unit_idx])
}

/// Format speed in human-readable format (bytes/sec)
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn format_speed(bytes_per_sec: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec as u64))
}

/// Format duration in human-readable format
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

/// Average rate over a transfer.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn average_speed(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= f64::EPSILON {
        return 0.0;
    }
    bytes as f64 / secs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(512), "512.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(1536 * 1024 * 1024), "1.50 GB");
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(1024.0), "1.00 KB/s");
        assert_eq!(format_speed(1024.0 * 1024.0), "1.00 MB/s");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m");
    }

    #[test]
    fn test_average_speed() {
        assert!((average_speed(2048, Duration::from_secs(2)) - 1024.0).abs() < 1e-9);
        assert!(average_speed(100, Duration::ZERO).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_tracker_stops_on_terminal_phase() {
        let status = Status::new();
        let progress = TransferProgress::follow(status.clone());
        status.set_file("a.bin", 10);
        status.set(Phase::Transferring, "Sending (->peer)...");
        status.add_bytes(10);
        status.set(Phase::Success, "Sent a.bin");
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(progress.task.is_finished());
        progress.finish("done".to_string());
    }
}
