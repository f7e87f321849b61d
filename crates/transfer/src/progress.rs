use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::TransferKind;

/// Default progress notification interval.
const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

/// Snapshot of one transfer's progress.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferProgress {
    pub kind: TransferKind,
    pub session: String,
    /// Destination filename for files, the token for blobs.
    pub label: String,
    pub received: u64,
    /// Size announced by the agent; advisory.
    pub total: u64,
    pub done: bool,
    pub bytes_per_second: f64,
}

impl TransferProgress {
    /// Completion ratio in `0.0..=1.0` (1.0 when no size was announced).
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        (self.received as f64 / self.total as f64).min(1.0)
    }
}

/// Callback invoked with transfer progress.
pub type ProgressCallback = Box<dyn Fn(TransferProgress) + Send + Sync>;

struct Entry {
    label: String,
    received: u64,
    total: u64,
    last_report: Instant,
}

/// Tracks progress of the transfers open on one router.
///
/// Reports are throttled per transfer to one per interval; completion is
/// always reported.
pub struct ProgressTracker {
    callbacks: Vec<ProgressCallback>,
    entries: HashMap<(TransferKind, String), Entry>,
    interval: Duration,
    speed: SpeedCalculator,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ProgressTracker {
    /// Creates a tracker; `interval` defaults to 500 ms.
    pub fn new(interval: Option<Duration>) -> Self {
        Self {
            callbacks: Vec::new(),
            entries: HashMap::new(),
            interval: interval.unwrap_or(DEFAULT_INTERVAL),
            speed: SpeedCalculator::new(None, None),
        }
    }

    /// Registers a progress callback.
    pub fn on_progress(&mut self, callback: ProgressCallback) {
        self.callbacks.push(callback);
    }

    /// Begins tracking a transfer.
    pub fn track(&mut self, kind: TransferKind, session: &str, label: &str, total: u64) {
        self.entries.insert(
            (kind, session.to_string()),
            Entry {
                label: label.to_string(),
                received: 0,
                total,
                last_report: Instant::now(),
            },
        );
    }

    /// Records `bytes` received for a transfer.
    pub fn record(&mut self, kind: TransferKind, session: &str, bytes: u64) {
        self.speed.add_sample(bytes);
        let key = (kind, session.to_string());
        let Some(entry) = self.entries.get_mut(&key) else {
            return;
        };
        entry.received += bytes;
        if entry.last_report.elapsed() >= self.interval {
            entry.last_report = Instant::now();
            let progress = self.snapshot(&key, false);
            self.notify(progress);
        }
    }

    /// Stops tracking a transfer and reports it as done.
    pub fn complete(&mut self, kind: TransferKind, session: &str) {
        let key = (kind, session.to_string());
        let progress = self.snapshot(&key, true);
        self.entries.remove(&key);
        self.notify(progress);
    }

    fn snapshot(&self, key: &(TransferKind, String), done: bool) -> Option<TransferProgress> {
        let entry = self.entries.get(key)?;
        Some(TransferProgress {
            kind: key.0,
            session: key.1.clone(),
            label: entry.label.clone(),
            received: entry.received,
            total: entry.total,
            done,
            bytes_per_second: self.speed.bytes_per_second(),
        })
    }

    fn notify(&self, progress: Option<TransferProgress>) {
        if let Some(progress) = progress {
            for cb in &self.callbacks {
                cb(progress.clone());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Calculates throughput using a sliding window of samples.
pub struct SpeedCalculator {
    samples: Vec<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window_size`: time window for speed calculation (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            samples: Vec::new(),
            max_samples: max_samples.unwrap_or(100),
            window_size: window_size.unwrap_or(Duration::from_secs(5)),
        }
    }

    /// Records a sample of `bytes` transferred at the current instant.
    pub fn add_sample(&mut self, bytes: u64) {
        let now = Instant::now();
        self.samples.push(SpeedSample {
            bytes,
            timestamp: now,
        });

        if let Some(cutoff) = now.checked_sub(self.window_size) {
            self.samples.retain(|sample| sample.timestamp >= cutoff);
        }

        if self.samples.len() > self.max_samples {
            let excess = self.samples.len() - self.max_samples;
            self.samples.drain(..excess);
        }
    }

    /// Returns the average speed in bytes/second within the window.
    ///
    /// Returns 0.0 if fewer than 2 samples.
    pub fn bytes_per_second(&self) -> f64 {
        if self.samples.len() < 2 {
            return 0.0;
        }

        let first = &self.samples[0];
        let last = &self.samples[self.samples.len() - 1];
        let elapsed = last.timestamp.duration_since(first.timestamp);
        if elapsed.is_zero() {
            return 0.0;
        }

        let total_bytes: u64 = self.samples.iter().map(|sample| sample.bytes).sum();
        total_bytes as f64 / elapsed.as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn collecting_tracker(interval: Duration) -> (ProgressTracker, Arc<Mutex<Vec<TransferProgress>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut tracker = ProgressTracker::new(Some(interval));
        tracker.on_progress(Box::new(move |p| sink.lock().unwrap().push(p)));
        (tracker, seen)
    }

    #[test]
    fn track_record_complete() {
        let (mut tracker, seen) = collecting_tracker(Duration::from_secs(3600));
        tracker.track(TransferKind::File, "f1", "Info.plist", 10);
        tracker.record(TransferKind::File, "f1", 6);

        // Throttled: nothing reported yet.
        assert!(seen.lock().unwrap().is_empty());

        tracker.record(TransferKind::File, "f1", 4);
        tracker.complete(TransferKind::File, "f1");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].done);
        assert_eq!(seen[0].received, 10);
        assert_eq!(seen[0].label, "Info.plist");
        assert_eq!(seen[0].fraction(), 1.0);
        assert!(tracker.entries.is_empty());
    }

    #[test]
    fn zero_interval_reports_every_chunk() {
        let (mut tracker, seen) = collecting_tracker(Duration::ZERO);
        tracker.track(TransferKind::Blob, "b1", "b1", 8);
        tracker.record(TransferKind::Blob, "b1", 4);
        tracker.record(TransferKind::Blob, "b1", 4);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn same_token_different_kinds_are_distinct() {
        let (mut tracker, seen) = collecting_tracker(Duration::ZERO);
        tracker.track(TransferKind::Blob, "1", "1", 4);
        tracker.track(TransferKind::File, "1", "a.bin", 4);
        tracker.record(TransferKind::Blob, "1", 4);
        tracker.record(TransferKind::File, "1", 2);

        let seen = seen.lock().unwrap();
        assert_eq!((seen[0].kind, seen[0].received), (TransferKind::Blob, 4));
        assert_eq!((seen[1].kind, seen[1].received), (TransferKind::File, 2));
        assert_eq!(seen[1].label, "a.bin");
        assert!((seen[1].fraction() - 0.5).abs() < 1e-9);
        assert_eq!(tracker.entries.len(), 2);
    }

    #[test]
    fn untracked_transfer_is_ignored() {
        let (mut tracker, seen) = collecting_tracker(Duration::ZERO);
        tracker.record(TransferKind::File, "nope", 10);
        tracker.complete(TransferKind::File, "nope");
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn fraction_without_declared_size() {
        let p = TransferProgress {
            kind: TransferKind::Blob,
            session: "b".into(),
            label: "b".into(),
            received: 3,
            total: 0,
            done: false,
            bytes_per_second: 0.0,
        };
        assert_eq!(p.fraction(), 1.0);
    }

    #[test]
    fn speed_calculator_needs_two_samples() {
        let mut calc = SpeedCalculator::new(None, None);
        assert_eq!(calc.bytes_per_second(), 0.0);
        calc.add_sample(100);
        assert_eq!(calc.bytes_per_second(), 0.0);
    }

    #[test]
    fn speed_calculator_multiple_samples() {
        let mut calc = SpeedCalculator::new(Some(Duration::from_secs(10)), None);
        calc.add_sample(500);
        std::thread::sleep(Duration::from_millis(20));
        calc.add_sample(500);
        assert!(calc.bytes_per_second() > 0.0);
    }

    #[test]
    fn speed_calculator_max_samples() {
        let mut calc = SpeedCalculator::new(Some(Duration::from_secs(60)), Some(5));
        for i in 0..20 {
            calc.add_sample(i * 10);
        }
        assert!(calc.samples.len() <= 5);
    }
}
