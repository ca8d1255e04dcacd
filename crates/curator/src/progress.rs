//! Periodic progress logging for completed classifications.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

pub struct ProgressReporter {
    interval: usize,
    started_at: Instant,
    completed: AtomicUsize,
}

impl ProgressReporter {
    pub fn new(interval: usize) -> Self {
        Self {
            interval: interval.max(1),
            started_at: Instant::now(),
            completed: AtomicUsize::new(0),
        }
    }

    /// Count one completion; logs every `interval` completions. Returns the new total.
    pub fn record(&self) -> usize {
        let completed = self.completed.fetch_add(1, Ordering::AcqRel) + 1;
        if completed % self.interval == 0 {
            let elapsed = self.elapsed();
            tracing::info!(
                completed,
                elapsed_ms = elapsed.as_millis() as u64,
                average_ms = average_millis(elapsed, completed),
                "Items processed"
            );
        }
        completed
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn average_millis(&self) -> f64 {
        average_millis(self.elapsed(), self.completed())
    }
}

/// Mean milliseconds per item. Zero when nothing has completed.
pub fn average_millis(elapsed: Duration, count: usize) -> f64 {
    if count == 0 {
        return 0.0;
    }
    elapsed.as_secs_f64() * 1000.0 / count as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_is_not_truncated() {
        let avg = average_millis(Duration::from_millis(1000), 3);
        assert!((avg - 333.333).abs() < 0.01, "got {avg}");

        let avg = average_millis(Duration::from_micros(1500), 1);
        assert!((avg - 1.5).abs() < f64::EPSILON, "got {avg}");
    }

    #[test]
    fn average_of_nothing_is_zero() {
        assert_eq!(average_millis(Duration::from_secs(5), 0), 0.0);
    }

    #[test]
    fn record_counts_completions() {
        let reporter = ProgressReporter::new(2);
        assert_eq!(reporter.record(), 1);
        assert_eq!(reporter.record(), 2);
        assert_eq!(reporter.record(), 3);
        assert_eq!(reporter.completed(), 3);
    }

    #[test]
    fn zero_interval_is_clamped() {
        let reporter = ProgressReporter::new(0);
        assert_eq!(reporter.record(), 1);
    }
}
