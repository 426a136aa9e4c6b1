use crate::JobSize;
use std::time::{Duration, Instant};
use tracing::info;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Completed portion of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub files_done: u64,
    pub bytes_done: u64,
    pub total: JobSize,
}

impl Progress {
    pub fn file_fraction(&self) -> f64 {
        fraction(self.files_done, self.total.files)
    }

    pub fn byte_fraction(&self) -> f64 {
        fraction(self.bytes_done, self.total.bytes)
    }

    pub fn is_complete(&self) -> bool {
        self.files_done >= self.total.files
    }
}

fn fraction(done: u64, total: u64) -> f64 {
    if total == 0 {
        1.0
    } else {
        done as f64 / total as f64
    }
}

/// Receives progress updates from long-running operations.
pub trait ProgressReporter {
    fn report(&mut self, progress: &Progress);
}

/// Discards every update.
#[derive(Debug, Default)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&mut self, _progress: &Progress) {}
}

/// Logs updates at info level, for headless runs.
#[derive(Debug, Default)]
pub struct TracingProgress;

impl ProgressReporter for TracingProgress {
    fn report(&mut self, progress: &Progress) {
        info!(
            "Progress: {}/{} files ({:.2}%), {}/{} bytes ({:.2}%)",
            progress.files_done,
            progress.total.files,
            progress.file_fraction() * 100.0,
            progress.bytes_done,
            progress.total.bytes,
            progress.byte_fraction() * 100.0
        );
    }
}

/// Counts work and forwards it to a reporter at most once per interval.
///
/// [`ProgressTracker::finish`] always reports, regardless of the interval.
pub struct ProgressTracker<'a> {
    reporter: &'a mut dyn ProgressReporter,
    interval: Duration,
    last_report: Option<Instant>,
    current: Progress,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(total: JobSize, reporter: &'a mut dyn ProgressReporter) -> Self {
        Self::with_interval(total, reporter, DEFAULT_INTERVAL)
    }

    pub fn with_interval(
        total: JobSize,
        reporter: &'a mut dyn ProgressReporter,
        interval: Duration,
    ) -> Self {
        Self {
            reporter,
            interval,
            last_report: None,
            current: Progress {
                files_done: 0,
                bytes_done: 0,
                total,
            },
        }
    }

    pub fn current(&self) -> &Progress {
        &self.current
    }

    pub fn tick(&mut self, bytes: u64) {
        self.current.files_done += 1;
        self.current.bytes_done += bytes;

        let now = Instant::now();
        let due = self
            .last_report
            .is_none_or(|last| now.duration_since(last) >= self.interval);
        if due {
            self.reporter.report(&self.current);
            self.last_report = Some(now);
        }
    }

    /// Emits the final 100% report.
    pub fn finish(mut self) -> Progress {
        let done = Progress {
            files_done: self.current.total.files,
            bytes_done: self.current.total.bytes,
            total: self.current.total,
        };
        self.reporter.report(&done);
        done
    }
}
