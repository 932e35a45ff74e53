//! Progress reporting contract.
//!
//! Jobs report `(percent, message)` pairs to a [`ProgressSink`]. Percentages
//! are in `0..=100`; [`ERROR_PERCENT`] (`-1`) signals that the job failed.
//! Any `Fn(f64, Option<&str>)` closure is a sink.

use std::sync::Mutex;

/// Sentinel percentage reported when a job fails.
pub const ERROR_PERCENT: f64 = -1.0;

/// Receiver of job progress
pub trait ProgressSink: Send + Sync {
    /// Report `percent` with an optional message.
    fn report(&self, percent: f64, message: Option<&str>);

    /// Report a failure.
    fn error(&self, message: &str) {
        self.report(ERROR_PERCENT, Some(message));
    }
}

impl<F> ProgressSink for F
where
    F: Fn(f64, Option<&str>) + Send + Sync,
{
    fn report(&self, percent: f64, message: Option<&str>) {
        self(percent, message)
    }
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn report(&self, _percent: f64, _message: Option<&str>) {}
}

/// Maps a sub-job's `0..=100` onto the band `start..=end` of a parent sink.
///
/// Reported values never go backwards within the band. The error sentinel
/// is passed through unchanged.
pub struct ScaledProgress<'a> {
    inner: &'a dyn ProgressSink,
    start: f64,
    end: f64,
    high_water: Mutex<f64>,
}

impl<'a> ScaledProgress<'a> {
    /// Scale into `start..=end` of `inner`.
    pub fn new(inner: &'a dyn ProgressSink, start: f64, end: f64) -> Self {
        Self {
            inner,
            start,
            end,
            high_water: Mutex::new(start),
        }
    }

    /// Percentage of the parent sink for a sub-job percentage.
    pub fn scale(&self, percent: f64) -> f64 {
        let fraction = percent.clamp(0.0, 100.0) / 100.0;
        self.start + (self.end - self.start) * fraction
    }
}

impl ProgressSink for ScaledProgress<'_> {
    fn report(&self, percent: f64, message: Option<&str>) {
        if percent < 0.0 {
            self.inner.report(ERROR_PERCENT, message);
            return;
        }
        let scaled = {
            let mut high = self
                .high_water
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *high = high.max(self.scale(percent));
            *high
        };
        self.inner.report(scaled, message);
    }
}

/// Sink that records every report, for tests and front ends that replay them.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<(f64, Option<String>)>>,
}

impl RecordingProgress {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports received so far.
    pub fn events(&self) -> Vec<(f64, Option<String>)> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Messages received so far.
    pub fn messages(&self) -> Vec<String> {
        self.events().into_iter().filter_map(|(_, m)| m).collect()
    }

    /// Percentages received so far.
    pub fn percents(&self) -> Vec<f64> {
        self.events().into_iter().map(|(p, _)| p).collect()
    }
}

impl ProgressSink for RecordingProgress {
    fn report(&self, percent: f64, message: Option<&str>) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((percent, message.map(str::to_string)));
    }
}
