//! Terminal progress bar

use indicatif::{ProgressBar, ProgressStyle};

use crate::progress::ProgressSink;

const TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}";

/// Renders job progress on a percentage bar
#[derive(Debug, Clone)]
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    /// A bar from 0 to 100.
    pub fn new() -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template(TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Self { bar }
    }

    /// A bar that draws nothing.
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    /// Remove the bar from the terminal.
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for BarProgress {
    fn report(&self, percent: f64, message: Option<&str>) {
        if percent < 0.0 {
            self.bar
                .abandon_with_message(format!("Error: {}", message.unwrap_or("unknown error")));
            return;
        }
        self.bar.set_position(percent.clamp(0.0, 100.0).round() as u64);
        if let Some(message) = message {
            self.bar.set_message(message.to_string());
        }
    }
}
