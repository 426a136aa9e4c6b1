use indicatif::{ProgressBar, ProgressStyle};
use parabak_core::progress::{Progress, ProgressReporter, TracingProgress};
use std::io::IsTerminal;

/// Draws core progress reports as a terminal bar measured in bytes.
///
/// Without a terminal the reports go to the log instead, and with `quiet`
/// they are dropped.
pub struct BarProgress {
    bar: Option<ProgressBar>,
    log: Option<TracingProgress>,
}

impl BarProgress {
    pub fn new(message: &str, quiet: bool) -> Self {
        if quiet {
            return Self { bar: None, log: None };
        }
        if !std::io::stderr().is_terminal() {
            return Self {
                bar: None,
                log: Some(TracingProgress),
            };
        }

        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{bar:40.cyan/blue} {bytes:>10}/{total_bytes:10} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.set_message(message.to_string());
        Self {
            bar: Some(bar),
            log: None,
        }
    }

    pub fn finish(&self, message: &str) {
        if let Some(bar) = &self.bar {
            bar.finish_with_message(message.to_string());
        }
    }
}

impl ProgressReporter for BarProgress {
    fn report(&mut self, progress: &Progress) {
        if let Some(bar) = &self.bar {
            bar.set_length(progress.total.bytes);
            bar.set_position(progress.bytes_done);
            bar.set_message(format!(
                "{}/{} files",
                progress.files_done, progress.total.files
            ));
        } else if let Some(log) = &mut self.log {
            log.report(progress);
        }
    }
}
