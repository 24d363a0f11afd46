//! Progress bar driven by job events.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use archivist::{CancellationToken, JobEvent, JobHandle, Result};
use indicatif::{ProgressBar, ProgressStyle};

/// Resolution of the bar; job progress arrives as a fraction.
const STEPS: u64 = 1000;

/// What a job left behind besides its result.
pub struct Outcome<T> {
    pub result: Result<T>,
    /// Non-fatal diagnostics the job reported.
    pub warnings: Vec<String>,
}

/// Progress display for the jobs of one command
pub struct JobProgress {
    bar: ProgressBar,
    quiet: bool,
}

impl JobProgress {
    /// Creates a hidden bar when `quiet`, otherwise a spinner that turns into
    /// a bar once the job reports progress.
    pub fn new(message: &str, quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            let pb = ProgressBar::new(STEPS);
            pb.set_style(
                ProgressStyle::with_template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent:>3}% {wide_msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
            );
            pb.set_message(message.to_string());
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        };
        Self { bar, quiet }
    }

    /// The underlying bar, for suspending it around prompts.
    pub fn bar(&self) -> ProgressBar {
        self.bar.clone()
    }

    /// Resets the bar for the next job of the command.
    pub fn restart(&self, message: &str) {
        self.bar.set_position(0);
        self.bar.set_message(message.to_string());
    }

    /// Clears the bar once the command is done.
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    /// Pumps the job's events into the bar until it finishes.
    ///
    /// The job's cancel token is published in `running` while it runs so
    /// Ctrl+C can kill it.
    pub async fn run<T>(
        &self,
        mut handle: JobHandle<T>,
        running: &Arc<Mutex<Option<CancellationToken>>>,
    ) -> Outcome<T> {
        *running.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle.cancel_token());

        let mut warnings = Vec::new();
        while let Some(event) = handle.next_event().await {
            match event {
                JobEvent::Progress(fraction) => {
                    self.bar
                        .set_position((fraction.clamp(0.0, 1.0) * STEPS as f64) as u64);
                }
                JobEvent::Entry(entry) => self.bar.set_message(shorten(entry.full_path())),
                JobEvent::EntryRemoved(path) => {
                    self.bar.set_message(format!("removed {}", shorten(&path)))
                }
                JobEvent::Info(message) => self.bar.set_message(message),
                JobEvent::Error { message, details } => {
                    let text = match details {
                        Some(details) if !details.is_empty() => format!("{message}: {details}"),
                        _ => message,
                    };
                    if !self.quiet {
                        self.bar.println(format!("warning: {text}"));
                    }
                    warnings.push(text);
                }
                JobEvent::Finished { .. } => break,
                _ => {}
            }
        }
        let result = handle.wait().await;
        *running.lock().unwrap_or_else(PoisonError::into_inner) = None;

        if result.is_err() {
            self.bar.abandon_with_message("Failed");
        }
        Outcome { result, warnings }
    }
}

/// Truncates long member names from the left
fn shorten(name: &str) -> String {
    const MAX: usize = 40;
    let count = name.chars().count();
    if count <= MAX {
        return name.to_string();
    }
    let tail: String = name.chars().skip(count - (MAX - 3)).collect();
    format!("...{tail}")
}
