// ABOUTME: Output formatting for CLI feedback.
// ABOUTME: Supports normal, quiet (CI), and JSON output modes.

use serde::Serialize;
use std::time::Instant;

use crate::fetch::{ImageHandle, ProgressTarget};

/// Output mode for CLI feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-friendly output with progress messages
    Normal,
    /// Minimal output for CI (only final result)
    Quiet,
    /// JSON lines for scripting
    Json,
}

/// Handles CLI output based on the configured mode.
pub struct Output {
    mode: OutputMode,
    start_time: Option<Instant>,
}

impl Output {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            start_time: None,
        }
    }

    /// Where pull progress goes; only normal mode shows it.
    pub fn progress_target(&self) -> ProgressTarget {
        match self.mode {
            OutputMode::Normal => ProgressTarget::Stdout,
            OutputMode::Quiet | OutputMode::Json => ProgressTarget::Hidden,
        }
    }

    /// Start timing an operation.
    pub fn start_timer(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Get elapsed time since timer started.
    pub fn elapsed_secs(&self) -> f64 {
        self.start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn duration(&self) -> Option<f64> {
        self.start_time.map(|_| self.elapsed_secs())
    }

    /// Print a success message with optional timing.
    pub fn success(&self, message: &str) {
        match self.mode {
            OutputMode::Normal => {
                let elapsed = self.elapsed_secs();
                if elapsed > 0.0 {
                    println!("{message} ({:.1}s)", elapsed);
                } else {
                    println!("{message}");
                }
            }
            OutputMode::Quiet => println!("{message}"),
            OutputMode::Json => print_json(&JsonEvent {
                event: "success",
                message,
                duration_secs: self.duration(),
            }),
        }
    }

    /// Report a fetched image. Quiet mode prints only its ID.
    pub fn fetched(&self, handle: &ImageHandle) {
        match self.mode {
            OutputMode::Normal => {
                let message = format!(
                    "Fetched {} ({}) from {}",
                    handle.reference,
                    handle.id(),
                    handle.store()
                );
                self.success(&message);
            }
            OutputMode::Quiet => println!("{}", handle.id()),
            OutputMode::Json => print_json(&FetchedEvent {
                event: "fetched",
                reference: handle.reference.to_string(),
                id: handle.id(),
                store: handle.store(),
                duration_secs: self.duration(),
            }),
        }
    }

    /// Print a structured value: pretty JSON in JSON mode, `human` otherwise.
    pub fn value<T: Serialize>(&self, value: &T, human: &str) {
        match self.mode {
            OutputMode::Json => print_json(value),
            OutputMode::Normal | OutputMode::Quiet => {
                if !human.is_empty() {
                    println!("{human}");
                }
            }
        }
    }

    /// Print an error message.
    pub fn error(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => {
                eprintln!("Error: {message}");
            }
            OutputMode::Json => {
                let event = JsonEvent {
                    event: "error",
                    message,
                    duration_secs: self.duration(),
                };
                if let Ok(json) = serde_json::to_string(&event) {
                    eprintln!("{json}");
                }
            }
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    if let Ok(json) = serde_json::to_string(value) {
        println!("{json}");
    }
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    event: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
}

#[derive(Serialize)]
struct FetchedEvent<'a> {
    event: &'a str,
    reference: String,
    id: &'a str,
    store: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
}
