// ABOUTME: Renders daemon pull progress in the style of the Docker CLI.
// ABOUTME: Per-layer lines are rewritten in place on a terminal and colored by status.

use crate::runtime::{DaemonError, PullProgress, PullStream};
use colored::Colorize;
use futures::StreamExt;
use std::io::{self, IsTerminal, Write};
use tokio_util::sync::CancellationToken;

/// Width of the progress bar, between the brackets.
const BAR_WIDTH: u64 = 50;

const WAITING: &[&str] = &["Waiting", "Pulling fs layer"];
const WORKING: &[&str] = &["Downloading", "Download complete", "Extracting", "Verifying Checksum"];
const COMPLETE: &[&str] = &["Pull complete", "Already exists"];

/// Where pull progress is written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProgressTarget {
    #[default]
    Stdout,
    /// Discard progress.
    Hidden,
}

impl ProgressTarget {
    pub fn renderer(self) -> ProgressRenderer<Box<dyn Write + Send>> {
        match self {
            ProgressTarget::Stdout => {
                let terminal = io::stdout().is_terminal();
                ProgressRenderer::new(Box::new(io::stdout()), terminal)
            }
            ProgressTarget::Hidden => ProgressRenderer::new(Box::new(io::sink()), false),
        }
    }
}

/// Why draining a pull stream failed.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    Stream(#[from] DaemonError),

    #[error("cancelled")]
    Cancelled,

    #[error("failed to write progress: {0}")]
    Io(#[from] io::Error),
}

/// Writes progress messages, one line per layer.
pub struct ProgressRenderer<W> {
    out: W,
    terminal: bool,
    /// Layer IDs in the order their lines were printed.
    ids: Vec<String>,
}

impl<W: Write> ProgressRenderer<W> {
    /// `terminal` enables in-place rewriting and colors.
    pub fn new(out: W, terminal: bool) -> Self {
        Self {
            out,
            terminal,
            ids: Vec::new(),
        }
    }

    pub fn render(&mut self, progress: &PullProgress) -> io::Result<()> {
        let line = format_progress(progress, self.terminal);

        if !self.terminal {
            return writeln!(self.out, "{}", line);
        }

        match progress.id {
            Some(ref id) => match self.ids.iter().position(|known| known == id) {
                Some(index) => {
                    let up = self.ids.len() - index;
                    write!(self.out, "\x1b[{}A\r\x1b[2K{}\r\x1b[{}B", up, line, up)?;
                }
                None => {
                    self.ids.push(id.clone());
                    writeln!(self.out, "{}", line)?;
                }
            },
            None => {
                // Lines above can no longer be addressed once a plain line is printed
                self.ids.clear();
                writeln!(self.out, "{}", line)?;
            }
        }
        self.out.flush()
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// One progress line: `<id>: <status> <bar>`.
pub fn format_progress(progress: &PullProgress, color: bool) -> String {
    let mut line = String::new();
    if let Some(ref id) = progress.id {
        line.push_str(id);
        line.push_str(": ");
    }
    line.push_str(&colorize_status(&progress.status, color));

    if let (Some(current), Some(total)) = (progress.current, progress.total)
        && total > 0
    {
        line.push(' ');
        line.push_str(&progress_bar(current, total, color));
    }
    line
}

/// `[=====>     ] 1.2MB/3.4MB`.
pub fn progress_bar(current: u64, total: u64, color: bool) -> String {
    let current = current.min(total);
    let filled = if total == 0 {
        0
    } else {
        current.saturating_mul(BAR_WIDTH) / total
    };

    let mut bar = "=".repeat(filled as usize);
    if filled < BAR_WIDTH {
        bar.push('>');
    }
    let padding = " ".repeat((BAR_WIDTH as usize).saturating_sub(bar.len()));
    let bar = if color {
        bar.blue().to_string()
    } else {
        bar
    };

    format!(
        "[{}{}] {}/{}",
        bar,
        padding,
        human_size(current),
        human_size(total)
    )
}

fn colorize_status(status: &str, color: bool) -> String {
    if !color {
        return status.to_string();
    }
    if WAITING.iter().any(|s| status.starts_with(s)) {
        status.yellow().to_string()
    } else if WORKING.iter().any(|s| status.starts_with(s)) {
        status.cyan().to_string()
    } else if COMPLETE.iter().any(|s| status.starts_with(s)) {
        status.green().to_string()
    } else {
        status.to_string()
    }
}

/// Decimal byte sizes the way registries report them: `512B`, `1.5kB`, `12.3MB`.
pub fn human_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "kB", "MB", "GB", "TB"];

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1000.0 && unit < UNITS.len() - 1 {
        size /= 1000.0;
        unit += 1;
    }

    if unit == 0 {
        return format!("{}{}", bytes, UNITS[0]);
    }
    let number = format!("{:.3}", size);
    let number = number.trim_end_matches('0').trim_end_matches('.');
    format!("{}{}", number, UNITS[unit])
}

/// Drain `stream` to completion, rendering each message.
///
/// The first error is remembered while the rest of the stream is consumed,
/// so the daemon always finishes the pull. Cancellation drops the stream
/// immediately.
pub async fn drain<W: Write>(
    mut stream: PullStream,
    renderer: &mut ProgressRenderer<W>,
    cancel: &CancellationToken,
) -> Result<(), RenderError> {
    let mut first_error: Option<RenderError> = None;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RenderError::Cancelled),
            next = stream.next() => next,
        };

        match next {
            None => break,
            Some(Ok(progress)) => {
                if first_error.is_none()
                    && let Err(e) = renderer.render(&progress)
                {
                    first_error = Some(RenderError::Io(e));
                }
            }
            Some(Err(e)) => {
                tracing::debug!("Pull stream error: {}", e);
                if first_error.is_none() {
                    first_error = Some(RenderError::Stream(e));
                }
            }
        }
    }

    if let Some(error) = first_error {
        return Err(error);
    }
    renderer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_sizes() {
        assert_eq!(human_size(512), "512B");
        assert_eq!(human_size(1500), "1.5kB");
        assert_eq!(human_size(12_300_000), "12.3MB");
        assert_eq!(human_size(2_000_000_000), "2GB");
    }

    #[test]
    fn bar_is_half_full_at_half_progress() {
        let bar = progress_bar(50, 100, false);
        assert!(bar.starts_with(&format!("[{}>", "=".repeat(25))));
        assert!(bar.ends_with("] 50B/100B"));
    }

    #[test]
    fn complete_bar_has_no_arrow() {
        let bar = progress_bar(100, 100, false);
        assert!(bar.starts_with(&format!("[{}]", "=".repeat(50))));
    }

    #[test]
    fn plain_output_prints_one_line_per_message() {
        let mut renderer = ProgressRenderer::new(Vec::new(), false);
        renderer
            .render(&PullProgress::layer("abc", "Pulling fs layer"))
            .unwrap();
        renderer
            .render(&PullProgress::layer("abc", "Downloading").with_progress(1, 2))
            .unwrap();

        let out = String::from_utf8(renderer.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "abc: Pulling fs layer");
        assert!(lines[1].starts_with("abc: Downloading ["));
    }

    #[test]
    fn terminal_output_rewrites_known_layers() {
        colored::control::set_override(false);
        let mut renderer = ProgressRenderer::new(Vec::new(), true);
        renderer.render(&PullProgress::layer("a", "Waiting")).unwrap();
        renderer.render(&PullProgress::layer("b", "Waiting")).unwrap();
        renderer.render(&PullProgress::layer("a", "Pull complete")).unwrap();

        let out = String::from_utf8(renderer.into_inner()).unwrap();
        assert!(out.ends_with("\x1b[2A\r\x1b[2Ka: Pull complete\r\x1b[2B"));
    }

    #[tokio::test]
    async fn drain_keeps_reading_after_an_error() {
        let items = vec![
            Ok(PullProgress::status("first")),
            Err(DaemonError::PullFailed("boom".to_string())),
            Ok(PullProgress::status("after")),
        ];
        let stream: PullStream = Box::pin(futures::stream::iter(items));
        let mut renderer = ProgressRenderer::new(Vec::new(), false);

        let result = drain(stream, &mut renderer, &CancellationToken::new()).await;
        assert!(matches!(result, Err(RenderError::Stream(_))));
        let out = String::from_utf8(renderer.into_inner()).unwrap();
        assert_eq!(out, "first\n");
    }

    #[tokio::test]
    async fn drain_stops_when_cancelled() {
        let stream: PullStream = Box::pin(futures::stream::pending());
        let mut renderer = ProgressRenderer::new(Vec::new(), false);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = drain(stream, &mut renderer, &cancel).await;
        assert!(matches!(result, Err(RenderError::Cancelled)));
    }
}
