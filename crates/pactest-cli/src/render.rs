use std::time::{Duration, Instant};

use anstyle::{AnsiColor, Effects, Style};
use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use pactest_harness::{ReportSink, SuiteSummary, TestRecord};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

pub(crate) fn resolve_output_style(stdout_is_tty: bool, _stderr_is_tty: bool) -> OutputStyle {
    if stdout_is_tty {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => {
            let badge = match status {
                "ok" => "[OK]",
                "warn" => "[WARN]",
                "error" => "[ERR]",
                _ => "[INFO]",
            };
            format!("{badge} {message}")
        }
    }
}

/// Summary block for the end of a run; result lines are colored by verdict
/// in rich mode.
pub(crate) fn render_summary_lines(summary: &SuiteSummary, style: OutputStyle) -> Vec<String> {
    let mut lines = summary
        .report_lines()
        .into_iter()
        .map(|line| match style {
            OutputStyle::Plain => line,
            OutputStyle::Rich => match summary_line_style(&line) {
                Some(style) => colorize(style, &line),
                None => line,
            },
        })
        .collect::<Vec<_>>();

    if !summary.expected_failures.is_empty() {
        lines.push(render_status_line(
            style,
            "warn",
            &format!(
                "{} expected failure(s) still failing",
                summary.expected_failures.len()
            ),
        ));
    }
    if !summary.unexpected_passes.is_empty() {
        lines.push(render_status_line(
            style,
            "warn",
            &format!(
                "{} test(s) marked as expected failures now pass",
                summary.unexpected_passes.len()
            ),
        ));
    }
    lines
}

fn summary_line_style(line: &str) -> Option<Style> {
    let trimmed = line.trim_start();
    if trimmed.starts_with("[PASS]") {
        Some(pass_style())
    } else if trimmed.starts_with("[FAIL]") {
        Some(fail_style())
    } else if trimmed.starts_with("[SKIP]") {
        Some(skip_style())
    } else if (line.starts_with(' ') && line.ends_with(':')) || line == "Results" {
        Some(section_style())
    } else {
        None
    }
}

fn section_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightBlue.into()))
        .effects(Effects::BOLD)
}

fn pass_style() -> Style {
    Style::new().fg_color(Some(AnsiColor::Green.into()))
}

fn fail_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::Red.into()))
        .effects(Effects::BOLD)
}

fn skip_style() -> Style {
    Style::new().fg_color(Some(AnsiColor::Yellow.into()))
}

pub(crate) fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

pub(crate) fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let millis = elapsed.subsec_millis();
    format!("{secs}.{millis:03}s")
}

/// Forwards every event to `inner` while driving a progress bar in rich
/// mode.
pub(crate) struct ProgressSink<S: ReportSink> {
    inner: S,
    progress_bar: Option<ProgressBar>,
    started_at: Instant,
}

impl<S: ReportSink> ProgressSink<S> {
    pub(crate) fn new(inner: S, style: OutputStyle) -> Self {
        let progress_bar = (style == OutputStyle::Rich).then(|| {
            let progress_bar = ProgressBar::new(1);
            if let Ok(template) = ProgressStyle::with_template(
                "{spinner:.cyan.bold} {msg:<24} [{bar:20.cyan/blue}] {pos:>3}/{len:3} {elapsed_precise}",
            ) {
                progress_bar.set_style(template.tick_chars("|/-\\ ").progress_chars("=>-"));
            }
            progress_bar.enable_steady_tick(Duration::from_millis(80));
            progress_bar
        });
        Self {
            inner,
            progress_bar,
            started_at: Instant::now(),
        }
    }

    fn forward<F>(&mut self, write: F) -> Result<()>
    where
        F: FnOnce(&mut S) -> Result<()>,
    {
        match &self.progress_bar {
            Some(progress_bar) => progress_bar.suspend(|| write(&mut self.inner)),
            None => write(&mut self.inner),
        }
    }

    /// Clears the bar and returns the wrapped sink plus the wall time.
    pub(crate) fn finish(self) -> (S, Duration) {
        if let Some(progress_bar) = &self.progress_bar {
            progress_bar.finish_and_clear();
        }
        (self.inner, self.started_at.elapsed())
    }
}

impl<S: ReportSink> ReportSink for ProgressSink<S> {
    fn plan(&mut self, count: usize) -> Result<()> {
        if let Some(progress_bar) = &self.progress_bar {
            progress_bar.set_length(count.max(1) as u64);
        }
        self.forward(|inner| inner.plan(count))
    }

    fn record(&mut self, record: &TestRecord) -> Result<()> {
        let result = self.forward(|inner| inner.record(record));
        if let Some(progress_bar) = &self.progress_bar {
            progress_bar.set_message(record.name.clone());
            progress_bar.inc(1);
        }
        result
    }

    fn diagnostic(&mut self, text: &str) -> Result<()> {
        self.forward(|inner| inner.diagnostic(text))
    }
}
