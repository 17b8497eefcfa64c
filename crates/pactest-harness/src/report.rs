use std::io::Write;

use anyhow::{Context, Result};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RuleTally {
    pub success: usize,
    pub fail: usize,
    pub skipped: usize,
}

impl RuleTally {
    pub fn total(&self) -> usize {
        self.success + self.fail + self.skipped
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    ExpectedFailure,
    UnexpectedPass,
    Skipped,
}

impl TestStatus {
    /// Final classification of a completed test. A hung subject always
    /// fails, whatever the rules said.
    pub fn classify(rules_failed: bool, hung: bool, expect_failure: bool) -> Self {
        if hung {
            return Self::Failed;
        }
        match (rules_failed, expect_failure) {
            (false, false) => Self::Passed,
            (false, true) => Self::UnexpectedPass,
            (true, true) => Self::ExpectedFailure,
            (true, false) => Self::Failed,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Passed | Self::UnexpectedPass => "[PASS]",
            Self::Failed | Self::ExpectedFailure => "[FAIL]",
            Self::Skipped => "[SKIP]",
        }
    }
}

/// What a sink learns about one finished test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestRecord {
    pub name: String,
    pub description: String,
    pub status: TestStatus,
    pub expect_failure: bool,
    pub hung: bool,
    pub exit_code: Option<i32>,
    pub tally: RuleTally,
}

impl TestRecord {
    pub fn title(&self) -> &str {
        if self.description.is_empty() {
            &self.name
        } else {
            &self.description
        }
    }
}

pub trait ReportSink {
    fn plan(&mut self, count: usize) -> Result<()>;
    fn record(&mut self, record: &TestRecord) -> Result<()>;
    fn diagnostic(&mut self, text: &str) -> Result<()>;
}

/// Line-oriented TAP writer.
pub struct TapSink<W: Write> {
    out: W,
    counter: usize,
}

impl<W: Write> TapSink<W> {
    pub fn new(out: W) -> Self {
        Self { out, counter: 0 }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ReportSink for TapSink<W> {
    fn plan(&mut self, count: usize) -> Result<()> {
        writeln!(self.out, "1..{count}").context("failed to write TAP plan")
    }

    fn record(&mut self, record: &TestRecord) -> Result<()> {
        self.counter += 1;
        let ok = match record.status {
            TestStatus::Passed | TestStatus::UnexpectedPass | TestStatus::Skipped => "ok",
            TestStatus::Failed | TestStatus::ExpectedFailure => "not ok",
        };
        let directive = match record.status {
            TestStatus::Skipped => " # SKIP database lock present before run",
            _ if record.expect_failure && !record.hung => " # TODO expected failure",
            _ => "",
        };
        writeln!(
            self.out,
            "{ok} {} - {}{directive}",
            self.counter,
            record.title().replace('#', "\\#")
        )
        .context("failed to write TAP result")
    }

    fn diagnostic(&mut self, text: &str) -> Result<()> {
        for line in text.lines() {
            writeln!(self.out, "# {line}").context("failed to write TAP diagnostic")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Plan(usize),
    Record(TestRecord),
    Diagnostic(String),
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub events: Vec<SinkEvent>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> impl Iterator<Item = &TestRecord> {
        self.events.iter().filter_map(|event| match event {
            SinkEvent::Record(record) => Some(record),
            _ => None,
        })
    }

    pub fn diagnostics(&self) -> impl Iterator<Item = &str> {
        self.events.iter().filter_map(|event| match event {
            SinkEvent::Diagnostic(text) => Some(text.as_str()),
            _ => None,
        })
    }
}

impl ReportSink for RecordingSink {
    fn plan(&mut self, count: usize) -> Result<()> {
        self.events.push(SinkEvent::Plan(count));
        Ok(())
    }

    fn record(&mut self, record: &TestRecord) -> Result<()> {
        self.events.push(SinkEvent::Record(record.clone()));
        Ok(())
    }

    fn diagnostic(&mut self, text: &str) -> Result<()> {
        self.events.push(SinkEvent::Diagnostic(text.to_string()));
        Ok(())
    }
}
