use anyhow::{bail, Result};
use serde::Serialize;

use crate::invoke::SubjectConfig;
use crate::report::{ReportSink, RuleTally, TestRecord, TestStatus};
use crate::testcase::{TestCase, TestState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestSummary {
    pub name: String,
    pub status: TestStatus,
    pub tally: RuleTally,
}

impl TestSummary {
    /// `[PASS] name Rules: OK = n FAIL = n SKIP = n`
    pub fn line(&self) -> String {
        format!(
            "{} {} Rules: OK = {} FAIL = {} SKIP = {}",
            self.status.label(),
            self.name,
            self.tally.success,
            self.tally.fail,
            self.tally.skipped
        )
    }
}

/// Per-bucket results of a suite run, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SuiteSummary {
    pub passed: Vec<TestSummary>,
    pub failed: Vec<TestSummary>,
    pub expected_failures: Vec<TestSummary>,
    pub unexpected_passes: Vec<TestSummary>,
    pub skipped: Vec<TestSummary>,
}

impl SuiteSummary {
    pub fn total(&self) -> usize {
        self.passed.len()
            + self.failed.len()
            + self.expected_failures.len()
            + self.unexpected_passes.len()
            + self.skipped.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn exit_code(&self) -> i32 {
        i32::from(self.has_failures())
    }

    pub fn percentage(&self, count: usize) -> f64 {
        match self.total() {
            0 => 0.0,
            total => count as f64 * 100.0 / total as f64,
        }
    }

    fn push(&mut self, record: &TestRecord) {
        let entry = TestSummary {
            name: record.name.clone(),
            status: record.status,
            tally: record.tally,
        };
        match record.status {
            TestStatus::Passed => self.passed.push(entry),
            TestStatus::Failed => self.failed.push(entry),
            TestStatus::ExpectedFailure => self.expected_failures.push(entry),
            TestStatus::UnexpectedPass => self.unexpected_passes.push(entry),
            TestStatus::Skipped => self.skipped.push(entry),
        }
    }

    /// Bucket listings followed by totals with percentages.
    pub fn report_lines(&self) -> Vec<String> {
        let rule = "=".repeat(80);
        let thin = "-".repeat(80);
        let mut lines = vec![rule, "Results".to_string(), thin.clone()];

        for (title, bucket) in [
            ("Passed", &self.passed),
            ("Expected failures", &self.expected_failures),
            ("Unexpected passes", &self.unexpected_passes),
            ("Skipped", &self.skipped),
            ("Failed", &self.failed),
        ] {
            lines.push(format!(" {title}:"));
            lines.extend(bucket.iter().map(|test| format!("  {}", test.line())));
        }

        lines.push(thin);
        lines.push(format!("Total             = {:3}", self.total()));
        for (title, count) in [
            ("Pass", self.passed.len()),
            ("Expected fail", self.expected_failures.len()),
            ("Unexpected pass", self.unexpected_passes.len()),
            ("Skipped", self.skipped.len()),
            ("Fail", self.failed.len()),
        ] {
            lines.push(format!(
                "{title:<17} = {count:3} ({:6.2}%)",
                self.percentage(count)
            ));
        }
        lines
    }
}

/// Owns the tests of one run and runs them one after another.
pub struct Suite {
    subject: SubjectConfig,
    tests: Vec<TestCase>,
    summary: SuiteSummary,
    ran: bool,
}

impl Suite {
    pub fn new(subject: SubjectConfig) -> Self {
        Self {
            subject,
            tests: Vec::new(),
            summary: SuiteSummary::default(),
            ran: false,
        }
    }

    pub fn add_test(&mut self, test: TestCase) {
        self.tests.push(test);
    }

    pub fn tests(&self) -> &[TestCase] {
        &self.tests
    }

    pub fn summary(&self) -> &SuiteSummary {
        &self.summary
    }

    /// Runs every test to completion before starting the next. A test that
    /// errors is recorded as failed and the run continues. A suite runs once.
    pub fn run(&mut self, sink: &mut dyn ReportSink) -> Result<&SuiteSummary> {
        if self.ran {
            bail!("invalid-state: suite has already run");
        }
        self.ran = true;
        sink.plan(self.tests.len())?;
        for test in &mut self.tests {
            tracing::info!(test = %test.name(), "starting test");
            let outcome = run_test(test, &self.subject);
            for line in test.take_diagnostics() {
                sink.diagnostic(&line)?;
            }
            let record = match outcome {
                Ok(record) => record,
                Err(err) => {
                    tracing::warn!(test = %test.name(), error = %format!("{err:#}"), "test errored");
                    sink.diagnostic(&format!("error: {err:#}"))?;
                    test.record(TestStatus::Failed)
                }
            };
            sink.record(&record)?;
            self.summary.push(&record);
        }
        Ok(&self.summary)
    }
}

fn run_test(test: &mut TestCase, subject: &SubjectConfig) -> Result<TestRecord> {
    test.generate()?;
    test.run(subject)?;
    if test.state() != TestState::Skipped {
        test.check()?;
    }
    test.report()
}
