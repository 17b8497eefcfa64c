mod config;
mod definition;
mod invoke;
mod report;
mod suite;
mod testcase;

pub use config::{render_config, write_config};
pub use definition::{
    load_test, DatabaseDefinition, PackageDefinition, StringOrList, TestDefinition,
};
pub use invoke::{
    invoke_subject, normalize_exit, Invocation, SubjectConfig, DEFAULT_TIMEOUT, HUNG_EXIT_CODE,
};
pub use report::{
    RecordingSink, ReportSink, RuleTally, SinkEvent, TapSink, TestRecord, TestStatus,
};
pub use suite::{Suite, SuiteSummary, TestSummary};
pub use testcase::{TestCase, TestState, SETTLE_DELAY};
