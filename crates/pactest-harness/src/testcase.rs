use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use pactest_core::{
    build_package_archive, set_fixed_times, Database, FileEntry, FileKind, FilesystemSnapshot,
    Package, RootLayout, Tree, FIXTURE_MTIME,
};
use pactest_rules::{Assertion, EvalContext, Outcome, Rule, SkipReason};

use crate::config::write_config;
use crate::invoke::{invoke_subject, Invocation, SubjectConfig};
use crate::report::{RuleTally, TestRecord, TestStatus};

/// Pause before invoking the subject when rules compare timestamps, so any
/// rewrite lands on a later clock tick than the fixture.
pub const SETTLE_DELAY: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestState {
    Defined,
    Generated,
    Executed,
    Checked,
    Reported,
    Skipped,
}

impl fmt::Display for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Defined => "defined",
            Self::Generated => "generated",
            Self::Executed => "executed",
            Self::Checked => "checked",
            Self::Reported => "reported",
            Self::Skipped => "skipped",
        };
        f.write_str(label)
    }
}

/// One scenario: fixture, subject arguments and the rules to check after
/// the subject ran.
#[derive(Debug)]
pub struct TestCase {
    name: String,
    layout: RootLayout,
    description: String,
    args: Vec<String>,
    databases: BTreeMap<Tree, Database>,
    local_packages: Vec<Package>,
    filesystem: Vec<FileEntry>,
    options: BTreeMap<String, Vec<String>>,
    rules: Vec<Rule>,
    expect_failure: bool,
    cache_packages: bool,
    create_local_packages: bool,
    state: TestState,
    snapshot: FilesystemSnapshot,
    invocation: Option<Invocation>,
    tally: RuleTally,
    diagnostics: Vec<String>,
}

impl TestCase {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        let mut databases = BTreeMap::new();
        databases.insert(Tree::Local, Database::new(Tree::Local));
        Self {
            name: name.into(),
            layout: RootLayout::new(root),
            description: String::new(),
            args: Vec::new(),
            databases,
            local_packages: Vec::new(),
            filesystem: Vec::new(),
            options: BTreeMap::new(),
            rules: Vec::new(),
            expect_failure: false,
            cache_packages: true,
            create_local_packages: false,
            state: TestState::Defined,
            snapshot: FilesystemSnapshot::default(),
            invocation: None,
            tally: RuleTally::default(),
            diagnostics: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> &RootLayout {
        &self.layout
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn set_args<I, S>(&mut self, args: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn add_rule(&mut self, raw: &str) {
        self.rules.push(Rule::parse(raw));
    }

    /// Rules that will be skipped whatever the subject does.
    pub fn unevaluable_rules(&self) -> Vec<(&Rule, &SkipReason)> {
        self.rules
            .iter()
            .filter_map(|rule| match rule.assertion() {
                Assertion::Unevaluable(reason) => Some((rule, reason)),
                _ => None,
            })
            .collect()
    }

    pub fn set_option(&mut self, key: impl Into<String>, values: Vec<String>) {
        self.options.insert(key.into(), values);
    }

    pub fn options(&self) -> &BTreeMap<String, Vec<String>> {
        &self.options
    }

    pub fn set_expect_failure(&mut self, expect_failure: bool) {
        self.expect_failure = expect_failure;
    }

    pub fn expect_failure(&self) -> bool {
        self.expect_failure
    }

    /// Builds repository archives into the package cache instead of the
    /// repository tree. On by default.
    pub fn set_cache_packages(&mut self, cache_packages: bool) {
        self.cache_packages = cache_packages;
    }

    /// Also builds archives for packages registered in the local database.
    pub fn set_create_local_packages(&mut self, create_local_packages: bool) {
        self.create_local_packages = create_local_packages;
    }

    /// Registers a package built only as a standalone archive in `tmp/`,
    /// for `-U` style installs.
    pub fn add_pkg(&mut self, pkg: Package) -> Result<()> {
        pkg.validate()?;
        match self.local_packages.iter_mut().find(|p| p.name == pkg.name) {
            Some(existing) => *existing = pkg,
            None => self.local_packages.push(pkg),
        }
        Ok(())
    }

    pub fn add_pkg_to_db(&mut self, tree: &str, pkg: Package) -> Result<()> {
        self.database_mut(tree).add(pkg)
    }

    pub fn set_db_option(&mut self, tree: &str, key: impl Into<String>, values: Vec<String>) {
        self.database_mut(tree).set_option(key, values);
    }

    fn database_mut(&mut self, tree: &str) -> &mut Database {
        let tree = Tree::parse(tree);
        self.databases
            .entry(tree.clone())
            .or_insert_with(|| Database::new(tree))
    }

    pub fn databases(&self) -> &BTreeMap<Tree, Database> {
        &self.databases
    }

    pub fn local_packages(&self) -> &[Package] {
        &self.local_packages
    }

    pub fn add_filesystem_entry(&mut self, declaration: &str) -> Result<()> {
        self.filesystem.push(FileEntry::parse(declaration)?);
        Ok(())
    }

    pub fn state(&self) -> TestState {
        self.state
    }

    pub fn tally(&self) -> RuleTally {
        self.tally
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.invocation.as_ref().map(|run| run.exit_code)
    }

    pub fn hung(&self) -> bool {
        self.invocation.as_ref().is_some_and(|run| run.hung)
    }

    pub fn output_log(&self) -> Option<&Path> {
        self.invocation
            .as_ref()
            .and_then(|run| run.output_log.as_deref())
    }

    pub fn snapshot(&self) -> &FilesystemSnapshot {
        &self.snapshot
    }

    pub fn take_diagnostics(&mut self) -> Vec<String> {
        std::mem::take(&mut self.diagnostics)
    }

    fn expect_state(&self, expected: TestState, step: &str) -> Result<()> {
        if self.state != expected {
            return Err(anyhow!(
                "invalid-state: cannot {step} test '{}' in state {} (expected {expected})",
                self.name,
                self.state
            ));
        }
        Ok(())
    }

    fn diagnose(&mut self, text: String) {
        self.diagnostics.push(text);
    }

    /// Builds the root filesystem, archives and databases, then snapshots
    /// every regular file.
    pub fn generate(&mut self) -> Result<()> {
        self.expect_state(TestState::Defined, "generate")?;
        tracing::info!(test = %self.name, root = %self.layout.root().display(), "generating fixture");
        self.build_fixture()
            .with_context(|| format!("fixture-failed: test '{}'", self.name))?;
        self.state = TestState::Generated;
        Ok(())
    }

    fn build_fixture(&mut self) -> Result<()> {
        let root = self.layout.root().to_path_buf();
        match fs::remove_dir_all(&root) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| format!("failed to remove {}", root.display()))
            }
        }
        self.layout.ensure_base_dirs()?;

        let tmp_dir = self.layout.tmp_dir();
        for pkg in &mut self.local_packages {
            build_package_archive(pkg, &tmp_dir)?;
        }

        let cache_dir = self.layout.cache_dir();
        for db in self.databases.values_mut() {
            if db.tree().is_local() && !self.create_local_packages {
                continue;
            }
            let archive_dir = if self.cache_packages {
                cache_dir.clone()
            } else {
                self.layout.repo_tree_dir(db.tree().name())
            };
            for pkg in db.packages_mut() {
                build_package_archive(pkg, &archive_dir)?;
            }
        }

        write_config(&self.layout, &self.options, &self.databases)?;

        let installdate = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs().to_string())
            .unwrap_or_default();
        for db in self.databases.values_mut() {
            if db.tree().is_local() {
                for pkg in db.packages_mut() {
                    if pkg.installdate.is_empty() {
                        pkg.installdate = installdate.clone();
                    }
                }
            }
            db.write_all(&self.layout)?;

            if let Tree::Sync(name) = db.tree().clone() {
                let archive = db.gensync(&self.layout)?;
                let published = self.layout.repo_tree_dir(&name);
                fs::create_dir_all(&published)
                    .with_context(|| format!("failed to create {}", published.display()))?;
                let target = published.join(
                    archive
                        .file_name()
                        .ok_or_else(|| anyhow!("sync archive has no file name"))?,
                );
                fs::copy(&archive, &target).with_context(|| {
                    format!("failed to publish {} to {}", archive.display(), target.display())
                })?;
            }
        }

        let installed = self
            .databases
            .get(&Tree::Local)
            .map(|db| {
                db.packages()
                    .iter()
                    .flat_map(|pkg| pkg.files.iter().cloned())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        for entry in installed.iter().chain(self.filesystem.iter()) {
            materialize_fixture_entry(entry, &root)?;
        }

        self.snapshot = FilesystemSnapshot::capture(&root)?;
        tracing::debug!(test = %self.name, files = self.snapshot.len(), "captured snapshot");
        Ok(())
    }

    /// Invokes the subject. A database lock left by a previous run skips
    /// the test without invoking anything.
    pub fn run(&mut self, subject: &SubjectConfig) -> Result<()> {
        self.expect_state(TestState::Generated, "run")?;

        let lock = self.layout.lock_path();
        if lock.exists() {
            tracing::warn!(test = %self.name, lock = %lock.display(), "lock file present before run");
            self.diagnose(format!(
                "database lock {} present before run, skipping test",
                lock.display()
            ));
            self.state = TestState::Skipped;
            return Ok(());
        }

        if self.rules.iter().any(Rule::needs_settle_delay) {
            tracing::debug!(delay = ?SETTLE_DELAY, "waiting before invoking subject");
            thread::sleep(SETTLE_DELAY);
        }

        let invocation = invoke_subject(subject, &self.layout, &self.args)
            .with_context(|| format!("failed to run subject for test '{}'", self.name))?;
        if invocation.hung {
            self.diagnose(format!(
                "subject did not finish within {:?} and was killed",
                subject.timeout
            ));
        }

        if lock.exists() {
            tracing::warn!(test = %self.name, "subject left its database lock behind");
            self.diagnose(format!(
                "subject left database lock {} behind, removing it",
                lock.display()
            ));
            fs::remove_file(&lock)
                .with_context(|| format!("failed to remove {}", lock.display()))?;
        }

        let core = self.layout.core_dump_path();
        if core.exists() {
            tracing::warn!(test = %self.name, core = %core.display(), "subject dumped core");
            self.diagnose(format!("subject dumped core: {}", core.display()));
        }

        self.invocation = Some(invocation);
        self.state = TestState::Executed;
        Ok(())
    }

    /// Evaluates every rule in order and tallies the outcomes.
    pub fn check(&mut self) -> Result<()> {
        self.expect_state(TestState::Executed, "check")?;
        let exit_code = self.exit_code().unwrap_or_default();

        let mut tally = RuleTally::default();
        let mut lines = Vec::with_capacity(self.rules.len());
        {
            let ctx = EvalContext {
                layout: &self.layout,
                exit_code,
                output_log: self.output_log(),
                databases: &self.databases,
                local_packages: &self.local_packages,
                snapshot: &self.snapshot,
            };
            for rule in &self.rules {
                let outcome = rule.evaluate(&ctx)?;
                let line = match &outcome {
                    Outcome::Pass => {
                        tally.success += 1;
                        format!("{} {rule}", outcome.label())
                    }
                    Outcome::Fail => {
                        tally.fail += 1;
                        format!("{} {rule}", outcome.label())
                    }
                    Outcome::Undetermined(SkipReason::Unrecognized) => {
                        tally.skipped += 1;
                        format!("{} unrecognized rule: {rule}", outcome.label())
                    }
                    Outcome::Undetermined(reason) => {
                        tally.skipped += 1;
                        format!("{} {rule} ({reason})", outcome.label())
                    }
                };
                lines.push(line);
            }
        }

        self.diagnostics.extend(lines);
        self.tally = tally;
        self.state = TestState::Checked;
        tracing::info!(
            test = %self.name,
            ok = tally.success,
            fail = tally.fail,
            skip = tally.skipped,
            "checked rules"
        );
        Ok(())
    }

    /// Final classification. A skipped test stays skipped.
    pub fn report(&mut self) -> Result<TestRecord> {
        let status = match self.state {
            TestState::Checked => {
                self.state = TestState::Reported;
                TestStatus::classify(self.tally.fail > 0, self.hung(), self.expect_failure)
            }
            TestState::Skipped => TestStatus::Skipped,
            _ => {
                return Err(anyhow!(
                    "invalid-state: cannot report test '{}' in state {}",
                    self.name,
                    self.state
                ))
            }
        };
        Ok(self.record(status))
    }

    pub(crate) fn record(&self, status: TestStatus) -> TestRecord {
        TestRecord {
            name: self.name.clone(),
            description: self.description.clone(),
            status,
            expect_failure: self.expect_failure,
            hung: self.hung(),
            exit_code: self.exit_code(),
            tally: self.tally,
        }
    }
}

fn materialize_fixture_entry(entry: &FileEntry, root: &Path) -> Result<()> {
    let path = entry.materialize(root)?;
    if !matches!(entry.kind(), FileKind::Symlink { .. }) {
        set_fixed_times(&path, FIXTURE_MTIME)?;
    }
    Ok(())
}
