use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use anyhow::{Context, Result};
use pactest_core::{Database, FilesystemSnapshot, Package, RootLayout, Tree};

use crate::assertion::{Assertion, FileType, PkgList, PkgScalar};
use crate::outcome::{Outcome, SkipReason};
use crate::rule::Rule;

/// Everything a rule may observe after the subject has run.
pub struct EvalContext<'a> {
    pub layout: &'a RootLayout,
    pub exit_code: i32,
    /// Captured subject output, `None` when output went elsewhere.
    pub output_log: Option<&'a Path>,
    pub databases: &'a BTreeMap<Tree, Database>,
    /// Packages built as standalone archives rather than registered in a
    /// database.
    pub local_packages: &'a [Package],
    pub snapshot: &'a FilesystemSnapshot,
}

impl EvalContext<'_> {
    fn read_installed(&self, name: &str) -> Result<Option<Package>> {
        match self.databases.get(&Tree::Local) {
            Some(db) => db.read(self.layout, name),
            None => Database::new(Tree::Local).read(self.layout, name),
        }
    }

    /// Looks through sync databases, then standalone packages. Installed
    /// packages never match.
    fn find_archived(&self, name: &str, version: Option<&str>) -> Option<&Package> {
        let matches = |pkg: &&Package| version.map_or(true, |v| pkg.full_version() == v);
        self.databases
            .iter()
            .filter(|(tree, _)| !tree.is_local())
            .find_map(|(_, db)| db.get(name).filter(matches))
            .or_else(|| {
                self.local_packages
                    .iter()
                    .filter(|pkg| pkg.name == name)
                    .find(matches)
            })
    }
}

impl Rule {
    /// Evaluates the rule and applies its negation. I/O failures and
    /// database inconsistencies are errors, not outcomes.
    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<Outcome> {
        let outcome = evaluate_assertion(self.assertion(), ctx)
            .with_context(|| format!("failed to evaluate rule '{}'", self.raw()))?;
        let outcome = if self.is_negated() {
            outcome.negate()
        } else {
            outcome
        };
        tracing::debug!(rule = %self.raw(), ?outcome, "evaluated rule");
        Ok(outcome)
    }
}

fn evaluate_assertion(assertion: &Assertion, ctx: &EvalContext<'_>) -> Result<Outcome> {
    let root = ctx.layout.root();
    let holds = match assertion {
        Assertion::Unevaluable(reason) => return Ok(Outcome::Undetermined(reason.clone())),
        Assertion::ExitCode(code) => ctx.exit_code == *code,
        Assertion::OutputMatches(regex) => {
            let Some(log) = ctx.output_log else {
                return Ok(Outcome::Undetermined(SkipReason::OutputUnavailable));
            };
            let Some(output) = read_optional(log)? else {
                return Ok(Outcome::Undetermined(SkipReason::OutputUnavailable));
            };
            String::from_utf8_lossy(&output)
                .lines()
                .any(|line| regex.is_match(line))
        }
        Assertion::PkgExists(name) => ctx.read_installed(name)?.is_some(),
        Assertion::PkgModified(name) => match ctx.databases.get(&Tree::Local) {
            Some(db) if ctx.read_installed(name)?.is_some() => db.is_modified(ctx.layout, name)?,
            _ => false,
        },
        Assertion::PkgEquals { name, field, value } => match ctx.read_installed(name)? {
            Some(pkg) => scalar_matches(&pkg, *field, value),
            None => false,
        },
        Assertion::PkgContains { name, field, value } => match ctx.read_installed(name)? {
            Some(pkg) => list_contains(&pkg, *field, value),
            None => false,
        },
        Assertion::PkgBackup { name, path } => match ctx.read_installed(name)? {
            Some(pkg) => pkg.backup.iter().any(|entry| &entry.path == path),
            None => false,
        },
        Assertion::FileExists(path) => root.join(path).is_file(),
        Assertion::FileModified(path) => {
            let mut modified = true;
            for entry in ctx.snapshot.entries_named(path) {
                if !entry.is_modified(root)? {
                    modified = false;
                }
            }
            modified
        }
        Assertion::FileMode { path, mode } => match fs::symlink_metadata(root.join(path)) {
            Ok(metadata) => metadata.permissions().mode() & 0o7777 == *mode,
            Err(err) if err.kind() == io::ErrorKind::NotFound => false,
            Err(err) => return Err(err).with_context(|| format!("failed to stat {path}")),
        },
        Assertion::FileType { path, kind } => match fs::symlink_metadata(root.join(path)) {
            Ok(metadata) => {
                let file_type = metadata.file_type();
                match kind {
                    FileType::Dir => file_type.is_dir(),
                    FileType::File => file_type.is_file(),
                    FileType::Link => file_type.is_symlink(),
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => false,
            Err(err) => return Err(err).with_context(|| format!("failed to stat {path}")),
        },
        Assertion::FileSidecar { path, sidecar } => root
            .join(format!("{path}{}", sidecar.suffix()))
            .is_file(),
        Assertion::FileContents { path, contents } => {
            read_optional(&root.join(path))?.is_some_and(|data| data == contents.as_bytes())
        }
        Assertion::CacheExists { name, version } => {
            match ctx.find_archived(name, version.as_deref()) {
                Some(pkg) => ctx.layout.cache_dir().join(pkg.filename()).is_file(),
                None => false,
            }
        }
        Assertion::CacheContents { path, contents } => {
            read_optional(&ctx.layout.cache_dir().join(path))?
                .is_some_and(|data| data == contents.as_bytes())
        }
    };
    Ok(Outcome::from_bool(holds))
}

fn scalar_matches(pkg: &Package, field: PkgScalar, value: &str) -> bool {
    match field {
        PkgScalar::Version => pkg.full_version() == value,
        PkgScalar::Desc => pkg.desc == value,
        PkgScalar::Reason => value
            .trim()
            .parse::<u8>()
            .is_ok_and(|code| pkg.reason.code() == code),
        PkgScalar::Epoch => value
            .trim()
            .parse::<u32>()
            .is_ok_and(|epoch| pkg.epoch == epoch),
    }
}

fn list_contains(pkg: &Package, field: PkgList, value: &str) -> bool {
    let relations = match field {
        PkgList::Groups => return pkg.groups.iter().any(|group| group == value),
        PkgList::License => return pkg.license.iter().any(|license| license == value),
        PkgList::Files => return pkg.files.iter().any(|entry| entry.path() == value),
        PkgList::Provides => &pkg.provides,
        PkgList::Depends => &pkg.depends,
        PkgList::Optdepends => &pkg.optdepends,
        PkgList::Conflicts => &pkg.conflicts,
    };
    relations.iter().any(|dep| dep.to_string() == value)
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}
