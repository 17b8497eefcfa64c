use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use pactest_core::{Dependency, InstallReason, Package, ScriptletHook, DEFAULT_VERSION};
use serde::Deserialize;

use crate::testcase::TestCase;

/// A string or a list of strings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum StringOrList {
    One(String),
    Many(Vec<String>),
}

impl StringOrList {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(value) => vec![value],
            Self::Many(values) => values,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PackageDefinition {
    pub name: String,
    pub version: Option<String>,
    #[serde(default)]
    pub epoch: u32,
    /// Tree to register the package in; absent builds a standalone archive.
    pub db: Option<String>,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub arch: String,
    #[serde(default)]
    pub packager: String,
    #[serde(default)]
    pub builddate: String,
    #[serde(default)]
    pub installdate: String,
    #[serde(default)]
    pub reason: u8,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub license: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default)]
    pub optdepends: Vec<String>,
    #[serde(default)]
    pub conflicts: Vec<String>,
    #[serde(default)]
    pub provides: Vec<String>,
    #[serde(default)]
    pub replaces: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub backup: Vec<String>,
    /// Scriptlet bodies keyed by hook name, e.g. `post_install`.
    #[serde(default)]
    pub install: BTreeMap<String, String>,
}

impl PackageDefinition {
    pub fn to_package(&self) -> Result<Package> {
        let mut pkg = Package::with_version(
            &self.name,
            self.version.as_deref().unwrap_or(DEFAULT_VERSION),
        );
        pkg.epoch = self.epoch;
        pkg.desc = self.desc.clone();
        pkg.url = self.url.clone();
        pkg.arch = self.arch.clone();
        pkg.packager = self.packager.clone();
        pkg.builddate = self.builddate.clone();
        pkg.installdate = self.installdate.clone();
        pkg.reason = InstallReason::from_code(self.reason)?;
        pkg.force = self.force;
        pkg.license = self.license.clone();
        pkg.groups = self.groups.clone();
        pkg.depends = parse_relations(&self.depends)?;
        pkg.optdepends = parse_relations(&self.optdepends)?;
        pkg.conflicts = parse_relations(&self.conflicts)?;
        pkg.provides = parse_relations(&self.provides)?;
        pkg.replaces = parse_relations(&self.replaces)?;
        for file in &self.files {
            pkg.add_file(file)?;
        }
        for backup in &self.backup {
            pkg.add_backup(backup)?;
        }
        for (hook, body) in &self.install {
            let hook = ScriptletHook::parse(hook)
                .ok_or_else(|| anyhow!("unknown install hook '{hook}'"))?;
            pkg.set_scriptlet(hook, body.clone());
        }
        pkg.validate()?;
        Ok(pkg)
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DatabaseDefinition {
    #[serde(default)]
    pub options: BTreeMap<String, StringOrList>,
}

/// Declarative test document, one per `.toml` file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TestDefinition {
    #[serde(default)]
    pub description: String,
    /// A whitespace-separated string or an explicit argument list.
    pub args: Option<StringOrList>,
    #[serde(default)]
    pub expect_failure: bool,
    #[serde(default = "default_cache_packages")]
    pub cache_packages: bool,
    #[serde(default)]
    pub create_local_packages: bool,
    #[serde(default)]
    pub filesystem: Vec<String>,
    #[serde(default)]
    pub rules: Vec<String>,
    #[serde(default)]
    pub options: BTreeMap<String, StringOrList>,
    #[serde(default)]
    pub packages: Vec<PackageDefinition>,
    #[serde(default)]
    pub databases: BTreeMap<String, DatabaseDefinition>,
}

fn default_cache_packages() -> bool {
    true
}

impl TestDefinition {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).context("definition-invalid: failed to parse test definition")
    }

    pub fn args(&self) -> Vec<String> {
        match &self.args {
            None => Vec::new(),
            Some(StringOrList::One(line)) => line.split_whitespace().map(str::to_string).collect(),
            Some(StringOrList::Many(args)) => args.clone(),
        }
    }

    pub fn into_test_case(self, name: &str, root: &Path) -> Result<TestCase> {
        let mut test = TestCase::new(name, root);
        test.set_args(self.args());
        test.set_description(self.description);
        test.set_expect_failure(self.expect_failure);
        test.set_cache_packages(self.cache_packages);
        test.set_create_local_packages(self.create_local_packages);

        for (key, value) in self.options {
            test.set_option(key, value.into_vec());
        }
        for (tree, db) in self.databases {
            for (key, value) in db.options {
                test.set_db_option(&tree, key, value.into_vec());
            }
        }
        for def in &self.packages {
            let pkg = def
                .to_package()
                .with_context(|| format!("definition-invalid: package '{}'", def.name))?;
            match &def.db {
                Some(tree) => test.add_pkg_to_db(tree, pkg)?,
                None => test.add_pkg(pkg)?,
            }
        }
        for entry in &self.filesystem {
            test.add_filesystem_entry(entry)
                .with_context(|| format!("definition-invalid: filesystem entry '{entry}'"))?;
        }
        for rule in &self.rules {
            test.add_rule(rule);
        }
        Ok(test)
    }
}

/// Loads `path` as a test named after the file stem, rooted at `root`.
pub fn load_test(path: &Path, root: &Path) -> Result<TestCase> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read test definition {}", path.display()))?;
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("definition-invalid: {} has no file name", path.display()))?;
    TestDefinition::from_toml_str(&raw)
        .and_then(|definition| definition.into_test_case(&name, root))
        .with_context(|| format!("failed to load {}", path.display()))
}

fn parse_relations(values: &[String]) -> Result<Vec<Dependency>> {
    values.iter().map(|value| value.parse()).collect()
}
