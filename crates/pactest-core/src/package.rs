use std::collections::BTreeMap;
use std::fmt;

use anyhow::{anyhow, Context, Result};

use crate::checksum::declaration_md5;
use crate::dependency::Dependency;
use crate::file_entry::FileEntry;
use crate::layout::PKG_EXT;

pub const DEFAULT_VERSION: &str = "1.0-1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstallReason {
    #[default]
    Explicit,
    Dependency,
}

impl InstallReason {
    pub fn code(self) -> u8 {
        match self {
            Self::Explicit => 0,
            Self::Dependency => 1,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Self::Explicit),
            1 => Ok(Self::Dependency),
            _ => Err(anyhow!("invalid install reason code: {code}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScriptletHook {
    PreInstall,
    PostInstall,
    PreRemove,
    PostRemove,
    PreUpgrade,
    PostUpgrade,
}

impl ScriptletHook {
    pub const ALL: [ScriptletHook; 6] = [
        Self::PreInstall,
        Self::PostInstall,
        Self::PreRemove,
        Self::PostRemove,
        Self::PreUpgrade,
        Self::PostUpgrade,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreInstall => "pre_install",
            Self::PostInstall => "post_install",
            Self::PreRemove => "pre_remove",
            Self::PostRemove => "post_remove",
            Self::PreUpgrade => "pre_upgrade",
            Self::PostUpgrade => "post_upgrade",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|hook| hook.as_str() == input)
    }
}

/// A backup path plus the pristine checksum recorded for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    pub path: String,
    pub md5: String,
}

impl BackupEntry {
    /// Builds an entry from a test declaration; the hash covers the raw
    /// declaration, not whatever ends up on disk.
    pub fn declared(declaration: &str) -> Result<Self> {
        let entry = FileEntry::parse(declaration)
            .with_context(|| format!("invalid backup declaration '{declaration}'"))?;
        Ok(Self {
            path: entry.path().to_string(),
            md5: declaration_md5(declaration),
        })
    }

    pub fn parse_line(line: &str) -> Result<Self> {
        let (path, md5) = line
            .split_once('\t')
            .ok_or_else(|| anyhow!("backup line '{line}' is missing a checksum"))?;
        Ok(Self {
            path: path.to_string(),
            md5: md5.to_string(),
        })
    }
}

impl fmt::Display for BackupEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.path, self.md5)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub name: String,
    pub version: String,
    pub epoch: u32,
    pub desc: String,
    pub url: String,
    pub arch: String,
    pub license: Vec<String>,
    pub groups: Vec<String>,
    pub packager: String,
    pub builddate: String,
    pub installdate: String,
    pub size: u64,
    pub csize: u64,
    pub reason: InstallReason,
    pub force: bool,
    pub md5sum: String,
    pub sha256sum: String,
    pub depends: Vec<Dependency>,
    pub optdepends: Vec<Dependency>,
    pub conflicts: Vec<Dependency>,
    pub provides: Vec<Dependency>,
    pub replaces: Vec<Dependency>,
    pub files: Vec<FileEntry>,
    pub backup: Vec<BackupEntry>,
    pub scriptlets: BTreeMap<ScriptletHook, String>,
}

impl Package {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_version(name, DEFAULT_VERSION)
    }

    pub fn with_version(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            epoch: 0,
            desc: String::new(),
            url: String::new(),
            arch: String::new(),
            license: Vec::new(),
            groups: Vec::new(),
            packager: String::new(),
            builddate: String::new(),
            installdate: String::new(),
            size: 0,
            csize: 0,
            reason: InstallReason::Explicit,
            force: false,
            md5sum: String::new(),
            sha256sum: String::new(),
            depends: Vec::new(),
            optdepends: Vec::new(),
            conflicts: Vec::new(),
            provides: Vec::new(),
            replaces: Vec::new(),
            files: Vec::new(),
            backup: Vec::new(),
            scriptlets: BTreeMap::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("package name must not be empty"));
        }
        if self.name.contains(['/', ' ', '\t']) {
            return Err(anyhow!(
                "package name '{}' contains a path separator or whitespace",
                self.name
            ));
        }
        let Some((pkgver, pkgrel)) = self.version.rsplit_once('-') else {
            return Err(anyhow!(
                "package '{}' version '{}' must have the form pkgver-pkgrel",
                self.name,
                self.version
            ));
        };
        if pkgver.is_empty()
            || pkgrel.is_empty()
            || pkgver.contains('-')
            || self.version.contains(':')
        {
            return Err(anyhow!(
                "package '{}' has an invalid version '{}'",
                self.name,
                self.version
            ));
        }
        Ok(())
    }

    pub fn full_version(&self) -> String {
        if self.epoch > 0 {
            format!("{}:{}", self.epoch, self.version)
        } else {
            self.version.clone()
        }
    }

    pub fn fullname(&self) -> String {
        format!("{}-{}", self.name, self.full_version())
    }

    pub fn filename(&self) -> String {
        format!("{}{PKG_EXT}", self.fullname())
    }

    pub fn add_file(&mut self, declaration: &str) -> Result<()> {
        self.files.push(FileEntry::parse(declaration)?);
        Ok(())
    }

    pub fn add_backup(&mut self, declaration: &str) -> Result<()> {
        self.backup.push(BackupEntry::declared(declaration)?);
        Ok(())
    }

    pub fn set_scriptlet(&mut self, hook: ScriptletHook, body: impl Into<String>) {
        self.scriptlets.insert(hook, body.into());
    }

    pub fn has_scriptlets(&self) -> bool {
        self.scriptlets.values().any(|body| !body.is_empty())
    }

    /// Body of the `install` database file and the archive's `.INSTALL`.
    pub fn install_script(&self) -> String {
        let functions = self
            .scriptlets
            .iter()
            .filter(|(_, body)| !body.is_empty())
            .map(|(hook, body)| format!("{}() {{\n{body}\n}}", hook.as_str()))
            .collect::<Vec<_>>();
        format!("{}\n", functions.join("\n"))
    }

    pub fn pkginfo(&self) -> String {
        let mut lines = vec![
            format!("pkgname = {}", self.name),
            format!("pkgver = {}", self.full_version()),
            format!("pkgdesc = {}", self.desc),
            format!("url = {}", self.url),
            format!("builddate = {}", self.builddate),
            format!("packager = {}", self.packager),
            format!("size = {}", self.size),
        ];
        if !self.arch.is_empty() {
            lines.push(format!("arch = {}", self.arch));
        }
        lines.extend(self.license.iter().map(|v| format!("license = {v}")));
        lines.extend(self.replaces.iter().map(|v| format!("replaces = {v}")));
        lines.extend(self.groups.iter().map(|v| format!("group = {v}")));
        lines.extend(self.depends.iter().map(|v| format!("depend = {v}")));
        lines.extend(self.optdepends.iter().map(|v| format!("optdepend = {v}")));
        lines.extend(self.conflicts.iter().map(|v| format!("conflict = {v}")));
        lines.extend(self.provides.iter().map(|v| format!("provides = {v}")));
        lines.extend(self.backup.iter().map(|v| format!("backup = {}", v.path)));
        if self.force {
            lines.push("force = true".to_string());
        }
        format!("{}\n", lines.join("\n"))
    }
}
