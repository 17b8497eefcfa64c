use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use crate::archive::pack_directory_entries;
use crate::dbformat::{parse_sections, Section, SectionWriter};
use crate::dependency::Dependency;
use crate::file_entry::FileEntry;
use crate::layout::RootLayout;
use crate::package::{BackupEntry, InstallReason, Package, ScriptletHook};
use crate::snapshot::FileStamp;

const ENTRY_FILES: [&str; 3] = ["desc", "files", "install"];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tree {
    Local,
    Sync(String),
}

impl Tree {
    pub fn parse(name: &str) -> Self {
        match name {
            "local" => Self::Local,
            other => Self::Sync(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Local => "local",
            Self::Sync(name) => name,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }
}

impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Stamps of the section files of one database entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryFingerprint {
    sections: BTreeMap<String, FileStamp>,
}

impl EntryFingerprint {
    pub fn capture(entry_dir: &Path) -> Result<Self> {
        let mut sections = BTreeMap::new();
        for name in ENTRY_FILES {
            if let Some(stamp) = FileStamp::capture(&entry_dir.join(name))? {
                sections.insert(name.to_string(), stamp);
            }
        }
        Ok(Self { sections })
    }

    pub fn differs_from(&self, current: &EntryFingerprint) -> bool {
        let names = self
            .sections
            .keys()
            .chain(current.sections.keys())
            .collect::<BTreeSet<_>>();
        names.into_iter().any(
            |name| match (self.sections.get(name), current.sections.get(name)) {
                (Some(old), Some(new)) => old.differs_from(new),
                (None, None) => false,
                _ => true,
            },
        )
    }
}

/// Packages under one tree name: the installed set (`local`) or a
/// repository the subject can sync from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Database {
    tree: Tree,
    packages: Vec<Package>,
    options: BTreeMap<String, Vec<String>>,
    fingerprints: BTreeMap<String, EntryFingerprint>,
}

impl Database {
    pub fn new(tree: Tree) -> Self {
        Self {
            tree,
            packages: Vec::new(),
            options: BTreeMap::new(),
            fingerprints: BTreeMap::new(),
        }
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    pub fn packages_mut(&mut self) -> &mut [Package] {
        &mut self.packages
    }

    pub fn options(&self) -> &BTreeMap<String, Vec<String>> {
        &self.options
    }

    pub fn set_option(&mut self, key: impl Into<String>, values: Vec<String>) {
        self.options.insert(key.into(), values);
    }

    /// Adds `pkg`, replacing any package already registered under its name.
    pub fn add(&mut self, pkg: Package) -> Result<()> {
        pkg.validate()
            .with_context(|| format!("cannot add package to '{}' database", self.tree))?;
        match self.packages.iter_mut().find(|p| p.name == pkg.name) {
            Some(existing) => *existing = pkg,
            None => self.packages.push(pkg),
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Package> {
        self.packages.iter().find(|p| p.name == name)
    }

    pub fn dir(&self, layout: &RootLayout) -> PathBuf {
        layout.tree_dir(&self.tree)
    }

    pub fn archive_path(&self, layout: &RootLayout) -> Option<PathBuf> {
        match &self.tree {
            Tree::Local => None,
            Tree::Sync(name) => Some(layout.sync_archive_path(name)),
        }
    }

    pub fn write_all(&mut self, layout: &RootLayout) -> Result<()> {
        let packages = self.packages.clone();
        for pkg in &packages {
            self.write(layout, pkg)?;
        }
        Ok(())
    }

    pub fn write(&mut self, layout: &RootLayout, pkg: &Package) -> Result<PathBuf> {
        let entry_dir = self.dir(layout).join(pkg.fullname());
        fs::create_dir_all(&entry_dir)
            .with_context(|| format!("failed to create {}", entry_dir.display()))?;

        write_entry_file(&entry_dir.join("desc"), &self.render_desc(pkg))?;

        if self.tree.is_local() {
            let mut files = SectionWriter::new();
            files.list("FILES", &expand_file_list(&pkg.files));
            files.list("BACKUP", &backup_lines(&pkg.backup));
            write_entry_file(&entry_dir.join("files"), &files.finish())?;

            if pkg.has_scriptlets() {
                write_entry_file(&entry_dir.join("install"), &pkg.install_script())?;
            }
        }

        let fingerprint = EntryFingerprint::capture(&entry_dir)?;
        self.fingerprints.insert(pkg.name.clone(), fingerprint);
        tracing::debug!(tree = %self.tree, entry = %pkg.fullname(), "wrote database entry");
        Ok(entry_dir)
    }

    fn render_desc(&self, pkg: &Package) -> String {
        let mut desc = SectionWriter::new();
        desc.value("NAME", &pkg.name);
        desc.value("VERSION", &pkg.full_version());
        desc.optional("DESC", &pkg.desc);
        desc.list("GROUPS", &pkg.groups);
        desc.list("LICENSE", &pkg.license);
        desc.optional("ARCH", &pkg.arch);
        desc.optional("BUILDDATE", &pkg.builddate);
        desc.optional("PACKAGER", &pkg.packager);
        desc.list("DEPENDS", &pkg.depends);
        desc.list("OPTDEPENDS", &pkg.optdepends);
        desc.list("CONFLICTS", &pkg.conflicts);
        desc.list("PROVIDES", &pkg.provides);
        match self.tree {
            Tree::Local => {
                desc.optional("URL", &pkg.url);
                desc.optional("INSTALLDATE", &pkg.installdate);
                desc.number("SIZE", pkg.size);
                desc.number("REASON", u64::from(pkg.reason.code()));
            }
            Tree::Sync(_) => {
                desc.value("FILENAME", &pkg.filename());
                desc.list("REPLACES", &pkg.replaces);
                desc.flag("FORCE", pkg.force);
                desc.number("CSIZE", pkg.csize);
                desc.number("ISIZE", pkg.size);
                desc.optional("MD5SUM", &pkg.md5sum);
                desc.optional("SHA256SUM", &pkg.sha256sum);
            }
        }
        desc.finish()
    }

    /// Finds the on-disk entry directory of package `name`, if any.
    pub fn entry_dir(&self, layout: &RootLayout, name: &str) -> Result<Option<PathBuf>> {
        let dir = self.dir(layout);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read database dir {}", dir.display()))
            }
        };

        let mut matches = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let dirname = entry.file_name().to_string_lossy().into_owned();
            if split_entry_name(&dirname).is_some_and(|(pkgname, _)| pkgname == name) {
                matches.push(entry.path());
            }
        }
        matches.sort();
        Ok(matches.into_iter().next())
    }

    /// Reads package `name` back from disk. A missing entry is `Ok(None)`;
    /// an entry missing one of its required files is an error.
    pub fn read(&self, layout: &RootLayout, name: &str) -> Result<Option<Package>> {
        let Some(entry_dir) = self.entry_dir(layout, name)? else {
            return Ok(None);
        };
        let dirname = entry_dir
            .file_name()
            .map(|value| value.to_string_lossy().into_owned())
            .unwrap_or_default();
        let Some((pkgname, full_version)) = split_entry_name(&dirname) else {
            return Ok(None);
        };

        let mut pkg = Package::new(pkgname);
        match full_version.split_once(':') {
            Some((epoch, version)) => {
                pkg.epoch = epoch
                    .parse()
                    .with_context(|| format!("db-inconsistent: invalid epoch in '{dirname}'"))?;
                pkg.version = version.to_string();
            }
            None => pkg.version = full_version.to_string(),
        }

        let desc = read_required(&entry_dir, "desc", &self.tree)?;
        for section in parse_sections(&desc) {
            apply_desc_section(&mut pkg, &section)
                .with_context(|| format!("db-inconsistent: bad desc in '{dirname}'"))?;
        }

        if self.tree.is_local() {
            let files = read_required(&entry_dir, "files", &self.tree)?;
            for section in parse_sections(&files) {
                match section.title.as_str() {
                    "FILES" => {
                        pkg.files = section
                            .lines
                            .iter()
                            .filter(|line| !line.ends_with('/'))
                            .map(FileEntry::plain)
                            .collect();
                    }
                    "BACKUP" => {
                        pkg.backup = section
                            .lines
                            .iter()
                            .map(|line| BackupEntry::parse_line(line))
                            .collect::<Result<_>>()
                            .with_context(|| {
                                format!("db-inconsistent: bad backup list in '{dirname}'")
                            })?;
                    }
                    _ => {}
                }
            }

            let install = entry_dir.join("install");
            if install.is_file() {
                let raw = fs::read_to_string(&install)
                    .with_context(|| format!("failed to read {}", install.display()))?;
                pkg.scriptlets = parse_install_script(&raw);
            }
        }

        Ok(Some(pkg))
    }

    /// True when the entry of `name` on disk no longer matches the stamps
    /// recorded when it was written. Packages this database never wrote are
    /// reported unmodified.
    pub fn is_modified(&self, layout: &RootLayout, name: &str) -> Result<bool> {
        let Some(recorded) = self.fingerprints.get(name) else {
            return Ok(false);
        };
        let Some(entry_dir) = self.entry_dir(layout, name)? else {
            return Ok(false);
        };
        let current = EntryFingerprint::capture(&entry_dir)?;
        Ok(recorded.differs_from(&current))
    }

    /// Packs a sync tree into its `<tree>.db` archive.
    pub fn gensync(&self, layout: &RootLayout) -> Result<PathBuf> {
        let archive = self.archive_path(layout).ok_or_else(|| {
            anyhow!("the local database has no sync archive to generate")
        })?;
        let dir = self.dir(layout);
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
        pack_directory_entries(&dir, &archive)?;
        Ok(archive)
    }
}

/// Every declared path plus all of its ancestor directories, sorted.
pub fn expand_file_list(files: &[FileEntry]) -> Vec<String> {
    let mut expanded = BTreeSet::new();
    for entry in files {
        let path = entry.path().to_string();
        let mut current = path.trim_end_matches('/');
        while let Some((parent, _)) = current.rsplit_once('/') {
            expanded.insert(format!("{parent}/"));
            current = parent;
        }
        expanded.insert(path);
    }
    expanded.into_iter().collect()
}

pub fn backup_lines(backup: &[BackupEntry]) -> Vec<String> {
    backup.iter().map(ToString::to_string).collect()
}

fn split_entry_name(dirname: &str) -> Option<(&str, &str)> {
    let mut parts = dirname.rsplitn(3, '-');
    let pkgrel = parts.next()?;
    let pkgver = parts.next()?;
    let pkgname = parts.next()?;
    if pkgname.is_empty() || pkgver.is_empty() || pkgrel.is_empty() {
        return None;
    }
    let version_start = pkgname.len() + 1;
    Some((pkgname, &dirname[version_start..]))
}

fn read_required(entry_dir: &Path, file: &str, tree: &Tree) -> Result<String> {
    let path = entry_dir.join(file);
    match fs::read_to_string(&path) {
        Ok(raw) => Ok(raw),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Err(anyhow!(
            "db-inconsistent: '{tree}' entry {} is missing its {file} file",
            entry_dir.display()
        )),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

fn write_entry_file(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
}

fn apply_desc_section(pkg: &mut Package, section: &Section) -> Result<()> {
    let value = section.first().to_string();
    match section.title.as_str() {
        "DESC" => pkg.desc = value,
        "GROUPS" => pkg.groups = section.lines.clone(),
        "URL" => pkg.url = value,
        "LICENSE" => pkg.license = section.lines.clone(),
        "ARCH" => pkg.arch = value,
        "BUILDDATE" => pkg.builddate = value,
        "INSTALLDATE" => pkg.installdate = value,
        "PACKAGER" => pkg.packager = value,
        "REASON" => {
            let code = value.parse().context("REASON must be an integer")?;
            pkg.reason = InstallReason::from_code(code)?;
        }
        "SIZE" | "ISIZE" => pkg.size = value.parse().context("SIZE must be an integer")?,
        "CSIZE" => pkg.csize = value.parse().context("CSIZE must be an integer")?,
        "MD5SUM" => pkg.md5sum = value,
        "SHA256SUM" => pkg.sha256sum = value,
        "FORCE" => pkg.force = true,
        "REPLACES" => pkg.replaces = parse_dependencies(&section.lines)?,
        "DEPENDS" => pkg.depends = parse_dependencies(&section.lines)?,
        "OPTDEPENDS" => pkg.optdepends = parse_dependencies(&section.lines)?,
        "CONFLICTS" => pkg.conflicts = parse_dependencies(&section.lines)?,
        "PROVIDES" => pkg.provides = parse_dependencies(&section.lines)?,
        _ => {}
    }
    Ok(())
}

fn parse_dependencies(lines: &[String]) -> Result<Vec<Dependency>> {
    lines.iter().map(|line| line.parse()).collect()
}

fn parse_install_script(raw: &str) -> BTreeMap<ScriptletHook, String> {
    let mut scriptlets = BTreeMap::new();
    let mut current: Option<(ScriptletHook, Vec<&str>)> = None;
    for line in raw.lines() {
        if let Some((hook, body)) = current.as_mut() {
            if line == "}" {
                scriptlets.insert(*hook, body.join("\n"));
                current = None;
            } else {
                body.push(line);
            }
            continue;
        }
        if let Some(hook) = line
            .strip_suffix("() {")
            .and_then(ScriptletHook::parse)
        {
            current = Some((hook, Vec::new()));
        }
    }
    scriptlets
}
