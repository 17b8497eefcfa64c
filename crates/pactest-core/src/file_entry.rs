use anyhow::{anyhow, Context, Result};
use filetime::FileTime;
use std::fs;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};

/// Access and modification time stamped on every fixture file, so later
/// modification checks compare against a known baseline.
pub const FIXTURE_MTIME: u64 = 355;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink { target: String },
}

/// One declared path of a package or of the test filesystem.
///
/// Declarations use a small modifier syntax: `dir/`, `link -> target`,
/// `file|0755`, and a trailing `*` marking content that diverges from the
/// pristine backup hash (the file is observed as locally modified).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    raw: String,
    path: String,
    kind: FileKind,
    mode: Option<u32>,
    altered: bool,
}

impl FileEntry {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Err(anyhow!("file declaration must not be empty"));
        }

        let stripped = raw.trim_end_matches('*');
        let altered = stripped.len() != raw.len();

        let (path, kind, mode) = if let Some((path, target)) = stripped.split_once(" -> ") {
            (
                path,
                FileKind::Symlink {
                    target: target.to_string(),
                },
                None,
            )
        } else if let Some((path, perms)) = stripped.split_once('|') {
            let mode = u32::from_str_radix(perms, 8)
                .with_context(|| format!("invalid octal mode '{perms}' in '{raw}'"))?;
            (path, FileKind::Regular, Some(mode))
        } else if stripped.ends_with('/') {
            (stripped, FileKind::Directory, None)
        } else {
            (stripped, FileKind::Regular, None)
        };

        if path.is_empty() || path.starts_with('/') {
            return Err(anyhow!(
                "file declaration '{raw}' must name a root-relative path"
            ));
        }

        Ok(Self {
            raw: raw.to_string(),
            path: path.to_string(),
            kind,
            mode,
            altered,
        })
    }

    /// An entry read back from a database file list, where no modifiers exist.
    pub fn plain(path: impl Into<String>) -> Self {
        let path = path.into();
        let kind = if path.ends_with('/') {
            FileKind::Directory
        } else {
            FileKind::Regular
        };
        Self {
            raw: path.clone(),
            path,
            kind,
            mode: None,
            altered: false,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> &FileKind {
        &self.kind
    }

    pub fn mode(&self) -> Option<u32> {
        self.mode
    }

    pub fn is_altered(&self) -> bool {
        self.altered
    }

    pub fn is_regular(&self) -> bool {
        self.kind == FileKind::Regular
    }

    /// Deterministic content of a regular file: its declaration plus newline.
    pub fn content(&self) -> String {
        format!("{}\n", self.raw)
    }

    /// Creates the entry below `root`, including missing parent directories.
    pub fn materialize(&self, root: &Path) -> Result<PathBuf> {
        let target = root.join(self.path.trim_end_matches('/'));
        let parent = match self.kind {
            FileKind::Directory => Some(target.as_path()),
            _ => target.parent(),
        };
        if let Some(parent) = parent {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        match &self.kind {
            FileKind::Directory => {}
            FileKind::Symlink { target: link } => {
                symlink(link, &target).with_context(|| {
                    format!("failed to create symlink {} -> {link}", target.display())
                })?;
            }
            FileKind::Regular => {
                fs::write(&target, self.content())
                    .with_context(|| format!("failed to write {}", target.display()))?;
                if let Some(mode) = self.mode {
                    fs::set_permissions(&target, fs::Permissions::from_mode(mode)).with_context(
                        || format!("failed to set mode {mode:o} on {}", target.display()),
                    )?;
                }
            }
        }

        Ok(target)
    }
}

/// Stamps access and modification time by path, so entries whose mode
/// denies reading are covered too.
pub fn set_fixed_times(path: &Path, secs: u64) -> Result<()> {
    let secs = i64::try_from(secs).with_context(|| format!("timestamp {secs} is out of range"))?;
    let stamp = FileTime::from_unix_time(secs, 0);
    filetime::set_file_times(path, stamp, stamp)
        .with_context(|| format!("failed to set times on {}", path.display()))
}
