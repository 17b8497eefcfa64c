use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use crate::checksum::file_md5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timespec {
    pub secs: i64,
    pub nanos: i64,
}

/// Content checksum plus (access, modify, change) times of one file. The
/// checksum is `None` when the file's mode denies reading it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStamp {
    pub checksum: Option<String>,
    pub accessed: Timespec,
    pub modified: Timespec,
    pub changed: Timespec,
}

impl FileStamp {
    /// Returns `None` when `path` is not a regular file (following symlinks).
    pub fn capture(path: &Path) -> Result<Option<Self>> {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to stat {}", path.display()))
            }
        };
        if !metadata.is_file() {
            return Ok(None);
        }

        Ok(Some(Self {
            checksum: readable_md5(path)?,
            accessed: Timespec {
                secs: metadata.atime(),
                nanos: metadata.atime_nsec(),
            },
            modified: Timespec {
                secs: metadata.mtime(),
                nanos: metadata.mtime_nsec(),
            },
            changed: Timespec {
                secs: metadata.ctime(),
                nanos: metadata.ctime_nsec(),
            },
        }))
    }

    /// Compares content, mtime and ctime; access time is ignored.
    pub fn differs_from(&self, current: &FileStamp) -> bool {
        self.checksum != current.checksum
            || (self.modified, self.changed) != (current.modified, current.changed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub name: String,
    pub stamp: FileStamp,
}

impl SnapshotEntry {
    pub fn is_modified(&self, root: &Path) -> Result<bool> {
        let current = FileStamp::capture(&root.join(&self.name))?;
        tracing::debug!(
            file = %self.name,
            old = ?self.stamp,
            new = ?current,
            "comparing file stamps"
        );
        Ok(match current {
            Some(current) => self.stamp.differs_from(&current),
            None => true,
        })
    }
}

/// Fingerprint of every regular file under a root, taken right after the
/// fixture has been materialized.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilesystemSnapshot {
    root: PathBuf,
    entries: Vec<SnapshotEntry>,
}

impl FilesystemSnapshot {
    pub fn capture(root: &Path) -> Result<Self> {
        let mut names = Vec::new();
        collect_regular_files(root, root, &mut names)?;
        names.sort();

        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            if let Some(stamp) = FileStamp::capture(&root.join(&name))? {
                entries.push(SnapshotEntry { name, stamp });
            }
        }

        Ok(Self {
            root: root.to_path_buf(),
            entries,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    pub fn entries_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a SnapshotEntry> {
        self.entries.iter().filter(move |entry| entry.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn readable_md5(path: &Path) -> Result<Option<String>> {
    match fs::File::open(path) {
        Ok(_) => file_md5(path).map(Some),
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to open {}", path.display())),
    }
}

fn collect_regular_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in
        fs::read_dir(dir).with_context(|| format!("failed to read directory {}", dir.display()))?
    {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();
        if file_type.is_dir() {
            collect_regular_files(root, &path, out)?;
        } else if file_type.is_file() {
            let relative = path
                .strip_prefix(root)
                .with_context(|| format!("{} is outside {}", path.display(), root.display()))?;
            out.push(relative.to_string_lossy().into_owned());
        }
    }
    Ok(())
}
