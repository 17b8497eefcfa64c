use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::database::Tree;

pub const PKG_EXT: &str = ".pkg.tar.gz";
pub const DB_EXT: &str = ".db";
pub const LOCK_FILE: &str = "db.lck";
pub const LOG_FILE: &str = "pactest.log";
pub const PACNEW_SUFFIX: &str = ".pacnew";
pub const PACORIG_SUFFIX: &str = ".pacorig";
pub const PACSAVE_SUFFIX: &str = ".pacsave";

/// Paths of the synthetic root a single test materializes and hands to the
/// subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootLayout {
    root: PathBuf,
}

impl RootLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub fn dbpath(&self) -> PathBuf {
        self.root.join("var").join("lib").join("pacman")
    }

    pub fn local_db_dir(&self) -> PathBuf {
        self.dbpath().join("local")
    }

    pub fn sync_db_dir(&self) -> PathBuf {
        self.dbpath().join("sync")
    }

    pub fn tree_dir(&self, tree: &Tree) -> PathBuf {
        match tree {
            Tree::Local => self.local_db_dir(),
            Tree::Sync(name) => self.sync_db_dir().join(name),
        }
    }

    pub fn sync_archive_path(&self, name: &str) -> PathBuf {
        self.sync_db_dir().join(format!("{name}{DB_EXT}"))
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dbpath().join(LOCK_FILE)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root
            .join("var")
            .join("cache")
            .join("pacman")
            .join("pkg")
    }

    pub fn sync_repo_dir(&self) -> PathBuf {
        self.root.join("var").join("pub")
    }

    pub fn repo_tree_dir(&self, name: &str) -> PathBuf {
        self.sync_repo_dir().join(name)
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    pub fn core_dump_path(&self) -> PathBuf {
        self.tmp_dir().join("core")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("var").join("log")
    }

    pub fn log_file(&self) -> PathBuf {
        self.log_dir().join(LOG_FILE)
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.join("etc")
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir().join("pacman.conf")
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [
            self.dbpath(),
            self.local_db_dir(),
            self.sync_db_dir(),
            self.cache_dir(),
            self.sync_repo_dir(),
            self.tmp_dir(),
            self.log_dir(),
            self.config_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}
