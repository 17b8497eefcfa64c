use regex::Regex;

use crate::outcome::SkipReason;

/// Scalar package fields compared for equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkgScalar {
    Version,
    Desc,
    Reason,
    Epoch,
}

/// Package list fields checked for membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkgList {
    Groups,
    Provides,
    Depends,
    Optdepends,
    Conflicts,
    License,
    Files,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Dir,
    File,
    Link,
}

impl FileType {
    pub fn parse(input: &str) -> Option<Self> {
        match input {
            "dir" => Some(Self::Dir),
            "file" => Some(Self::File),
            "link" => Some(Self::Link),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sidecar {
    Pacnew,
    Pacorig,
    Pacsave,
}

impl Sidecar {
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Pacnew => pactest_core::PACNEW_SUFFIX,
            Self::Pacorig => pactest_core::PACORIG_SUFFIX,
            Self::Pacsave => pactest_core::PACSAVE_SUFFIX,
        }
    }
}

/// A parsed rule body, one variant per kind/case pair.
#[derive(Debug, Clone)]
pub enum Assertion {
    ExitCode(i32),
    OutputMatches(Regex),
    PkgExists(String),
    PkgModified(String),
    PkgEquals {
        name: String,
        field: PkgScalar,
        value: String,
    },
    PkgContains {
        name: String,
        field: PkgList,
        value: String,
    },
    PkgBackup {
        name: String,
        path: String,
    },
    FileExists(String),
    FileModified(String),
    FileMode {
        path: String,
        mode: u32,
    },
    FileType {
        path: String,
        kind: FileType,
    },
    FileSidecar {
        path: String,
        sidecar: Sidecar,
    },
    FileContents {
        path: String,
        contents: String,
    },
    /// Archive of a repository or standalone package, optionally pinned
    /// to a full version, present in the cache.
    CacheExists {
        name: String,
        version: Option<String>,
    },
    CacheContents {
        path: String,
        contents: String,
    },
    Unevaluable(SkipReason),
}
