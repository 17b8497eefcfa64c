mod archive;
mod checksum;
mod database;
mod dbformat;
mod dependency;
mod file_entry;
mod layout;
mod package;
mod snapshot;

pub use archive::{build_package_archive, pack_directory_entries};
pub use checksum::{declaration_md5, file_md5, file_sha256, md5_hex, sha256_hex};
pub use database::{backup_lines, expand_file_list, Database, EntryFingerprint, Tree};
pub use dependency::{Dependency, VersionConstraint, VersionOp};
pub use file_entry::{set_fixed_times, FileEntry, FileKind, FIXTURE_MTIME};
pub use layout::{
    RootLayout, DB_EXT, LOCK_FILE, LOG_FILE, PACNEW_SUFFIX, PACORIG_SUFFIX, PACSAVE_SUFFIX,
    PKG_EXT,
};
pub use package::{BackupEntry, InstallReason, Package, ScriptletHook, DEFAULT_VERSION};
pub use snapshot::{FileStamp, FilesystemSnapshot, SnapshotEntry, Timespec};

#[cfg(test)]
mod tests;
