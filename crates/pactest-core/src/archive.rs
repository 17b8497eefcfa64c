use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Builder, EntryType, Header, HeaderMode};

use crate::checksum::{file_md5, file_sha256};
use crate::database::expand_file_list;
use crate::file_entry::FileKind;
use crate::package::Package;

const DEFAULT_FILE_MODE: u32 = 0o644;
const DEFAULT_DIR_MODE: u32 = 0o755;

/// Writes `<fullname>.pkg.tar.gz` into `dir` and records its installed
/// size, compressed size and checksums on `pkg`.
pub fn build_package_archive(pkg: &mut Package, dir: &Path) -> Result<PathBuf> {
    pkg.validate()?;
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    pkg.size = pkg
        .files
        .iter()
        .filter(|entry| entry.is_regular())
        .map(|entry| entry.content().len() as u64)
        .sum();

    let archive_path = dir.join(pkg.filename());
    let file = File::create(&archive_path)
        .with_context(|| format!("failed to create {}", archive_path.display()))?;
    let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
    let mtime = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();

    append_bytes(&mut builder, ".PKGINFO", pkg.pkginfo().as_bytes(), 0o644, mtime)?;
    if pkg.has_scriptlets() {
        append_bytes(
            &mut builder,
            ".INSTALL",
            pkg.install_script().as_bytes(),
            0o644,
            mtime,
        )?;
    }

    for path in expand_file_list(&pkg.files) {
        let declared = pkg.files.iter().find(|entry| entry.path() == path);
        match declared.map(|entry| (entry.kind(), entry)) {
            Some((FileKind::Symlink { target }, _)) => {
                let mut header = Header::new_gnu();
                header.set_entry_type(EntryType::Symlink);
                header.set_size(0);
                header.set_mode(0o777);
                header.set_mtime(mtime);
                builder
                    .append_link(&mut header, &path, target)
                    .with_context(|| format!("failed to add symlink {path}"))?;
            }
            Some((FileKind::Regular, entry)) => {
                let mode = entry.mode().unwrap_or(DEFAULT_FILE_MODE);
                append_bytes(&mut builder, &path, entry.content().as_bytes(), mode, mtime)?;
            }
            Some((FileKind::Directory, _)) | None => {
                let mut header = Header::new_gnu();
                header.set_entry_type(EntryType::Directory);
                header.set_size(0);
                header.set_mode(DEFAULT_DIR_MODE);
                header.set_mtime(mtime);
                builder
                    .append_data(&mut header, path.trim_end_matches('/'), io::empty())
                    .with_context(|| format!("failed to add directory {path}"))?;
            }
        }
    }

    builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .with_context(|| format!("failed to finish {}", archive_path.display()))?;

    pkg.csize = fs::metadata(&archive_path)
        .with_context(|| format!("failed to stat {}", archive_path.display()))?
        .len();
    pkg.md5sum = file_md5(&archive_path)?;
    pkg.sha256sum = file_sha256(&archive_path)?;

    tracing::debug!(
        package = %pkg.fullname(),
        archive = %archive_path.display(),
        csize = pkg.csize,
        "built package archive"
    );
    Ok(archive_path)
}

/// Packs every top-level entry of `src_dir` into a gzipped tarball.
pub fn pack_directory_entries(src_dir: &Path, archive_path: &Path) -> Result<()> {
    let mut names = fs::read_dir(src_dir)
        .with_context(|| format!("failed to read {}", src_dir.display()))?
        .map(|entry| entry.map(|entry| entry.file_name()))
        .collect::<io::Result<Vec<_>>>()?;
    names.sort();

    if let Some(parent) = archive_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file = File::create(archive_path)
        .with_context(|| format!("failed to create {}", archive_path.display()))?;
    let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
    builder.mode(HeaderMode::Deterministic);

    for name in names {
        let source = src_dir.join(&name);
        let result = if source.is_dir() {
            builder.append_dir_all(&name, &source)
        } else {
            builder.append_path_with_name(&source, &name)
        };
        result.with_context(|| format!("failed to archive {}", source.display()))?;
    }

    builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .with_context(|| format!("failed to finish {}", archive_path.display()))?;
    Ok(())
}

fn append_bytes<W: io::Write>(
    builder: &mut Builder<W>,
    path: &str,
    data: &[u8],
    mode: u32,
    mtime: u64,
) -> Result<()> {
    if path.is_empty() {
        return Err(anyhow!("archive entry path must not be empty"));
    }
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(data.len() as u64);
    header.set_mode(mode);
    header.set_mtime(mtime);
    builder
        .append_data(&mut header, path, data)
        .with_context(|| format!("failed to add {path}"))
}
