use anyhow::{Context, Result};
use md5::Md5;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hash of a declaration string the way it is materialized on disk, i.e.
/// followed by a newline. Backup entries record this value so the expected
/// pristine checksum is known before anything touches the filesystem.
pub fn declaration_md5(declaration: &str) -> String {
    md5_hex(format!("{declaration}\n").as_bytes())
}

pub fn file_md5(path: &Path) -> Result<String> {
    let mut hasher = Md5::new();
    stream_file(path, |block| hasher.update(block))?;
    Ok(hex::encode(hasher.finalize()))
}

pub fn file_sha256(path: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    stream_file(path, |block| hasher.update(block))?;
    Ok(hex::encode(hasher.finalize()))
}

fn stream_file(path: &Path, mut sink: impl FnMut(&[u8])) -> Result<()> {
    let mut file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut buffer = [0_u8; 32 * 1024];
    loop {
        let read = file
            .read(&mut buffer)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if read == 0 {
            break;
        }
        sink(&buffer[..read]);
    }
    Ok(())
}
