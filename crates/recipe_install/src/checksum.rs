//! SHA-256 verification against a release checksum manifest.

use std::fs::File;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{InstallError, InstallResult};

/// Find the digest for `filename` in a `"<hex>  <filename>"` manifest.
pub fn find_checksum(manifest: &str, filename: &str) -> InstallResult<String> {
    manifest
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            match fields.as_slice() {
                [digest, name] if *name == filename => Some(digest.to_ascii_lowercase()),
                _ => None,
            }
        })
        .next()
        .ok_or_else(|| InstallError::ChecksumMissing(filename.to_string()))
}

/// Hex-encoded SHA-256 of a file's contents.
pub fn sha256_file(path: &Path) -> InstallResult<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Verify `path` against the manifest entry for `filename`.
pub fn verify_file(path: &Path, manifest: &str, filename: &str) -> InstallResult<()> {
    let expected = find_checksum(manifest, filename)?;
    let actual = sha256_file(path)?;
    if expected != actual {
        return Err(InstallError::ChecksumMismatch {
            filename: filename.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}
