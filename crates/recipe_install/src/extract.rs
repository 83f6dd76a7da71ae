//! Safe extraction of the tool executable from a zip archive.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use zip::ZipArchive;

use crate::error::{InstallError, InstallResult};

/// Executable name for `product` on this platform.
pub fn executable_name(product: &str) -> String {
    if cfg!(windows) {
        format!("{product}.exe")
    } else {
        product.to_string()
    }
}

/// Last path segment, treating both `/` and `\` as separators.
fn base_name(name: &str) -> &str {
    name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(name)
}

/// A member name is only acceptable when it is already a bare file name.
pub fn validate_member_name(name: &str) -> InstallResult<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || base_name(name) != name
        || name.contains('/')
        || name.contains('\\')
    {
        return Err(InstallError::UnsafeArchiveMember(name.to_string()));
    }
    Ok(())
}

/// Join `name` onto the install directory and confirm the result stays in it.
pub fn safe_destination(install_dir: &Path, name: &str) -> InstallResult<PathBuf> {
    let root = install_dir.canonicalize()?;
    let dest = root.join(name);
    if !dest.starts_with(&root) {
        return Err(InstallError::InvalidDestination(dest));
    }
    Ok(dest)
}

/// Extract the member named `exec_name` into `install_dir`, mark it
/// executable and return its path.
///
/// Members whose last segment matches but that carry directory components
/// are rejected outright rather than skipped.
pub fn extract_executable(
    archive_path: &Path,
    install_dir: &Path,
    exec_name: &str,
) -> InstallResult<PathBuf> {
    let mut archive = ZipArchive::new(File::open(archive_path)?)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if base_name(&name) != exec_name {
            continue;
        }

        validate_member_name(&name)?;
        let dest = safe_destination(install_dir, &name)?;

        debug!("Extracting {} to {:?}", name, dest);
        let mut out = File::create(&dest)?;
        io::copy(&mut entry, &mut out)?;
        drop(out);

        set_executable(&dest)?;
        return Ok(dest);
    }

    Err(InstallError::ExecutableNotFound(exec_name.to_string()))
}

#[cfg(unix)]
pub(crate) fn set_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
pub(crate) fn set_executable(path: &Path) -> io::Result<()> {
    fs::metadata(path).map(|_| ())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    use super::*;

    fn write_zip(path: &Path, members: &[(&str, &[u8])]) {
        let mut writer = ZipWriter::new(File::create(path).unwrap());
        let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, data) in members {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_validate_member_name() {
        assert!(validate_member_name("terraform").is_ok());
        assert!(validate_member_name("terraform.exe").is_ok());
        for bad in ["", ".", "..", "../terraform", "bin/terraform", "..\\terraform", "/etc/terraform"] {
            assert!(
                matches!(validate_member_name(bad), Err(InstallError::UnsafeArchiveMember(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_extract_executable() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("t.zip");
        write_zip(&archive, &[("LICENSE.txt", b"MIT"), ("terraform", b"#!/bin/sh\necho hi\n")]);

        let install = dir.path().join("bin");
        fs::create_dir_all(&install).unwrap();

        let path = extract_executable(&archive, &install, "terraform").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"#!/bin/sh\necho hi\n");
        assert!(!install.join("LICENSE.txt").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    /// Traversal members fail the extraction and write nothing outside the install directory.
    #[test]
    fn test_traversal_member_rejected() {
        for member in ["../terraform", "nested/../../terraform", "..\\terraform", "sub/terraform"] {
            let dir = tempfile::tempdir().unwrap();
            let archive = dir.path().join("evil.zip");
            write_zip(&archive, &[(member, b"pwned")]);

            let install = dir.path().join("install");
            fs::create_dir_all(&install).unwrap();

            let err = extract_executable(&archive, &install, "terraform").unwrap_err();
            assert!(
                matches!(err, InstallError::UnsafeArchiveMember(_)),
                "{member}: unexpected {err:?}"
            );
            assert!(!dir.path().join("terraform").exists());
            assert_eq!(fs::read_dir(&install).unwrap().count(), 0);
        }
    }

    #[test]
    fn test_missing_executable() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("t.zip");
        write_zip(&archive, &[("README.md", b"nothing here")]);

        let err = extract_executable(&archive, dir.path(), "terraform").unwrap_err();
        assert!(matches!(err, InstallError::ExecutableNotFound(_)));
    }

    #[test]
    fn test_safe_destination_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let dest = safe_destination(dir.path(), "terraform").unwrap();
        assert!(dest.starts_with(dir.path().canonicalize().unwrap()));
    }
}
