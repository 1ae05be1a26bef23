//! Filesystem helpers shared across the build pipeline.
//!
//! Generated scripts are executable (0744); copied payload files (RPMs, image
//! work copies) are not (0644). Everything that shells out writes its output
//! to a timestamped log file under the build directory, created here.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

/// Permissions (rwxr--r--) for generated scripts.
pub const EXECUTABLE_PERMS: u32 = 0o744;

/// Permissions (rw-r--r--) for copied payload files.
pub const NON_EXECUTABLE_PERMS: u32 = 0o644;

/// Copy a single file, giving the destination the provided mode.
///
/// The destination's parent directory must already exist; the resolver always
/// creates its directory layout before copying into it.
pub fn copy_file(src: &Path, dest: &Path, mode: u32) -> Result<()> {
    fs::copy(src, dest)
        .with_context(|| format!("copying {} to {}", src.display(), dest.display()))?;
    fs::set_permissions(dest, fs::Permissions::from_mode(mode))
        .with_context(|| format!("setting permissions on {}", dest.display()))?;
    Ok(())
}

/// Write a file and set its mode in one step.
pub fn write_file_with_mode(path: &Path, content: &str, mode: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("setting permissions on {}", path.display()))?;
    Ok(())
}

/// Recursively copy a directory, preserving symlinks and file permissions.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    if !dst.exists() {
        fs::create_dir_all(dst)
            .with_context(|| format!("creating directory {}", dst.display()))?;
    }

    for entry in
        fs::read_dir(src).with_context(|| format!("reading directory {}", src.display()))?
    {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        let file_type = entry.file_type()?;
        if file_type.is_symlink() {
            let target = fs::read_link(&src_path)?;
            if dst_path.exists() || dst_path.is_symlink() {
                fs::remove_file(&dst_path)?;
            }
            std::os::unix::fs::symlink(&target, &dst_path)?;
        } else if file_type.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path).with_context(|| {
                format!(
                    "copying {} to {}",
                    src_path.display(),
                    dst_path.display()
                )
            })?;
        }
    }

    Ok(())
}

/// UTC timestamp used in log file names and run ids (`YYYYMMDDTHHMMSSZ`).
pub fn timestamp() -> String {
    let now = OffsetDateTime::now_utc();
    format!(
        "{:04}{:02}{:02}T{:02}{:02}{:02}Z",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

/// Create `<dir>/<prefix>-<stamp>.log` and return the open handle plus its path.
///
/// Logs are retained without rotation; cleanup is the caller's problem.
pub fn create_log_file(dir: &Path, prefix: &str) -> Result<(File, PathBuf)> {
    let path = dir.join(format!("{}-{}.log", prefix, timestamp()));
    let file =
        File::create(&path).with_context(|| format!("creating log file {}", path.display()))?;
    tracing::debug!("log file created: {}", path.display());
    Ok((file, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_file_sets_mode() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src.rpm");
        let dest = temp.path().join("dest.rpm");
        fs::write(&src, b"payload").unwrap();

        copy_file(&src, &dest, NON_EXECUTABLE_PERMS).unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"payload");
        let mode = fs::metadata(&dest).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, NON_EXECUTABLE_PERMS);
    }

    #[test]
    fn test_write_file_with_mode_executable() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("scripts/run.sh");

        write_file_with_mode(&path, "#!/bin/bash\n", EXECUTABLE_PERMS).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, EXECUTABLE_PERMS);
    }

    #[test]
    fn test_copy_dir_recursive() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("a.txt"), "a").unwrap();
        fs::write(src.join("nested/b.txt"), "b").unwrap();
        std::os::unix::fs::symlink("a.txt", src.join("link")).unwrap();

        let dst = temp.path().join("dst");
        copy_dir_recursive(&src, &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("a.txt")).unwrap(), "a");
        assert_eq!(fs::read_to_string(dst.join("nested/b.txt")).unwrap(), "b");
        assert!(dst.join("link").is_symlink());
    }

    #[test]
    fn test_create_log_file_name() {
        let temp = TempDir::new().unwrap();
        let (_file, path) = create_log_file(temp.path(), "createrepo").unwrap();

        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("createrepo-"));
        assert!(name.ends_with(".log"));
        assert!(path.exists());
    }
}
