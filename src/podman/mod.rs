//! Narrow adapter over a local podman engine.
//!
//! The resolver needs exactly four capabilities from a container runtime:
//! import a root filesystem tarball as an image, build an image from a
//! context directory, start a container, and copy a path out of it. Anything
//! OCI-compatible that can stand behind this surface would do; podman is what
//! ships on the supported hosts.
//!
//! `Podman::new` spawns `podman system service` as a detached child listening
//! on the well-known socket. The service is never stopped explicitly; it has
//! no inactivity timeout and exits with the build process.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::error::ResolverError;
use crate::fileio;
use crate::process::Cmd;

/// Engine API socket. Only this module depends on it.
pub const PODMAN_SOCKET: &str = "unix:///run/podman/podman.sock";

/// Build recipe file expected at the root of every build context.
pub const DOCKERFILE_NAME: &str = "Dockerfile";

const PODMAN_EXEC: &str = "/usr/bin/podman";
const PODMAN_DIR_NAME: &str = "podman";
const SERVICE_LOG_PREFIX: &str = "podman-system-service";
const BUILD_LOG_PREFIX: &str = "podman-image-build";
const SOCKET_WAIT: Duration = Duration::from_secs(10);

pub struct Podman {
    socket: String,
    work_dir: PathBuf,
}

impl Podman {
    /// Start the engine API service and wait for its socket.
    ///
    /// Service output goes to a timestamped log under `<build_dir>/podman/`.
    pub fn new(build_dir: &Path) -> Result<Self> {
        let work_dir = build_dir.join(PODMAN_DIR_NAME);
        fs::create_dir_all(&work_dir)
            .with_context(|| format!("creating {} dir", work_dir.display()))?;

        let podman = Self {
            socket: PODMAN_SOCKET.to_string(),
            work_dir,
        };
        podman.start_api_service()?;
        podman.wait_for_socket(SOCKET_WAIT)?;

        Ok(podman)
    }

    fn start_api_service(&self) -> Result<()> {
        let (log, log_path) = fileio::create_log_file(&self.work_dir, SERVICE_LOG_PREFIX)?;
        let err_log = log
            .try_clone()
            .context("duplicating service log handle")?;

        Command::new(PODMAN_EXEC)
            .args(["--log-level=debug", "system", "service", "-t", "0"])
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(err_log))
            .spawn()
            .map_err(|err| {
                ResolverError::RuntimeUnavailable(format!(
                    "starting podman system service: {err}"
                ))
            })?;

        tracing::debug!("podman system service started, logging to {}", log_path.display());
        Ok(())
    }

    fn wait_for_socket(&self, timeout: Duration) -> Result<()> {
        let socket_path = Path::new(self.socket.trim_start_matches("unix://"));
        let deadline = Instant::now() + timeout;

        while Instant::now() < deadline {
            if socket_path.exists() {
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        Err(ResolverError::RuntimeUnavailable(format!(
            "socket {} did not appear within {}s",
            socket_path.display(),
            timeout.as_secs()
        ))
        .into())
    }

    /// Register a root filesystem tarball as an image under `reference`.
    pub fn import(&self, tarball: &Path, reference: &str) -> Result<()> {
        tracing::info!("Importing {} as '{}'", tarball.display(), reference);

        let result = Cmd::new(PODMAN_EXEC)
            .args(["--url", self.socket.as_str(), "import"])
            .arg_path(tarball)
            .arg(reference)
            .allow_fail()
            .run()
            .context("executing podman import")?;

        if !result.success() {
            return Err(ResolverError::ImportFailed {
                tarball: tarball.to_path_buf(),
                reason: result.stderr.trim().to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// Build an image from the `Dockerfile` at the root of `context_dir`.
    ///
    /// Build output is not propagated; it goes to a timestamped log whose
    /// path travels with the error on failure.
    pub fn build(&self, context_dir: &Path, reference: &str) -> Result<()> {
        let (log, log_path) = fileio::create_log_file(&self.work_dir, BUILD_LOG_PREFIX)?;
        tracing::info!(
            "Building image '{}' from {}, logging to {}",
            reference,
            context_dir.display(),
            log_path.display()
        );

        let result = Cmd::new(PODMAN_EXEC)
            .args(["--url", self.socket.as_str(), "build", "--file", DOCKERFILE_NAME, "--tag", reference])
            .arg_path(context_dir)
            .log_to(log)
            .allow_fail()
            .run()
            .context("executing podman build")?;

        if !result.success() {
            return Err(ResolverError::BuildFailed { log: log_path }.into());
        }

        Ok(())
    }

    /// Create and start a container from `reference`, returning its id.
    ///
    /// Does not wait for the container; the caller only needs it to exist so
    /// its filesystem can be copied out.
    pub fn run(&self, reference: &str) -> Result<String> {
        let result = Cmd::new(PODMAN_EXEC)
            .args(["--url", self.socket.as_str(), "run", "--detach", reference])
            .allow_fail()
            .run()
            .context("executing podman run")?;

        if !result.success() {
            return Err(ResolverError::RunFailed {
                image: reference.to_string(),
                reason: result.stderr.trim().to_string(),
            }
            .into());
        }

        let id = result.stdout.trim().to_string();
        if id.is_empty() {
            return Err(ResolverError::RunFailed {
                image: reference.to_string(),
                reason: "engine did not report a container id".to_string(),
            }
            .into());
        }

        tracing::debug!("started container {}", id);
        Ok(id)
    }

    /// Copy `src` (a path inside `container`) into `dest` on the host.
    ///
    /// The engine streams a tar archive; it is staged to a file under the
    /// podman work dir and then extracted entry by entry.
    pub fn copy_out(&self, container: &str, src: &str, dest: &Path) -> Result<()> {
        fs::create_dir_all(dest)
            .with_context(|| format!("creating copy destination {}", dest.display()))?;

        let archive_path = self
            .work_dir
            .join(format!("copy-{}.tar", fileio::timestamp()));
        let archive = File::create(&archive_path)
            .with_context(|| format!("creating {}", archive_path.display()))?;

        let child = Command::new(PODMAN_EXEC)
            .args(["--url", self.socket.as_str(), "cp"])
            .arg(format!("{container}:{src}"))
            .arg("-")
            .stdout(Stdio::from(archive))
            .stderr(Stdio::piped())
            .spawn()
            .context("executing podman cp")?;
        let output = child.wait_with_output().context("waiting for podman cp")?;

        if !output.status.success() {
            return Err(ResolverError::CopyFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            )
            .into());
        }

        untar(&archive_path, dest)?;
        let _ = fs::remove_file(&archive_path);

        Ok(())
    }
}

/// Extract a tar archive into `dest`.
///
/// Directories and regular files are created with the mode from the archive
/// header; any other entry type aborts the copy.
fn untar(archive: &Path, dest: &Path) -> Result<()> {
    let reader =
        File::open(archive).with_context(|| format!("opening archive {}", archive.display()))?;
    let mut archive = tar::Archive::new(reader);

    for entry in archive.entries().context("reading archive")? {
        let mut entry = entry.context("reading archive entry")?;
        let rel = entry
            .path()
            .context("reading archive entry path")?
            .into_owned();
        let path = dest.join(rel);
        let mode = entry.header().mode().context("reading entry mode")?;

        match entry.header().entry_type() {
            tar::EntryType::Directory => {
                fs::create_dir_all(&path)
                    .with_context(|| format!("creating directory {}", path.display()))?;
                fs::set_permissions(&path, fs::Permissions::from_mode(mode))
                    .with_context(|| format!("setting permissions on {}", path.display()))?;
            }
            tar::EntryType::Regular => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("creating directory {}", parent.display()))?;
                }
                let mut out = File::create(&path)
                    .with_context(|| format!("creating file {}", path.display()))?;
                std::io::copy(&mut entry, &mut out)
                    .with_context(|| format!("writing {}", path.display()))?;
                fs::set_permissions(&path, fs::Permissions::from_mode(mode))
                    .with_context(|| format!("setting permissions on {}", path.display()))?;
            }
            other => {
                return Err(ResolverError::CopyFailed(format!(
                    "unexpected archive entry type {:?} for {}",
                    other,
                    path.display()
                ))
                .into());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn append_dir(builder: &mut tar::Builder<File>, name: &str, mode: u32) {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Directory);
        header.set_path(name).unwrap();
        header.set_size(0);
        header.set_mode(mode);
        header.set_cksum();
        builder.append(&header, std::io::empty()).unwrap();
    }

    fn append_file(builder: &mut tar::Builder<File>, name: &str, mode: u32, data: &[u8]) {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_path(name).unwrap();
        header.set_size(data.len() as u64);
        header.set_mode(mode);
        header.set_cksum();
        builder.append(&header, data).unwrap();
    }

    #[test]
    fn test_untar_applies_header_modes() {
        let temp = TempDir::new().unwrap();
        let archive_path = temp.path().join("cache.tar");

        let mut builder = tar::Builder::new(File::create(&archive_path).unwrap());
        append_dir(&mut builder, "rpm-repo", 0o755);
        append_file(&mut builder, "rpm-repo/vim-9.0.rpm", 0o640, b"rpm bytes");
        builder.finish().unwrap();

        let dest = temp.path().join("out");
        untar(&archive_path, &dest).unwrap();

        let dir_mode = fs::metadata(dest.join("rpm-repo"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(dir_mode & 0o777, 0o755);

        let file = dest.join("rpm-repo/vim-9.0.rpm");
        assert_eq!(fs::read(&file).unwrap(), b"rpm bytes");
        assert_eq!(fs::metadata(&file).unwrap().permissions().mode() & 0o777, 0o640);
    }

    #[test]
    fn test_untar_creates_missing_parents() {
        let temp = TempDir::new().unwrap();
        let archive_path = temp.path().join("cache.tar");

        let mut builder = tar::Builder::new(File::create(&archive_path).unwrap());
        append_file(&mut builder, "rpm-repo/local/sensor.rpm", 0o644, b"x");
        builder.finish().unwrap();

        let dest = temp.path().join("out");
        untar(&archive_path, &dest).unwrap();

        assert!(dest.join("rpm-repo/local/sensor.rpm").is_file());
    }

    #[test]
    fn test_untar_rejects_unexpected_entry_type() {
        let temp = TempDir::new().unwrap();
        let archive_path = temp.path().join("cache.tar");

        let mut builder = tar::Builder::new(File::create(&archive_path).unwrap());
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_path("rpm-repo/link").unwrap();
        header.set_link_name("target").unwrap();
        header.set_size(0);
        header.set_mode(0o777);
        header.set_cksum();
        builder.append(&header, std::io::empty()).unwrap();
        builder.finish().unwrap();

        let err = untar(&archive_path, &temp.path().join("out")).unwrap_err();
        let resolver_err = err.downcast_ref::<ResolverError>().unwrap();
        assert!(matches!(resolver_err, ResolverError::CopyFailed(_)));
    }
}
