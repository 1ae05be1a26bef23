//! RPM repository creation.
//!
//! Takes the resolver's extracted package cache and turns it into a
//! repository the package manager at image runtime can consume over
//! `file://` with no network access.

use anyhow::{Context, Result};
use std::path::Path;

use crate::error::ResolverError;
use crate::fileio;
use crate::process::Cmd;
use crate::resolver::Resolver;

const CREATEREPO_EXEC: &str = "/usr/bin/createrepo";
const CREATEREPO_LOG_PREFIX: &str = "createrepo";
const REPODATA_DIR_NAME: &str = "repodata";

/// Resolve the package request into `out_dir` and generate repository
/// metadata over the result.
///
/// Returns the repository path and the list of packages ready to be
/// installed by the first-boot script.
pub fn create(
    resolver: &mut Resolver,
    out_dir: &Path,
    log_dir: &Path,
) -> Result<(std::path::PathBuf, Vec<String>)> {
    let (repo_path, packages) = resolver
        .resolve(out_dir)
        .context("resolving package dependencies")?;

    tracing::info!("Creating RPM repository from '{}'", repo_path.display());
    create_rpm_repo(&repo_path, log_dir)?;
    tracing::info!("RPM repository created successfully");

    Ok((repo_path, packages))
}

/// Run the repository metadata generator against `repo_dir`.
///
/// Generator output goes to a timestamped log under `log_dir`; after a
/// successful run `repo_dir` must contain a `repodata/` directory.
pub fn create_rpm_repo(repo_dir: &Path, log_dir: &Path) -> Result<()> {
    create_rpm_repo_with(CREATEREPO_EXEC, repo_dir, log_dir)
}

fn create_rpm_repo_with(exec: &str, repo_dir: &Path, log_dir: &Path) -> Result<()> {
    let (log, log_path) = fileio::create_log_file(log_dir, CREATEREPO_LOG_PREFIX)?;

    let result = Cmd::new(exec)
        .arg_path(repo_dir)
        .log_to(log)
        .allow_fail()
        .run()
        .context("executing createrepo")?;

    if !result.success() {
        return Err(ResolverError::RepoMetadataFailed { log: log_path }.into());
    }

    if !repo_dir.join(REPODATA_DIR_NAME).is_dir() {
        return Err(ResolverError::RepoMetadataFailed { log: log_path }.into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_create_rpm_repo_failure_points_at_log() {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("rpm-repo");
        fs::create_dir_all(&repo).unwrap();

        let err = create_rpm_repo_with("false", &repo, temp.path()).unwrap_err();

        match err.downcast_ref::<ResolverError>() {
            Some(ResolverError::RepoMetadataFailed { log }) => {
                assert!(log.exists());
                let name = log.file_name().unwrap().to_string_lossy().into_owned();
                assert!(name.starts_with("createrepo-"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_create_rpm_repo_requires_repodata() {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("rpm-repo");
        fs::create_dir_all(&repo).unwrap();

        // Generator exits zero but produces nothing.
        let err = create_rpm_repo_with("true", &repo, temp.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ResolverError>(),
            Some(ResolverError::RepoMetadataFailed { .. })
        ));
    }

    #[test]
    fn test_create_rpm_repo_accepts_existing_repodata() {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("rpm-repo");
        fs::create_dir_all(repo.join("repodata")).unwrap();

        create_rpm_repo_with("true", &repo, temp.path()).unwrap();
    }
}
