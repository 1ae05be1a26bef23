//! Package dependency resolver.
//!
//! Dependency resolution has to happen inside an environment that matches the
//! target image's operating system: repository metadata, vendor priorities,
//! and the installed-RPM database all hang off the OS identity. The resolver
//! therefore converts the base image into an importable container image, runs
//! the package manager in download-only mode inside a container built from
//! it, and harvests the populated cache as the resolved repository.
//!
//! The pipeline is strictly linear: stage workspace, convert base image,
//! stage build context, build, run, copy out. The first error aborts the
//! build and leaves the workspace on disk for inspection; on success the
//! workspace is removed.

pub mod base;
pub mod context;

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::ResolverError;
use crate::image::{ImageKind, Packages};
use crate::podman::Podman;
use crate::process::ensure_exists;

/// Reference the converted base image is registered under. Fixed, so the
/// resolver recipe is independent of the user's image filename.
pub const BASE_IMAGE_REF: &str = "slemicro";

/// Reference for the resolver image built on top of the base.
pub const RESOLVER_IMAGE_REF: &str = "pkg-resolver";

/// Cache directory the package manager populates inside the resolver
/// container. Its basename doubles as the output repository directory name.
pub const PKG_CACHE_DIR_IN_CONTAINER: &str = "/tmp/rpm-repo";

/// Destination of side-loaded RPM files inside the resolver container.
pub const LOCAL_RPM_DIR_IN_CONTAINER: &str = "/tmp/rpm-repo/local";

const RESOLVER_DIR_NAME: &str = "resolver";
const RPM_REPO_DIR_NAME: &str = "rpm-repo";

/// Scratch layout for a single resolver invocation, rooted under the build
/// directory. Exclusively owned; nothing else writes here.
pub struct ResolverWorkspace {
    root: PathBuf,
}

impl ResolverWorkspace {
    fn new(build_dir: &Path) -> Result<Self> {
        let root = build_dir.join(RESOLVER_DIR_NAME);
        fs::create_dir_all(&root)
            .with_context(|| format!("creating resolver dir {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Holds the work copy of the base image and the conversion script
    /// output. Removed as soon as the tarball has been imported.
    pub fn base_image_stage_dir(&self) -> PathBuf {
        self.root.join("base-image")
    }

    /// Context directory handed to the container build.
    pub fn build_context_dir(&self) -> PathBuf {
        self.root.join("build")
    }

    /// Staged copies of the user's local RPM files, inside the context.
    pub fn local_rpm_subdir(&self) -> PathBuf {
        self.build_context_dir().join(context::LOCAL_RPM_CONTEXT_DIR_NAME)
    }
}

pub struct Resolver<'a> {
    workspace: ResolverWorkspace,
    base_image_path: PathBuf,
    base_image_kind: ImageKind,
    packages: &'a Packages,
    local_rpm_dir: Option<PathBuf>,
    podman: Podman,
    rpm_file_names: Vec<String>,
}

impl<'a> Resolver<'a> {
    /// Set up the resolver: start the container engine client and establish
    /// the workspace. Nothing is built yet.
    pub fn new(
        build_dir: &Path,
        base_image_path: &Path,
        base_image_kind: ImageKind,
        packages: &'a Packages,
        local_rpm_dir: Option<&Path>,
    ) -> Result<Self> {
        ensure_exists(base_image_path, "base image")?;

        let podman = Podman::new(build_dir).context("starting podman client")?;
        let workspace = ResolverWorkspace::new(build_dir)?;

        Ok(Self {
            workspace,
            base_image_path: base_image_path.to_path_buf(),
            base_image_kind,
            packages,
            local_rpm_dir: local_rpm_dir.map(Path::to_path_buf),
            podman,
            rpm_file_names: Vec::new(),
        })
    }

    /// Resolve the package request into an offline-installable repository
    /// under `out_dir`.
    ///
    /// Returns the repository path (`<out_dir>/rpm-repo`) and the list of
    /// package identifiers the first-boot script should install.
    pub fn resolve(&mut self, out_dir: &Path) -> Result<(PathBuf, Vec<String>)> {
        self.rpm_file_names = list_local_rpms(self.local_rpm_dir.as_deref())?;
        ensure_request_nonempty(self.packages, &self.rpm_file_names)?;

        self.convert_base()
            .context("building base resolver image")?;

        self.stage_context()
            .context("generating context for the resolver image")?;

        self.podman
            .build(&self.workspace.build_context_dir(), RESOLVER_IMAGE_REF)
            .context("building resolver image")?;

        let id = self
            .podman
            .run(RESOLVER_IMAGE_REF)
            .with_context(|| format!("running container from resolver image {RESOLVER_IMAGE_REF}"))?;

        self.podman
            .copy_out(&id, PKG_CACHE_DIR_IN_CONTAINER, out_dir)
            .with_context(|| format!("copying resolved package cache to {}", out_dir.display()))?;

        let repo_dir = out_dir.join(RPM_REPO_DIR_NAME);
        verify_resolution(&repo_dir)?;

        let install_list = install_list(self.packages, &self.rpm_file_names);

        if let Err(err) = fs::remove_dir_all(self.workspace.root()) {
            tracing::warn!(
                "leaving resolver workspace {}: {}",
                self.workspace.root().display(),
                err
            );
        }

        Ok((repo_dir, install_list))
    }
}

/// A request with no named packages and no staged local RPMs would hand the
/// package manager an empty install manifest; the caller should have skipped
/// the resolver entirely.
fn ensure_request_nonempty(packages: &Packages, rpm_file_names: &[String]) -> Result<()> {
    if packages.pkg_list.is_empty() && rpm_file_names.is_empty() {
        return Err(ResolverError::EmptyRequest.into());
    }
    Ok(())
}

/// List `*.rpm` files directly inside `dir`, sorted by name.
///
/// Non-RPM files and subdirectories are skipped; staging is non-recursive.
fn list_local_rpms(dir: Option<&Path>) -> Result<Vec<String>> {
    let Some(dir) = dir else {
        return Ok(Vec::new());
    };

    let mut names = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("reading RPM source dir {}", dir.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if Path::new(&name).extension().and_then(|e| e.to_str()) == Some("rpm") {
            names.push(name);
        }
    }

    names.sort();
    Ok(names)
}

/// The list handed to the package manager inside the resolver container:
/// named packages first, then in-container paths to each side-loaded RPM.
fn install_manifest(packages: &Packages, rpm_file_names: &[String]) -> Vec<String> {
    let mut list = packages.pkg_list.clone();
    for name in rpm_file_names {
        list.push(format!("{LOCAL_RPM_DIR_IN_CONTAINER}/{name}"));
    }
    list
}

/// The list the first-boot script installs: named packages unchanged, then
/// side-loaded RPM basenames with the extension stripped.
fn install_list(packages: &Packages, rpm_file_names: &[String]) -> Vec<String> {
    let mut list = packages.pkg_list.clone();
    for name in rpm_file_names {
        let stripped = Path::new(name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.clone());
        list.push(stripped);
    }
    list
}

/// A copy that succeeded but yielded no package files means the package
/// manager ran trivially without populating its cache, which is almost
/// certainly a recipe error.
fn verify_resolution(repo_dir: &Path) -> Result<()> {
    if !repo_dir.is_dir() {
        return Err(ResolverError::EmptyResolution(repo_dir.to_path_buf()).into());
    }

    let has_files = WalkDir::new(repo_dir)
        .into_iter()
        .filter_map(Result::ok)
        .any(|entry| entry.file_type().is_file());

    if !has_files {
        return Err(ResolverError::EmptyResolution(repo_dir.to_path_buf()).into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn packages(names: &[&str]) -> Packages {
        Packages {
            pkg_list: names.iter().map(|s| s.to_string()).collect(),
            ..Packages::default()
        }
    }

    #[test]
    fn test_list_local_rpms_filters_and_sorts() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("zlib.rpm"), "z").unwrap();
        fs::write(temp.path().join("acl.rpm"), "a").unwrap();
        fs::write(temp.path().join("README.md"), "skip").unwrap();
        fs::create_dir(temp.path().join("nested.rpm")).unwrap();

        let names = list_local_rpms(Some(temp.path())).unwrap();
        assert_eq!(names, ["acl.rpm", "zlib.rpm"]);
    }

    #[test]
    fn test_list_local_rpms_without_dir() {
        assert!(list_local_rpms(None).unwrap().is_empty());
    }

    #[test]
    fn test_install_manifest_mixes_names_and_container_paths() {
        let pkgs = packages(&["nginx"]);
        let manifest = install_manifest(&pkgs, &["sensor.rpm".to_string()]);
        assert_eq!(manifest, ["nginx", "/tmp/rpm-repo/local/sensor.rpm"]);
    }

    #[test]
    fn test_install_list_strips_extension() {
        let pkgs = packages(&["vim", "curl"]);
        let list = install_list(&pkgs, &["pkgA.rpm".to_string(), "pkgB.rpm".to_string()]);
        assert_eq!(list, ["vim", "curl", "pkgA", "pkgB"]);
    }

    #[test]
    fn test_install_list_keeps_colliding_names() {
        let pkgs = packages(&["sensor"]);
        let list = install_list(&pkgs, &["sensor.rpm".to_string()]);
        assert_eq!(list, ["sensor", "sensor"]);
    }

    #[test]
    fn test_ensure_request_nonempty() {
        assert!(ensure_request_nonempty(&packages(&["vim"]), &[]).is_ok());
        assert!(ensure_request_nonempty(&packages(&[]), &["pkgA.rpm".to_string()]).is_ok());

        let err = ensure_request_nonempty(&packages(&[]), &[]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ResolverError>(),
            Some(ResolverError::EmptyRequest)
        ));
    }

    #[test]
    fn test_verify_resolution_missing_dir() {
        let temp = TempDir::new().unwrap();
        let err = verify_resolution(&temp.path().join("rpm-repo")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ResolverError>(),
            Some(ResolverError::EmptyResolution(_))
        ));
    }

    #[test]
    fn test_verify_resolution_empty_dir() {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("rpm-repo");
        fs::create_dir_all(repo.join("local")).unwrap();

        let err = verify_resolution(&repo).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ResolverError>(),
            Some(ResolverError::EmptyResolution(_))
        ));
    }

    #[test]
    fn test_verify_resolution_with_packages() {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("rpm-repo");
        fs::create_dir_all(&repo).unwrap();
        fs::write(repo.join("vim-9.0.x86_64.rpm"), "rpm").unwrap();

        assert!(verify_resolution(&repo).is_ok());
    }

    #[test]
    fn test_workspace_layout() {
        let temp = TempDir::new().unwrap();
        let workspace = ResolverWorkspace::new(temp.path()).unwrap();

        assert!(workspace.root().is_dir());
        assert_eq!(workspace.root(), temp.path().join("resolver"));
        assert_eq!(
            workspace.base_image_stage_dir(),
            temp.path().join("resolver/base-image")
        );
        assert_eq!(
            workspace.build_context_dir(),
            temp.path().join("resolver/build")
        );
        assert_eq!(
            workspace.local_rpm_subdir(),
            temp.path().join("resolver/build/rpms")
        );
    }
}
