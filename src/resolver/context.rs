//! Build context staging for the resolver image.
//!
//! Assembles the directory handed to the container build: the recipe plus
//! copies of any side-loaded RPM files. The recipe never installs into the
//! container's live root; it only populates the package manager's cache
//! directory, which is what gets harvested afterwards.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::error::ResolverError;
use crate::fileio;
use crate::image::Packages;
use crate::podman::DOCKERFILE_NAME;

use super::{
    install_manifest, Resolver, BASE_IMAGE_REF, LOCAL_RPM_DIR_IN_CONTAINER,
    PKG_CACHE_DIR_IN_CONTAINER,
};

/// Name of the side-loaded RPM directory inside the build context.
pub(crate) const LOCAL_RPM_CONTEXT_DIR_NAME: &str = "rpms";

impl Resolver<'_> {
    /// Populate the build context: staged RPMs (if any) and the recipe.
    pub(crate) fn stage_context(&self) -> Result<()> {
        self.stage_context_inner()
            .map_err(|err| anyhow::Error::from(ResolverError::StagingFailed(format!("{err:#}"))))
    }

    fn stage_context_inner(&self) -> Result<()> {
        let context_dir = self.workspace.build_context_dir();
        fs::create_dir_all(&context_dir)
            .with_context(|| format!("creating build context dir {}", context_dir.display()))?;

        if !self.rpm_file_names.is_empty() {
            let rpm_dir = self.local_rpm_dir.as_deref().context("local RPM dir unset")?;
            copy_rpms(rpm_dir, &self.workspace.local_rpm_subdir(), &self.rpm_file_names)?;
        }

        let manifest = install_manifest(self.packages, &self.rpm_file_names);
        let recipe = render_dockerfile(self.packages, &manifest, !self.rpm_file_names.is_empty());
        let recipe_path = context_dir.join(DOCKERFILE_NAME);
        fs::write(&recipe_path, recipe)
            .with_context(|| format!("writing {}", recipe_path.display()))?;

        Ok(())
    }
}

/// Copy the named RPM files into the context, non-executable.
fn copy_rpms(src_dir: &Path, dest_dir: &Path, names: &[String]) -> Result<()> {
    fs::create_dir_all(dest_dir)
        .with_context(|| format!("creating rpm dir {} in build context", dest_dir.display()))?;

    for name in names {
        fileio::copy_file(
            &src_dir.join(name),
            &dest_dir.join(name),
            fileio::NON_EXECUTABLE_PERMS,
        )?;
    }

    Ok(())
}

/// Render the resolver recipe.
///
/// Starting from the converted base image: optionally register with the
/// subscription service, add each extra repository, copy side-loaded RPMs in,
/// then run the package manager in download-only mode so the cache directory
/// ends up holding every requested package and its dependencies.
fn render_dockerfile(packages: &Packages, manifest: &[String], has_local_rpms: bool) -> String {
    let mut recipe = format!("FROM {BASE_IMAGE_REF}\n");

    if !packages.reg_code.is_empty() {
        recipe.push_str(&format!(
            "\nRUN suseconnect -r {}\nRUN zypper ref\n",
            packages.reg_code
        ));
    }

    for (idx, repo) in packages.additional_repos.iter().enumerate() {
        recipe.push_str(&format!(
            "\nRUN zypper ar --no-gpgcheck -f {} addrepo{}\n",
            repo,
            idx + 1
        ));
    }

    if has_local_rpms {
        recipe.push_str(&format!(
            "\nCOPY {LOCAL_RPM_CONTEXT_DIR_NAME} {LOCAL_RPM_DIR_IN_CONTAINER}\n"
        ));
    }

    recipe.push_str(&format!(
        "\nRUN zypper --pkg-cache-dir {} --gpg-auto-import-keys install -y --download-only \
         --force-resolution --auto-agree-with-licenses {}\n",
        PKG_CACHE_DIR_IN_CONTAINER,
        manifest.join(" ")
    ));

    if !packages.reg_code.is_empty() {
        recipe.push_str("\nRUN suseconnect -d\n");
    }

    recipe.push_str("\nCMD [\"/bin/bash\"]\n");
    recipe
}
