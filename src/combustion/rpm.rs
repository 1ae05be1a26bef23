//! RPM combustion component.
//!
//! Decides whether package configuration is present at all, whether it needs
//! dependency resolution, and emits the first-boot install script. Two paths:
//!
//! - **Resolved**: named packages and/or extra repositories go through the
//!   resolver; the combustion dir receives a generated repository and the
//!   script installs from it.
//! - **Standalone**: loose local RPMs with no named packages and no extra
//!   repositories are copied into the combustion dir as-is and installed by
//!   filename, no repository involved.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::error::ResolverError;
use crate::fileio;
use crate::image::ImageContext;
use crate::repo;
use crate::resolver::Resolver;

use super::is_component_configured;

/// Directory under the image config dir holding the user's RPM files.
const USER_RPMS_DIR: &str = "rpms";

/// Script name; the numeric prefix fixes its slot in combustion's ordering.
const RPM_INSTALL_SCRIPT_NAME: &str = "10-rpm-install.sh";

/// Where combustion exposes its config directory in the booted image.
pub const COMBUSTION_BASE_PATH: &str = "/dev/shm/combustion/config";

/// Configure the RPM component.
///
/// Returns the name of the emitted script, or `None` when no package
/// configuration is present and the component is skipped.
pub fn configure_rpms(ctx: &ImageContext) -> Result<Option<String>> {
    if skip_rpm_configure(ctx) {
        tracing::info!("Skipping RPM component. Configuration is not provided");
        return Ok(None);
    }

    tracing::info!("Configuring RPM component...");
    let packages = &ctx.definition.operating_system.packages;

    let (repo_name, install_list) = if is_resolution_needed(ctx) {
        tracing::info!("Beginning package dependency resolution...");

        let rpm_dir = ctx.component_dir(USER_RPMS_DIR);
        let local_rpm_dir = rpm_dir.is_dir().then_some(rpm_dir);

        let mut resolver = Resolver::new(
            &ctx.build_dir,
            &ctx.base_image_path(),
            ctx.definition.image.image_type,
            packages,
            local_rpm_dir.as_deref(),
        )
        .context("initializing package resolver")?;

        let (repo_path, pkgs) = repo::create(&mut resolver, &ctx.combustion_dir, &ctx.build_dir)
            .context("creating rpm repository")?;

        let repo_name = repo_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        (repo_name, pkgs)
    } else {
        let rpms = copy_standalone_rpms(&ctx.component_dir(USER_RPMS_DIR), &ctx.combustion_dir)
            .context("copying standalone rpm files")?;
        (String::new(), rpms)
    };

    let script = write_rpm_script(&ctx.combustion_dir, &repo_name, &install_list)
        .with_context(|| format!("writing the RPM install script {RPM_INSTALL_SCRIPT_NAME}"))?;

    Ok(Some(script))
}

/// Nothing to do when there are no named packages, no extra repositories,
/// and no local RPM directory.
fn skip_rpm_configure(ctx: &ImageContext) -> bool {
    let pkg = &ctx.definition.operating_system.packages;

    !is_component_configured(ctx, USER_RPMS_DIR)
        && pkg.pkg_list.is_empty()
        && pkg.additional_repos.is_empty()
}

/// Resolution is needed whenever named packages or extra repositories are
/// present; a local RPM directory alone takes the standalone path.
fn is_resolution_needed(ctx: &ImageContext) -> bool {
    let pkg = &ctx.definition.operating_system.packages;

    !pkg.pkg_list.is_empty() || !pkg.additional_repos.is_empty()
}

/// Copy `*.rpm` files into the combustion dir, returning extension-stripped
/// basenames in alphabetical order.
fn copy_standalone_rpms(rpm_source_dir: &Path, combustion_dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();

    for entry in fs::read_dir(rpm_source_dir)
        .with_context(|| format!("reading RPM source dir {}", rpm_source_dir.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if Path::new(&name).extension().and_then(|e| e.to_str()) != Some("rpm") {
            continue;
        }
        names.push(name);
    }
    names.sort();

    let mut stripped = Vec::with_capacity(names.len());
    for name in &names {
        fileio::copy_file(
            &rpm_source_dir.join(name),
            &combustion_dir.join(name),
            fileio::NON_EXECUTABLE_PERMS,
        )?;
        stripped.push(
            Path::new(name)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| name.clone()),
        );
    }

    Ok(stripped)
}

/// Write the first-boot install script into the combustion dir.
///
/// With a repository: register it from the combustion config path, install
/// restricted to it, then deregister. Without one (standalone mode): a single
/// install line by filename.
fn write_rpm_script(
    combustion_dir: &Path,
    repo_name: &str,
    install_list: &[String],
) -> Result<String> {
    if install_list.is_empty() {
        return Err(ResolverError::EmptyInstallList.into());
    }

    let script = render_rpm_script(repo_name, install_list);
    fileio::write_file_with_mode(
        &combustion_dir.join(RPM_INSTALL_SCRIPT_NAME),
        &script,
        fileio::EXECUTABLE_PERMS,
    )?;

    Ok(RPM_INSTALL_SCRIPT_NAME.to_string())
}

fn render_rpm_script(repo_name: &str, install_list: &[String]) -> String {
    let mut script = String::from("#!/bin/bash\nset -euo pipefail\n\n");
    let package_args = install_list.join(" ");

    if repo_name.is_empty() {
        script.push_str(&format!(
            "zypper --no-gpg-checks install -y --force-resolution \
             --auto-agree-with-licenses {package_args}\n"
        ));
    } else {
        script.push_str(&format!(
            "zypper ar file://{COMBUSTION_BASE_PATH}/{repo_name} {repo_name}\n"
        ));
        script.push_str(&format!(
            "zypper --no-gpg-checks install -r {repo_name} -y --force-resolution \
             --auto-agree-with-licenses {package_args}\n"
        ));
        script.push_str(&format!("zypper rr {repo_name}\n"));
    }

    script
}
