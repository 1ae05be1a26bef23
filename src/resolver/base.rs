//! Base image conversion.
//!
//! Turns the user's bootable image file into a root filesystem tarball the
//! container engine can import. The loop-device and filesystem-extraction
//! logic lives in a templated shell script so it can be audited as a unit;
//! the orchestrator only stages inputs, runs it, and imports the result.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

use crate::error::ResolverError;
use crate::fileio;
use crate::image::ImageKind;
use crate::process::Cmd;

use super::{Resolver, BASE_IMAGE_REF};

const PREPARE_BASE_SCRIPT_NAME: &str = "prepare-base.sh";
const BASE_IMAGE_ARCHIVE_NAME: &str = "sle-micro-base.tar.gz";
const CONVERSION_LOG_NAME: &str = "prepare-base.log";

impl Resolver<'_> {
    /// Convert the base image and register it as [`BASE_IMAGE_REF`].
    ///
    /// The stage directory (work copy of the image, the conversion script,
    /// and the tarball it produces) is removed once the import has
    /// succeeded; the conversion log stays in the workspace root.
    pub(crate) fn convert_base(&self) -> Result<()> {
        self.stage_base_image()?;
        self.write_conversion_script()?;
        self.run_conversion_script()?;

        let tarball = self.workspace.base_image_stage_dir().join(BASE_IMAGE_ARCHIVE_NAME);
        self.podman
            .import(&tarball, BASE_IMAGE_REF)
            .context("importing the base image")?;

        let stage_dir = self.workspace.base_image_stage_dir();
        fs::remove_dir_all(&stage_dir)
            .with_context(|| format!("removing base image stage dir {}", stage_dir.display()))?;

        Ok(())
    }

    fn stage_base_image(&self) -> Result<()> {
        let stage_dir = self.workspace.base_image_stage_dir();
        fs::create_dir_all(&stage_dir)
            .with_context(|| format!("creating {} dir", stage_dir.display()))?;

        // The user's original image file is never touched.
        fileio::copy_file(
            &self.base_image_path,
            &self.base_image_copy_path(),
            fileio::NON_EXECUTABLE_PERMS,
        )
        .with_context(|| {
            format!(
                "creating work copy of image {} in {}",
                self.base_image_path.display(),
                stage_dir.display()
            )
        })?;

        Ok(())
    }

    fn write_conversion_script(&self) -> Result<()> {
        let script = render_conversion_script(
            self.base_image_kind,
            &self.workspace.base_image_stage_dir(),
            &self.base_image_copy_path(),
            BASE_IMAGE_ARCHIVE_NAME,
        );

        fileio::write_file_with_mode(
            &self.conversion_script_path(),
            &script,
            fileio::EXECUTABLE_PERMS,
        )
        .context("writing base image conversion script")
    }

    fn run_conversion_script(&self) -> Result<()> {
        let log_path = self.workspace.root().join(CONVERSION_LOG_NAME);
        let log = fs::File::create(&log_path)
            .with_context(|| format!("creating {}", log_path.display()))?;

        let result = Cmd::new(&self.conversion_script_path().to_string_lossy())
            .log_to(log)
            .allow_fail()
            .run()
            .context("executing base image conversion script")?;

        if !result.success() {
            return Err(ResolverError::BaseConversionFailed {
                image: self.base_image_path.clone(),
                reason: format!("script exited with {}, see {}", result.exit_code, log_path.display()),
            }
            .into());
        }

        Ok(())
    }

    fn base_image_copy_path(&self) -> PathBuf {
        let name = self
            .base_image_path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("base-image"));
        self.workspace.base_image_stage_dir().join(name)
    }

    fn conversion_script_path(&self) -> PathBuf {
        self.workspace
            .base_image_stage_dir()
            .join(PREPARE_BASE_SCRIPT_NAME)
    }
}

/// Render the conversion script for the given image kind.
///
/// ISO images carry their root filesystem as a squashfs on the medium; RAW
/// images carry it in the last partition of the disk.
fn render_conversion_script(
    kind: ImageKind,
    work_dir: &std::path::Path,
    image_path: &std::path::Path,
    archive_name: &str,
) -> String {
    let work_dir = work_dir.display();
    let image_path = image_path.display();

    match kind {
        ImageKind::Iso => format!(
            r#"#!/bin/bash
set -euo pipefail

WORK_DIR={work_dir}
IMG_PATH={image_path}

ISO_MOUNT=$WORK_DIR/iso-mount
ROOTFS_DIR=$WORK_DIR/rootfs

mkdir -p "$ISO_MOUNT" "$ROOTFS_DIR"

mount -o ro,loop "$IMG_PATH" "$ISO_MOUNT"
trap 'umount "$ISO_MOUNT"' EXIT

SQUASHFS_IMG=$(find "$ISO_MOUNT" -name '*.squashfs' | head -n 1)
unsquashfs -f -d "$ROOTFS_DIR" "$SQUASHFS_IMG"

cd "$ROOTFS_DIR"
tar -czf "$WORK_DIR/{archive_name}" .
"#
        ),
        ImageKind::Raw => format!(
            r#"#!/bin/bash
set -euo pipefail

WORK_DIR={work_dir}
IMG_PATH={image_path}

ROOT_MOUNT=$WORK_DIR/root-mount
mkdir -p "$ROOT_MOUNT"

LOOP_DEV=$(losetup -f --show -P "$IMG_PATH")
trap 'losetup -d "$LOOP_DEV"' EXIT

ROOT_PART=$(lsblk -nro NAME "$LOOP_DEV" | tail -n 1)
mount "/dev/$ROOT_PART" "$ROOT_MOUNT"
trap 'umount "$ROOT_MOUNT"; losetup -d "$LOOP_DEV"' EXIT

cd "$ROOT_MOUNT"
tar -czf "$WORK_DIR/{archive_name}" .
"#
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_render_iso_script() {
        let script = render_conversion_script(
            ImageKind::Iso,
            Path::new("/build/resolver/base-image"),
            Path::new("/build/resolver/base-image/base.iso"),
            BASE_IMAGE_ARCHIVE_NAME,
        );

        assert!(script.starts_with("#!/bin/bash"));
        assert!(script.contains("mount -o ro,loop"));
        assert!(script.contains("unsquashfs"));
        assert!(script.contains("sle-micro-base.tar.gz"));
        assert!(!script.contains("losetup"));
    }

    #[test]
    fn test_render_raw_script() {
        let script = render_conversion_script(
            ImageKind::Raw,
            Path::new("/build/resolver/base-image"),
            Path::new("/build/resolver/base-image/base.raw"),
            BASE_IMAGE_ARCHIVE_NAME,
        );

        assert!(script.contains("losetup -f --show -P"));
        assert!(script.contains("tar -czf"));
        assert!(!script.contains("unsquashfs"));
    }
}
