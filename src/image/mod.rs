//! Image definition and per-build context.

pub mod definition;

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub use definition::{parse_definition, Image, ImageDefinition, ImageKind, OperatingSystem, Packages};

/// Directory under the image configuration dir holding the base image file.
const IMAGES_DIR: &str = "images";

/// Subdirectory of the build dir whose contents are injected into the built
/// image and executed on first boot.
const COMBUSTION_DIR: &str = "combustion";

/// Everything a build needs to know about where things live.
///
/// `image_config_dir` is user-owned input and never written to. `build_dir`
/// is working space; `combustion_dir` is the output assembled inside it.
pub struct ImageContext {
    pub image_config_dir: PathBuf,
    pub build_dir: PathBuf,
    pub combustion_dir: PathBuf,
    pub definition: ImageDefinition,
}

impl ImageContext {
    /// Create a context, establishing the build and combustion directories.
    pub fn new(
        image_config_dir: &Path,
        build_dir: &Path,
        definition: ImageDefinition,
    ) -> Result<Self> {
        let combustion_dir = build_dir.join(COMBUSTION_DIR);
        fs::create_dir_all(&combustion_dir).with_context(|| {
            format!("creating combustion dir {}", combustion_dir.display())
        })?;

        Ok(Self {
            image_config_dir: image_config_dir.to_path_buf(),
            build_dir: build_dir.to_path_buf(),
            combustion_dir,
            definition,
        })
    }

    /// Path to the user-supplied base image file.
    pub fn base_image_path(&self) -> PathBuf {
        self.image_config_dir
            .join(IMAGES_DIR)
            .join(&self.definition.image.base_image)
    }

    /// Path to a component's configuration directory under the image config
    /// dir (e.g. `rpms/` for side-loaded packages).
    pub fn component_dir(&self, name: &str) -> PathBuf {
        self.image_config_dir.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_definition() -> ImageDefinition {
        parse_definition(
            r#"
            api_version = "1.0"

            [image]
            image_type = "iso"
            base_image = "base.iso"
            output_image_name = "edge.iso"
        "#,
        )
        .unwrap()
    }

    #[test]
    fn test_new_creates_directories() {
        let temp = TempDir::new().unwrap();
        let config_dir = temp.path().join("config");
        let build_dir = temp.path().join("build");
        fs::create_dir_all(&config_dir).unwrap();

        let ctx = ImageContext::new(&config_dir, &build_dir, sample_definition()).unwrap();

        assert!(ctx.combustion_dir.is_dir());
        assert_eq!(ctx.combustion_dir, build_dir.join("combustion"));
    }

    #[test]
    fn test_base_image_path() {
        let temp = TempDir::new().unwrap();
        let ctx = ImageContext::new(temp.path(), &temp.path().join("build"), sample_definition())
            .unwrap();

        assert_eq!(
            ctx.base_image_path(),
            temp.path().join("images").join("base.iso")
        );
    }
}
