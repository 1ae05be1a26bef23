//! Combustion configuration components.
//!
//! Each component inspects the image context, decides whether its
//! configuration is present, and writes its artifacts plus a numbered script
//! into the combustion directory. Only the RPM component lives here; users,
//! systemd, and the other components are assembled elsewhere.

pub mod rpm;

use crate::image::ImageContext;

/// A component is configured when its directory exists under the image
/// configuration dir.
pub(crate) fn is_component_configured(ctx: &ImageContext, component_dir: &str) -> bool {
    ctx.component_dir(component_dir).is_dir()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::parse_definition;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_is_component_configured() {
        let temp = TempDir::new().unwrap();
        let definition = parse_definition(
            r#"
            api_version = "1.0"

            [image]
            image_type = "iso"
            base_image = "base.iso"
            output_image_name = "edge.iso"
        "#,
        )
        .unwrap();
        let ctx =
            ImageContext::new(temp.path(), &temp.path().join("build"), definition).unwrap();

        assert!(!is_component_configured(&ctx, "rpms"));
        fs::create_dir(temp.path().join("rpms")).unwrap();
        assert!(is_component_configured(&ctx, "rpms"));
    }
}
