//! Image definition parsing.
//!
//! The definition is a TOML file describing the base image to customize and
//! the operating system configuration to apply. Only the pieces this builder
//! acts on are modelled; unknown keys are rejected so typos surface at parse
//! time rather than as silently-skipped configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Format of the user-supplied base image file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Iso,
    Raw,
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageKind::Iso => write!(f, "iso"),
            ImageKind::Raw => write!(f, "raw"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageDefinition {
    pub api_version: String,
    pub image: Image,
    #[serde(default)]
    pub operating_system: OperatingSystem,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Image {
    pub image_type: ImageKind,
    pub base_image: String,
    pub output_image_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperatingSystem {
    #[serde(default)]
    pub packages: Packages,
}

/// The user's package request.
///
/// At least one of `pkg_list`, `additional_repos`, or a populated local RPM
/// directory must be present for the RPM component to do anything; the
/// component checks this, not the parser.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Packages {
    #[serde(default)]
    pub pkg_list: Vec<String>,
    #[serde(default)]
    pub additional_repos: Vec<String>,
    #[serde(default)]
    pub reg_code: String,
}

pub fn parse_definition(data: &str) -> Result<ImageDefinition> {
    toml::from_str(data).context("could not parse the image definition")
}
