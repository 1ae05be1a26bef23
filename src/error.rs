//! Failure taxonomy for the package resolution pipeline.
//!
//! Every variant is terminal for the current build; nothing in the pipeline
//! retries. Variants produced by logged subprocesses carry the log file path
//! so the user can go straight to the tool transcript.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("container runtime is unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("importing base image tarball {}: {}", .tarball.display(), .reason)]
    ImportFailed { tarball: PathBuf, reason: String },

    #[error("converting base image {}: {}", .image.display(), .reason)]
    BaseConversionFailed { image: PathBuf, reason: String },

    #[error("staging resolver build context: {0}")]
    StagingFailed(String),

    #[error("building resolver image, see {}", .log.display())]
    BuildFailed { log: PathBuf },

    #[error("running resolver container from {image}: {reason}")]
    RunFailed { image: String, reason: String },

    #[error("copying resolved package cache: {0}")]
    CopyFailed(String),

    #[error("resolution finished but produced no packages under {}", .0.display())]
    EmptyResolution(PathBuf),

    #[error("generating repository metadata, see {}", .log.display())]
    RepoMetadataFailed { log: PathBuf },

    #[error("package request is empty; resolution should have been skipped")]
    EmptyRequest,

    #[error("install list cannot be empty")]
    EmptyInstallList,
}
