//! Infrastructure for building customized bootable edge images.
//!
//! The builder takes a user's image definition plus a base OS image (ISO or
//! RAW) and assembles a combustion configuration directory that is injected
//! into the image and executed on first boot. The core of the crate is the
//! package dependency resolver:
//!
//! - **Podman adapter** - the narrow capability set the resolver needs from
//!   a local container engine (import, build, run, copy-out)
//! - **Resolver** - converts the base image into an ephemeral container
//!   image, runs the package manager in download-only mode inside it, and
//!   harvests the cache as an offline-installable repository
//! - **Repository creation** - metadata generation over the harvested cache
//! - **Combustion components** - the RPM component that wires resolution
//!   (or the standalone local-RPM path) into the first-boot install script
//!
//! # Architecture
//!
//! ```text
//! image definition + base image + optional local RPMs
//!     │
//!     ├── resolver: convert base image → import as container image
//!     ├── resolver: stage build context (recipe + side-loaded RPMs)
//!     ├── podman:   build, run, copy out the package cache
//!     ├── repo:     createrepo over the extracted cache
//!     └── combustion: first-boot install script into the combustion dir
//! ```
//!
//! Dependency resolution itself is delegated to the OS package manager
//! running inside a container that matches the target image; this crate never
//! interprets repository metadata on its own.

pub mod combustion;
pub mod error;
pub mod fileio;
pub mod image;
pub mod podman;
pub mod preflight;
pub mod process;
pub mod repo;
pub mod resolver;

pub use error::ResolverError;
pub use image::{ImageContext, ImageDefinition, ImageKind, Packages};
pub use podman::Podman;
pub use process::{ensure_exists, Cmd, CommandResult};
pub use resolver::Resolver;
