use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::image::error::ImageError;

/// The external build tool.
///
/// Each call blocks until the tool exits; a failed call surfaces the tool's
/// stderr and is never retried.
#[async_trait]
pub trait BuildTool: Send + Sync + 'static {
    /// Build one installable and return its `out` path.
    async fn build(&self, installable: &str) -> Result<PathBuf, ImageError>;

    /// Merge `flakes` into the profile at `link`; returns the profile's store path.
    async fn profile_install(&self, flakes: &[String], link: &Path) -> Result<PathBuf, ImageError>;

    /// Build the dependency closure of `flakes`, linked at `link`.
    async fn build_closure(&self, flakes: &[String], link: &Path) -> Result<PathBuf, ImageError>;

    /// Every store path `path` depends on, transitively.
    async fn requisites(&self, path: &Path) -> Result<Vec<PathBuf>, ImageError>;
}
