//! The reducer capability consumed by reduction runners

use crate::error::ReducerResult;
use async_trait::async_trait;
use pubflow_types::{ContentHierarchy, SelectionCriteria};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Output of a successful reduction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReducedArtifact {
    pub path: PathBuf,
    pub checksum: String,
    /// Hierarchy of the reduced artifact
    pub hierarchy: ContentHierarchy,
}

/// Transforms master artifacts
///
/// Implementations must return promptly with [`ReducerError::Canceled`]
/// once `cancel` fires.
///
/// [`ReducerError::Canceled`]: crate::ReducerError::Canceled
#[async_trait]
pub trait Reducer: Send + Sync {
    /// Discover every field and value in a master artifact
    async fn extract_hierarchy(
        &self,
        master: &Path,
        cancel: &CancellationToken,
    ) -> ReducerResult<ContentHierarchy>;

    /// Write a copy of `master` limited to `selection` at `output`. An
    /// empty selection keeps nothing.
    async fn reduce(
        &self,
        master: &Path,
        selection: &SelectionCriteria,
        output: &Path,
        cancel: &CancellationToken,
    ) -> ReducerResult<ReducedArtifact>;
}

/// `{dir}/{stem}.reduced{ext}` beside the master
pub fn reduced_output_path(master: &Path) -> PathBuf {
    let stem = master
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match master.extension() {
        Some(ext) => format!("{}.reduced.{}", stem, ext.to_string_lossy()),
        None => format!("{}.reduced", stem),
    };
    master.with_file_name(name)
}
