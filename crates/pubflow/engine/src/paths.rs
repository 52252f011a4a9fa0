//! Live and staging file layout

use crate::config::PathsConfig;
use crate::error::{EngineError, EngineResult};
use pubflow_types::{checksum_file, ContentItemId, JobId, SelectionGroupId};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

const BACKUP_SUFFIX: &str = ".bak";

/// Resolves where files live
///
/// ```text
/// {root}/{item}/{purpose}.Content[{item}]{ext}
/// {root}/{item}/ReducedContent.SelGrp[{group}].Content[{item}]{ext}
/// {exchange}/{job}/
/// ```
#[derive(Debug, Clone)]
pub struct ContentPaths {
    content_item_root: PathBuf,
    exchange_root: PathBuf,
}

impl ContentPaths {
    pub fn new(content_item_root: impl Into<PathBuf>, exchange_root: impl Into<PathBuf>) -> Self {
        Self {
            content_item_root: content_item_root.into(),
            exchange_root: exchange_root.into(),
        }
    }

    pub fn from_config(config: &PathsConfig) -> Self {
        Self::new(&config.content_item_root, &config.exchange_root)
    }

    pub fn content_item_root(&self) -> &Path {
        &self.content_item_root
    }

    pub fn item_dir(&self, item: ContentItemId) -> PathBuf {
        self.content_item_root.join(item.as_uuid().to_string())
    }

    /// Live location of a related file
    pub fn live_file(&self, item: ContentItemId, purpose: &str, ext: &str) -> PathBuf {
        self.item_dir(item)
            .join(format!("{}.Content[{}]{}", purpose, item.as_uuid(), ext))
    }

    /// Live location of a selection group's reduced content
    pub fn reduced_file(&self, item: ContentItemId, group: SelectionGroupId, ext: &str) -> PathBuf {
        self.item_dir(item).join(format!(
            "ReducedContent.SelGrp[{}].Content[{}]{}",
            group.as_uuid(),
            item.as_uuid(),
            ext
        ))
    }

    /// Working directory of one job
    pub fn exchange_dir(&self, job: JobId) -> PathBuf {
        self.exchange_root.join(job.as_uuid().to_string())
    }
}

/// `{path}.bak`
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Live path a backup belongs to, if `path` is one
pub fn backup_target(path: &Path) -> Option<PathBuf> {
    let name = path.to_str()?;
    name.strip_suffix(BACKUP_SUFFIX)
        .filter(|live| !live.is_empty())
        .map(PathBuf::from)
}

/// Extension including the leading dot, or empty
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default()
}

/// Checksum a file on the blocking pool
pub async fn hash_file(path: &Path) -> EngineResult<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || checksum_file(path))
        .await
        .map_err(|e| EngineError::Io(std::io::Error::other(e.to_string())))?
        .map_err(EngineError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_live_names() {
        let item = ContentItemId::from_uuid(Uuid::nil());
        let group = SelectionGroupId::from_uuid(Uuid::nil());
        let paths = ContentPaths::new("/live", "/exchange");
        let nil = Uuid::nil();

        assert_eq!(
            paths.live_file(item, "mastercontent", ".json"),
            PathBuf::from(format!("/live/{nil}/mastercontent.Content[{nil}].json"))
        );
        assert_eq!(
            paths.reduced_file(item, group, ".json"),
            PathBuf::from(format!(
                "/live/{nil}/ReducedContent.SelGrp[{nil}].Content[{nil}].json"
            ))
        );
    }

    #[test]
    fn test_backup_paths() {
        let live = Path::new("/live/a/thumbnail.Content[x].png");
        let bak = backup_path(live);
        assert_eq!(bak, PathBuf::from("/live/a/thumbnail.Content[x].png.bak"));
        assert_eq!(backup_target(&bak).as_deref(), Some(live));
        assert_eq!(backup_target(live), None);
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of(Path::new("a/b.json")), ".json");
        assert_eq!(extension_of(Path::new("a/b")), "");
    }
}
