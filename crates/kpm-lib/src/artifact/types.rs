use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Result of a pull: where the artifact landed and whether any bytes moved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactInfo {
    /// Concrete version, never LATEST
    pub version: String,
    pub sha1: Option<String>,
    pub repository_path: Option<String>,
    pub file_name: String,
    /// Set for plain files; archives only have a directory
    pub file_path: Option<PathBuf>,
    pub dir_path: PathBuf,
    pub size: u64,
    pub is_tgz: bool,
    /// Effective top-level directory after extraction
    pub bundle_dir: PathBuf,
    /// True when the cache proved the remote artifact unchanged
    pub skipped: bool,
}

/// Metadata returned by a backend `get_info` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedArtifact {
    pub version: String,
    pub sha1: Option<String>,
    pub repository_path: String,
    pub is_snapshot: bool,
}

impl ResolvedArtifact {
    pub fn is_snapshot_version(version: &str) -> bool {
        version.ends_with("-SNAPSHOT")
    }
}

/// Trimmed copy of `ArtifactInfo` persisted in the download cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedArtifactInfo {
    #[serde(default)]
    pub sha1: Option<String>,
    pub version: String,
    #[serde(default)]
    pub repository_path: Option<String>,
    #[serde(default)]
    pub is_tgz: bool,
}

impl From<&ArtifactInfo> for CachedArtifactInfo {
    fn from(info: &ArtifactInfo) -> Self {
        Self {
            sha1: info.sha1.clone(),
            version: info.version.clone(),
            repository_path: info.repository_path.clone(),
            is_tgz: info.is_tgz,
        }
    }
}

/// One hit of a repository search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    #[serde(default)]
    pub packaging: Option<String>,
}
