//! Repository backends.
//! Every backend speaks a different flavour of Maven repository but exposes the same
//! search / info / versions / download surface, so the fetcher and installer never
//! care which one is configured.

pub mod cloudsmith;
pub mod github;
pub mod http;
pub mod layout;
pub mod maven_central;
pub mod nexus;

use crate::artifact::coordinates::ArtifactCoordinate;
use crate::artifact::types::{ArtifactInfo, ResolvedArtifact, SearchHit};
use crate::config::RepositoryConfig;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub use cloudsmith::CloudsmithBackend;
pub use github::GithubPackagesBackend;
pub use http::HttpClient;
pub use maven_central::MavenCentralBackend;
pub use nexus::NexusBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Nexus,
    MavenCentral,
    GithubPackages,
    Cloudsmith,
}

impl BackendKind {
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Nexus => "Nexus",
            BackendKind::MavenCentral => "Maven Central",
            BackendKind::GithubPackages => "GitHub Packages",
            BackendKind::Cloudsmith => "Cloudsmith",
        }
    }
}

#[async_trait]
pub trait RepositoryBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// List artifacts matching the coordinate's group and artifact id.
    async fn search(&self, coordinate: &ArtifactCoordinate) -> Result<Vec<SearchHit>>;

    /// Resolve the coordinate to a concrete version, sha1 and repository path.
    /// A LATEST (or missing) version never survives this call.
    async fn get_info(&self, coordinate: &ArtifactCoordinate) -> Result<ResolvedArtifact>;

    /// Every published version of the coordinate's artifact.
    async fn versions(&self, coordinate: &ArtifactCoordinate) -> Result<Vec<String>>;

    /// Download an already resolved artifact into `destination_dir`.
    async fn download(
        &self,
        coordinate: &ArtifactCoordinate,
        resolved: &ResolvedArtifact,
        destination_dir: &Path,
        verify_sha1: bool,
    ) -> Result<ArtifactInfo>;

    async fn pull(
        &self,
        coordinate: &ArtifactCoordinate,
        destination_dir: &Path,
        verify_sha1: bool,
    ) -> Result<ArtifactInfo> {
        let resolved = self.get_info(coordinate).await?;
        self.download(coordinate, &resolved, destination_dir, verify_sha1)
            .await
    }
}

/// Pick the backend for a configuration: explicit `kind`, otherwise inferred from the URL.
pub fn build_backend(config: &RepositoryConfig) -> Result<Arc<dyn RepositoryBackend>> {
    let kind = config.backend_kind();
    log::debug!("Using {} repository backend ({:?})", kind.name(), config.url);
    let backend: Arc<dyn RepositoryBackend> = match kind {
        BackendKind::Nexus => Arc::new(NexusBackend::new(config)?),
        BackendKind::MavenCentral => Arc::new(MavenCentralBackend::new(config)?),
        BackendKind::GithubPackages => Arc::new(GithubPackagesBackend::new(config)?),
        BackendKind::Cloudsmith => Arc::new(CloudsmithBackend::new(config)?),
    };
    Ok(backend)
}

/// Stream `url` into `destination_dir` under the coordinate's file name.
pub(crate) async fn download_artifact(
    http: &HttpClient,
    url: &str,
    coordinate: &ArtifactCoordinate,
    resolved: &ResolvedArtifact,
    destination_dir: &Path,
    verify_sha1: bool,
) -> Result<ArtifactInfo> {
    let file_name = coordinate.file_name(&resolved.version);
    let file_path = destination_dir.join(&file_name);
    let expected = if verify_sha1 {
        resolved.sha1.as_deref()
    } else {
        None
    };

    log::info!("Downloading {} -> {:?}", url, file_path);
    let downloaded = http.download_to_file(url, &file_path, expected).await?;

    Ok(ArtifactInfo {
        version: resolved.version.clone(),
        sha1: resolved.sha1.clone().or(Some(downloaded.sha1)),
        repository_path: Some(resolved.repository_path.clone()),
        file_name,
        file_path: Some(file_path),
        dir_path: destination_dir.to_path_buf(),
        size: downloaded.size,
        is_tgz: coordinate.is_tgz(),
        bundle_dir: destination_dir.to_path_buf(),
        skipped: false,
    })
}

pub(crate) fn trim_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}
