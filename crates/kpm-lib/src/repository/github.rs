use super::http::{Auth, HttpClient};
use super::layout::MavenLayout;
use super::{download_artifact, BackendKind, RepositoryBackend};
use crate::artifact::coordinates::ArtifactCoordinate;
use crate::artifact::types::{ArtifactInfo, ResolvedArtifact, SearchHit};
use crate::config::RepositoryConfig;
use crate::error::KpmError;
use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

/// GitHub Packages Maven registry, `https://maven.pkg.github.com/<owner>/<repo>`.
#[derive(Debug)]
pub struct GithubPackagesBackend {
    layout: MavenLayout,
}

impl GithubPackagesBackend {
    pub fn new(config: &RepositoryConfig) -> Result<Self> {
        let base_url = config.url.as_deref().ok_or_else(|| {
            KpmError::validation("GitHub Packages repository requires a url")
        })?;
        // GitHub accepts the token either as bearer or as basic-auth password
        let auth = match (&config.username, &config.token) {
            (Some(username), Some(token)) => Auth::Basic {
                username: username.clone(),
                password: Some(token.clone()),
            },
            _ => Auth::from_config(config),
        };
        let http = HttpClient::new(config, base_url, auth)?;
        Ok(Self {
            layout: MavenLayout::new(http, base_url),
        })
    }
}

#[async_trait]
impl RepositoryBackend for GithubPackagesBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::GithubPackages
    }

    async fn search(&self, _coordinate: &ArtifactCoordinate) -> Result<Vec<SearchHit>> {
        Err(KpmError::Unsupported {
            operation: "search",
            backend: self.kind().name(),
        }
        .into())
    }

    async fn get_info(&self, coordinate: &ArtifactCoordinate) -> Result<ResolvedArtifact> {
        self.layout.get_info(coordinate).await
    }

    async fn versions(&self, coordinate: &ArtifactCoordinate) -> Result<Vec<String>> {
        self.layout.versions(coordinate).await
    }

    async fn download(
        &self,
        coordinate: &ArtifactCoordinate,
        resolved: &ResolvedArtifact,
        destination_dir: &Path,
        verify_sha1: bool,
    ) -> Result<ArtifactInfo> {
        let url = self.layout.url_for(&resolved.repository_path);
        download_artifact(
            self.layout.http(),
            &url,
            coordinate,
            resolved,
            destination_dir,
            verify_sha1,
        )
        .await
    }
}
