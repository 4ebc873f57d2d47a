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

const TOKEN_USERNAME: &str = "token";

/// Cloudsmith Maven endpoint, `https://dl.cloudsmith.io/<...>/maven`.
#[derive(Debug)]
pub struct CloudsmithBackend {
    layout: MavenLayout,
}

impl CloudsmithBackend {
    pub fn new(config: &RepositoryConfig) -> Result<Self> {
        let base_url = config
            .url
            .as_deref()
            .ok_or_else(|| KpmError::validation("Cloudsmith repository requires a url"))?;
        let auth = match &config.token {
            Some(token) => Auth::Basic {
                username: config
                    .username
                    .clone()
                    .unwrap_or_else(|| TOKEN_USERNAME.to_string()),
                password: Some(token.clone()),
            },
            None => Auth::from_config(config),
        };
        let http = HttpClient::new(config, base_url, auth)?;
        Ok(Self {
            layout: MavenLayout::new(http, base_url),
        })
    }
}

#[async_trait]
impl RepositoryBackend for CloudsmithBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cloudsmith
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
