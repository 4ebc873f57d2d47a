use super::http::{Auth, HttpClient};
use super::layout::MavenLayout;
use super::{download_artifact, BackendKind, RepositoryBackend};
use crate::artifact::coordinates::ArtifactCoordinate;
use crate::artifact::types::{ArtifactInfo, ResolvedArtifact, SearchHit};
use crate::config::{RepositoryConfig, MAVEN_CENTRAL_SEARCH_URL, MAVEN_CENTRAL_URL};
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use url::Url;

const SEARCH_ROWS: &str = "200";

#[derive(Debug, Deserialize)]
struct SolrResponse {
    response: SolrBody,
}

#[derive(Debug, Deserialize)]
struct SolrBody {
    #[serde(default)]
    docs: Vec<SolrDoc>,
}

#[derive(Debug, Deserialize)]
struct SolrDoc {
    g: String,
    a: String,
    /// `v` in the gav core, `latestVersion` in the default core
    #[serde(default, alias = "latestVersion")]
    v: Option<String>,
    #[serde(default)]
    p: Option<String>,
}

/// Maven Central (or any plain Maven mirror) with solr search.
#[derive(Debug)]
pub struct MavenCentralBackend {
    layout: MavenLayout,
    search_url: String,
}

impl MavenCentralBackend {
    pub fn new(config: &RepositoryConfig) -> Result<Self> {
        let base_url = config.url.as_deref().unwrap_or(MAVEN_CENTRAL_URL);
        let http = HttpClient::new(config, base_url, Auth::from_config(config))?;
        Ok(Self {
            layout: MavenLayout::new(http, base_url),
            search_url: config
                .search_url
                .clone()
                .unwrap_or_else(|| MAVEN_CENTRAL_SEARCH_URL.to_string()),
        })
    }

    fn search_query_url(&self, coordinate: &ArtifactCoordinate) -> Result<String> {
        let mut query = format!(
            "g:\"{}\" AND a:\"{}\"",
            coordinate.group_id, coordinate.artifact_id
        );
        if let Some(version) = coordinate.concrete_version() {
            query.push_str(&format!(" AND v:\"{}\"", version));
        }
        let url = Url::parse_with_params(
            &self.search_url,
            &[
                ("q", query.as_str()),
                ("core", "gav"),
                ("rows", SEARCH_ROWS),
                ("wt", "json"),
            ],
        )?;
        Ok(url.to_string())
    }
}

#[async_trait]
impl RepositoryBackend for MavenCentralBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::MavenCentral
    }

    async fn search(&self, coordinate: &ArtifactCoordinate) -> Result<Vec<SearchHit>> {
        let url = self.search_query_url(coordinate)?;
        let response: SolrResponse = self.layout.http().get_json(&url).await?;
        Ok(response
            .response
            .docs
            .into_iter()
            .filter_map(|doc| {
                let version = doc.v?;
                Some(SearchHit {
                    group_id: doc.g,
                    artifact_id: doc.a,
                    version,
                    packaging: doc.p,
                })
            })
            .collect())
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
