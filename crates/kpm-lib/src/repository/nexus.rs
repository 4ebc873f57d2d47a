//! Nexus 2 REST API backend.

use super::http::{Auth, HttpClient};
use super::{download_artifact, trim_base_url, BackendKind, RepositoryBackend};
use crate::artifact::coordinates::{is_latest, ArtifactCoordinate, LATEST_VERSION};
use crate::artifact::types::{ArtifactInfo, ResolvedArtifact, SearchHit};
use crate::config::RepositoryConfig;
use crate::error::KpmError;
use crate::utils::version::compare_versions;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use url::Url;

const RESOLVE_PATH: &str = "/service/local/artifact/maven/resolve";
const REDIRECT_PATH: &str = "/service/local/artifact/maven/redirect";
const SEARCH_PATH: &str = "/service/local/lucene/search";

#[derive(Debug, Deserialize)]
struct ArtifactResolutionXml {
    data: ResolutionData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolutionData {
    version: String,
    #[serde(default)]
    base_version: Option<String>,
    #[serde(default)]
    snapshot: bool,
    #[serde(default)]
    sha1: Option<String>,
    repository_path: String,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResponseXml {
    #[serde(default)]
    data: Option<SearchData>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchData {
    #[serde(default)]
    artifact: Vec<SearchArtifact>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchArtifact {
    group_id: String,
    artifact_id: String,
    version: String,
}

#[derive(Debug)]
pub struct NexusBackend {
    http: HttpClient,
    base_url: String,
    repository: String,
}

impl NexusBackend {
    pub fn new(config: &RepositoryConfig) -> Result<Self> {
        let base_url = config
            .url
            .as_deref()
            .ok_or_else(|| KpmError::validation("Nexus repository requires a url"))?;
        let repository = config.repository.clone().ok_or_else(|| {
            KpmError::validation("Nexus repository requires a repository name")
        })?;
        let http = HttpClient::new(config, base_url, Auth::from_config(config))?;
        Ok(Self {
            http,
            base_url: trim_base_url(base_url),
            repository,
        })
    }

    /// `?r=&g=&a=&v=&p=&e=[&c=]` query shared by resolve and redirect.
    fn artifact_url(
        &self,
        endpoint: &str,
        coordinate: &ArtifactCoordinate,
        version: &str,
    ) -> Result<String> {
        let mut params = vec![
            ("r", self.repository.as_str()),
            ("g", coordinate.group_id.as_str()),
            ("a", coordinate.artifact_id.as_str()),
            ("v", version),
            ("p", coordinate.packaging.as_str()),
            ("e", coordinate.packaging.as_str()),
        ];
        if let Some(classifier) = coordinate.classifier.as_deref() {
            params.push(("c", classifier));
        }
        let url = Url::parse_with_params(&format!("{}{}", self.base_url, endpoint), &params)
            .with_context(|| format!("Build Nexus URL for {}", coordinate))?;
        Ok(url.to_string())
    }
}

#[async_trait]
impl RepositoryBackend for NexusBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Nexus
    }

    async fn search(&self, coordinate: &ArtifactCoordinate) -> Result<Vec<SearchHit>> {
        let mut params = vec![
            ("g", coordinate.group_id.as_str()),
            ("a", coordinate.artifact_id.as_str()),
            ("repositoryId", self.repository.as_str()),
        ];
        if let Some(version) = coordinate.concrete_version() {
            params.push(("v", version));
        }
        let url = Url::parse_with_params(&format!("{}{}", self.base_url, SEARCH_PATH), &params)?;
        let response: SearchResponseXml = self.http.get_xml(url.as_str()).await?;

        Ok(response
            .data
            .unwrap_or_default()
            .artifact
            .into_iter()
            .map(|a| SearchHit {
                group_id: a.group_id,
                artifact_id: a.artifact_id,
                version: a.version,
                packaging: Some(coordinate.packaging.clone()),
            })
            .collect())
    }

    async fn get_info(&self, coordinate: &ArtifactCoordinate) -> Result<ResolvedArtifact> {
        let requested = coordinate.concrete_version().unwrap_or(LATEST_VERSION);
        let url = self.artifact_url(RESOLVE_PATH, coordinate, requested)?;
        let resolution: ArtifactResolutionXml = self
            .http
            .get_xml(&url)
            .await
            .with_context(|| format!("Resolve {} on Nexus", coordinate))?;
        let data = resolution.data;

        // Snapshots report the timestamped build as `version`
        let version = data
            .base_version
            .filter(|v| !v.is_empty())
            .unwrap_or(data.version);
        if is_latest(&version) {
            return Err(KpmError::InvalidResponse {
                url,
                reason: "Nexus did not resolve LATEST to a concrete version".to_string(),
            }
            .into());
        }

        Ok(ResolvedArtifact {
            is_snapshot: data.snapshot || ResolvedArtifact::is_snapshot_version(&version),
            version,
            sha1: data.sha1.map(|s| s.to_ascii_lowercase()),
            repository_path: data.repository_path,
        })
    }

    async fn versions(&self, coordinate: &ArtifactCoordinate) -> Result<Vec<String>> {
        let unversioned = ArtifactCoordinate {
            version: None,
            ..coordinate.clone()
        };
        let mut versions: Vec<String> = self
            .search(&unversioned)
            .await?
            .into_iter()
            .filter(|hit| {
                hit.group_id == coordinate.group_id && hit.artifact_id == coordinate.artifact_id
            })
            .map(|hit| hit.version)
            .collect();
        versions.sort_by(|a, b| compare_versions(a, b));
        versions.dedup();
        Ok(versions)
    }

    async fn download(
        &self,
        coordinate: &ArtifactCoordinate,
        resolved: &ResolvedArtifact,
        destination_dir: &Path,
        verify_sha1: bool,
    ) -> Result<ArtifactInfo> {
        let url = self.artifact_url(REDIRECT_PATH, coordinate, &resolved.version)?;
        download_artifact(
            &self.http,
            &url,
            coordinate,
            resolved,
            destination_dir,
            verify_sha1,
        )
        .await
    }
}
