//! Plain Maven repository layout, shared by the Maven Central, GitHub Packages and
//! Cloudsmith backends.

use super::http::HttpClient;
use super::trim_base_url;
use crate::artifact::coordinates::ArtifactCoordinate;
use crate::artifact::types::ResolvedArtifact;
use crate::error::KpmError;
use crate::utils::version::compare_versions;
use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
struct MavenMetadataXml {
    #[serde(default)]
    versioning: Option<Versioning>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Versioning {
    #[serde(default)]
    latest: Option<String>,
    #[serde(default)]
    release: Option<String>,
    #[serde(default)]
    versions: Option<VersionList>,
    #[serde(default)]
    snapshot: Option<SnapshotXml>,
    #[serde(default)]
    snapshot_versions: Option<SnapshotVersionList>,
}

#[derive(Debug, Default, Deserialize)]
struct VersionList {
    #[serde(default)]
    version: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotXml {
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    build_number: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotVersionList {
    #[serde(default)]
    snapshot_version: Vec<SnapshotVersion>,
}

#[derive(Debug, Default, Deserialize)]
struct SnapshotVersion {
    #[serde(default)]
    classifier: Option<String>,
    #[serde(default)]
    extension: Option<String>,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Debug)]
pub struct MavenLayout {
    http: HttpClient,
    base_url: String,
}

impl MavenLayout {
    pub fn new(http: HttpClient, base_url: &str) -> Self {
        Self {
            http,
            base_url: trim_base_url(base_url),
        }
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url_for(&self, repository_path: &str) -> String {
        format!("{}{}", self.base_url, repository_path)
    }

    fn artifact_metadata_url(&self, coordinate: &ArtifactCoordinate) -> String {
        format!(
            "{}/{}/{}/maven-metadata.xml",
            self.base_url,
            coordinate.group_path(),
            coordinate.artifact_id
        )
    }

    async fn artifact_metadata(&self, coordinate: &ArtifactCoordinate) -> Result<Versioning> {
        let url = self.artifact_metadata_url(coordinate);
        let metadata: MavenMetadataXml = self.http.get_xml(&url).await?;
        Ok(metadata.versioning.unwrap_or_default())
    }

    pub async fn versions(&self, coordinate: &ArtifactCoordinate) -> Result<Vec<String>> {
        let versioning = self.artifact_metadata(coordinate).await?;
        let mut versions = versioning.versions.map(|v| v.version).unwrap_or_default();
        versions.sort_by(|a, b| compare_versions(a, b));
        versions.dedup();
        Ok(versions)
    }

    /// Concrete version for the coordinate: as given, or the repository's
    /// release/latest marker when LATEST was requested.
    pub async fn resolve_version(&self, coordinate: &ArtifactCoordinate) -> Result<String> {
        if let Some(version) = coordinate.concrete_version() {
            return Ok(version.to_string());
        }

        let versioning = self.artifact_metadata(coordinate).await?;
        let newest = versioning
            .versions
            .as_ref()
            .and_then(|list| list.version.iter().max_by(|a, b| compare_versions(a, b)))
            .cloned();
        let version = versioning
            .release
            .filter(|v| !v.is_empty())
            .or(versioning.latest.filter(|v| !v.is_empty()))
            .or(newest)
            .ok_or_else(|| KpmError::NotFound {
                url: self.artifact_metadata_url(coordinate),
            })?;
        log::debug!("Resolved LATEST for {} to {}", coordinate, version);
        Ok(version)
    }

    /// Timestamped file version of a `-SNAPSHOT`, read from the version-level metadata.
    async fn snapshot_file_version(
        &self,
        coordinate: &ArtifactCoordinate,
        version: &str,
    ) -> Result<String> {
        let url = format!(
            "{}/{}/{}/{}/maven-metadata.xml",
            self.base_url,
            coordinate.group_path(),
            coordinate.artifact_id,
            version
        );
        let metadata: MavenMetadataXml = self
            .http
            .get_xml(&url)
            .await
            .with_context(|| format!("Resolve snapshot {}", version))?;
        let versioning = metadata.versioning.unwrap_or_default();

        let exact = versioning.snapshot_versions.as_ref().and_then(|list| {
            list.snapshot_version
                .iter()
                .find(|sv| {
                    sv.extension.as_deref() == Some(coordinate.packaging.as_str())
                        && sv.classifier.as_deref() == coordinate.classifier.as_deref()
                })
                .and_then(|sv| sv.value.clone())
        });
        if let Some(value) = exact {
            return Ok(value);
        }

        match versioning.snapshot {
            Some(SnapshotXml {
                timestamp: Some(timestamp),
                build_number: Some(build_number),
            }) => Ok(format!(
                "{}{}-{}",
                version.trim_end_matches("SNAPSHOT"),
                timestamp,
                build_number
            )),
            // Locally deployed snapshots have no timestamped files
            _ => Ok(version.to_string()),
        }
    }

    pub async fn get_info(&self, coordinate: &ArtifactCoordinate) -> Result<ResolvedArtifact> {
        let version = self.resolve_version(coordinate).await?;
        let is_snapshot = ResolvedArtifact::is_snapshot_version(&version);
        let file_version = if is_snapshot {
            self.snapshot_file_version(coordinate, &version).await?
        } else {
            version.clone()
        };

        let repository_path = format!(
            "/{}/{}/{}/{}",
            coordinate.group_path(),
            coordinate.artifact_id,
            version,
            coordinate.file_name(&file_version)
        );
        let sha1 = self.sha1_sidecar(&repository_path).await?;

        Ok(ResolvedArtifact {
            version,
            sha1,
            repository_path,
            is_snapshot,
        })
    }

    /// Contents of `<artifact>.sha1`, absent when the repository has none.
    async fn sha1_sidecar(&self, repository_path: &str) -> Result<Option<String>> {
        let url = format!("{}.sha1", self.url_for(repository_path));
        match self.http.get_text(&url).await {
            Ok(body) => Ok(body
                .split_whitespace()
                .next()
                .map(|s| s.to_ascii_lowercase())),
            Err(e) if matches!(e.downcast_ref::<KpmError>(), Some(KpmError::NotFound { .. })) => {
                log::debug!("No sha1 sidecar at {}", url);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepositoryConfig;
    use crate::repository::http::Auth;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn layout_for(server: &MockServer) -> MavenLayout {
        let config = RepositoryConfig {
            retry_delay_ms: 1,
            ..RepositoryConfig::with_url(server.uri())
        };
        let http = HttpClient::new(&config, &server.uri(), Auth::None).unwrap();
        MavenLayout::new(http, &format!("{}/", server.uri()))
    }

    fn coordinate(version: Option<&str>) -> ArtifactCoordinate {
        ArtifactCoordinate::new(
            "org.kill-bill.billing.plugin.java",
            "analytics-plugin",
            "jar",
            None,
            version.map(str::to_string),
        )
    }

    const METADATA: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata>
  <groupId>org.kill-bill.billing.plugin.java</groupId>
  <artifactId>analytics-plugin</artifactId>
  <versioning>
    <latest>0.8.0-SNAPSHOT</latest>
    <release>0.7.1</release>
    <versions>
      <version>0.6.0</version>
      <version>0.7.1</version>
      <version>0.7.0</version>
    </versions>
    <lastUpdated>20200101000000</lastUpdated>
  </versioning>
</metadata>"#;

    #[tokio::test]
    async fn resolves_latest_to_release() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(
                "/org/kill-bill/billing/plugin/java/analytics-plugin/maven-metadata.xml",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_string(METADATA))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/org/kill-bill/billing/plugin/java/analytics-plugin/0.7.1/analytics-plugin-0.7.1.jar.sha1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ABCDEF0123  analytics-plugin-0.7.1.jar\n"))
            .mount(&server)
            .await;

        let layout = layout_for(&server);
        let info = layout.get_info(&coordinate(Some("latest"))).await.unwrap();
        assert_eq!(info.version, "0.7.1");
        assert_eq!(info.sha1.as_deref(), Some("abcdef0123"));
        assert!(!info.is_snapshot);
        assert_eq!(
            info.repository_path,
            "/org/kill-bill/billing/plugin/java/analytics-plugin/0.7.1/analytics-plugin-0.7.1.jar"
        );

        let versions = layout.versions(&coordinate(None)).await.unwrap();
        assert_eq!(versions, vec!["0.6.0", "0.7.0", "0.7.1"]);
    }

    #[tokio::test]
    async fn missing_sidecar_means_no_sha1() {
        let server = MockServer::start().await;
        let info = layout_for(&server)
            .get_info(&coordinate(Some("0.7.1")))
            .await
            .unwrap();
        assert_eq!(info.sha1, None);
        assert_eq!(info.version, "0.7.1");
    }

    #[tokio::test]
    async fn resolves_snapshot_file_name() {
        let server = MockServer::start().await;
        let snapshot_metadata = r#"<metadata>
  <versioning>
    <snapshot><timestamp>20200102.030405</timestamp><buildNumber>7</buildNumber></snapshot>
    <snapshotVersions>
      <snapshotVersion><extension>pom</extension><value>0.8.0-20200102.030405-7</value></snapshotVersion>
      <snapshotVersion><extension>jar</extension><value>0.8.0-20200102.030405-7</value></snapshotVersion>
    </snapshotVersions>
  </versioning>
</metadata>"#;
        Mock::given(method("GET"))
            .and(path(
                "/org/kill-bill/billing/plugin/java/analytics-plugin/0.8.0-SNAPSHOT/maven-metadata.xml",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_string(snapshot_metadata))
            .mount(&server)
            .await;

        let info = layout_for(&server)
            .get_info(&coordinate(Some("0.8.0-SNAPSHOT")))
            .await
            .unwrap();
        assert!(info.is_snapshot);
        assert_eq!(info.version, "0.8.0-SNAPSHOT");
        assert!(info
            .repository_path
            .ends_with("/0.8.0-SNAPSHOT/analytics-plugin-0.8.0-20200102.030405-7.jar"));
    }
}
