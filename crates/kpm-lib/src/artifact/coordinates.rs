//! Maven-style artifact coordinates

use crate::error::KpmError;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const LATEST_VERSION: &str = "LATEST";

/// The one place the symbolic LATEST version is recognised.
pub fn is_latest(version: &str) -> bool {
    version.eq_ignore_ascii_case(LATEST_VERSION)
}

/// `group:artifact:packaging[:classifier]:version`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactCoordinate {
    pub group_id: String,
    pub artifact_id: String,
    pub packaging: String,
    #[serde(default)]
    pub classifier: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl ArtifactCoordinate {
    pub fn new(
        group_id: impl Into<String>,
        artifact_id: impl Into<String>,
        packaging: impl Into<String>,
        classifier: Option<String>,
        version: Option<String>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            packaging: packaging.into(),
            classifier,
            version,
        }
    }

    /// Canonical string form. The classifier is omitted when absent, and the
    /// version is omitted when both version and classifier are absent.
    pub fn build(&self) -> String {
        let mut parts = vec![
            self.group_id.as_str(),
            self.artifact_id.as_str(),
            self.packaging.as_str(),
        ];
        if let Some(classifier) = self.classifier.as_deref() {
            parts.push(classifier);
        }
        if let Some(version) = self.version.as_deref() {
            parts.push(version);
        }
        parts.join(":")
    }

    /// Parse 3 to 5 colon-separated segments:
    /// `g:a:p`, `g:a:p:v` or `g:a:p:c:v`.
    pub fn parse(coordinates: &str) -> Result<Self, KpmError> {
        let parts: Vec<&str> = coordinates.split(':').collect();
        if parts.len() < 3 || parts.len() > 5 {
            return Err(KpmError::format(
                coordinates,
                format!("expected 3 to 5 colon-separated segments, got {}", parts.len()),
            ));
        }
        if parts.iter().any(|p| p.is_empty()) {
            return Err(KpmError::format(coordinates, "empty segment"));
        }

        let (classifier, version) = match parts.len() {
            3 => (None, None),
            4 => (None, Some(parts[3].to_string())),
            _ => (Some(parts[3].to_string()), Some(parts[4].to_string())),
        };

        Ok(Self {
            group_id: parts[0].to_string(),
            artifact_id: parts[1].to_string(),
            packaging: parts[2].to_string(),
            classifier,
            version,
        })
    }

    pub fn with_version(&self, version: impl Into<String>) -> Self {
        Self {
            version: Some(version.into()),
            ..self.clone()
        }
    }

    /// True when no concrete version has been picked yet.
    pub fn wants_latest(&self) -> bool {
        self.version.as_deref().map(is_latest).unwrap_or(true)
    }

    /// The concrete version, if any.
    pub fn concrete_version(&self) -> Option<&str> {
        self.version.as_deref().filter(|v| !is_latest(v))
    }

    /// `org.kill-bill.billing` -> `org/kill-bill/billing`
    pub fn group_path(&self) -> String {
        self.group_id.replace('.', "/")
    }

    pub fn is_tgz(&self) -> bool {
        is_tgz_packaging(&self.packaging)
    }

    /// Local file name for the given concrete version.
    pub fn file_name(&self, version: &str) -> String {
        match self.classifier.as_deref() {
            Some(classifier) => format!(
                "{}-{}-{}.{}",
                self.artifact_id, version, classifier, self.packaging
            ),
            None => format!("{}-{}.{}", self.artifact_id, version, self.packaging),
        }
    }

    /// Path of the artifact inside a Maven layout, with a leading slash.
    pub fn repository_path(&self, version: &str) -> String {
        format!(
            "/{}/{}/{}/{}",
            self.group_path(),
            self.artifact_id,
            version,
            self.file_name(version)
        )
    }
}

impl fmt::Display for ArtifactCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.build())
    }
}

impl std::str::FromStr for ArtifactCoordinate {
    type Err = KpmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

pub fn is_tgz_packaging(packaging: &str) -> bool {
    packaging == "tar.gz" || packaging == "tgz"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinate(classifier: Option<&str>, version: Option<&str>) -> ArtifactCoordinate {
        ArtifactCoordinate::new(
            "org.kill-bill.billing.plugin.java",
            "analytics-plugin",
            "jar",
            classifier.map(str::to_string),
            version.map(str::to_string),
        )
    }

    #[test]
    fn builds_canonical_form() {
        assert_eq!(
            coordinate(None, Some("0.7.1")).build(),
            "org.kill-bill.billing.plugin.java:analytics-plugin:jar:0.7.1"
        );
        assert_eq!(
            coordinate(Some("jar-with-dependencies"), Some("0.7.1")).build(),
            "org.kill-bill.billing.plugin.java:analytics-plugin:jar:jar-with-dependencies:0.7.1"
        );
        assert_eq!(
            coordinate(None, None).build(),
            "org.kill-bill.billing.plugin.java:analytics-plugin:jar"
        );
    }

    #[test]
    fn round_trips_concrete_versions() {
        for c in [
            coordinate(None, Some("0.7.1")),
            coordinate(Some("tests"), Some("1.0.0-SNAPSHOT")),
            coordinate(None, Some("LATEST")),
        ] {
            assert_eq!(ArtifactCoordinate::parse(&c.build()).unwrap(), c);
        }
    }

    #[test]
    fn parses_three_to_five_segments() {
        let c = ArtifactCoordinate::parse("g:a:p").unwrap();
        assert_eq!(c.version, None);
        let c = ArtifactCoordinate::parse("g:a:p:1.0").unwrap();
        assert_eq!(c.version.as_deref(), Some("1.0"));
        assert_eq!(c.classifier, None);
        let c = ArtifactCoordinate::parse("g:a:p:c:1.0").unwrap();
        assert_eq!(c.classifier.as_deref(), Some("c"));
        assert_eq!(c.version.as_deref(), Some("1.0"));
    }

    #[test]
    fn rejects_bad_segment_counts() {
        for bad in ["", "g", "g:a", "g:a:p:c:v:x", "g:a:p:c:v:x:y", "g::p"] {
            let err = ArtifactCoordinate::parse(bad).unwrap_err();
            assert!(matches!(err, KpmError::Format { .. }), "{bad}");
        }
    }

    #[test]
    fn latest_is_case_insensitive() {
        assert!(is_latest("LATEST"));
        assert!(is_latest("latest"));
        assert!(is_latest("Latest"));
        assert!(!is_latest("0.7.1"));
        assert!(coordinate(None, None).wants_latest());
        assert!(coordinate(None, Some("latest")).wants_latest());
        assert_eq!(coordinate(None, Some("latest")).concrete_version(), None);
        assert_eq!(coordinate(None, Some("1.0")).concrete_version(), Some("1.0"));
    }

    #[test]
    fn computes_file_names_and_paths() {
        let c = coordinate(None, Some("0.7.1"));
        assert_eq!(c.file_name("0.7.1"), "analytics-plugin-0.7.1.jar");
        assert_eq!(
            c.repository_path("0.7.1"),
            "/org/kill-bill/billing/plugin/java/analytics-plugin/0.7.1/analytics-plugin-0.7.1.jar"
        );
        let c = coordinate(Some("tests"), None);
        assert_eq!(c.file_name("1.2"), "analytics-plugin-1.2-tests.jar");
    }
}
