use crate::artifact::coordinates::ArtifactCoordinate;
use crate::artifact::types::ArtifactInfo;
use crate::error::KpmError;
use crate::plugins::registry::PluginLanguage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstallStatus {
    Installed,
    UpToDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Killbill,
    Kaui,
    Plugin,
    DefaultBundles,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallResult {
    pub status: InstallStatus,
    pub kind: ArtifactKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<PluginLanguage>,
    pub version: String,
    pub path: PathBuf,
    pub coordinates: String,
}

impl InstallResult {
    pub fn from_artifact(
        kind: ArtifactKind,
        coordinate: &ArtifactCoordinate,
        info: &ArtifactInfo,
    ) -> Self {
        Self {
            status: if info.skipped {
                InstallStatus::UpToDate
            } else {
                InstallStatus::Installed
            },
            kind,
            plugin_key: None,
            plugin_name: None,
            language: None,
            version: info.version.clone(),
            path: info
                .file_path
                .clone()
                .unwrap_or_else(|| info.dir_path.clone()),
            coordinates: coordinate.with_version(info.version.clone()).build(),
        }
    }

    pub fn for_plugin(
        mut self,
        key: &str,
        plugin_name: &str,
        language: PluginLanguage,
    ) -> Self {
        self.plugin_key = Some(key.to_string());
        self.plugin_name = Some(plugin_name.to_string());
        self.language = Some(language);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UninstallStatus {
    Removed,
    NotConfirmed,
    /// Cleanup dry run: would have been removed
    WouldRemove,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UninstallResult {
    pub status: UninstallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_key: Option<String>,
    pub plugin_name: String,
    pub language: PluginLanguage,
    pub versions: Vec<String>,
    pub paths: Vec<PathBuf>,
}

/// Machine-readable outcome of one request, for a thin CLI layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OperationRecord {
    Install(InstallResult),
    Uninstall(UninstallResult),
    Error {
        status: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_kind: Option<&'static str>,
        message: String,
    },
}

impl OperationRecord {
    pub fn from_error(err: &anyhow::Error) -> Self {
        let error_kind = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<KpmError>())
            .map(KpmError::kind);
        OperationRecord::Error {
            status: "ERROR",
            error_kind,
            message: format!("{:#}", err),
        }
    }
}

impl From<InstallResult> for OperationRecord {
    fn from(result: InstallResult) -> Self {
        OperationRecord::Install(result)
    }
}

impl From<UninstallResult> for OperationRecord {
    fn from(result: UninstallResult) -> Self {
        OperationRecord::Uninstall(result)
    }
}
