//! Static plugins directory: default coordinates and pinned versions per Kill Bill
//! release, bundled with the crate and optionally refreshed from a remote copy.

use super::registry::PluginLanguage;
use crate::artifact::coordinates::{ArtifactCoordinate, LATEST_VERSION};
use crate::config::{
    CATALOG_CACHE_HOURS, JAVA_PLUGIN_GROUP_ID, JAVA_PLUGIN_PACKAGING,
    PLUGINS_DIRECTORY_CACHE_FILENAME, RUBY_PLUGIN_GROUP_ID, RUBY_PLUGIN_PACKAGING,
};
use crate::repository::HttpClient;
use crate::utils::fs::write_atomically;
use crate::utils::version::major_minor;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const BUNDLED_DIRECTORY: &str = include_str!("../../resources/plugins_directory.json");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(rename = "type")]
    pub language: PluginLanguage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packaging: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifier: Option<String>,
    /// Kill Bill `major.minor` -> plugin version
    #[serde(default)]
    pub versions: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stable_version: Option<String>,
}

/// A catalog entry with every default filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginLookup {
    pub key: String,
    pub language: PluginLanguage,
    pub group_id: String,
    pub artifact_id: String,
    pub packaging: String,
    pub classifier: Option<String>,
    pub version: String,
}

impl PluginLookup {
    pub fn coordinate(&self) -> ArtifactCoordinate {
        ArtifactCoordinate::new(
            self.group_id.clone(),
            self.artifact_id.clone(),
            self.packaging.clone(),
            self.classifier.clone(),
            Some(self.version.clone()),
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedDirectory {
    last_updated: DateTime<Utc>,
    entries: BTreeMap<String, CatalogEntry>,
}

#[derive(Debug, Clone)]
pub struct PluginsDirectory {
    entries: BTreeMap<String, CatalogEntry>,
}

pub fn default_group_id(language: PluginLanguage) -> &'static str {
    match language {
        PluginLanguage::Java => JAVA_PLUGIN_GROUP_ID,
        PluginLanguage::Ruby => RUBY_PLUGIN_GROUP_ID,
    }
}

pub fn default_packaging(language: PluginLanguage) -> &'static str {
    match language {
        PluginLanguage::Java => JAVA_PLUGIN_PACKAGING,
        PluginLanguage::Ruby => RUBY_PLUGIN_PACKAGING,
    }
}

pub fn cache_path(bundles_dir: &Path) -> PathBuf {
    bundles_dir.join(PLUGINS_DIRECTORY_CACHE_FILENAME)
}

impl PluginsDirectory {
    /// The directory shipped with the crate.
    pub fn bundled() -> Result<Self> {
        Self::from_json(BUNDLED_DIRECTORY).context("Parse bundled plugins directory")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let entries: BTreeMap<String, CatalogEntry> = serde_json::from_str(json)?;
        Ok(Self { entries })
    }

    /// Remote directory cached under `bundles_dir` for a day. A failed refresh
    /// falls back to the stale cache, then to the bundled copy.
    pub async fn load(bundles_dir: &Path, http: &HttpClient, url: &str) -> Result<Self> {
        let path = cache_path(bundles_dir);

        let cached = match read_cache(&path) {
            Ok(cached) => cached,
            Err(e) => {
                log::warn!("Ignoring unreadable plugins directory cache {:?}: {}", path, e);
                None
            }
        };
        if let Some(cached) = &cached {
            let age = Utc::now() - cached.last_updated;
            if age < Duration::hours(CATALOG_CACHE_HOURS) {
                log::debug!("Using cached plugins directory (age: {} hours)", age.num_hours());
                return Ok(Self {
                    entries: cached.entries.clone(),
                });
            }
            log::info!(
                "Cached plugins directory is stale (age: {} hours), refreshing...",
                age.num_hours()
            );
        }

        match http
            .get_json::<BTreeMap<String, CatalogEntry>>(url)
            .await
        {
            Ok(entries) => {
                let fresh = CachedDirectory {
                    last_updated: Utc::now(),
                    entries,
                };
                if let Err(e) = write_cache(&path, &fresh) {
                    log::warn!("Failed to save plugins directory cache: {}", e);
                }
                Ok(Self {
                    entries: fresh.entries,
                })
            }
            Err(e) => {
                log::warn!("Failed to fetch plugins directory from {}: {}", url, e);
                match cached {
                    Some(stale) => Ok(Self {
                        entries: stale.entries,
                    }),
                    None => Self::bundled(),
                }
            }
        }
    }

    pub fn entries(&self) -> &BTreeMap<String, CatalogEntry> {
        &self.entries
    }

    pub fn get(&self, key: &str) -> Option<&CatalogEntry> {
        self.entries.get(&key.to_ascii_lowercase())
    }

    /// Resolve a plugin key for the given Kill Bill version. The pinned version
    /// for its `major.minor`, else the stable version, else LATEST.
    pub fn lookup(&self, key: &str, killbill_version: Option<&str>) -> Option<PluginLookup> {
        let key = key.to_ascii_lowercase();
        let entry = self.entries.get(&key)?;

        let pinned = killbill_version
            .and_then(major_minor)
            .and_then(|mm| entry.versions.get(&mm).cloned());
        let version = pinned
            .or_else(|| entry.stable_version.clone())
            .unwrap_or_else(|| LATEST_VERSION.to_string());

        Some(PluginLookup {
            language: entry.language,
            group_id: entry
                .group_id
                .clone()
                .unwrap_or_else(|| default_group_id(entry.language).to_string()),
            artifact_id: entry
                .artifact_id
                .clone()
                .unwrap_or_else(|| format!("{}-plugin", key)),
            packaging: entry
                .packaging
                .clone()
                .unwrap_or_else(|| default_packaging(entry.language).to_string()),
            classifier: entry.classifier.clone(),
            version,
            key,
        })
    }
}

fn read_cache(path: &Path) -> Result<Option<CachedDirectory>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path).with_context(|| format!("Read {:?}", path))?;
    let cached = serde_json::from_str(&data).with_context(|| format!("Parse {:?}", path))?;
    Ok(Some(cached))
}

fn write_cache(path: &Path, cached: &CachedDirectory) -> Result<()> {
    let json = serde_json::to_vec_pretty(cached)?;
    write_atomically(path, &json)?;
    log::debug!("Saved plugins directory to {:?}", path);
    Ok(())
}
