use crate::artifact::coordinates::ArtifactCoordinate;
use crate::config::PLUGIN_IDENTIFIERS_FILENAME;
use crate::utils::fs::write_via_temp_dir;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginLanguage {
    Java,
    Ruby,
}

impl PluginLanguage {
    pub const ALL: [PluginLanguage; 2] = [PluginLanguage::Java, PluginLanguage::Ruby];

    /// Directory name under `plugins/`.
    pub fn dir_name(&self) -> &'static str {
        match self {
            PluginLanguage::Java => "java",
            PluginLanguage::Ruby => "ruby",
        }
    }
}

impl fmt::Display for PluginLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginIdentifier {
    pub plugin_name: String,
    pub language: PluginLanguage,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub artifact_id: Option<String>,
    #[serde(default)]
    pub packaging: Option<String>,
    #[serde(default)]
    pub classifier: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl PluginIdentifier {
    /// Stored coordinate, when every mandatory part is known.
    pub fn coordinate(&self) -> Option<ArtifactCoordinate> {
        Some(ArtifactCoordinate::new(
            self.group_id.clone()?,
            self.artifact_id.clone()?,
            self.packaging.clone()?,
            self.classifier.clone(),
            self.version.clone(),
        ))
    }
}

/// Maps user-facing plugin keys to what was installed for them.
///
/// Entries are never overwritten: the first install of a key wins until the
/// entry is explicitly removed.
#[derive(Debug)]
pub struct PluginIdentifierRegistry {
    path: PathBuf,
    entries: BTreeMap<String, PluginIdentifier>,
}

impl PluginIdentifierRegistry {
    pub fn load(path: &Path) -> Result<Self> {
        let entries = if path.exists() {
            let data = fs::read_to_string(path)
                .with_context(|| format!("Read plugin identifiers {:?}", path))?;
            if data.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&data)
                    .with_context(|| format!("Parse plugin identifiers {:?}", path))?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    /// Registry stored under `<bundles>/plugins/`.
    pub fn for_bundles_dir(bundles_dir: &Path) -> Result<Self> {
        Self::load(
            &bundles_dir
                .join("plugins")
                .join(PLUGIN_IDENTIFIERS_FILENAME),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &BTreeMap<String, PluginIdentifier> {
        &self.entries
    }

    pub fn get(&self, key: &str) -> Option<&PluginIdentifier> {
        self.entries.get(key)
    }

    /// Key whose entry installed the filesystem plugin `plugin_name`.
    pub fn find_by_plugin_name(&self, plugin_name: &str) -> Option<(&str, &PluginIdentifier)> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.plugin_name == plugin_name)
            .map(|(key, entry)| (key.as_str(), entry))
    }

    pub fn add(
        &mut self,
        key: &str,
        plugin_name: &str,
        language: PluginLanguage,
        coordinate: Option<&ArtifactCoordinate>,
    ) -> Result<&BTreeMap<String, PluginIdentifier>> {
        if self.entries.contains_key(key) {
            log::debug!("Plugin key {} already registered, keeping existing entry", key);
            return Ok(&self.entries);
        }

        let entry = PluginIdentifier {
            plugin_name: plugin_name.to_string(),
            language,
            group_id: coordinate.map(|c| c.group_id.clone()),
            artifact_id: coordinate.map(|c| c.artifact_id.clone()),
            packaging: coordinate.map(|c| c.packaging.clone()),
            classifier: coordinate.and_then(|c| c.classifier.clone()),
            version: coordinate.and_then(|c| c.version.clone()),
        };
        log::info!("Registering plugin key {} -> {}", key, plugin_name);
        self.entries.insert(key.to_string(), entry);
        self.save()?;
        Ok(&self.entries)
    }

    pub fn remove(&mut self, key: &str) -> Result<&BTreeMap<String, PluginIdentifier>> {
        if self.entries.remove(key).is_some() {
            log::info!("Unregistered plugin key {}", key);
            self.save()?;
        }
        Ok(&self.entries)
    }

    /// True when nothing is stored for `key`, or every stored coordinate part
    /// is absent or equal to the supplied one.
    pub fn validate(&self, key: &str, coordinate: &ArtifactCoordinate) -> bool {
        let Some(entry) = self.entries.get(key) else {
            return true;
        };

        let checks: [(&str, Option<&str>, Option<&str>); 5] = [
            (
                "group_id",
                entry.group_id.as_deref(),
                Some(coordinate.group_id.as_str()),
            ),
            (
                "artifact_id",
                entry.artifact_id.as_deref(),
                Some(coordinate.artifact_id.as_str()),
            ),
            (
                "packaging",
                entry.packaging.as_deref(),
                Some(coordinate.packaging.as_str()),
            ),
            (
                "classifier",
                entry.classifier.as_deref(),
                coordinate.classifier.as_deref(),
            ),
            (
                "version",
                entry.version.as_deref(),
                coordinate.version.as_deref(),
            ),
        ];

        let mut valid = true;
        for (field, stored, supplied) in checks {
            if let Some(stored) = stored {
                if Some(stored) != supplied {
                    log::warn!(
                        "Plugin key {}: {} mismatch, registered {} but got {}",
                        key,
                        field,
                        stored,
                        supplied.unwrap_or("nothing")
                    );
                    valid = false;
                }
            }
        }
        valid
    }

    fn save(&self) -> Result<()> {
        let data = serde_json::to_vec_pretty(&self.entries)?;
        write_via_temp_dir(&self.path, &data)
            .with_context(|| format!("Write plugin identifiers {:?}", self.path))
    }
}
