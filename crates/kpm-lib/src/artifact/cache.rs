use super::types::CachedArtifactInfo;
use crate::config::SHA1_FILENAME;
use crate::utils::fs::write_atomically;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Sha1Store {
    /// coordinate -> last known remote sha1
    #[serde(default)]
    sha1: BTreeMap<String, String>,
    /// coordinate -> trimmed artifact info
    #[serde(default)]
    nexus: BTreeMap<String, CachedArtifactInfo>,
    /// Kill Bill version -> platform bundle version
    #[serde(default)]
    killbill: BTreeMap<String, String>,
}

/// Persisted download cache. Lets the fetcher skip artifacts whose remote
/// SHA1 has not changed since the last pull.
///
/// Every setter rewrites the whole file atomically and reloads it, so the
/// in-memory view always matches disk.
#[derive(Debug)]
pub struct Sha1Cache {
    path: PathBuf,
    store: Sha1Store,
}

impl Sha1Cache {
    /// Load the cache at `path`, creating an empty one when missing.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("Creating empty sha1 cache at {:?}", path);
            let empty = serde_json::to_vec_pretty(&Sha1Store::default())?;
            write_atomically(path, &empty)?;
        }
        let mut cache = Self {
            path: path.to_path_buf(),
            store: Sha1Store::default(),
        };
        cache.reload()?;
        Ok(cache)
    }

    pub fn for_bundles_dir(bundles_dir: &Path) -> Result<Self> {
        Self::load(&bundles_dir.join(SHA1_FILENAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get_sha1(&self, coordinates: &str) -> Option<&str> {
        self.store.sha1.get(coordinates).map(String::as_str)
    }

    pub fn set_sha1(&mut self, coordinates: &str, sha1: &str) -> Result<()> {
        self.store
            .sha1
            .insert(coordinates.to_string(), sha1.to_string());
        self.save()
    }

    pub fn get_info(&self, coordinates: &str) -> Option<&CachedArtifactInfo> {
        self.store.nexus.get(coordinates)
    }

    /// `None` clears the entry.
    pub fn set_info(&mut self, coordinates: &str, info: Option<CachedArtifactInfo>) -> Result<()> {
        match info {
            Some(info) => {
                self.store.nexus.insert(coordinates.to_string(), info);
            }
            None => {
                self.store.nexus.remove(coordinates);
            }
        }
        self.save()
    }

    pub fn get_dependency_version(&self, killbill_version: &str) -> Option<&str> {
        self.store.killbill.get(killbill_version).map(String::as_str)
    }

    pub fn set_dependency_version(&mut self, killbill_version: &str, version: &str) -> Result<()> {
        self.store
            .killbill
            .insert(killbill_version.to_string(), version.to_string());
        self.save()
    }

    /// Forget everything known about `coordinates`.
    pub fn remove(&mut self, coordinates: &str) -> Result<()> {
        let had_sha1 = self.store.sha1.remove(coordinates).is_some();
        let had_info = self.store.nexus.remove(coordinates).is_some();
        if had_sha1 || had_info {
            self.save()?;
        }
        Ok(())
    }

    fn save(&mut self) -> Result<()> {
        let data = serde_json::to_vec_pretty(&self.store)?;
        write_atomically(&self.path, &data)
            .with_context(|| format!("Write sha1 cache {:?}", self.path))?;
        self.reload()
    }

    fn reload(&mut self) -> Result<()> {
        let data = fs::read_to_string(&self.path)
            .with_context(|| format!("Read sha1 cache {:?}", self.path))?;
        self.store = if data.trim().is_empty() {
            Sha1Store::default()
        } else {
            serde_json::from_str(&data)
                .with_context(|| format!("Parse sha1 cache {:?}", self.path))?
        };
        Ok(())
    }
}
