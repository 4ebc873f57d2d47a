use super::types::{UninstallResult, UninstallStatus};
use crate::artifact::cache::Sha1Cache;
use crate::artifact::coordinates::ArtifactCoordinate;
use crate::error::KpmError;
use crate::plugins::catalog::{default_group_id, default_packaging};
use crate::plugins::manager::PluginsManager;
use crate::plugins::registry::{PluginIdentifier, PluginIdentifierRegistry, PluginLanguage};
use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};
use std::path::Path;

/// Asks the user before destructive operations.
pub trait Confirm {
    fn confirm(&mut self, prompt: &str) -> bool;
}

/// Answers yes to everything.
pub struct AlwaysConfirm;

impl Confirm for AlwaysConfirm {
    fn confirm(&mut self, _prompt: &str) -> bool {
        true
    }
}

/// Interactive `[y/N]` prompt on stdin.
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&mut self, prompt: &str) -> bool {
        print!("{} [y/N] ", prompt);
        if io::stdout().flush().is_err() {
            return false;
        }
        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}

/// Plugin resolved from a key or a filesystem name.
struct Target {
    key: Option<String>,
    plugin_name: String,
    language: PluginLanguage,
    identifier: Option<PluginIdentifier>,
}

/// Hard removal of installed plugins: directories, registry entry and cached
/// checksums all go.
pub struct Uninstaller {
    manager: PluginsManager,
    registry: PluginIdentifierRegistry,
    cache: Sha1Cache,
    confirm: Box<dyn Confirm>,
}

impl Uninstaller {
    pub fn new(bundles_dir: &Path) -> Result<Self> {
        Ok(Self {
            manager: PluginsManager::new(bundles_dir),
            registry: PluginIdentifierRegistry::for_bundles_dir(bundles_dir)?,
            cache: Sha1Cache::for_bundles_dir(bundles_dir)?,
            confirm: Box::new(StdinConfirm),
        })
    }

    pub fn with_confirm(mut self, confirm: Box<dyn Confirm>) -> Self {
        self.confirm = confirm;
        self
    }

    pub fn registry(&self) -> &PluginIdentifierRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &Sha1Cache {
        &self.cache
    }

    /// Remove a plugin given its key or its on-disk name. With `version`, only
    /// that version goes and the registry entry is kept while others remain.
    pub fn uninstall(
        &mut self,
        plugin: &str,
        version: Option<&str>,
        force: bool,
    ) -> Result<Vec<UninstallResult>> {
        let targets = self.resolve(plugin)?;
        let mut results = Vec::with_capacity(targets.len());

        for target in targets {
            let installed = self
                .manager
                .installed_versions(target.language, &target.plugin_name)?;
            let versions: Vec<String> = match version {
                Some(v) if installed.iter().any(|i| i == v) => vec![v.to_string()],
                Some(v) => {
                    return Err(KpmError::validation(format!(
                        "Version {} of plugin {} is not installed (installed: {})",
                        v,
                        target.plugin_name,
                        installed.join(", ")
                    ))
                    .into())
                }
                None => installed.clone(),
            };
            let paths = versions
                .iter()
                .map(|v| {
                    self.manager
                        .version_dir(target.language, &target.plugin_name, v)
                })
                .collect();

            if !force && versions.len() > 1 {
                let prompt = format!(
                    "Remove {} plugin {} versions {}?",
                    target.language,
                    target.plugin_name,
                    versions.join(", ")
                );
                if !self.confirm.confirm(&prompt) {
                    log::info!("Not removing {}", target.plugin_name);
                    results.push(result(UninstallStatus::NotConfirmed, &target, versions, paths));
                    continue;
                }
            }

            for v in &versions {
                self.manager
                    .delete_version(target.language, &target.plugin_name, v)?;
                self.forget(&target, v)?;
            }

            let remaining = self
                .manager
                .installed_versions(target.language, &target.plugin_name)?;
            if remaining.is_empty() {
                self.manager
                    .delete_plugin(target.language, &target.plugin_name)?;
                if let Some(key) = target.key.as_deref() {
                    self.registry.remove(key)?;
                }
            }
            results.push(result(UninstallStatus::Removed, &target, versions, paths));
        }
        Ok(results)
    }

    /// Remove every version that is not the active one. Plugins without an
    /// active version are left alone.
    pub fn cleanup(&mut self, dry_run: bool) -> Result<Vec<UninstallResult>> {
        let mut results = Vec::new();
        for plugin in self.manager.installed()? {
            let Some(active) = plugin.versions.iter().find(|v| v.active) else {
                log::warn!(
                    "{} plugin {} has no active version, skipping cleanup",
                    plugin.language,
                    plugin.name
                );
                continue;
            };
            let active = active.version.clone();
            let stale: Vec<_> = plugin
                .versions
                .into_iter()
                .filter(|v| v.version != active)
                .collect();
            if stale.is_empty() {
                continue;
            }

            let target = self.target_for(plugin.language, &plugin.name);
            let versions: Vec<String> = stale.iter().map(|v| v.version.clone()).collect();
            let paths = stale.into_iter().map(|v| v.path).collect();
            if dry_run {
                log::info!("Would remove {} {:?}", plugin.name, versions);
                results.push(result(UninstallStatus::WouldRemove, &target, versions, paths));
                continue;
            }
            for v in &versions {
                self.manager.delete_version(plugin.language, &plugin.name, v)?;
                self.forget(&target, v)?;
            }
            results.push(result(UninstallStatus::Removed, &target, versions, paths));
        }
        Ok(results)
    }

    /// Registry key first, then reverse lookup by plugin name, then the
    /// filesystem alone.
    fn resolve(&mut self, plugin: &str) -> Result<Vec<Target>> {
        let registered = self
            .registry
            .get(plugin)
            .map(|entry| (plugin.to_string(), entry.clone()))
            .or_else(|| {
                self.registry
                    .find_by_plugin_name(plugin)
                    .map(|(key, entry)| (key.to_string(), entry.clone()))
            });

        if let Some((key, entry)) = registered {
            if self
                .manager
                .installed_versions(entry.language, &entry.plugin_name)?
                .is_empty()
            {
                return Err(KpmError::validation(format!(
                    "Plugin {} ({}) is registered but not installed",
                    key, entry.plugin_name
                ))
                .into());
            }
            return Ok(vec![Target {
                key: Some(key),
                plugin_name: entry.plugin_name.clone(),
                language: entry.language,
                identifier: Some(entry),
            }]);
        }

        let languages = self.manager.languages_for(plugin)?;
        if languages.is_empty() {
            return Err(KpmError::validation(format!("No plugin {} is installed", plugin)).into());
        }
        Ok(languages
            .into_iter()
            .map(|language| Target {
                key: None,
                plugin_name: plugin.to_string(),
                language,
                identifier: None,
            })
            .collect())
    }

    fn target_for(&self, language: PluginLanguage, plugin_name: &str) -> Target {
        match self.registry.find_by_plugin_name(plugin_name) {
            Some((key, entry)) if entry.language == language => Target {
                key: Some(key.to_string()),
                plugin_name: plugin_name.to_string(),
                language,
                identifier: Some(entry.clone()),
            },
            _ => Target {
                key: None,
                plugin_name: plugin_name.to_string(),
                language,
                identifier: None,
            },
        }
    }

    /// Drop the cached checksum of one removed version.
    fn forget(&mut self, target: &Target, version: &str) -> Result<()> {
        let coordinate = match target.identifier.as_ref().and_then(|i| i.coordinate()) {
            Some(coordinate) => coordinate.with_version(version),
            // Unregistered: assume the default layout
            None => ArtifactCoordinate::new(
                default_group_id(target.language),
                target.plugin_name.clone(),
                default_packaging(target.language),
                None,
                Some(version.to_string()),
            ),
        };
        self.cache
            .remove(&coordinate.build())
            .with_context(|| format!("Forget {}", coordinate))
    }
}

fn result(
    status: UninstallStatus,
    target: &Target,
    versions: Vec<String>,
    paths: Vec<std::path::PathBuf>,
) -> UninstallResult {
    UninstallResult {
        status,
        plugin_key: target.key.clone(),
        plugin_name: target.plugin_name.clone(),
        language: target.language,
        versions,
        paths,
    }
}
