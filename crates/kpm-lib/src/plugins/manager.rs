use super::registry::PluginLanguage;
use crate::error::KpmError;
use crate::utils::version::compare_versions;
use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

pub const ACTIVE_LINK: &str = "ACTIVE";
pub const STOP_MARKER: &str = "stop.txt";
pub const RESTART_MARKER: &str = "restart.txt";
const MARKER_DIR: &str = "tmp";

/// What an operation applies to: an explicit directory, or every plugin
/// named this way (java and ruby are searched independently).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginTarget<'a> {
    Path(&'a Path),
    Name(&'a str),
}

impl std::fmt::Display for PluginTarget<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginTarget::Path(p) => write!(f, "{}", p.display()),
            PluginTarget::Name(n) => f.write_str(n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSelector {
    Version(String),
    All,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledVersion {
    pub version: String,
    pub path: PathBuf,
    pub active: bool,
    /// `tmp/stop.txt` present
    pub disabled: bool,
    /// `tmp/restart.txt` present
    pub restart_pending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPlugin {
    pub language: PluginLanguage,
    pub name: String,
    pub path: PathBuf,
    pub versions: Vec<InstalledVersion>,
}

type PluginIndex = BTreeMap<(PluginLanguage, String), BTreeSet<String>>;

/// On-disk plugin layout under `<bundles>/plugins/{java,ruby}/<name>/<version>`,
/// with the per-plugin `ACTIVE` link and per-version marker files.
///
/// Lookups go through an index built on first use and dropped after every
/// operation that adds or removes directories.
#[derive(Debug)]
pub struct PluginsManager {
    plugins_root: PathBuf,
    index: Option<PluginIndex>,
}

impl PluginsManager {
    pub fn new(bundles_dir: &Path) -> Self {
        Self {
            plugins_root: bundles_dir.join("plugins"),
            index: None,
        }
    }

    pub fn plugins_root(&self) -> &Path {
        &self.plugins_root
    }

    pub fn plugin_dir(&self, language: PluginLanguage, name: &str) -> PathBuf {
        self.plugins_root.join(language.dir_name()).join(name)
    }

    pub fn version_dir(&self, language: PluginLanguage, name: &str, version: &str) -> PathBuf {
        self.plugin_dir(language, name).join(version)
    }

    /// Forget the cached directory scan.
    pub fn invalidate(&mut self) {
        self.index = None;
    }

    fn index(&mut self) -> Result<&PluginIndex> {
        if self.index.is_none() {
            self.index = Some(scan(&self.plugins_root)?);
        }
        Ok(self.index.get_or_insert_with(PluginIndex::new))
    }

    /// Languages under which `name` is installed.
    pub fn languages_for(&mut self, name: &str) -> Result<Vec<PluginLanguage>> {
        Ok(self
            .index()?
            .keys()
            .filter(|(_, n)| n == name)
            .map(|(lang, _)| *lang)
            .collect())
    }

    /// Installed versions, oldest first.
    pub fn installed_versions(
        &mut self,
        language: PluginLanguage,
        name: &str,
    ) -> Result<Vec<String>> {
        let mut versions: Vec<String> = self
            .index()?
            .get(&(language, name.to_string()))
            .map(|v| v.iter().cloned().collect())
            .unwrap_or_default();
        versions.sort_by(|a, b| compare_versions(a, b));
        Ok(versions)
    }

    /// Version the plugin's `ACTIVE` link points at.
    pub fn active_version(&self, language: PluginLanguage, name: &str) -> Option<String> {
        let link = self.plugin_dir(language, name).join(ACTIVE_LINK);
        let target = fs::read_link(link).ok()?;
        target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    }

    /// Every plugin and version on disk with its active/marker state.
    pub fn installed(&mut self) -> Result<Vec<InstalledPlugin>> {
        let keys: Vec<(PluginLanguage, String)> = self.index()?.keys().cloned().collect();
        let mut plugins = Vec::with_capacity(keys.len());
        for (language, name) in keys {
            let active = self.active_version(language, &name);
            let versions = self
                .installed_versions(language, &name)?
                .into_iter()
                .map(|version| {
                    let path = self.version_dir(language, &name, &version);
                    let markers = path.join(MARKER_DIR);
                    InstalledVersion {
                        active: active.as_deref() == Some(version.as_str()),
                        disabled: markers.join(STOP_MARKER).exists(),
                        restart_pending: markers.join(RESTART_MARKER).exists(),
                        version,
                        path,
                    }
                })
                .collect();
            plugins.push(InstalledPlugin {
                path: self.plugin_dir(language, &name),
                language,
                name,
                versions,
            });
        }
        Ok(plugins)
    }

    /// Point `ACTIVE` at the target version, clearing its markers.
    /// Returns the version directories that were activated.
    pub fn set_active(
        &mut self,
        target: PluginTarget<'_>,
        version: Option<&str>,
    ) -> Result<Vec<PathBuf>> {
        let selector = match (target, version) {
            (_, Some(v)) => Some(VersionSelector::Version(v.to_string())),
            (PluginTarget::Path(_), None) => None,
            (PluginTarget::Name(name), None) => {
                return Err(KpmError::validation(format!(
                    "A version is required to activate plugin {}",
                    name
                ))
                .into())
            }
        };
        let matches = self.resolve(target, selector.as_ref())?;
        if matches.is_empty() {
            self.warn_no_match(target, version)?;
            return Ok(matches);
        }

        for version_dir in &matches {
            let plugin_dir = version_dir
                .parent()
                .with_context(|| format!("{:?} has no plugin directory", version_dir))?;
            let link = plugin_dir.join(ACTIVE_LINK);

            // Remove then create: a crash in between leaves no ACTIVE link
            remove_link(&link)?;
            create_dir_link(version_dir, &link)?;
            log::info!("Activated {:?}", version_dir);

            let markers = version_dir.join(MARKER_DIR);
            remove_if_exists(&markers.join(STOP_MARKER))?;
            remove_if_exists(&markers.join(RESTART_MARKER))?;
        }
        Ok(matches)
    }

    /// Soft-disable: flag versions as stopped without touching their files.
    pub fn uninstall(
        &mut self,
        target: PluginTarget<'_>,
        selector: &VersionSelector,
    ) -> Result<Vec<PathBuf>> {
        let matches = self.resolve(target, Some(selector))?;
        if matches.is_empty() {
            self.warn_no_match(target, selector_version(selector))?;
            return Ok(matches);
        }
        for version_dir in &matches {
            let markers = version_dir.join(MARKER_DIR);
            touch(&markers.join(STOP_MARKER))?;
            remove_if_exists(&markers.join(RESTART_MARKER))?;
            log::info!("Disabled {:?}", version_dir);
        }
        Ok(matches)
    }

    /// Ask the host runtime to restart a version.
    pub fn restart(&mut self, target: PluginTarget<'_>, version: &str) -> Result<Vec<PathBuf>> {
        let selector = VersionSelector::Version(version.to_string());
        let matches = self.resolve(target, Some(&selector))?;
        if matches.is_empty() {
            self.warn_no_match(target, Some(version))?;
            return Ok(matches);
        }
        for version_dir in &matches {
            let markers = version_dir.join(MARKER_DIR);
            touch(&markers.join(RESTART_MARKER))?;
            remove_if_exists(&markers.join(STOP_MARKER))?;
            log::info!("Flagged {:?} for restart", version_dir);
        }
        Ok(matches)
    }

    /// Installed plugin name for an artifact id: `foo-plugin` is looked up as
    /// `foo`, then as the artifact id itself, then as a `-foo`/`foo-` fragment.
    pub fn guess_plugin_name(&mut self, artifact_id: &str) -> Result<Option<String>> {
        let short = artifact_id.strip_suffix("-plugin").unwrap_or(artifact_id);
        let names: BTreeSet<String> = self.index()?.keys().map(|(_, n)| n.clone()).collect();

        if names.contains(short) {
            return Ok(Some(short.to_string()));
        }
        if names.contains(artifact_id) {
            return Ok(Some(artifact_id.to_string()));
        }
        let prefix = format!("{}-", short);
        let suffix = format!("-{}", short);
        Ok(names
            .into_iter()
            .find(|n| n.contains(&prefix) || n.contains(&suffix)))
    }

    /// Hard-delete one version, dropping `ACTIVE` when it pointed there.
    pub fn delete_version(
        &mut self,
        language: PluginLanguage,
        name: &str,
        version: &str,
    ) -> Result<()> {
        let dir = self.version_dir(language, name, version);
        if self.active_version(language, name).as_deref() == Some(version) {
            remove_link(&self.plugin_dir(language, name).join(ACTIVE_LINK))?;
        }
        if dir.exists() {
            fs::remove_dir_all(&dir).with_context(|| format!("Remove {:?}", dir))?;
            log::info!("Removed {:?}", dir);
        }

        // Drop the plugin directory once its last version is gone
        let plugin_dir = self.plugin_dir(language, name);
        let remaining = fs::read_dir(&plugin_dir)
            .map(|entries| entries.filter_map(|e| e.ok()).count())
            .unwrap_or(0);
        if remaining == 0 && plugin_dir.exists() {
            fs::remove_dir(&plugin_dir).with_context(|| format!("Remove {:?}", plugin_dir))?;
        }
        self.invalidate();
        Ok(())
    }

    /// Hard-delete a plugin with all its versions.
    pub fn delete_plugin(&mut self, language: PluginLanguage, name: &str) -> Result<()> {
        let dir = self.plugin_dir(language, name);
        if dir.exists() {
            fs::remove_dir_all(&dir).with_context(|| format!("Remove {:?}", dir))?;
            log::info!("Removed {:?}", dir);
        }
        self.invalidate();
        Ok(())
    }

    fn resolve(
        &mut self,
        target: PluginTarget<'_>,
        selector: Option<&VersionSelector>,
    ) -> Result<Vec<PathBuf>> {
        match target {
            PluginTarget::Path(path) => Ok(resolve_path(path, selector)),
            PluginTarget::Name(name) => {
                let mut matches = Vec::new();
                for language in PluginLanguage::ALL {
                    let versions = self.installed_versions(language, name)?;
                    for version in versions {
                        let selected = match selector {
                            Some(VersionSelector::Version(v)) => *v == version,
                            Some(VersionSelector::All) | None => true,
                        };
                        if selected {
                            matches.push(self.version_dir(language, name, &version));
                        }
                    }
                }
                Ok(matches)
            }
        }
    }

    fn warn_no_match(&mut self, target: PluginTarget<'_>, version: Option<&str>) -> Result<()> {
        let installed: Vec<String> = self
            .installed()?
            .iter()
            .map(|p| {
                let versions: Vec<&str> = p.versions.iter().map(|v| v.version.as_str()).collect();
                format!("{}/{} [{}]", p.language, p.name, versions.join(", "))
            })
            .collect();
        log::warn!(
            "No plugin matched {} (version {}). Installed plugins: {}",
            target,
            version.unwrap_or("any"),
            if installed.is_empty() {
                "none".to_string()
            } else {
                installed.join("; ")
            }
        );
        Ok(())
    }
}

fn selector_version(selector: &VersionSelector) -> Option<&str> {
    match selector {
        VersionSelector::Version(v) => Some(v.as_str()),
        VersionSelector::All => None,
    }
}

fn is_plugin_dir(path: &Path) -> bool {
    path.parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .map(|n| PluginLanguage::ALL.iter().any(|l| l.dir_name() == n))
        .unwrap_or(false)
}

/// Version directories designated by an explicit path, which may point at the
/// plugin directory or at one of its versions.
fn resolve_path(path: &Path, selector: Option<&VersionSelector>) -> Vec<PathBuf> {
    let (plugin_dir, version_dir) = if is_plugin_dir(path) {
        (path.to_path_buf(), None)
    } else {
        (
            path.parent().map(Path::to_path_buf).unwrap_or_default(),
            Some(path.to_path_buf()),
        )
    };

    let candidates: Vec<PathBuf> = match (selector, version_dir) {
        (Some(VersionSelector::All), _) => version_dirs(&plugin_dir),
        (Some(VersionSelector::Version(v)), None) => vec![plugin_dir.join(v)],
        (_, Some(dir)) => vec![dir],
        (None, None) => Vec::new(),
    };
    candidates.into_iter().filter(|p| p.is_dir()).collect()
}

fn version_dirs(plugin_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(plugin_dir) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.path())
        .collect();
    dirs.sort();
    dirs
}

fn scan(plugins_root: &Path) -> Result<PluginIndex> {
    let mut index = PluginIndex::new();
    for language in PluginLanguage::ALL {
        let lang_dir = plugins_root.join(language.dir_name());
        if !lang_dir.is_dir() {
            continue;
        }
        for plugin in fs::read_dir(&lang_dir).with_context(|| format!("Read {:?}", lang_dir))? {
            let plugin = plugin?;
            if !plugin.file_type()?.is_dir() {
                continue;
            }
            let name = plugin.file_name().to_string_lossy().into_owned();
            let versions: BTreeSet<String> = version_dirs(&plugin.path())
                .iter()
                .filter_map(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .collect();
            index.insert((language, name), versions);
        }
    }
    log::debug!("Indexed {} plugins under {:?}", index.len(), plugins_root);
    Ok(index)
}

fn touch(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Create {:?}", parent))?;
    }
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Touch {:?}", path))?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Remove {:?}", path)),
    }
}

fn remove_link(link: &Path) -> Result<()> {
    let Ok(meta) = fs::symlink_metadata(link) else {
        return Ok(());
    };
    let result = if meta.file_type().is_symlink() || meta.is_file() {
        fs::remove_file(link).or_else(|_| fs::remove_dir(link))
    } else {
        fs::remove_dir_all(link)
    };
    result.with_context(|| format!("Remove {:?}", link))
}

#[cfg(unix)]
fn create_dir_link(target: &Path, link: &Path) -> Result<()> {
    let target = dunce::canonicalize(target).unwrap_or_else(|_| target.to_path_buf());
    std::os::unix::fs::symlink(&target, link)
        .with_context(|| format!("Link {:?} -> {:?}", link, target))
}

#[cfg(windows)]
fn create_dir_link(target: &Path, link: &Path) -> Result<()> {
    let target = dunce::canonicalize(target).unwrap_or_else(|_| target.to_path_buf());
    std::os::windows::fs::symlink_dir(&target, link)
        .with_context(|| format!("Link {:?} -> {:?}", link, target))
}
