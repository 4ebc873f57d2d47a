//! Installation pipeline: resolve defaults, validate, pull through the SHA1
//! cache, then activate and register plugins.

pub mod types;
pub mod uninstaller;

use crate::artifact::archive::{extract_tar_gz, jruby_version};
use crate::artifact::cache::Sha1Cache;
use crate::artifact::coordinates::{ArtifactCoordinate, LATEST_VERSION};
use crate::artifact::fetcher::{ArtifactFetcher, Destination, FetchOptions};
use crate::config::{
    KauiConfig, KpmConfig, PluginConfig, ServerConfig, DEFAULT_BUNDLES_ARTIFACT_ID,
    DEFAULT_BUNDLES_PACKAGING, JAVA_PLUGIN_GROUP_ID, JRUBY_BUNDLE_PREFIX, JRUBY_JAR_NAME,
    KAUI_ARTIFACT_ID, KAUI_GROUP_ID, KAUI_PACKAGING, KILLBILL_ARTIFACT_ID, KILLBILL_GROUP_ID,
    KILLBILL_OSS_PARENT_ARTIFACT_ID, KILLBILL_PACKAGING, KILLBILL_PLATFORM_VERSION_PROPERTY,
    KILLBILL_POM_ARTIFACT_ID, PLATFORM_GROUP_ID, RUBY_PLUGIN_GROUP_ID,
};
use crate::error::KpmError;
use crate::plugins::catalog::{default_group_id, default_packaging, PluginsDirectory};
use crate::plugins::manager::{PluginTarget, PluginsManager};
use crate::plugins::registry::{PluginIdentifierRegistry, PluginLanguage};
use crate::repository::http::Auth;
use crate::repository::{build_backend, HttpClient, RepositoryBackend};
use crate::utils::fs::move_path;
use crate::utils::version::latest_stable;
use anyhow::{Context, Result};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use types::{ArtifactKind, InstallResult, InstallStatus};

/// Fully resolved plugin request, computed before any network call.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PluginPlan {
    key: String,
    plugin_name: String,
    language: PluginLanguage,
    coordinate: ArtifactCoordinate,
}

pub struct Installer {
    bundles_dir: PathBuf,
    fetcher: ArtifactFetcher,
    directory: PluginsDirectory,
    registry: PluginIdentifierRegistry,
    manager: PluginsManager,
    force_download: bool,
    verify_sha1: bool,
}

impl Installer {
    /// Installer over `bundles_dir` using the bundled plugins directory.
    pub fn new(backend: Arc<dyn RepositoryBackend>, bundles_dir: &Path) -> Result<Self> {
        Ok(Self {
            bundles_dir: bundles_dir.to_path_buf(),
            fetcher: ArtifactFetcher::new(backend, Sha1Cache::for_bundles_dir(bundles_dir)?),
            directory: PluginsDirectory::bundled()?,
            registry: PluginIdentifierRegistry::for_bundles_dir(bundles_dir)?,
            manager: PluginsManager::new(bundles_dir),
            force_download: false,
            verify_sha1: true,
        })
    }

    /// Backend from the repository section; the remote plugins directory is
    /// used when `plugins_directory_url` is set.
    pub async fn from_config(config: &KpmConfig) -> Result<Self> {
        let bundles_dir = config.bundles_dir();
        let backend = build_backend(&config.repository)?;
        let mut installer = Self::new(backend, &bundles_dir)?;
        if let Some(url) = config.plugins_directory_url.as_deref() {
            let http = HttpClient::new(&config.repository, url, Auth::None)?;
            installer.directory = PluginsDirectory::load(&bundles_dir, &http, url).await?;
        }
        Ok(installer)
    }

    pub fn with_plugins_directory(mut self, directory: PluginsDirectory) -> Self {
        self.directory = directory;
        self
    }

    pub fn set_force_download(&mut self, force: bool) {
        self.force_download = force;
    }

    pub fn set_verify_sha1(&mut self, verify: bool) {
        self.verify_sha1 = verify;
    }

    pub fn bundles_dir(&self) -> &Path {
        &self.bundles_dir
    }

    pub fn cache(&self) -> &Sha1Cache {
        self.fetcher.cache()
    }

    pub fn registry(&self) -> &PluginIdentifierRegistry {
        &self.registry
    }

    pub fn manager_mut(&mut self) -> &mut PluginsManager {
        &mut self.manager
    }

    fn options(&self, skip_top_dir: bool) -> FetchOptions {
        FetchOptions {
            force_download: self.force_download,
            verify_sha1: self.verify_sha1,
            skip_top_dir,
        }
    }

    /// Everything the installation file asks for, in order: server, default
    /// bundles, java plugins, ruby plugins, Kaui. Stops at the first failure.
    pub async fn install(&mut self, config: &KpmConfig) -> Result<Vec<InstallResult>> {
        let mut results = Vec::new();

        if let Some(server) = &config.killbill {
            let installed = self.install_killbill_server(server).await?;
            let killbill_version = installed.version.clone();
            results.push(installed);

            if server.default_bundles {
                results.push(self.install_default_bundles(&killbill_version).await?);
            }
            for (language, plugins) in [
                (PluginLanguage::Java, &server.plugins.java),
                (PluginLanguage::Ruby, &server.plugins.ruby),
            ] {
                for plugin in plugins {
                    results.push(
                        self.install_plugin(plugin, Some(language), Some(&killbill_version))
                            .await?,
                    );
                }
            }
        }

        if let Some(kaui) = &config.kaui {
            results.push(self.install_kaui(kaui).await?);
        }
        Ok(results)
    }

    pub async fn install_killbill_server(
        &mut self,
        server: &ServerConfig,
    ) -> Result<InstallResult> {
        let coordinate = ArtifactCoordinate::new(
            server.group_id.as_deref().unwrap_or(KILLBILL_GROUP_ID),
            server.artifact_id.as_deref().unwrap_or(KILLBILL_ARTIFACT_ID),
            server.packaging.as_deref().unwrap_or(KILLBILL_PACKAGING),
            server.classifier.clone(),
            server.version.clone(),
        );
        self.install_webapp(ArtifactKind::Killbill, coordinate, &server.webapp_path)
            .await
            .context("Install Kill Bill server")
    }

    pub async fn install_kaui(&mut self, kaui: &KauiConfig) -> Result<InstallResult> {
        let coordinate = ArtifactCoordinate::new(
            kaui.group_id.as_deref().unwrap_or(KAUI_GROUP_ID),
            kaui.artifact_id.as_deref().unwrap_or(KAUI_ARTIFACT_ID),
            kaui.packaging.as_deref().unwrap_or(KAUI_PACKAGING),
            kaui.classifier.clone(),
            kaui.version.clone(),
        );
        self.install_webapp(ArtifactKind::Kaui, coordinate, &kaui.webapp_path)
            .await
            .context("Install Kaui")
    }

    async fn install_webapp(
        &mut self,
        kind: ArtifactKind,
        coordinate: ArtifactCoordinate,
        webapp_path: &Path,
    ) -> Result<InstallResult> {
        let coordinate = self.resolve_latest_stable(coordinate).await;
        let info = self
            .fetcher
            .pull(
                &coordinate,
                &Destination::File(webapp_path.to_path_buf()),
                self.options(false),
            )
            .await?;
        log::info!("{} {} installed at {:?}", coordinate.artifact_id, info.version, webapp_path);
        Ok(InstallResult::from_artifact(kind, &coordinate, &info))
    }

    /// Replace LATEST by the highest stable published version. When the
    /// backend cannot list versions, LATEST is left for `get_info` to resolve.
    async fn resolve_latest_stable(&self, coordinate: ArtifactCoordinate) -> ArtifactCoordinate {
        if !coordinate.wants_latest() {
            return coordinate;
        }
        match self.fetcher.backend().versions(&coordinate).await {
            Ok(versions) => match latest_stable(&versions) {
                Some(version) => {
                    log::debug!("Latest stable {} is {}", coordinate.artifact_id, version);
                    coordinate.with_version(version)
                }
                None => coordinate.with_version(LATEST_VERSION),
            },
            Err(e) => {
                log::warn!(
                    "Unable to list versions of {}, falling back to repository LATEST: {:#}",
                    coordinate,
                    e
                );
                coordinate.with_version(LATEST_VERSION)
            }
        }
    }

    /// Install one plugin, by catalog key or explicit coordinates. `language`
    /// is the section the request came from, if any.
    pub async fn install_plugin(
        &mut self,
        request: &PluginConfig,
        language: Option<PluginLanguage>,
        killbill_version: Option<&str>,
    ) -> Result<InstallResult> {
        let plan = self
            .plan_plugin(request, language, killbill_version)
            .with_context(|| format!("Install plugin {}", request.name))?;
        self.install_planned(plan)
            .await
            .with_context(|| format!("Install plugin {}", request.name))
    }

    fn plan_plugin(
        &self,
        request: &PluginConfig,
        language: Option<PluginLanguage>,
        killbill_version: Option<&str>,
    ) -> Result<PluginPlan, KpmError> {
        let key = request.name.trim();
        if key.is_empty() {
            return Err(KpmError::validation("A plugin key is required"));
        }

        let lookup = self.directory.lookup(key, killbill_version);
        match self.directory.get(key) {
            Some(entry) => {
                check_conflict(
                    key,
                    "group_id",
                    request.group_id.as_deref(),
                    entry.group_id.as_deref(),
                )?;
                check_conflict(
                    key,
                    "artifact_id",
                    request.artifact_id.as_deref(),
                    entry.artifact_id.as_deref(),
                )?;
                check_conflict(
                    key,
                    "packaging",
                    request.packaging.as_deref(),
                    entry.packaging.as_deref(),
                )?;
                check_conflict(
                    key,
                    "classifier",
                    request.classifier.as_deref(),
                    entry.classifier.as_deref(),
                )?;
                check_conflict(
                    key,
                    "type",
                    language.map(|l| l.dir_name()),
                    Some(entry.language.dir_name()),
                )?;
            }
            None => {
                let default_group = matches!(
                    request.group_id.as_deref(),
                    Some(JAVA_PLUGIN_GROUP_ID) | Some(RUBY_PLUGIN_GROUP_ID)
                );
                if !default_group && !key.contains(':') {
                    return Err(KpmError::validation(format!(
                        "Plugin key {} is not in the plugins directory, \
                         it must be namespaced (e.g. namespace:{})",
                        key, key
                    )));
                }
            }
        }

        let language = lookup
            .as_ref()
            .map(|l| l.language)
            .or(language)
            .unwrap_or(PluginLanguage::Java);

        // The catalog artifact id maps short keys (stripe -> stripe-plugin)
        let artifact_id = lookup
            .as_ref()
            .map(|l| l.artifact_id.clone())
            .or_else(|| request.artifact_id.clone())
            .ok_or_else(|| {
                KpmError::validation(format!(
                    "Unable to determine the artifact id of plugin {}",
                    key
                ))
            })?;

        let group_id = request
            .group_id
            .clone()
            .or_else(|| lookup.as_ref().map(|l| l.group_id.clone()))
            .unwrap_or_else(|| default_group_id(language).to_string());
        let packaging = request
            .packaging
            .clone()
            .or_else(|| lookup.as_ref().map(|l| l.packaging.clone()))
            .unwrap_or_else(|| default_packaging(language).to_string());
        let classifier = request
            .classifier
            .clone()
            .or_else(|| lookup.as_ref().and_then(|l| l.classifier.clone()));
        let version = request
            .version
            .clone()
            .or_else(|| lookup.as_ref().map(|l| l.version.clone()))
            .unwrap_or_else(|| LATEST_VERSION.to_string());

        Ok(PluginPlan {
            key: key.to_string(),
            plugin_name: request.plugin_name.clone().unwrap_or_else(|| artifact_id.clone()),
            language,
            coordinate: ArtifactCoordinate::new(
                group_id,
                artifact_id,
                packaging,
                classifier,
                Some(version),
            ),
        })
    }

    async fn install_planned(&mut self, plan: PluginPlan) -> Result<InstallResult> {
        // The version directory needs the concrete version up front
        let coordinate = if plan.coordinate.wants_latest() {
            let resolved = self.fetcher.backend().get_info(&plan.coordinate).await?;
            plan.coordinate.with_version(resolved.version)
        } else {
            plan.coordinate.clone()
        };
        let version = coordinate.version.clone().unwrap_or_default();

        if plan.language == PluginLanguage::Ruby {
            self.check_jruby();
        }

        let version_dir = self
            .manager
            .version_dir(plan.language, &plan.plugin_name, &version);
        let info = self
            .fetcher
            .pull(
                &coordinate,
                &Destination::Directory(version_dir.clone()),
                self.options(plan.language == PluginLanguage::Ruby),
            )
            .await?;

        self.manager.invalidate();
        self.manager
            .set_active(PluginTarget::Path(&version_dir), None)?;

        self.registry.validate(&plan.key, &coordinate);
        self.registry
            .add(&plan.key, &plan.plugin_name, plan.language, Some(&coordinate))?;

        log::info!(
            "Plugin {} ({}) {} installed at {:?}",
            plan.key,
            plan.plugin_name,
            info.version,
            version_dir
        );
        Ok(
            InstallResult::from_artifact(ArtifactKind::Plugin, &coordinate, &info).for_plugin(
                &plan.key,
                &plan.plugin_name,
                plan.language,
            ),
        )
    }

    fn check_jruby(&self) {
        let jar = self.bundles_dir.join("platform").join(JRUBY_JAR_NAME);
        if !jar.exists() {
            log::warn!(
                "{:?} not found, ruby plugins need the default bundles to be installed",
                jar
            );
            return;
        }
        match jruby_version(&jar) {
            Ok(Some(version)) => log::debug!("Found jruby {} at {:?}", version, jar),
            Ok(None) => log::warn!("Unable to determine the jruby version of {:?}", jar),
            Err(e) => log::warn!("Unable to read {:?}: {:#}", jar, e),
        }
    }

    /// Install a local jar or tar.gz under an explicit name and version.
    /// Nothing is recorded in the download cache.
    pub fn install_plugin_from_fs(
        &mut self,
        file: &Path,
        name: &str,
        version: &str,
        language: PluginLanguage,
    ) -> Result<InstallResult> {
        if name.is_empty() || version.is_empty() {
            return Err(KpmError::validation("A plugin name and version are required").into());
        }
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("{:?} is not a file", file))?;

        let version_dir = self.manager.version_dir(language, name, version);
        if version_dir.exists() {
            fs::remove_dir_all(&version_dir)
                .with_context(|| format!("Clear {:?}", version_dir))?;
        }
        fs::create_dir_all(&version_dir)
            .with_context(|| format!("Create {:?}", version_dir))?;

        let path = if file_name.ends_with(".tar.gz") || file_name.ends_with(".tgz") {
            extract_tar_gz(file, &version_dir, true)?;
            version_dir.clone()
        } else {
            let target = version_dir.join(&file_name);
            fs::copy(file, &target).with_context(|| format!("Copy {:?} to {:?}", file, target))?;
            target
        };

        self.manager.invalidate();
        self.manager
            .set_active(PluginTarget::Path(&version_dir), None)?;
        self.registry.add(name, name, language, None)?;

        log::info!("Plugin {} {} installed from {:?}", name, version, file);
        Ok(InstallResult {
            status: InstallStatus::Installed,
            kind: ArtifactKind::Plugin,
            plugin_key: Some(name.to_string()),
            plugin_name: Some(name.to_string()),
            language: Some(language),
            version: version.to_string(),
            path,
            coordinates: file.display().to_string(),
        })
    }

    /// Platform bundles matching the server release, unpacked into
    /// `<bundles>/platform`.
    pub async fn install_default_bundles(
        &mut self,
        killbill_version: &str,
    ) -> Result<InstallResult> {
        let platform_version = match self.platform_version(killbill_version).await {
            Ok(version) => version,
            Err(e) => {
                log::warn!(
                    "Unable to find the platform version of Kill Bill {}, using LATEST: {:#}",
                    killbill_version,
                    e
                );
                LATEST_VERSION.to_string()
            }
        };

        let coordinate = ArtifactCoordinate::new(
            PLATFORM_GROUP_ID,
            DEFAULT_BUNDLES_ARTIFACT_ID,
            DEFAULT_BUNDLES_PACKAGING,
            None,
            Some(platform_version),
        );
        let platform_dir = self.bundles_dir.join("platform");
        let info = self
            .fetcher
            .pull(
                &coordinate,
                &Destination::Directory(platform_dir.clone()),
                self.options(true),
            )
            .await
            .context("Install default bundles")?;

        rename_jruby_bundle(&platform_dir)?;
        Ok(InstallResult::from_artifact(ArtifactKind::DefaultBundles, &coordinate, &info))
    }

    /// Cached, else read from the server pom's parent.
    async fn platform_version(&mut self, killbill_version: &str) -> Result<String> {
        if let Some(version) = self.fetcher.cache().get_dependency_version(killbill_version) {
            return Ok(version.to_string());
        }

        let server_pom = ArtifactCoordinate::new(
            KILLBILL_GROUP_ID,
            KILLBILL_POM_ARTIFACT_ID,
            "pom",
            None,
            Some(killbill_version.to_string()),
        );
        let pom = self.read_pom(&server_pom).await?;
        let parent_version = parse_parent_version(&pom)
            .with_context(|| format!("No parent version in {}", server_pom))?;

        let parent_pom = ArtifactCoordinate::new(
            KILLBILL_GROUP_ID,
            KILLBILL_OSS_PARENT_ARTIFACT_ID,
            "pom",
            None,
            Some(parent_version),
        );
        let parent = self.read_pom(&parent_pom).await?;
        let version = parse_pom_property(&parent, KILLBILL_PLATFORM_VERSION_PROPERTY)
            .with_context(|| {
                format!("No {} property in {}", KILLBILL_PLATFORM_VERSION_PROPERTY, parent_pom)
            })?;

        log::info!("Kill Bill {} uses platform {}", killbill_version, version);
        self.fetcher
            .cache_mut()
            .set_dependency_version(killbill_version, &version)?;
        Ok(version)
    }

    async fn read_pom(&self, coordinate: &ArtifactCoordinate) -> Result<String> {
        let staging = tempfile::tempdir().context("Create pom staging dir")?;
        let info = self
            .fetcher
            .backend()
            .pull(coordinate, staging.path(), self.verify_sha1)
            .await?;
        let path = info
            .file_path
            .unwrap_or_else(|| staging.path().join(&info.file_name));
        fs::read_to_string(&path).with_context(|| format!("Read {:?}", path))
    }
}

fn check_conflict(
    key: &str,
    field: &str,
    requested: Option<&str>,
    catalog: Option<&str>,
) -> Result<(), KpmError> {
    match (requested, catalog) {
        (Some(requested), Some(catalog)) if requested != catalog => {
            Err(KpmError::validation(format!(
                "Plugin {}: {} {} conflicts with {} from the plugins directory",
                key, field, requested, catalog
            )))
        }
        _ => Ok(()),
    }
}

fn parse_parent_version(pom: &str) -> Option<String> {
    let re = Regex::new(r"(?s)<parent>.*?<version>\s*([^<\s]+)\s*</version>.*?</parent>").ok()?;
    re.captures(pom).map(|c| c[1].to_string())
}

fn parse_pom_property(pom: &str, property: &str) -> Option<String> {
    let name = regex::escape(property);
    let re = Regex::new(&format!(r"<{}>\s*([^<\s]+)\s*</{}>", name, name)).ok()?;
    re.captures(pom).map(|c| c[1].to_string())
}

/// The jruby bundle ships versioned; ruby plugins expect `jruby.jar`.
fn rename_jruby_bundle(platform_dir: &Path) -> Result<()> {
    let Ok(entries) = fs::read_dir(platform_dir) else {
        return Ok(());
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(JRUBY_BUNDLE_PREFIX) && name.ends_with(".jar") {
            let target = platform_dir.join(JRUBY_JAR_NAME);
            move_path(&entry.path(), &target)?;
            log::debug!("Renamed {} to {}", name, JRUBY_JAR_NAME);
            break;
        }
    }
    Ok(())
}
