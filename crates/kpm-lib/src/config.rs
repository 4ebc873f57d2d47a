//! Installer settings.
//! Static constants for the Kill Bill artifact coordinates and on-disk layout, plus the
//! serde-backed repository and installation configuration.

use crate::repository::BackendKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BUNDLES_DIR: &str = "/var/tmp/bundles";
pub const SHA1_FILENAME: &str = "sha1.json";
pub const PLUGIN_IDENTIFIERS_FILENAME: &str = "plugin_identifiers.json";
pub const PLUGINS_DIRECTORY_CACHE_FILENAME: &str = "plugins_directory.json";

// Network defaults
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
pub const MAX_REDIRECTS: usize = 10;
pub const CATALOG_CACHE_HOURS: i64 = 24;

// URL Constants
pub const MAVEN_CENTRAL_URL: &str = "https://repo1.maven.org/maven2";
pub const MAVEN_CENTRAL_SEARCH_URL: &str = "https://search.maven.org/solrsearch/select";
pub const GITHUB_PACKAGES_HOST: &str = "maven.pkg.github.com";
pub const CLOUDSMITH_HOST: &str = "dl.cloudsmith.io";

// Kill Bill server
pub const KILLBILL_GROUP_ID: &str = "org.kill-bill.billing";
pub const KILLBILL_ARTIFACT_ID: &str = "killbill-profiles-killbill";
pub const KILLBILL_PACKAGING: &str = "war";
pub const KILLBILL_POM_ARTIFACT_ID: &str = "killbill";
pub const KILLBILL_OSS_PARENT_ARTIFACT_ID: &str = "killbill-oss-parent";
pub const KILLBILL_PLATFORM_VERSION_PROPERTY: &str = "killbill-platform.version";

// Kaui
pub const KAUI_GROUP_ID: &str = "org.kill-bill.billing.kaui";
pub const KAUI_ARTIFACT_ID: &str = "kaui-standalone";
pub const KAUI_PACKAGING: &str = "war";

// Plugins
pub const JAVA_PLUGIN_GROUP_ID: &str = "org.kill-bill.billing.plugin.java";
pub const JAVA_PLUGIN_PACKAGING: &str = "jar";
pub const RUBY_PLUGIN_GROUP_ID: &str = "org.kill-bill.billing.plugin.ruby";
pub const RUBY_PLUGIN_PACKAGING: &str = "tar.gz";

// Platform default bundles
pub const PLATFORM_GROUP_ID: &str = "org.kill-bill.billing";
pub const DEFAULT_BUNDLES_ARTIFACT_ID: &str = "killbill-platform-osgi-bundles-defaultbundles";
pub const DEFAULT_BUNDLES_PACKAGING: &str = "tar.gz";
pub const JRUBY_BUNDLE_PREFIX: &str = "killbill-platform-osgi-bundles-jruby";
pub const JRUBY_JAR_NAME: &str = "jruby.jar";

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

/// Connection settings for one repository backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Explicit backend; inferred from `url` when absent.
    #[serde(default)]
    pub kind: Option<BackendKind>,
    #[serde(default)]
    pub url: Option<String>,
    /// Logical repository name (Nexus only).
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_true")]
    pub ssl_verify: bool,
    /// Seconds
    #[serde(default = "default_timeout")]
    pub open_timeout: u64,
    /// Seconds
    #[serde(default = "default_timeout")]
    pub read_timeout: u64,
    #[serde(default)]
    pub search_url: Option<String>,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            kind: None,
            url: None,
            repository: None,
            username: None,
            password: None,
            token: None,
            ssl_verify: true,
            open_timeout: DEFAULT_TIMEOUT_SECS,
            read_timeout: DEFAULT_TIMEOUT_SECS,
            search_url: None,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

impl RepositoryConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// The configured backend, or the one implied by the URL shape.
    pub fn backend_kind(&self) -> BackendKind {
        if let Some(kind) = self.kind {
            return kind;
        }
        match self.url.as_deref() {
            None => BackendKind::MavenCentral,
            Some(url) if url.contains(GITHUB_PACKAGES_HOST) => BackendKind::GithubPackages,
            Some(url) if url.contains(CLOUDSMITH_HOST) => BackendKind::Cloudsmith,
            Some(url) if url.contains("repo1.maven.org") || url.contains("repo.maven.apache.org") => {
                BackendKind::MavenCentral
            }
            Some(_) if self.repository.is_some() => BackendKind::Nexus,
            Some(_) => BackendKind::MavenCentral,
        }
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout)
    }
}

/// One plugin entry in the installation file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Plugin key, as listed in the plugins directory (optionally `namespace:key`).
    pub name: String,
    #[serde(default)]
    pub plugin_name: Option<String>,
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

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginsConfig {
    #[serde(default)]
    pub java: Vec<PluginConfig>,
    #[serde(default)]
    pub ruby: Vec<PluginConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
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
    pub webapp_path: PathBuf,
    #[serde(default)]
    pub plugins_dir: Option<PathBuf>,
    #[serde(default)]
    pub plugins: PluginsConfig,
    #[serde(default = "default_true")]
    pub default_bundles: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KauiConfig {
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
    pub webapp_path: PathBuf,
}

/// Top-level installation file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KpmConfig {
    #[serde(default)]
    pub killbill: Option<ServerConfig>,
    #[serde(default)]
    pub kaui: Option<KauiConfig>,
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub plugins_directory_url: Option<String>,
}

impl KpmConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Read configuration file {:?}", path))?;
        serde_json::from_str(&data).with_context(|| format!("Parse configuration file {:?}", path))
    }

    pub fn bundles_dir(&self) -> PathBuf {
        self.killbill
            .as_ref()
            .and_then(|kb| kb.plugins_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BUNDLES_DIR))
    }
}
