//! KPM engine: resolves Kill Bill artifacts from Maven-style repositories and
//! lays out the server, Kaui and plugins on disk.

pub mod artifact;
pub mod config;
pub mod error;
pub mod installer;
pub mod plugins;
pub mod repository;
pub mod utils;

// Re-export commonly used types
pub use artifact::cache::Sha1Cache;
pub use artifact::coordinates::{is_latest, ArtifactCoordinate};
pub use artifact::fetcher::{ArtifactFetcher, Destination, FetchOptions};
pub use artifact::types::ArtifactInfo;
pub use config::{KpmConfig, RepositoryConfig};
pub use error::KpmError;
pub use installer::types::{
    ArtifactKind, InstallResult, InstallStatus, OperationRecord, UninstallResult, UninstallStatus,
};
pub use installer::uninstaller::{AlwaysConfirm, Confirm, StdinConfirm, Uninstaller};
pub use installer::Installer;
pub use plugins::catalog::PluginsDirectory;
pub use plugins::manager::{PluginTarget, PluginsManager, VersionSelector};
pub use plugins::registry::{PluginIdentifierRegistry, PluginLanguage};
pub use repository::{build_backend, RepositoryBackend};
