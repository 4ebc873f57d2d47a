use super::archive::extract_tar_gz;
use super::cache::Sha1Cache;
use super::coordinates::ArtifactCoordinate;
use super::types::{ArtifactInfo, CachedArtifactInfo, ResolvedArtifact};
use crate::error::is_retryable;
use crate::repository::RepositoryBackend;
use crate::utils::fs::move_path;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where a pulled artifact ends up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Keep the repository file name inside this directory. Archives are
    /// extracted into it.
    Directory(PathBuf),
    /// Exact target file (plain artifacts only; archives treat it as a directory).
    File(PathBuf),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    pub force_download: bool,
    pub verify_sha1: bool,
    pub skip_top_dir: bool,
}

/// Pulls artifacts through a backend, consulting the SHA1 cache to skip
/// downloads whose remote checksum has not changed.
pub struct ArtifactFetcher {
    backend: Arc<dyn RepositoryBackend>,
    cache: Sha1Cache,
}

struct Target {
    dir: PathBuf,
    /// `None` for archives
    file: Option<PathBuf>,
    file_name: String,
}

impl ArtifactFetcher {
    pub fn new(backend: Arc<dyn RepositoryBackend>, cache: Sha1Cache) -> Self {
        Self { backend, cache }
    }

    pub fn backend(&self) -> &Arc<dyn RepositoryBackend> {
        &self.backend
    }

    pub fn cache(&self) -> &Sha1Cache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut Sha1Cache {
        &mut self.cache
    }

    pub async fn pull(
        &mut self,
        coordinate: &ArtifactCoordinate,
        destination: &Destination,
        options: FetchOptions,
    ) -> Result<ArtifactInfo> {
        let resolved = match self.backend.get_info(coordinate).await {
            Ok(resolved) => resolved,
            Err(e) if is_retryable(&e) => {
                if let Some(info) = self.offline_info(coordinate, destination) {
                    log::warn!(
                        "Repository unreachable ({}), using cached {} at {:?}",
                        e,
                        coordinate,
                        info.dir_path
                    );
                    return Ok(info);
                }
                return Err(e).with_context(|| format!("Resolve {}", coordinate));
            }
            Err(e) => return Err(e).with_context(|| format!("Resolve {}", coordinate)),
        };

        // The cache is keyed by the concrete version, never LATEST
        let concrete = coordinate.with_version(resolved.version.clone());
        let key = concrete.build();
        let target = target_for(&concrete, &resolved.version, destination);

        if !options.force_download && self.is_up_to_date(&key, &resolved, &target) {
            log::info!("{} is up to date, skipping download", key);
            return Ok(self.skipped_info(&concrete, &resolved, &target));
        }

        let info = self
            .download(&concrete, &resolved, &target, options)
            .await
            .with_context(|| format!("Pull {}", key))?;

        if let Some(sha1) = info.sha1.as_deref() {
            self.cache.set_sha1(&key, sha1)?;
        }
        self.cache
            .set_info(&key, Some(CachedArtifactInfo::from(&info)))?;
        Ok(info)
    }

    fn is_up_to_date(&self, key: &str, resolved: &ResolvedArtifact, target: &Target) -> bool {
        let present = target.file.as_deref().unwrap_or(&target.dir).exists();
        if !present {
            return false;
        }
        match (resolved.sha1.as_deref(), self.cache.get_sha1(key)) {
            (Some(remote), Some(local)) => remote.eq_ignore_ascii_case(local),
            (Some(_), None) => false,
            // No remote checksum: trust whatever was installed last time
            (None, _) => self.cache.get_info(key).is_some(),
        }
    }

    async fn download(
        &self,
        coordinate: &ArtifactCoordinate,
        resolved: &ResolvedArtifact,
        target: &Target,
        options: FetchOptions,
    ) -> Result<ArtifactInfo> {
        let staging = tempfile::tempdir().context("Create download staging dir")?;
        let downloaded = self
            .backend
            .download(coordinate, resolved, staging.path(), options.verify_sha1)
            .await?;
        let staged_file = downloaded
            .file_path
            .clone()
            .unwrap_or_else(|| staging.path().join(&downloaded.file_name));

        match target.file.as_deref() {
            None => {
                if target.dir.exists() {
                    fs::remove_dir_all(&target.dir)
                        .with_context(|| format!("Clear {:?}", target.dir))?;
                }
                fs::create_dir_all(&target.dir)
                    .with_context(|| format!("Create {:?}", target.dir))?;
                let bundle_dir = extract_tar_gz(&staged_file, &target.dir, options.skip_top_dir)?;
                Ok(ArtifactInfo {
                    file_name: target.file_name.clone(),
                    file_path: None,
                    dir_path: target.dir.clone(),
                    bundle_dir,
                    ..downloaded
                })
            }
            Some(file) => {
                move_path(&staged_file, file)?;
                Ok(ArtifactInfo {
                    file_name: target.file_name.clone(),
                    file_path: Some(file.to_path_buf()),
                    dir_path: target.dir.clone(),
                    bundle_dir: target.dir.clone(),
                    ..downloaded
                })
            }
        }
    }

    fn skipped_info(
        &self,
        coordinate: &ArtifactCoordinate,
        resolved: &ResolvedArtifact,
        target: &Target,
    ) -> ArtifactInfo {
        let size = target
            .file
            .as_deref()
            .and_then(|f| fs::metadata(f).ok())
            .map(|m| m.len())
            .unwrap_or(0);
        ArtifactInfo {
            version: resolved.version.clone(),
            sha1: resolved.sha1.clone(),
            repository_path: Some(resolved.repository_path.clone()),
            file_name: target.file_name.clone(),
            file_path: target.file.clone(),
            dir_path: target.dir.clone(),
            size,
            is_tgz: coordinate.is_tgz(),
            bundle_dir: target.dir.clone(),
            skipped: true,
        }
    }

    /// Last known install of a concrete coordinate, when still on disk.
    fn offline_info(
        &self,
        coordinate: &ArtifactCoordinate,
        destination: &Destination,
    ) -> Option<ArtifactInfo> {
        let version = coordinate.concrete_version()?;
        let cached = self.cache.get_info(&coordinate.build())?;
        let target = target_for(coordinate, version, destination);
        if !target.file.as_deref().unwrap_or(&target.dir).exists() {
            return None;
        }
        let resolved = ResolvedArtifact {
            version: cached.version.clone(),
            sha1: cached.sha1.clone(),
            repository_path: cached.repository_path.clone().unwrap_or_default(),
            is_snapshot: ResolvedArtifact::is_snapshot_version(&cached.version),
        };
        Some(self.skipped_info(coordinate, &resolved, &target))
    }
}

fn target_for(coordinate: &ArtifactCoordinate, version: &str, destination: &Destination) -> Target {
    let default_name = coordinate.file_name(version);
    match destination {
        Destination::Directory(dir) | Destination::File(dir) if coordinate.is_tgz() => Target {
            dir: dir.clone(),
            file: None,
            file_name: default_name,
        },
        Destination::Directory(dir) => Target {
            dir: dir.clone(),
            file: Some(dir.join(&default_name)),
            file_name: default_name,
        },
        Destination::File(path) => Target {
            dir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            file: Some(path.clone()),
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or(default_name),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::archive::tests::write_tar_gz;
    use crate::artifact::types::SearchHit;
    use crate::error::KpmError;
    use crate::repository::BackendKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// In-memory backend serving one artifact whose LATEST is 0.7.1.
    struct FakeBackend {
        sha1: Option<String>,
        payload: PathBuf,
        downloads: AtomicUsize,
        offline: AtomicBool,
    }

    impl FakeBackend {
        fn new(payload: PathBuf, sha1: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                sha1: sha1.map(str::to_string),
                payload,
                downloads: AtomicUsize::new(0),
                offline: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl RepositoryBackend for FakeBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::MavenCentral
        }

        async fn search(&self, _: &ArtifactCoordinate) -> Result<Vec<SearchHit>> {
            Ok(vec![])
        }

        async fn get_info(&self, coordinate: &ArtifactCoordinate) -> Result<ResolvedArtifact> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(KpmError::TransientNetwork {
                    url: "fake".to_string(),
                    reason: "connection refused".to_string(),
                }
                .into());
            }
            let version = coordinate.concrete_version().unwrap_or("0.7.1").to_string();
            Ok(ResolvedArtifact {
                repository_path: coordinate.repository_path(&version),
                version,
                sha1: self.sha1.clone(),
                is_snapshot: false,
            })
        }

        async fn versions(&self, _: &ArtifactCoordinate) -> Result<Vec<String>> {
            Ok(vec!["0.7.1".to_string()])
        }

        async fn download(
            &self,
            coordinate: &ArtifactCoordinate,
            resolved: &ResolvedArtifact,
            destination_dir: &Path,
            _verify_sha1: bool,
        ) -> Result<ArtifactInfo> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            let file_name = coordinate.file_name(&resolved.version);
            let file_path = destination_dir.join(&file_name);
            fs::copy(&self.payload, &file_path)?;
            Ok(ArtifactInfo {
                version: resolved.version.clone(),
                sha1: resolved.sha1.clone().or(Some("computed".to_string())),
                repository_path: Some(resolved.repository_path.clone()),
                file_name,
                size: fs::metadata(&file_path)?.len(),
                file_path: Some(file_path),
                dir_path: destination_dir.to_path_buf(),
                is_tgz: coordinate.is_tgz(),
                bundle_dir: destination_dir.to_path_buf(),
                skipped: false,
            })
        }
    }

    fn jar_coordinate(version: &str) -> ArtifactCoordinate {
        ArtifactCoordinate::parse(&format!(
            "org.kill-bill.billing.plugin.java:analytics-plugin:jar:{}",
            version
        ))
        .unwrap()
    }

    fn setup(sha1: Option<&str>) -> (tempfile::TempDir, Arc<FakeBackend>, ArtifactFetcher) {
        let tmp = tempdir().unwrap();
        let payload = tmp.path().join("payload.jar");
        fs::write(&payload, b"jar-bytes").unwrap();
        let backend = FakeBackend::new(payload, sha1);
        let cache = Sha1Cache::for_bundles_dir(tmp.path()).unwrap();
        let fetcher = ArtifactFetcher::new(backend.clone(), cache);
        (tmp, backend, fetcher)
    }

    #[tokio::test]
    async fn second_pull_is_skipped() {
        let (tmp, backend, mut fetcher) = setup(Some("abc"));
        let dest = Destination::Directory(tmp.path().join("plugins"));
        let options = FetchOptions::default();

        let first = fetcher.pull(&jar_coordinate("0.7.1"), &dest, options).await.unwrap();
        assert!(!first.skipped);
        assert!(first.file_path.as_ref().unwrap().exists());

        let second = fetcher.pull(&jar_coordinate("0.7.1"), &dest, options).await.unwrap();
        assert!(second.skipped);
        assert_eq!(second.size, 9);
        assert_eq!(backend.downloads.load(Ordering::SeqCst), 1);
        assert_eq!(
            fetcher.cache().get_sha1(&jar_coordinate("0.7.1").build()),
            Some("abc")
        );
    }

    #[tokio::test]
    async fn force_download_always_fetches() {
        let (tmp, backend, mut fetcher) = setup(Some("abc"));
        let dest = Destination::Directory(tmp.path().join("plugins"));
        let forced = FetchOptions {
            force_download: true,
            ..Default::default()
        };
        fetcher.pull(&jar_coordinate("0.7.1"), &dest, forced).await.unwrap();
        let again = fetcher.pull(&jar_coordinate("0.7.1"), &dest, forced).await.unwrap();
        assert!(!again.skipped);
        assert_eq!(backend.downloads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn latest_is_cached_under_concrete_version() {
        let (tmp, _backend, mut fetcher) = setup(Some("abc"));
        let dest = Destination::Directory(tmp.path().join("plugins"));
        let info = fetcher
            .pull(&jar_coordinate("LATEST"), &dest, FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(info.version, "0.7.1");
        assert_eq!(info.file_name, "analytics-plugin-0.7.1.jar");
        assert!(fetcher.cache().get_sha1(&jar_coordinate("0.7.1").build()).is_some());
        assert!(fetcher.cache().get_sha1(&jar_coordinate("LATEST").build()).is_none());
    }

    #[tokio::test]
    async fn changed_remote_sha1_triggers_download() {
        let (tmp, backend, mut fetcher) = setup(Some("abc"));
        let dest = Destination::Directory(tmp.path().join("plugins"));
        fetcher
            .pull(&jar_coordinate("0.7.1"), &dest, FetchOptions::default())
            .await
            .unwrap();
        fetcher
            .cache_mut()
            .set_sha1(&jar_coordinate("0.7.1").build(), "stale")
            .unwrap();
        let info = fetcher
            .pull(&jar_coordinate("0.7.1"), &dest, FetchOptions::default())
            .await
            .unwrap();
        assert!(!info.skipped);
        assert_eq!(backend.downloads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn file_destination_renames_artifact() {
        let (tmp, _backend, mut fetcher) = setup(None);
        let target = tmp.path().join("webapps").join("killbill.war");
        let info = fetcher
            .pull(
                &jar_coordinate("0.7.1"),
                &Destination::File(target.clone()),
                FetchOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(info.file_path.as_deref(), Some(target.as_path()));
        assert_eq!(info.file_name, "killbill.war");
        assert_eq!(fs::read(&target).unwrap(), b"jar-bytes");
    }

    #[tokio::test]
    async fn archives_are_extracted() {
        let tmp = tempdir().unwrap();
        let payload = tmp.path().join("payload.tar.gz");
        write_tar_gz(
            &payload,
            &[("bundle-1.0/ROOT/config.ru", "run", 0o644)],
            &[],
        );
        let backend = FakeBackend::new(payload, Some("def"));
        let cache = Sha1Cache::for_bundles_dir(tmp.path()).unwrap();
        let mut fetcher = ArtifactFetcher::new(backend, cache);

        let coordinate =
            ArtifactCoordinate::parse("org.kill-bill.billing.plugin.ruby:stripe-plugin:tar.gz:1.0")
                .unwrap();
        let dir = tmp.path().join("plugins/ruby/stripe-plugin/1.0");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("stale.txt"), "old").unwrap();

        let info = fetcher
            .pull(
                &coordinate,
                &Destination::Directory(dir.clone()),
                FetchOptions {
                    skip_top_dir: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(info.is_tgz);
        assert_eq!(info.file_path, None);
        assert_eq!(info.bundle_dir, dir.join("ROOT"));
        assert!(dir.join("ROOT/config.ru").exists());
        assert!(!dir.join("stale.txt").exists());
    }

    #[tokio::test]
    async fn falls_back_to_cache_when_offline() {
        let (tmp, backend, mut fetcher) = setup(Some("abc"));
        let dest = Destination::Directory(tmp.path().join("plugins"));
        fetcher
            .pull(&jar_coordinate("0.7.1"), &dest, FetchOptions::default())
            .await
            .unwrap();

        backend.offline.store(true, Ordering::SeqCst);
        let info = fetcher
            .pull(&jar_coordinate("0.7.1"), &dest, FetchOptions::default())
            .await
            .unwrap();
        assert!(info.skipped);

        let err = fetcher
            .pull(&jar_coordinate("LATEST"), &dest, FetchOptions::default())
            .await
            .unwrap_err();
        assert!(is_retryable(&err));
    }
}
