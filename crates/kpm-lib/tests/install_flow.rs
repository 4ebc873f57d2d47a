use flate2::write::GzEncoder;
use flate2::Compression;
use kpm_lib::config::{KauiConfig, PluginConfig, PluginsConfig, ServerConfig};
use kpm_lib::{
    build_backend, ArtifactCoordinate, ArtifactKind, InstallStatus, Installer, KpmConfig,
    KpmError, PluginLanguage, PluginTarget, PluginsManager, RepositoryConfig, Sha1Cache,
};
use sha1::{Digest, Sha1};
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ANALYTICS_DIR: &str = "/org/kill-bill/billing/plugin/java/analytics-plugin";

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn sha1_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha1::digest(bytes))
}

fn installer_for(server: &MockServer, bundles: &Path) -> Installer {
    let config = RepositoryConfig {
        retry_delay_ms: 1,
        ..RepositoryConfig::with_url(server.uri())
    };
    Installer::new(build_backend(&config).unwrap(), bundles).unwrap()
}

/// Serve `analytics-plugin-<version>.jar` and its sidecar; the jar is expected
/// to be fetched exactly `downloads` times.
async fn mount_analytics(server: &MockServer, version: &str, downloads: u64) -> Vec<u8> {
    let body = format!("analytics {}", version).into_bytes();
    let jar = format!("{}/{}/analytics-plugin-{}.jar", ANALYTICS_DIR, version, version);
    Mock::given(method("GET"))
        .and(path(format!("{}.sha1", jar)))
        .respond_with(ResponseTemplate::new(200).set_body_string(sha1_hex(&body)))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(jar))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .expect(downloads)
        .mount(server)
        .await;
    body
}

fn analytics_request() -> PluginConfig {
    PluginConfig {
        name: "analytics".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn installs_catalog_plugin_then_skips_it() {
    init_logs();
    let server = MockServer::start().await;
    let body = mount_analytics(&server, "0.7.1", 1).await;
    let bundles = TempDir::new().unwrap();
    let mut installer = installer_for(&server, bundles.path());

    let first = installer
        .install_plugin(&analytics_request(), None, Some("0.14.2"))
        .await
        .unwrap();
    assert_eq!(first.status, InstallStatus::Installed);
    assert_eq!(first.plugin_name.as_deref(), Some("analytics-plugin"));

    let jar = bundles
        .path()
        .join("plugins/java/analytics-plugin/0.7.1/analytics-plugin-0.7.1.jar");
    assert_eq!(first.path, jar);
    assert_eq!(fs::read(&jar).unwrap(), body);
    assert_eq!(
        fs::read_link(bundles.path().join("plugins/java/analytics-plugin/ACTIVE"))
            .unwrap()
            .file_name()
            .unwrap(),
        "0.7.1"
    );

    let entry = installer.registry().get("analytics").unwrap();
    assert_eq!(entry.plugin_name, "analytics-plugin");
    assert_eq!(entry.language, PluginLanguage::Java);
    assert_eq!(entry.version.as_deref(), Some("0.7.1"));

    let key = "org.kill-bill.billing.plugin.java:analytics-plugin:jar:0.7.1";
    let sha1 = sha1_hex(&body);
    assert_eq!(installer.cache().get_sha1(key), Some(sha1.as_str()));

    // A fresh installer reads the persisted cache and skips the download
    let mut again = installer_for(&server, bundles.path());
    let second = again
        .install_plugin(&analytics_request(), None, Some("0.14.2"))
        .await
        .unwrap();
    assert_eq!(second.status, InstallStatus::UpToDate);
    assert_eq!(second.path, jar);
}

#[tokio::test]
async fn force_download_refetches() {
    init_logs();
    let server = MockServer::start().await;
    mount_analytics(&server, "0.7.1", 2).await;
    let bundles = TempDir::new().unwrap();
    let mut installer = installer_for(&server, bundles.path());
    installer.set_force_download(true);

    for _ in 0..2 {
        let result = installer
            .install_plugin(&analytics_request(), None, Some("0.14.0"))
            .await
            .unwrap();
        assert_eq!(result.status, InstallStatus::Installed);
    }
}

#[tokio::test]
async fn latest_is_cached_under_its_concrete_version() {
    init_logs();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/com/acme/acme-plugin/maven-metadata.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<metadata><versioning><release>1.2.0</release>\
             <versions><version>1.1.0</version><version>1.2.0</version></versions>\
             </versioning></metadata>",
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/com/acme/acme-plugin/1.2.0/acme-plugin-1.2.0.jar"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"acme".to_vec()))
        .mount(&server)
        .await;

    let bundles = TempDir::new().unwrap();
    let mut installer = installer_for(&server, bundles.path());
    let request = PluginConfig {
        name: "acme:custom".to_string(),
        group_id: Some("com.acme".to_string()),
        artifact_id: Some("acme-plugin".to_string()),
        version: Some("LATEST".to_string()),
        ..Default::default()
    };
    let result = installer
        .install_plugin(&request, Some(PluginLanguage::Java), None)
        .await
        .unwrap();
    assert_eq!(result.version, "1.2.0");
    assert_eq!(result.coordinates, "com.acme:acme-plugin:jar:1.2.0");
    assert!(bundles
        .path()
        .join("plugins/java/acme-plugin/1.2.0/acme-plugin-1.2.0.jar")
        .exists());

    let cache = Sha1Cache::for_bundles_dir(bundles.path()).unwrap();
    assert!(cache.get_info("com.acme:acme-plugin:jar:1.2.0").is_some());
    assert!(cache.get_info("com.acme:acme-plugin:jar:LATEST").is_none());
    assert_eq!(
        installer.registry().get("acme:custom").unwrap().version.as_deref(),
        Some("1.2.0")
    );
}

#[tokio::test]
async fn second_version_takes_over_active_link() {
    init_logs();
    let server = MockServer::start().await;
    mount_analytics(&server, "0.7.0", 1).await;
    mount_analytics(&server, "0.7.1", 1).await;
    let bundles = TempDir::new().unwrap();
    let mut installer = installer_for(&server, bundles.path());

    for version in ["0.7.0", "0.7.1"] {
        installer
            .install_plugin(
                &PluginConfig {
                    version: Some(version.to_string()),
                    ..analytics_request()
                },
                None,
                None,
            )
            .await
            .unwrap();
    }

    let mut manager = PluginsManager::new(bundles.path());
    assert_eq!(
        manager.active_version(PluginLanguage::Java, "analytics-plugin").as_deref(),
        Some("0.7.1")
    );
    // The registry keeps the first install
    assert_eq!(
        installer.registry().get("analytics").unwrap().version.as_deref(),
        Some("0.7.0")
    );

    manager
        .set_active(PluginTarget::Name("analytics-plugin"), Some("0.7.0"))
        .unwrap();
    assert_eq!(
        manager.active_version(PluginLanguage::Java, "analytics-plugin").as_deref(),
        Some("0.7.0")
    );
    let installed = manager.installed().unwrap();
    assert_eq!(installed.len(), 1);
    let active: Vec<bool> = installed[0].versions.iter().map(|v| v.active).collect();
    assert_eq!(active, vec![true, false]);
}

fn write_tar_gz(path: &Path, files: &[(&str, &[u8])]) {
    let file = fs::File::create(path).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *content).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

#[tokio::test]
async fn installs_server_with_default_bundles() {
    init_logs();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(
            "/org/kill-bill/billing/killbill-profiles-killbill/maven-metadata.xml",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<metadata><versioning><latest>0.25.0-SNAPSHOT</latest>\
             <versions><version>0.22.0</version><version>0.24.0</version>\
             <version>0.25.0-rc1</version><version>0.25.0-SNAPSHOT</version></versions>\
             </versioning></metadata>",
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(
            "/org/kill-bill/billing/killbill-profiles-killbill/0.24.0/killbill-profiles-killbill-0.24.0.war",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"war".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/org/kill-bill/billing/killbill/0.24.0/killbill-0.24.0.pom"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<project><parent><artifactId>killbill-oss-parent</artifactId>\
             <version>0.146.0</version></parent></project>",
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(
            "/org/kill-bill/billing/killbill-oss-parent/0.146.0/killbill-oss-parent-0.146.0.pom",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<project><properties>\
             <killbill-platform.version>0.40.0</killbill-platform.version>\
             </properties></project>",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let work = TempDir::new().unwrap();
    let bundles_tgz = work.path().join("bundles.tar.gz");
    write_tar_gz(
        &bundles_tgz,
        &[
            (
                "defaultbundles/killbill-platform-osgi-bundles-jruby-0.40.0.jar",
                &b"jruby"[..],
            ),
            ("defaultbundles/killbill-platform-osgi-bundles-logger-0.40.0.jar", &b"logger"[..]),
        ],
    );
    Mock::given(method("GET"))
        .and(path(
            "/org/kill-bill/billing/killbill-platform-osgi-bundles-defaultbundles/0.40.0/killbill-platform-osgi-bundles-defaultbundles-0.40.0.tar.gz",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(fs::read(&bundles_tgz).unwrap()))
        .mount(&server)
        .await;

    let bundles = work.path().join("bundles");
    let webapp = work.path().join("webapps/killbill.war");
    let mut installer = installer_for(&server, &bundles);
    let server_config = ServerConfig {
        group_id: None,
        artifact_id: None,
        packaging: None,
        classifier: None,
        version: Some("LATEST".to_string()),
        webapp_path: webapp.clone(),
        plugins_dir: Some(bundles.clone()),
        plugins: Default::default(),
        default_bundles: true,
    };

    let installed = installer.install_killbill_server(&server_config).await.unwrap();
    assert_eq!(installed.version, "0.24.0");
    assert_eq!(fs::read(&webapp).unwrap(), b"war");

    let platform = installer.install_default_bundles("0.24.0").await.unwrap();
    assert_eq!(platform.version, "0.40.0");
    assert!(bundles.join("platform/jruby.jar").exists());
    assert!(bundles
        .join("platform/killbill-platform-osgi-bundles-logger-0.40.0.jar")
        .exists());
    assert_eq!(installer.cache().get_dependency_version("0.24.0"), Some("0.40.0"));

    // Platform version now comes from the cache: the poms expect one hit each
    installer.install_default_bundles("0.24.0").await.unwrap();
    assert!(bundles.join("platform/jruby.jar").exists());
}

#[tokio::test]
async fn missing_artifact_surfaces_not_found() {
    init_logs();
    let server = MockServer::start().await;
    let bundles = TempDir::new().unwrap();
    let mut installer = installer_for(&server, bundles.path());

    let err = installer
        .install_plugin(&analytics_request(), None, Some("0.14.0"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Install plugin analytics"));
    assert!(err
        .chain()
        .any(|cause| matches!(cause.downcast_ref::<KpmError>(), Some(KpmError::NotFound { .. }))));
    assert!(installer.registry().get("analytics").is_none());
    assert!(!bundles.path().join("plugins/java/analytics-plugin/ACTIVE").exists());
}

#[tokio::test]
async fn search_is_unsupported_on_github_packages() {
    let backend = build_backend(&RepositoryConfig {
        token: Some("ghp_token".to_string()),
        ..RepositoryConfig::with_url("https://maven.pkg.github.com/killbill/killbill")
    })
    .unwrap();
    let err = backend
        .search(&ArtifactCoordinate::parse("org.kill-bill.billing:killbill:pom").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<KpmError>(),
        Some(KpmError::Unsupported {
            operation: "search",
            ..
        })
    ));
}

fn fast_repository(url: String) -> RepositoryConfig {
    RepositoryConfig {
        retry_delay_ms: 1,
        ..RepositoryConfig::with_url(url)
    }
}

#[tokio::test]
async fn installs_server_plugins_and_kaui_from_config() {
    init_logs();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(
            "/org/kill-bill/billing/killbill-profiles-killbill/0.14.0/killbill-profiles-killbill-0.14.0.war",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"killbill war".to_vec()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(
            "/org/kill-bill/billing/kaui/kaui-standalone/1.0.2/kaui-standalone-1.0.2.war",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"kaui war".to_vec()))
        .expect(1)
        .mount(&server)
        .await;
    mount_analytics(&server, "0.7.1", 1).await;

    let work = TempDir::new().unwrap();
    let bundles = work.path().join("bundles");
    let config = KpmConfig {
        killbill: Some(ServerConfig {
            group_id: None,
            artifact_id: None,
            packaging: None,
            classifier: None,
            version: Some("0.14.0".to_string()),
            webapp_path: work.path().join("webapps/killbill.war"),
            plugins_dir: Some(bundles.clone()),
            plugins: PluginsConfig {
                java: vec![analytics_request()],
                ruby: vec![],
            },
            default_bundles: false,
        }),
        kaui: Some(KauiConfig {
            group_id: None,
            artifact_id: None,
            packaging: None,
            classifier: None,
            version: Some("1.0.2".to_string()),
            webapp_path: work.path().join("webapps/kaui.war"),
        }),
        repository: fast_repository(server.uri()),
        plugins_directory_url: None,
    };

    let mut installer = Installer::from_config(&config).await.unwrap();
    assert_eq!(installer.bundles_dir(), bundles.as_path());
    let results = installer.install(&config).await.unwrap();

    let kinds: Vec<ArtifactKind> = results.iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![ArtifactKind::Killbill, ArtifactKind::Plugin, ArtifactKind::Kaui]
    );
    assert!(results.iter().all(|r| r.status == InstallStatus::Installed));
    assert_eq!(fs::read(work.path().join("webapps/killbill.war")).unwrap(), b"killbill war");
    assert_eq!(fs::read(work.path().join("webapps/kaui.war")).unwrap(), b"kaui war");

    // The plugin version follows the server's major.minor
    assert_eq!(results[1].version, "0.7.1");
    assert!(bundles
        .join("plugins/java/analytics-plugin/0.7.1/analytics-plugin-0.7.1.jar")
        .exists());
    assert!(installer.registry().get("analytics").is_some());
}

#[tokio::test]
async fn kaui_latest_resolves_to_latest_stable() {
    init_logs();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/org/kill-bill/billing/kaui/kaui-standalone/maven-metadata.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<metadata><versioning><latest>2.1.0-SNAPSHOT</latest>\
             <versions><version>1.0.2</version><version>2.0.1</version>\
             <version>2.1.0-rc1</version><version>2.1.0-SNAPSHOT</version></versions>\
             </versioning></metadata>",
        ))
        .mount(&server)
        .await;
    let war = b"kaui 2.0.1".to_vec();
    let war_path = "/org/kill-bill/billing/kaui/kaui-standalone/2.0.1/kaui-standalone-2.0.1.war";
    Mock::given(method("GET"))
        .and(path(format!("{}.sha1", war_path)))
        .respond_with(ResponseTemplate::new(200).set_body_string(sha1_hex(&war)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(war_path))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(war.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let work = TempDir::new().unwrap();
    let webapp = work.path().join("kaui.war");
    let kaui = KauiConfig {
        group_id: None,
        artifact_id: None,
        packaging: None,
        classifier: None,
        version: Some("LATEST".to_string()),
        webapp_path: webapp.clone(),
    };
    let mut installer = installer_for(&server, &work.path().join("bundles"));

    let first = installer.install_kaui(&kaui).await.unwrap();
    assert_eq!(first.kind, ArtifactKind::Kaui);
    assert_eq!(first.status, InstallStatus::Installed);
    assert_eq!(first.version, "2.0.1");
    assert_eq!(first.path, webapp);
    assert_eq!(
        first.coordinates,
        "org.kill-bill.billing.kaui:kaui-standalone:war:2.0.1"
    );
    assert_eq!(fs::read(&webapp).unwrap(), war);

    // Same checksum upstream: nothing is downloaded again
    let second = installer.install_kaui(&kaui).await.unwrap();
    assert_eq!(second.status, InstallStatus::UpToDate);
}

#[tokio::test]
async fn cached_plugin_is_used_when_repository_fails() {
    init_logs();
    let bundles = TempDir::new().unwrap();
    let jar = bundles
        .path()
        .join("plugins/java/analytics-plugin/0.7.1/analytics-plugin-0.7.1.jar");

    let online = MockServer::start().await;
    let body = mount_analytics(&online, "0.7.1", 1).await;
    installer_for(&online, bundles.path())
        .install_plugin(&analytics_request(), None, Some("0.14.0"))
        .await
        .unwrap();
    drop(online);

    // Server errors are retried, then the cached copy is served
    let failing = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(".*"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&failing)
        .await;
    let mut installer = installer_for(&failing, bundles.path());
    let result = installer
        .install_plugin(&analytics_request(), None, Some("0.14.0"))
        .await
        .unwrap();
    assert_eq!(result.status, InstallStatus::UpToDate);
    assert_eq!(result.path, jar);
    assert_eq!(failing.received_requests().await.unwrap().len(), 3);

    // Nothing listening at all
    let unreachable = MockServer::start().await;
    let uri = unreachable.uri();
    drop(unreachable);
    let config = fast_repository(uri);
    let mut installer = Installer::new(build_backend(&config).unwrap(), bundles.path()).unwrap();
    let result = installer
        .install_plugin(&analytics_request(), None, Some("0.14.0"))
        .await
        .unwrap();
    assert_eq!(result.status, InstallStatus::UpToDate);
    assert_eq!(fs::read(&jar).unwrap(), body);
}

#[tokio::test]
async fn server_error_without_cache_is_reported() {
    init_logs();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(".*"))
        .respond_with(ResponseTemplate::new(504))
        .mount(&server)
        .await;
    let bundles = TempDir::new().unwrap();
    let mut installer = installer_for(&server, bundles.path());

    let err = installer
        .install_plugin(&analytics_request(), None, Some("0.14.0"))
        .await
        .unwrap_err();
    assert!(kpm_lib::error::is_retryable(&err));
    assert!(installer.registry().get("analytics").is_none());
}
