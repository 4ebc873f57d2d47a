use crate::config::{RepositoryConfig, MAX_REDIRECTS};
use crate::error::{is_retryable, KpmError};
use anyhow::{Context, Result};
use futures::StreamExt;
use reqwest::header::LOCATION;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use sha1::{Digest, Sha1};
use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::fs::{create_dir_all, File};
use tokio::io::AsyncWriteExt;
use url::Url;

/// Credentials attached to requests sent to the configured repository host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
    None,
    Basic {
        username: String,
        password: Option<String>,
    },
    Bearer(String),
}

impl Auth {
    /// `token` wins over `username`/`password`.
    pub fn from_config(config: &RepositoryConfig) -> Self {
        if let Some(token) = config.token.clone() {
            Auth::Bearer(token)
        } else if let Some(username) = config.username.clone() {
            Auth::Basic {
                username,
                password: config.password.clone(),
            }
        } else {
            Auth::None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downloaded {
    pub size: u64,
    pub sha1: String,
}

/// HTTP plumbing shared by every backend: auth, manual redirects across hosts,
/// failure classification and retries with linear backoff.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    auth: Auth,
    origin: Option<(String, Option<u16>)>,
    read_timeout: Duration,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl HttpClient {
    pub fn new(config: &RepositoryConfig, base_url: &str, auth: Auth) -> Result<Self> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(config.open_timeout())
            .danger_accept_invalid_certs(!config.ssl_verify)
            .user_agent(concat!("kpm/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        let origin = Url::parse(base_url)
            .ok()
            .and_then(|u| origin_of(&u));

        Ok(Self {
            client,
            auth,
            origin,
            read_timeout: config.read_timeout(),
            retry_attempts: config.retry_attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        })
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts are used up. Waits `retry_delay * attempt` between tries.
    pub async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.retry_attempts && is_retryable(&e) => {
                    log::warn!(
                        "{} failed (attempt {}/{}): {}. Retrying...",
                        what,
                        attempt,
                        self.retry_attempts,
                        e
                    );
                    tokio::time::sleep(self.retry_delay * attempt).await;
                }
                Err(e) => {
                    if attempt > 1 {
                        log::error!("{} failed after {} attempts: {}", what, attempt, e);
                    }
                    return Err(e);
                }
            }
        }
    }

    pub async fn get_text(&self, url: &str) -> Result<String> {
        self.with_retry(url, || self.get_text_once(url)).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let body = self.get_text(url).await?;
        serde_json::from_str(&body).map_err(|e| {
            KpmError::InvalidResponse {
                url: url.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    pub async fn get_xml<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let body = self.get_text(url).await?;
        serde_xml_rs::from_str(&body).map_err(|e| {
            KpmError::InvalidResponse {
                url: url.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Stream `url` into `path` via a `.part` file, verifying the SHA1 when given.
    pub async fn download_to_file(
        &self,
        url: &str,
        path: &Path,
        expected_sha1: Option<&str>,
    ) -> Result<Downloaded> {
        self.with_retry(url, || self.download_once(url, path, expected_sha1))
            .await
            .with_context(|| format!("Failed to download {}", url))
    }

    async fn get_text_once(&self, url: &str) -> Result<String> {
        let response = self.get(url).await?;
        let body = tokio::time::timeout(self.read_timeout, response.text())
            .await
            .map_err(|_| transient(url, "read timed out"))?
            .map_err(|e| transient(url, e))?;
        Ok(body)
    }

    async fn download_once(
        &self,
        url: &str,
        path: &Path,
        expected_sha1: Option<&str>,
    ) -> Result<Downloaded> {
        let start = Instant::now();
        let response = self.get(url).await?;

        if let Some(parent) = path.parent() {
            create_dir_all(parent)
                .await
                .with_context(|| format!("Create directory {:?}", parent))?;
        }
        let tmp_name = format!(
            "{}.part",
            path.file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("download")
        );
        let tmp_path = path.with_file_name(tmp_name);
        let mut file = File::create(&tmp_path)
            .await
            .with_context(|| format!("Create {:?}", tmp_path))?;
        let mut hasher = Sha1::new();
        let mut size: u64 = 0;

        let mut stream = response.bytes_stream();
        loop {
            let next = tokio::time::timeout(self.read_timeout, stream.next())
                .await
                .map_err(|_| transient(url, "read timed out"))?;
            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(|e| transient(url, e))?;
            file.write_all(&chunk).await?;
            hasher.update(&chunk);
            size += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let computed = format!("{:x}", hasher.finalize());
        if let Some(expected) = expected_sha1 {
            if !computed.eq_ignore_ascii_case(expected) {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return Err(KpmError::Sha1Mismatch {
                    file: path.display().to_string(),
                    expected: expected.to_string(),
                    actual: computed,
                }
                .into());
            }
            log::debug!("SHA1 validated: {}", computed);
        }

        tokio::fs::rename(&tmp_path, path)
            .await
            .with_context(|| format!("Move {:?} into place", tmp_path))?;

        log::info!(
            "Download stats: url={}, size={} bytes, time={:.2}s",
            url,
            size,
            start.elapsed().as_secs_f64()
        );
        Ok(Downloaded {
            size,
            sha1: computed,
        })
    }

    /// Single GET, following redirects by hand so that credentials stay on the
    /// configured host while CDN hops still work.
    async fn get(&self, url: &str) -> Result<Response, KpmError> {
        let mut current = Url::parse(url).map_err(|e| KpmError::InvalidResponse {
            url: url.to_string(),
            reason: format!("invalid URL: {}", e),
        })?;

        for _ in 0..=MAX_REDIRECTS {
            let mut request = self.client.get(current.clone());
            if self.is_origin(&current) {
                request = match &self.auth {
                    Auth::None => request,
                    Auth::Basic { username, password } => {
                        request.basic_auth(username, password.as_deref())
                    }
                    Auth::Bearer(token) => request.bearer_auth(token),
                };
            }

            let response = tokio::time::timeout(self.read_timeout, request.send())
                .await
                .map_err(|_| transient(current.as_str(), "request timed out"))?
                .map_err(|e| transient(current.as_str(), e))?;
            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| KpmError::InvalidResponse {
                        url: current.to_string(),
                        reason: format!("{} without Location header", status),
                    })?;
                let next = current.join(location).map_err(|e| KpmError::InvalidResponse {
                    url: current.to_string(),
                    reason: format!("bad redirect target '{}': {}", location, e),
                })?;
                log::debug!("Following redirect {} -> {}", current, next);
                current = next;
                continue;
            }

            return match status {
                s if s.is_success() => Ok(response),
                StatusCode::NOT_FOUND => Err(KpmError::NotFound {
                    url: current.to_string(),
                }),
                s if s.is_server_error() => Err(transient(current.as_str(), s)),
                s => Err(KpmError::UnexpectedStatus {
                    status: s.as_u16(),
                    url: current.to_string(),
                }),
            };
        }

        Err(KpmError::TooManyRedirects {
            url: url.to_string(),
            max: MAX_REDIRECTS,
        })
    }

    fn is_origin(&self, url: &Url) -> bool {
        match (&self.origin, origin_of(url)) {
            (Some(origin), Some(candidate)) => *origin == candidate,
            _ => false,
        }
    }
}

fn origin_of(url: &Url) -> Option<(String, Option<u16>)> {
    url.host_str()
        .map(|host| (host.to_ascii_lowercase(), url.port_or_known_default()))
}

fn transient(url: &str, reason: impl std::fmt::Display) -> KpmError {
    KpmError::TransientNetwork {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}
