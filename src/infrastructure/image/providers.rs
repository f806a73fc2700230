//! Byte provider adapters: local files and HTTP.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, trace};

use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::ByteProviderPort;

/// Default HTTP request timeout in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Reads originals from the local file system.
///
/// Absolute identifiers are used as-is; relative ones resolve under `root`.
/// A leading `file://` is stripped.
#[derive(Debug, Clone)]
pub struct FileByteProvider {
    root: PathBuf,
}

impl FileByteProvider {
    /// Creates a provider resolving relative identifiers under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory for relative identifiers.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, identifier: &str) -> PathBuf {
        let stripped = identifier.strip_prefix("file://").unwrap_or(identifier);
        let path = Path::new(stripped);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl Default for FileByteProvider {
    fn default() -> Self {
        Self::new(".")
    }
}

#[async_trait]
impl ByteProviderPort for FileByteProvider {
    async fn fetch(&self, identifier: &str) -> CacheResult<Bytes> {
        let path = self.resolve(identifier);
        trace!(path = %path.display(), "Reading source file");
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| CacheError::from_io(&path.display().to_string(), &e))?;
        Ok(Bytes::from(data))
    }
}

/// Downloads originals over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpByteProvider {
    client: reqwest::Client,
}

impl HttpByteProvider {
    /// Creates a provider whose requests time out after `timeout_secs`.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(timeout_secs: u64) -> CacheResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| CacheError::NetworkError(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ByteProviderPort for HttpByteProvider {
    async fn fetch(&self, identifier: &str) -> CacheResult<Bytes> {
        let response = self
            .client
            .get(identifier)
            .send()
            .await
            .map_err(|e| CacheError::NetworkError(format!("Request failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(CacheError::NotFound(identifier.to_string()));
        }
        if !status.is_success() {
            return Err(CacheError::NetworkError(format!(
                "HTTP {}: {}",
                status,
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CacheError::NetworkError(format!("Failed to read body: {e}")))?;
        debug!(url = identifier, len = bytes.len(), "Downloaded source");
        Ok(bytes)
    }
}

fn is_remote(identifier: &str) -> bool {
    let lower = identifier.get(..8).unwrap_or(identifier).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Sends `http(s)://` identifiers to one provider and everything else to
/// another.
#[derive(Clone)]
pub struct RoutingByteProvider {
    local: Arc<dyn ByteProviderPort>,
    remote: Arc<dyn ByteProviderPort>,
}

impl RoutingByteProvider {
    /// Creates a router over explicit providers.
    #[must_use]
    pub fn new(local: Arc<dyn ByteProviderPort>, remote: Arc<dyn ByteProviderPort>) -> Self {
        Self { local, remote }
    }

    /// File system under `root` plus HTTP with the given timeout.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn standard(root: impl Into<PathBuf>, http_timeout_secs: u64) -> CacheResult<Self> {
        Ok(Self::new(
            Arc::new(FileByteProvider::new(root)),
            Arc::new(HttpByteProvider::new(http_timeout_secs)?),
        ))
    }
}

impl std::fmt::Debug for RoutingByteProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingByteProvider").finish_non_exhaustive()
    }
}

#[async_trait]
impl ByteProviderPort for RoutingByteProvider {
    async fn fetch(&self, identifier: &str) -> CacheResult<Bytes> {
        if is_remote(identifier) {
            self.remote.fetch(identifier).await
        } else {
            self.local.fetch(identifier).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use test_case::test_case;

    use crate::domain::ports::MockByteProviderPort;

    #[tokio::test]
    async fn test_file_provider_resolves_relative_and_absolute() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("clips")).unwrap();
        std::fs::write(temp_dir.path().join("clips/a.png"), b"abc").unwrap();
        let provider = FileByteProvider::new(temp_dir.path());

        assert_eq!(provider.fetch("clips/a.png").await.unwrap(), Bytes::from_static(b"abc"));

        let absolute = temp_dir.path().join("clips/a.png");
        let absolute = absolute.to_str().unwrap();
        assert_eq!(provider.fetch(absolute).await.unwrap().len(), 3);
        assert_eq!(
            provider.fetch(&format!("file://{absolute}")).await.unwrap().len(),
            3
        );
    }

    #[tokio::test]
    async fn test_file_provider_missing_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let provider = FileByteProvider::new(temp_dir.path());

        let err = provider.fetch("nope.png").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_http_provider_connection_failure() {
        let provider = HttpByteProvider::new(2).unwrap();
        let err = provider.fetch("http://127.0.0.1:9/clip.png").await.unwrap_err();
        assert!(matches!(err, CacheError::NetworkError(_)));
    }

    #[test_case("https://example.com/a.png", true ; "https")]
    #[test_case("HTTP://example.com/a.png", true ; "upper case scheme")]
    #[test_case("file:///tmp/a.png", false ; "file url")]
    #[test_case("clips/http.png", false ; "relative path")]
    #[test_case("", false ; "empty")]
    fn test_is_remote(identifier: &str, expected: bool) {
        assert_eq!(is_remote(identifier), expected);
    }

    #[tokio::test]
    async fn test_routing_dispatches_by_scheme() {
        let mut local = MockByteProviderPort::new();
        local
            .expect_fetch()
            .withf(|id| id == "clips/a.png")
            .times(1)
            .returning(|_| Ok(Bytes::from_static(b"local")));
        let mut remote = MockByteProviderPort::new();
        remote
            .expect_fetch()
            .withf(|id| id.starts_with("https://"))
            .times(1)
            .returning(|_| Ok(Bytes::from_static(b"remote")));

        let router = RoutingByteProvider::new(Arc::new(local), Arc::new(remote));

        assert_eq!(router.fetch("clips/a.png").await.unwrap(), "local");
        assert_eq!(router.fetch("https://cdn.example/a.png").await.unwrap(), "remote");
    }
}
