//! Declared dependency resolution.
//!
//! Remote coordinates download into a process-wide, append-only cache keyed
//! by coordinate, so every plugin (and every reload) after the first gets a
//! cache hit. Downloads are verified against an optional sha256 pin and
//! written atomically so a failed transfer never leaves a half-written
//! artifact behind.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};

use super::{DependencySpec, RunnerError};

/// Default registry base URL for dependency coordinates.
pub const DEFAULT_REGISTRY_URL: &str = "https://plugins.sparkplug.dev/artifacts";

/// Download timeout for one artifact.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolves `depends-on` declarations into files on disk.
pub struct DependencyResolver {
    /// Cache directory for downloaded artifacts.
    cache_dir: PathBuf,

    /// Registry base URL.
    registry_url: String,

    /// HTTP client.
    client: reqwest::blocking::Client,
}

impl DependencyResolver {
    /// Create a resolver backed by the given cache directory.
    pub fn new(cache_dir: PathBuf) -> Result<Self, RunnerError> {
        std::fs::create_dir_all(&cache_dir)?;

        let client = reqwest::blocking::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .user_agent(format!("{}/{}", crate::APP_NAME, crate::VERSION))
            .build()
            .map_err(|e| RunnerError::Network(e.to_string()))?;

        Ok(Self { cache_dir, registry_url: DEFAULT_REGISTRY_URL.to_string(), client })
    }

    /// Create a resolver with a custom registry URL.
    pub fn with_url(cache_dir: PathBuf, url: &str) -> Result<Self, RunnerError> {
        let mut resolver = Self::new(cache_dir)?;
        resolver.registry_url = url.trim_end_matches('/').to_string();
        Ok(resolver)
    }

    /// Cache directory this resolver downloads into.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Resolve one declaration into a file path.
    ///
    /// Local paths resolve relative to the plugin root and must exist.
    /// Remote coordinates resolve to the cache, downloading on first use;
    /// `extension` is the artifact extension of the plugin's language.
    pub fn resolve(
        &self,
        spec: &DependencySpec,
        plugin_root: &Path,
        extension: &str,
    ) -> Result<PathBuf, RunnerError> {
        match spec {
            DependencySpec::Local(path) => {
                let resolved =
                    if path.is_absolute() { path.clone() } else { plugin_root.join(path) };
                if !resolved.is_file() {
                    return Err(RunnerError::DependencyNotFound(resolved));
                }
                Ok(resolved)
            }
            DependencySpec::Remote { name, version, checksum } => {
                self.resolve_remote(name, version, checksum.as_deref(), extension)
            }
        }
    }

    /// Cache location of a remote artifact: `{cache}/{name}/{version}/{name}.{ext}`.
    ///
    /// The file is named after the artifact (not the coordinate) so that the
    /// file stem is the module name plugins import.
    fn cached_path(&self, name: &str, version: &str, extension: &str) -> PathBuf {
        self.cache_dir.join(name).join(version).join(format!("{name}.{extension}"))
    }

    fn resolve_remote(
        &self,
        name: &str,
        version: &str,
        checksum: Option<&str>,
        extension: &str,
    ) -> Result<PathBuf, RunnerError> {
        let cached = self.cached_path(name, version, extension);
        if cached.is_file() {
            tracing::debug!(artifact = %cached.display(), "dependency cache hit");
            return Ok(cached);
        }

        let url = format!("{}/{name}/{version}/{name}.{extension}", self.registry_url);
        tracing::info!(%url, "downloading declared dependency");

        let response =
            self.client.get(&url).send().map_err(|e| RunnerError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(RunnerError::Network(format!(
                "failed to download '{name}:{version}': HTTP {}",
                response.status()
            )));
        }
        let bytes = response.bytes().map_err(|e| RunnerError::Network(e.to_string()))?;

        if let Some(expected) = checksum {
            verify_checksum(&bytes, expected)?;
        }

        let parent = cached
            .parent()
            .ok_or_else(|| RunnerError::Internal("cache path has no parent".to_string()))?;
        std::fs::create_dir_all(parent)?;

        // Write through a temp file so concurrent readers never observe a
        // partial artifact.
        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        temp.write_all(&bytes)?;
        temp.persist(&cached).map_err(|e| RunnerError::Io(e.error))?;

        Ok(cached)
    }
}

/// Verify downloaded bytes against a sha256 pin.
fn verify_checksum(bytes: &[u8], expected: &str) -> Result<(), RunnerError> {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let actual = format!("{:x}", hasher.finalize());

    if actual == expected.to_ascii_lowercase() {
        Ok(())
    } else {
        Err(RunnerError::Validation(format!(
            "checksum mismatch: expected {expected}, got {actual}"
        )))
    }
}
