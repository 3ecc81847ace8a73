//! Runtime installer: fetches and verifies the runtime version a run will
//! test packages against, retrying the download the way [`RetryExecutor`]
//! retries a flaky publish step.

use std::collections::HashMap;
use std::io::Read as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use ecotest_retry::{RetryExecutor, RetryStrategyConfig};

/// One version's entry in the on-disk runtime catalogue: either a local
/// file to verify in place, or a URL to fetch and then verify. Both forms
/// carry the checksum the downloaded/read bytes must match.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogueEntry {
    pub url: Option<String>,
    pub file: Option<PathBuf>,
    pub sha256: String,
}

/// The `Runtime-version catalogue` descriptor: version string -> entry.
/// `Deserialize` comes straight from the map impl — the TOML document is
/// just a table of version keys, no wrapping field.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(transparent)]
pub struct RuntimeCatalogue {
    versions: HashMap<String, CatalogueEntry>,
}

impl RuntimeCatalogue {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime catalogue {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("failed to parse runtime catalogue {}", path.display()))
    }

    pub fn entry(&self, version: &str) -> Result<&CatalogueEntry> {
        self.versions.get(version).ok_or_else(|| anyhow::anyhow!("runtime version {version} is not catalogued"))
    }
}

/// Reads `file` entries straight off disk; fetches `url` entries over HTTP.
/// A version with neither set is a malformed catalogue entry, not a
/// download failure, so it is rejected before ever touching the network.
pub struct CatalogueDownloader {
    catalogue: RuntimeCatalogue,
}

impl CatalogueDownloader {
    pub fn new(catalogue: RuntimeCatalogue) -> Self {
        Self { catalogue }
    }
}

impl RuntimeDownloader for CatalogueDownloader {
    fn download(&self, version: &str) -> Result<Vec<u8>> {
        let entry = self.catalogue.entry(version)?;
        if let Some(file) = &entry.file {
            return std::fs::read(file).with_context(|| format!("failed to read local runtime archive {}", file.display()));
        }
        let url = entry
            .url
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("catalogue entry for {version} has neither `file` nor `url`"))?;
        let response = ureq::get(url).call().with_context(|| format!("failed to fetch runtime archive from {url}"))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .with_context(|| format!("failed to read response body from {url}"))?;
        Ok(bytes)
    }
}

/// Fetches one runtime version's distribution archive bytes. Production
/// code hits a real download URL; tests substitute an in-memory fake so the
/// retry loop can be exercised deterministically.
pub trait RuntimeDownloader: Send + Sync {
    fn download(&self, version: &str) -> Result<Vec<u8>>;
}

/// Marks a version directory as fully installed and verified, so a repeat
/// run doesn't re-download it.
const INSTALLED_MARKER: &str = ".installed";

pub struct RuntimeInstaller {
    downloader: Box<dyn RuntimeDownloader>,
    cache_dir: PathBuf,
    retry: RetryExecutor,
}

impl RuntimeInstaller {
    pub fn new(downloader: Box<dyn RuntimeDownloader>, cache_dir: impl Into<PathBuf>, retry_config: RetryStrategyConfig) -> Self {
        Self { downloader, cache_dir: cache_dir.into(), retry: RetryExecutor::new(retry_config) }
    }

    /// Ensure `version` is present and checksummed under the cache dir,
    /// downloading (with retry) if it isn't, and return its install path.
    ///
    /// `expected_sha256`, when given, is checked against the downloaded
    /// archive before it is unpacked. A mismatch is surfaced as an `Err`
    /// from inside the retried closure, so — like a transient network
    /// error — it burns through the configured retry budget before this
    /// call gives up; a persistently corrupt upstream artifact therefore
    /// costs the full budget rather than failing on the first attempt.
    pub fn ensure_installed(&self, version: &str, expected_sha256: Option<&str>) -> Result<PathBuf> {
        let version_dir = self.cache_dir.join(version);
        if version_dir.join(INSTALLED_MARKER).exists() {
            return Ok(version_dir);
        }

        let archive = self
            .retry
            .run(|attempt| self.download_and_verify(version, expected_sha256, attempt))
            .with_context(|| format!("failed to install runtime {version} after retries"))?;

        std::fs::create_dir_all(&version_dir)
            .with_context(|| format!("failed to create {}", version_dir.display()))?;
        unpack(&archive, &version_dir)?;
        std::fs::write(version_dir.join(INSTALLED_MARKER), "")
            .with_context(|| format!("failed to mark {} installed", version_dir.display()))?;

        Ok(version_dir)
    }

    fn download_and_verify(&self, version: &str, expected_sha256: Option<&str>, attempt: u32) -> Result<Vec<u8>> {
        let bytes = self
            .downloader
            .download(version)
            .with_context(|| format!("download attempt {attempt} for runtime {version} failed"))?;

        if let Some(expected) = expected_sha256 {
            let actual = checksum(&bytes);
            if !actual.eq_ignore_ascii_case(expected) {
                bail!("checksum mismatch for runtime {version}: expected {expected}, got {actual}");
            }
        }
        Ok(bytes)
    }
}

fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Archives are opaque payloads in this crate's tests; a real installer
/// would unpack a tarball here. Writing the raw bytes out keeps the
/// contract ("something ends up under `version_dir`") without pulling in a
/// compression crate the rest of this repo has no other use for.
fn unpack(archive: &[u8], version_dir: &Path) -> Result<()> {
    std::fs::write(version_dir.join("runtime.payload"), archive)
        .with_context(|| format!("failed to write runtime payload into {}", version_dir.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct FlakyDownloader {
        succeed_on_attempt: u32,
        calls: AtomicU32,
        payload: Vec<u8>,
    }

    impl RuntimeDownloader for FlakyDownloader {
        fn download(&self, _version: &str) -> Result<Vec<u8>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call < self.succeed_on_attempt {
                bail!("transient network error");
            }
            Ok(self.payload.clone())
        }
    }

    struct RecordingDownloader {
        seen: Mutex<Vec<String>>,
    }

    impl RuntimeDownloader for RecordingDownloader {
        fn download(&self, version: &str) -> Result<Vec<u8>> {
            self.seen.lock().unwrap().push(version.to_string());
            Ok(b"payload".to_vec())
        }
    }

    fn fast_retry() -> RetryStrategyConfig {
        let mut config = ecotest_retry::RetryPolicy::Default.to_config();
        config.base_delay = std::time::Duration::from_millis(1);
        config.max_delay = std::time::Duration::from_millis(1);
        config
    }

    #[test]
    fn retries_until_download_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Box::new(FlakyDownloader {
            succeed_on_attempt: 3,
            calls: AtomicU32::new(0),
            payload: b"fake-archive".to_vec(),
        });
        let installer = RuntimeInstaller::new(downloader, dir.path(), fast_retry());
        let path = installer.ensure_installed("1.9.0", None).unwrap();
        assert!(path.join(INSTALLED_MARKER).exists());
    }

    #[test]
    fn checksum_mismatch_exhausts_retries_and_surfaces_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Box::new(RecordingDownloader { seen: Mutex::new(Vec::new()) });
        let installer = RuntimeInstaller::new(downloader, dir.path(), fast_retry());
        let result = installer.ensure_installed("1.9.0", Some("0000000000000000000000000000000000000000000000000000000000000000"));
        assert!(result.is_err());
    }

    #[test]
    fn already_installed_version_is_not_re_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        let calls = std::sync::Arc::new(AtomicU32::new(0));
        struct CountingDownloader(std::sync::Arc<AtomicU32>);
        impl RuntimeDownloader for CountingDownloader {
            fn download(&self, _version: &str) -> Result<Vec<u8>> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(b"payload".to_vec())
            }
        }
        let installer = RuntimeInstaller::new(Box::new(CountingDownloader(calls.clone())), dir.path(), fast_retry());

        let first = installer.ensure_installed("1.9.0", None).unwrap();
        let second = installer.ensure_installed("1.9.0", None).unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn catalogue_downloader_reads_local_file_entries() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("runtime-1.9.0.tar");
        std::fs::write(&archive_path, b"local-archive-bytes").unwrap();

        let toml = format!(
            "[\"1.9.0\"]\nfile = \"{}\"\nsha256 = \"{}\"\n",
            archive_path.display(),
            checksum(b"local-archive-bytes"),
        );
        let catalogue: RuntimeCatalogue = toml::from_str(&toml).unwrap();
        let entry = catalogue.entry("1.9.0").unwrap();
        let downloader = CatalogueDownloader::new(catalogue.clone());

        let bytes = downloader.download("1.9.0").unwrap();
        assert_eq!(bytes, b"local-archive-bytes");
        assert_eq!(checksum(&bytes), entry.sha256);
    }

    #[test]
    fn uncatalogued_version_is_rejected_before_any_network_call() {
        let catalogue: RuntimeCatalogue = toml::from_str("").unwrap();
        let downloader = CatalogueDownloader::new(catalogue);
        assert!(downloader.download("9.9.9").is_err());
    }
}
