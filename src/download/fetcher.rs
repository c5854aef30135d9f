//! Concurrent per-scene file fetcher.
//!
//! Targets are mirrored under an output root with bounded parallelism. Each
//! worker holds a semaphore permit for the life of its transfer, so at most
//! `max_workers` bodies stream at once.
//!
//! Per target:
//! - HEAD probe for the expected length (a failed probe means "unknown")
//! - size-equal local file is a cache hit, no bytes are written
//! - body streams into `<final>.part`, is length-checked, then renamed
//!
//! A failed target never aborts its siblings; it is returned as a
//! [`DownloadFailure`] in the [`FetchSummary`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tracing::{debug, instrument, warn};

use super::constants::{
    DEFAULT_CHUNK_SIZE, DEFAULT_MAX_WORKERS, MAX_WORKERS, PARTIAL_SUFFIX, READ_TIMEOUT_SECS,
};
use super::error::{DownloadError, DownloadFailure};
use super::nodes::{DownloadTarget, NodeUrls};
use crate::auth::{AuthSession, header_content_length};

/// Tuning knobs for one scene's transfers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    /// Concurrent transfers, clamped to `1..=MAX_WORKERS`.
    pub max_workers: usize,
    /// Write buffer size for streamed bodies.
    pub chunk_size: usize,
    /// Per-request timeout for probes and bodies.
    pub timeout: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            timeout: Duration::from_secs(READ_TIMEOUT_SECS),
        }
    }
}

impl FetchOptions {
    /// Worker count actually used.
    #[must_use]
    pub fn effective_workers(&self) -> usize {
        self.max_workers.clamp(1, MAX_WORKERS)
    }
}

/// How a single target was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Body streamed and renamed into place.
    Downloaded {
        /// Bytes written.
        bytes: u64,
    },
    /// Local file already had the expected length.
    Cached,
}

/// Aggregate result of one [`download_targets`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchSummary {
    /// Targets transferred in this call.
    pub downloaded: usize,
    /// Targets skipped as already complete.
    pub cached: usize,
    /// Targets that failed, in input order.
    pub failures: Vec<DownloadFailure>,
}

impl FetchSummary {
    /// True when every target is on disk.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Downloads `targets` of one scene into `output_root`.
///
/// Targets resolving to the same local path are fetched once.
#[instrument(
    skip(session, urls, targets, options),
    fields(scene_id = %scene_id, output_root = %output_root.display(), targets = targets.len())
)]
pub async fn download_targets(
    session: &AuthSession,
    urls: &NodeUrls,
    scene_id: &str,
    targets: &[DownloadTarget],
    output_root: &Path,
    options: &FetchOptions,
) -> FetchSummary {
    let semaphore = Arc::new(Semaphore::new(options.effective_workers()));
    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut handles = Vec::with_capacity(targets.len());

    for target in targets {
        let final_path = target.local_path(output_root);
        if !seen.insert(final_path.clone()) {
            debug!(target = %target, "duplicate target skipped");
            continue;
        }

        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            warn!("worker semaphore closed; remaining targets not scheduled");
            break;
        };

        let session = session.clone();
        let url = urls.content_url(scene_id, target.segments());
        let options = options.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            fetch_target(&session, &url, &final_path, &options).await
        });
        handles.push((target.clone(), handle));
    }

    let mut summary = FetchSummary::default();
    for (target, handle) in handles {
        summary.record(target, handle.await);
    }
    summary
}

impl FetchSummary {
    fn record(
        &mut self,
        target: DownloadTarget,
        joined: Result<Result<FetchOutcome, DownloadError>, JoinError>,
    ) {
        match joined {
            Ok(Ok(FetchOutcome::Downloaded { bytes })) => {
                debug!(target = %target, bytes, "target downloaded");
                self.downloaded += 1;
            }
            Ok(Ok(FetchOutcome::Cached)) => self.cached += 1,
            Ok(Err(error)) => self.failures.push(DownloadFailure::from_error(target, &error)),
            Err(error) => {
                warn!(target = %target, error = %error, "download task did not complete");
                self.failures.push(DownloadFailure::task_failed(target, &error));
            }
        }
    }
}

/// Fetches one file to `final_path`, honoring the size cache.
///
/// # Errors
///
/// Returns [`DownloadError`] for HTTP, network, filesystem or length failures.
/// No partial file is left at `final_path` or at its `.part` sibling.
pub async fn fetch_target(
    session: &AuthSession,
    url: &str,
    final_path: &Path,
    options: &FetchOptions,
) -> Result<FetchOutcome, DownloadError> {
    if let Some(parent) = final_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DownloadError::io(parent, e))?;
    }

    let probed = match session.content_length(url, options.timeout).await {
        Ok(length) => length,
        Err(error) => {
            debug!(url = %url, error = %error, "size probe failed; length unknown");
            None
        }
    };

    if let Some(expected) = probed
        && local_size(final_path).await == Some(expected)
    {
        debug!(path = %final_path.display(), bytes = expected, "cache hit");
        return Ok(FetchOutcome::Cached);
    }

    let response = session.get(url, Some(options.timeout)).await?;
    let expected = header_content_length(&response).or(probed);

    let temp_path = partial_path(final_path);
    let written = match stream_to_file(response, url, &temp_path, options.chunk_size).await {
        Ok(written) => written,
        Err(error) => {
            discard(&temp_path).await;
            return Err(error);
        }
    };

    if let Err(error) = check_length(final_path, expected, written) {
        discard(&temp_path).await;
        return Err(error);
    }

    if let Err(error) = tokio::fs::rename(&temp_path, final_path).await {
        discard(&temp_path).await;
        return Err(DownloadError::io(final_path, error));
    }

    Ok(FetchOutcome::Downloaded { bytes: written })
}

/// Sibling path a body streams into before it is renamed.
#[must_use]
pub fn partial_path(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_owned();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

fn check_length(final_path: &Path, expected: Option<u64>, written: u64) -> Result<(), DownloadError> {
    match expected {
        Some(expected) if expected != written => {
            Err(DownloadError::integrity(final_path, expected, written))
        }
        _ => Ok(()),
    }
}

async fn local_size(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path)
        .await
        .ok()
        .filter(std::fs::Metadata::is_file)
        .map(|metadata| metadata.len())
}

async fn discard(temp_path: &Path) {
    if let Err(error) = tokio::fs::remove_file(temp_path).await
        && error.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %temp_path.display(), error = %error, "failed to remove partial file");
    }
}

async fn stream_to_file(
    response: reqwest::Response,
    url: &str,
    temp_path: &Path,
    chunk_size: usize,
) -> Result<u64, DownloadError> {
    let file = tokio::fs::File::create(temp_path)
        .await
        .map_err(|e| DownloadError::io(temp_path, e))?;
    let mut writer = BufWriter::with_capacity(chunk_size.max(1), file);
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| DownloadError::network(url, e))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(temp_path, e))?;
        written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(temp_path, e))?;

    Ok(written)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::download::FailureKind;

    #[test]
    fn test_partial_path_appends_suffix() {
        let path = partial_path(Path::new("/m/S.SAFE/B02_10m.jp2"));
        assert_eq!(path, PathBuf::from("/m/S.SAFE/B02_10m.jp2.part"));
    }

    #[test]
    fn test_check_length_unknown_expected_accepts_any() {
        assert!(check_length(Path::new("/x"), None, 123).is_ok());
        assert!(check_length(Path::new("/x"), Some(123), 123).is_ok());
    }

    #[test]
    fn test_check_length_mismatch_is_size_mismatch() {
        let error = check_length(Path::new("/x/B04.jp2"), Some(100), 60).unwrap_err();
        assert_eq!(
            FailureKind::from(&error),
            FailureKind::SizeMismatch {
                expected: 100,
                actual: 60
            }
        );
    }

    #[test]
    fn test_effective_workers_clamped() {
        let mut options = FetchOptions::default();
        assert_eq!(options.effective_workers(), DEFAULT_MAX_WORKERS);
        options.max_workers = 0;
        assert_eq!(options.effective_workers(), 1);
        options.max_workers = 500;
        assert_eq!(options.effective_workers(), MAX_WORKERS);
    }

    #[tokio::test]
    async fn test_local_size_ignores_directories() {
        let dir = tempfile::TempDir::new().unwrap();
        assert_eq!(local_size(dir.path()).await, None);
        let file = dir.path().join("f.bin");
        std::fs::write(&file, b"12345").unwrap();
        assert_eq!(local_size(&file).await, Some(5));
    }

    #[tokio::test]
    async fn test_unfinished_tasks_are_recorded_as_failures() {
        let aborted = tokio::spawn(std::future::pending::<Result<FetchOutcome, DownloadError>>());
        aborted.abort();
        let panicked: tokio::task::JoinHandle<Result<FetchOutcome, DownloadError>> =
            tokio::spawn(async { panic!("worker crashed") });

        let mut summary = FetchSummary::default();
        let first = DownloadTarget::new(["S.SAFE", "B02_20m.jp2"]);
        let second = DownloadTarget::new(["S.SAFE", "B03_20m.jp2"]);
        summary.record(first.clone(), aborted.await);
        summary.record(second.clone(), panicked.await);
        summary.record(second.clone(), Ok(Ok(FetchOutcome::Downloaded { bytes: 3 })));

        assert!(!summary.is_complete());
        assert_eq!(summary.downloaded, 1);
        assert_eq!(summary.failures.len(), 2);
        assert_eq!(summary.failures[0].target, first);
        assert_eq!(summary.failures[0].kind, FailureKind::TaskFailed);
        assert_eq!(summary.failures[1].target, second);
        let msg = &summary.failures[1].message;
        assert!(msg.contains("panic"), "Expected panic in: {msg}");
    }

    #[tokio::test]
    async fn test_discard_missing_file_is_silent() {
        let dir = tempfile::TempDir::new().unwrap();
        discard(&dir.path().join("missing.part")).await;
    }
}
