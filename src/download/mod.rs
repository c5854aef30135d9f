//! Transfer layer: node addressing, retry policy and the concurrent fetcher.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use sentinel_core::auth::AuthSession;
//! use sentinel_core::download::{DownloadTarget, FetchOptions, NodeUrls, download_targets};
//!
//! # async fn example(session: AuthSession) {
//! let targets = vec![DownloadTarget::new(["S2A_X.SAFE", "MTD_MSIL2A.xml"])];
//! let summary = download_targets(
//!     &session,
//!     &NodeUrls::default(),
//!     "scene-id",
//!     &targets,
//!     Path::new("./mirror"),
//!     &FetchOptions::default(),
//! )
//! .await;
//! println!("{} failed", summary.failures.len());
//! # }
//! ```

pub mod constants;
mod error;
mod fetcher;
mod nodes;
mod retry;

pub use error::{DownloadError, DownloadFailure, FailureKind};
pub use fetcher::{
    FetchOptions, FetchOutcome, FetchSummary, download_targets, fetch_target, partial_path,
};
pub use nodes::{DEFAULT_DOWNLOAD_BASE, DownloadTarget, NodeEntry, NodeUrls, list_scene_children};
pub use retry::{
    DEFAULT_MAX_ATTEMPTS, FailureType, RetryDecision, RetryPolicy, classify_status,
    classify_transport_error,
};

// Note: no module-local Result aliases; signatures spell out `Result<T, DownloadError>`.
