//! Sentinel Downloader Core Library
//!
//! Seasonal acquisition of Sentinel-2 L2A scenes from the Copernicus Data
//! Space Ecosystem, followed by radiometric normalization of the downloaded
//! bands into derived virtual rasters.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`catalogue`] - OData filter construction and paginated product search
//! - [`auth`] - Credential resolution, token lifecycle, authenticated session
//! - [`layout`] - Per-scene archive layout and band resolution selection
//! - [`download`] - Node addressing, retry policy, concurrent fetcher
//! - [`workflow`] - Seasonal windows, orchestration, per-scene ledger
//! - [`normalize`] - Band discovery, baseline offsets, derived rasters
//! - [`aoi`] - Area of interest as WKT

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod aoi;
pub mod auth;
pub mod catalogue;
pub mod download;
pub mod layout;
pub mod normalize;
pub mod workflow;

mod user_agent;

// Re-export commonly used types
pub use aoi::{Aoi, AoiError};
pub use auth::{AuthError, AuthSession, Credentials, SessionConfig, TokenEndpoint, TokenManager};
pub use catalogue::{CatalogueClient, CatalogueError, CatalogueProduct};
pub use download::{DownloadError, DownloadFailure, DownloadTarget, FailureKind, FetchOptions};
pub use layout::{BandSelection, LayoutError, SceneLayout, choose_best_resolution};
pub use normalize::{BandJob, BandRecord, DateFilter, Jp2Probe, NormalizeError};
pub use workflow::{
    DownloadRequest, MonthDay, SceneResult, SeasonalDownloader, TransferEndpoints, WorkflowError,
};
