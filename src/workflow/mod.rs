//! Seasonal Download Orchestrator: date windows, the run loop and its ledger.

mod orchestrator;
mod report;
mod season;

use chrono::NaiveDate;
use thiserror::Error;

use crate::auth::AuthError;
use crate::catalogue::CatalogueError;
use crate::download::DownloadError;

pub use orchestrator::{
    DEFAULT_BANDS, DEFAULT_COLLECTION, DEFAULT_PRODUCT_TYPE, DEFAULT_TARGET_RES, DownloadRequest,
    SeasonalDownloader, TransferEndpoints,
};
pub use report::{SceneRef, SceneResult, write_report};
pub use season::{
    DateWindow, MonthDay, SeasonFilter, last_day_of_month, safe_date_with_adjust,
    seasonal_windows,
};

/// Errors that abort a seasonal run.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The year list is empty.
    #[error("years must contain at least one year")]
    NoYears,

    /// A month or day is outside the calendar.
    #[error("invalid date: {0}")]
    InvalidDate(String),

    /// A year's computed end precedes its start.
    #[error("period end {end} is before period start {start} in year {year}")]
    InvertedWindow {
        /// Year of the window.
        year: i32,
        /// Computed start.
        start: NaiveDate,
        /// Computed end.
        end: NaiveDate,
    },

    /// Credentials are missing, insecure or the token client failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// A catalogue window failed.
    #[error("catalogue search for {window_start} to {window_end} failed: {source}")]
    Catalogue {
        /// Window start instant.
        window_start: String,
        /// Window end instant.
        window_end: String,
        /// The underlying catalogue error.
        #[source]
        source: CatalogueError,
    },

    /// The authenticated session could not be opened.
    #[error("failed to open download session: {0}")]
    Session(#[source] DownloadError),
}
