//! Seasonal Download Orchestrator.
//!
//! ```text
//! credentials -> windows -> catalogue query per window -> one session
//!     -> for each scene (sequential): resolve layout -> fetch targets -> ledger row
//! ```

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::WorkflowError;
use super::report::{SceneRef, SceneResult};
use super::season::{DateWindow, MonthDay, seasonal_windows};
use crate::aoi::Aoi;
use crate::auth::{AuthSession, Credentials, SessionConfig, TokenManager};
use crate::catalogue::{
    CatalogueClient, CatalogueProduct, DEFAULT_CATALOGUE_URL, DEFAULT_PAGE_SIZE,
    build_search_query,
};
use crate::download::{DEFAULT_DOWNLOAD_BASE, FetchOptions, NodeUrls, download_targets};
use crate::layout::{BandSelection, resolve_scene_layout};

/// Default catalogue collection.
pub const DEFAULT_COLLECTION: &str = "SENTINEL-2";
/// Default product type filter.
pub const DEFAULT_PRODUCT_TYPE: &str = "S2MSI2A";
/// Reflectance bands requested when none are given.
pub const DEFAULT_BANDS: [&str; 10] = [
    "B02", "B03", "B04", "B05", "B06", "B07", "B08", "B8A", "B11", "B12",
];
/// Target resolution when none is given, in meters.
pub const DEFAULT_TARGET_RES: u32 = 20;

/// Catalogue and transfer service base URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEndpoints {
    /// OData catalogue base, e.g. `.../odata/v1`.
    pub catalogue_url: String,
    /// Node API base.
    pub download_url: String,
}

impl Default for TransferEndpoints {
    fn default() -> Self {
        Self {
            catalogue_url: DEFAULT_CATALOGUE_URL.to_string(),
            download_url: DEFAULT_DOWNLOAD_BASE.to_string(),
        }
    }
}

/// Inputs of one seasonal run.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    /// Area of interest.
    pub aoi: Aoi,
    /// Years to repeat the season over.
    pub years: Vec<i32>,
    /// First day of the season.
    pub period_start: MonthDay,
    /// Last day of the season.
    pub period_end: MonthDay,
    /// Catalogue collection name.
    pub collection: String,
    /// Catalogue product type.
    pub product_type: String,
    /// Bands and resolution to fetch.
    pub selection: BandSelection,
    /// Per-scene transfer settings.
    pub fetch: FetchOptions,
    /// Items per catalogue page.
    pub page_size: u32,
    /// Stop after this many scenes.
    pub max_scenes: Option<usize>,
}

impl DownloadRequest {
    /// Request with default collection, product type, bands and options.
    #[must_use]
    pub fn new(aoi: Aoi, years: Vec<i32>, period_start: MonthDay, period_end: MonthDay) -> Self {
        Self {
            aoi,
            years,
            period_start,
            period_end,
            collection: DEFAULT_COLLECTION.to_string(),
            product_type: DEFAULT_PRODUCT_TYPE.to_string(),
            selection: BandSelection::new(DEFAULT_BANDS, DEFAULT_TARGET_RES),
            fetch: FetchOptions::default(),
            page_size: DEFAULT_PAGE_SIZE,
            max_scenes: None,
        }
    }

    /// Replaces the band selection.
    #[must_use]
    pub fn with_selection(mut self, selection: BandSelection) -> Self {
        self.selection = selection;
        self
    }
}

/// A catalogue row together with the window that returned it.
#[derive(Debug, Clone)]
struct QueuedScene {
    product: CatalogueProduct,
    window_start: String,
    window_end: String,
}

impl QueuedScene {
    /// Borrowed view for processing, or `None` for a row without Id or Name.
    fn scene_ref(&self) -> Option<SceneRef<'_>> {
        let (Some(id), Some(name)) = (
            self.product.id.as_deref().filter(|s| !s.is_empty()),
            self.product.name.as_deref().filter(|s| !s.is_empty()),
        ) else {
            warn!(row = ?self.product, "skipping catalogue row with missing Id/Name");
            return None;
        };
        Some(SceneRef {
            id,
            name,
            window_start: &self.window_start,
            window_end: &self.window_end,
        })
    }
}

/// First start and last end instant across `windows`.
fn windows_span(windows: &[DateWindow]) -> (String, String) {
    let start = windows.iter().min_by_key(|window| window.start);
    let end = windows.iter().max_by_key(|window| window.end);
    (
        start.map(DateWindow::start_iso).unwrap_or_default(),
        end.map(DateWindow::end_iso).unwrap_or_default(),
    )
}

/// Drives catalogue search, layout resolution and fetching for a seasonal run.
#[derive(Debug, Clone)]
pub struct SeasonalDownloader {
    credentials: Credentials,
    endpoints: TransferEndpoints,
    session_config: SessionConfig,
}

impl SeasonalDownloader {
    /// Downloader against the public endpoints.
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            endpoints: TransferEndpoints::default(),
            session_config: SessionConfig::default(),
        }
    }

    /// Overrides the service endpoints.
    #[must_use]
    pub fn with_endpoints(mut self, endpoints: TransferEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Overrides token endpoint, timeouts and retry policy.
    #[must_use]
    pub fn with_session_config(mut self, session_config: SessionConfig) -> Self {
        self.session_config = session_config;
        self
    }

    /// Runs the whole season and returns one row per processed scene.
    ///
    /// Partial failures are reported in the rows; only configuration,
    /// credential, catalogue and session errors are returned as `Err`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError`] for invalid dates, missing or insecure
    /// credentials, a failed catalogue window, or a session that cannot open.
    #[instrument(skip(self, request), fields(output_root = %output_root.display()))]
    pub async fn run(
        &self,
        request: &DownloadRequest,
        output_root: &Path,
    ) -> Result<Vec<SceneResult>, WorkflowError> {
        let windows = seasonal_windows(&request.years, request.period_start, request.period_end)?;
        let credentials = self.credentials.clone().resolve()?;

        info!(
            years = ?request.years,
            period = %format!("{} to {}", request.period_start, request.period_end),
            "starting seasonal download"
        );

        let scenes = self.query_windows(request, &windows).await?;
        if scenes.is_empty() {
            warn!("no products found for the AOI and date windows");
            return Ok(Vec::new());
        }
        info!(products = scenes.len(), "catalogue products fetched");

        let mut runnable: Vec<SceneRef<'_>> =
            scenes.iter().filter_map(QueuedScene::scene_ref).collect();
        if let Some(limit) = request.max_scenes
            && runnable.len() > limit
        {
            info!(limit, "limiting run to the first scenes");
            runnable.truncate(limit);
        }
        if runnable.is_empty() {
            warn!("no catalogue rows left to process");
            return Ok(Vec::new());
        }

        let tokens = Arc::new(
            TokenManager::new(self.session_config.token_endpoint.clone(), credentials)
                .map_err(WorkflowError::Auth)?,
        );
        let session = AuthSession::open(tokens, &self.session_config)
            .await
            .map_err(WorkflowError::Session)?;
        let urls = NodeUrls::new(&self.endpoints.download_url);

        let mut results = Vec::with_capacity(runnable.len());
        for scene_ref in runnable {
            results.push(
                process_scene(&session, &urls, scene_ref, request, output_root).await,
            );
        }

        info!(scenes = results.len(), "seasonal download finished");
        Ok(results)
    }

    async fn query_windows(
        &self,
        request: &DownloadRequest,
        windows: &[DateWindow],
    ) -> Result<Vec<QueuedScene>, WorkflowError> {
        let catalogue = CatalogueClient::new()
            .map_err(|source| {
                let (window_start, window_end) = windows_span(windows);
                WorkflowError::Catalogue {
                    window_start,
                    window_end,
                    source,
                }
            })?
            .with_page_size(request.page_size);

        let mut scenes = Vec::new();
        for window in windows {
            let (start_iso, end_iso) = (window.start_iso(), window.end_iso());
            let query = build_search_query(
                &self.endpoints.catalogue_url,
                &request.aoi,
                &request.collection,
                &request.product_type,
                &start_iso,
                &end_iso,
            );
            debug!(query = %query, "querying catalogue");

            let products = catalogue.fetch_all_products(&query).await.map_err(|source| {
                WorkflowError::Catalogue {
                    window_start: start_iso.clone(),
                    window_end: end_iso.clone(),
                    source,
                }
            })?;
            if products.is_empty() {
                warn!(start = %start_iso, end = %end_iso, "no products returned for window");
            }
            scenes.extend(products.into_iter().map(|product| QueuedScene {
                product,
                window_start: start_iso.clone(),
                window_end: end_iso.clone(),
            }));
        }
        Ok(scenes)
    }
}

#[instrument(skip_all, fields(scene_id = %scene.id))]
async fn process_scene(
    session: &AuthSession,
    urls: &NodeUrls,
    scene: SceneRef<'_>,
    request: &DownloadRequest,
    output_root: &Path,
) -> SceneResult {
    let resolution =
        match resolve_scene_layout(session, urls, scene.id, scene.name, &request.selection).await {
            Ok(resolution) => resolution,
            Err(error) => {
                warn!(scene = %scene.name, error = %error, "scene layout unresolved; skipped");
                return SceneResult::unresolved(scene, &error);
            }
        };

    info!(
        scene = %scene.name,
        targets = resolution.targets.len(),
        "selected targets"
    );

    let summary = download_targets(
        session,
        urls,
        scene.id,
        &resolution.targets,
        output_root,
        &request.fetch,
    )
    .await;

    if !summary.is_complete() {
        warn!(
            scene = %scene.name,
            failures = summary.failures.len(),
            "target(s) failed to download"
        );
        for failure in &summary.failures {
            debug!(target = %failure.target, reason = %failure.message, "failed target");
        }
    }

    SceneResult::fetched(scene, resolution, summary)
}
