//! OData product search: query construction and next-link pagination.

use std::collections::HashSet;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::error::CatalogueError;
use crate::aoi::Aoi;
use crate::download::constants::{CONNECT_TIMEOUT_SECS, LISTING_TIMEOUT_SECS};

/// Public OData catalogue of the Copernicus Data Space Ecosystem.
pub const DEFAULT_CATALOGUE_URL: &str = "https://catalogue.dataspace.copernicus.eu/odata/v1";

/// Items requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 200;

/// One catalogue item. Only `Id` and `Name` are interpreted; every other
/// attribute is kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogueProduct {
    /// Opaque product key used for node addressing.
    #[serde(rename = "Id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Product name, e.g. `S2A_MSIL2A_20210615T..._N0300_R..._T32TQM_....SAFE`.
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Remaining attributes.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ProductPage {
    #[serde(default)]
    value: Vec<CatalogueProduct>,
    #[serde(rename = "@odata.nextLink", default)]
    next_link: Option<String>,
}

/// Builds the OData `$filter` expression for one search.
#[must_use]
pub fn filter_expression(
    aoi: &Aoi,
    collection: &str,
    product_type: &str,
    start_iso: &str,
    end_iso: &str,
) -> String {
    format!(
        "Collection/Name eq '{collection}' \
         and Attributes/OData.CSC.StringAttribute/any(att:att/Name eq 'productType' \
         and att/OData.CSC.StringAttribute/Value eq '{product_type}') \
         and OData.CSC.Intersects(area=geography'SRID=4326;{wkt}') \
         and ContentDate/Start gt {start_iso} and ContentDate/Start lt {end_iso}",
        wkt = aoi.wkt(),
    )
}

/// Builds the search URL for products intersecting `aoi` whose content
/// start lies strictly inside `(start_iso, end_iso)`.
#[must_use]
pub fn build_search_query(
    catalogue_base: &str,
    aoi: &Aoi,
    collection: &str,
    product_type: &str,
    start_iso: &str,
    end_iso: &str,
) -> String {
    let filter = filter_expression(aoi, collection, product_type, start_iso, end_iso);
    format!(
        "{}/Products?$filter={}",
        catalogue_base.trim_end_matches('/'),
        urlencoding::encode(&filter)
    )
}

/// Paginating catalogue reader.
#[derive(Debug, Clone)]
pub struct CatalogueClient {
    client: Client,
    page_size: u32,
    timeout: Duration,
}

impl CatalogueClient {
    /// Creates a reader with the default page size and a 60 s page timeout.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogueError::Client`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self, CatalogueError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .user_agent(crate::user_agent::default_user_agent())
            .build()
            .map_err(CatalogueError::Client)?;
        Ok(Self {
            client,
            page_size: DEFAULT_PAGE_SIZE,
            timeout: Duration::from_secs(LISTING_TIMEOUT_SECS),
        })
    }

    /// Sets the number of items requested on the first page.
    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Sets the per-page timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Follows `@odata.nextLink` from `base_query` until exhausted and returns
    /// every item in page order.
    ///
    /// # Errors
    ///
    /// Any failed page aborts the whole search; no partial result is returned.
    #[instrument(skip(self, base_query), fields(page_size = self.page_size))]
    pub async fn fetch_all_products(
        &self,
        base_query: &str,
    ) -> Result<Vec<CatalogueProduct>, CatalogueError> {
        let mut url = format!("{base_query}&$count=true&$top={}", self.page_size);
        let mut visited: HashSet<String> = HashSet::new();
        let mut items = Vec::new();
        let mut pages = 0usize;

        loop {
            if !visited.insert(url.clone()) {
                return Err(CatalogueError::PaginationLoop { url });
            }

            let page = self.fetch_page(&url).await?;
            pages += 1;
            debug!(page = pages, items = page.value.len(), "catalogue page fetched");
            items.extend(page.value);

            match page.next_link {
                Some(next) if !next.is_empty() => url = resolve_next_link(&url, &next),
                _ => break,
            }
        }

        info!(pages, items = items.len(), "catalogue search complete");
        Ok(items)
    }

    async fn fetch_page(&self, url: &str) -> Result<ProductPage, CatalogueError> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| CatalogueError::network(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogueError::http_status(url, status.as_u16()));
        }

        response
            .json::<ProductPage>()
            .await
            .map_err(|e| CatalogueError::decode(url, e))
    }
}

/// Next links may be relative to the page that returned them.
fn resolve_next_link(current: &str, next: &str) -> String {
    url::Url::parse(current)
        .and_then(|base| base.join(next))
        .map_or_else(|_| next.to_string(), String::from)
}
