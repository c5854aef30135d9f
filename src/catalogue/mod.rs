//! Catalogue Query: OData search URLs and paginated product listing.
//!
//! # Example
//!
//! ```no_run
//! use sentinel_core::Aoi;
//! use sentinel_core::catalogue::{CatalogueClient, DEFAULT_CATALOGUE_URL, build_search_query};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let aoi = Aoi::from_bbox(10.0, 45.0, 11.0, 46.0);
//! let query = build_search_query(
//!     DEFAULT_CATALOGUE_URL,
//!     &aoi,
//!     "SENTINEL-2",
//!     "S2MSI2A",
//!     "2021-06-01T00:00:00.000Z",
//!     "2021-08-31T23:59:59.999Z",
//! );
//! let products = CatalogueClient::new()?.fetch_all_products(&query).await?;
//! println!("{} products", products.len());
//! # Ok(())
//! # }
//! ```

mod error;
mod query;

pub use error::CatalogueError;
pub use query::{
    CatalogueClient, CatalogueProduct, DEFAULT_CATALOGUE_URL, DEFAULT_PAGE_SIZE,
    build_search_query, filter_expression,
};
