//! Error types for catalogue searches.

use thiserror::Error;

/// Errors that abort a catalogue search for one time window.
#[derive(Debug, Error)]
pub enum CatalogueError {
    /// A page request could not be sent or its body could not be read.
    #[error("network error fetching catalogue page {url}: {source}")]
    Network {
        /// The page URL.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The catalogue answered a page with a non-success status.
    #[error("catalogue returned HTTP {status} for {url}")]
    HttpStatus {
        /// The page URL.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// A page body was not the expected OData JSON document.
    #[error("invalid catalogue page from {url}: {source}")]
    Decode {
        /// The page URL.
        url: String,
        /// The underlying decode error.
        #[source]
        source: reqwest::Error,
    },

    /// A next link pointed back at a page already fetched.
    #[error("catalogue pagination loops back to {url}")]
    PaginationLoop {
        /// The repeated page URL.
        url: String,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build catalogue HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl CatalogueError {
    /// Creates a network error for a page URL.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error for a page URL.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a decode error for a page URL.
    pub fn decode(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Decode {
            url: url.into(),
            source,
        }
    }
}
