//! Node addressing inside a scene's remote archive.
//!
//! The transfer service exposes each scene as a tree of nodes:
//!
//! ```text
//! <base>/odata/v1/Products(<scene_id>)/Nodes(<seg>)/Nodes(<seg>)/.../Nodes   (listing)
//! <base>/odata/v1/Products(<scene_id>)/Nodes(<seg>)/Nodes(<seg>)/.../$value  (content)
//! ```
//!
//! Segments are percent-encoded individually, so names containing `/` or
//! spaces stay one segment.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::constants::LISTING_TIMEOUT_SECS;
use super::error::DownloadError;
use crate::auth::AuthSession;

/// Public download endpoint of the Copernicus Data Space Ecosystem.
pub const DEFAULT_DOWNLOAD_BASE: &str = "https://download.dataspace.copernicus.eu";

/// Ordered path segments naming one remote file relative to a scene root.
///
/// Two targets are equal when their segment sequences are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadTarget(Vec<String>);

impl DownloadTarget {
    /// Creates a target from path segments.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Returns the path segments.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Returns the final segment (the file name), if any.
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Local mirror path: `output_root` joined with every segment.
    #[must_use]
    pub fn local_path(&self, output_root: &Path) -> PathBuf {
        self.0
            .iter()
            .fold(output_root.to_path_buf(), |path, segment| path.join(segment))
    }
}

impl fmt::Display for DownloadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// Builds listing and content URLs for scene nodes under one base URL.
#[derive(Debug, Clone)]
pub struct NodeUrls {
    base: String,
}

impl Default for NodeUrls {
    fn default() -> Self {
        Self::new(DEFAULT_DOWNLOAD_BASE)
    }
}

impl NodeUrls {
    /// Creates a URL builder for the given service base (trailing `/` ignored).
    #[must_use]
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    /// URL listing the children of the node at `segments`.
    #[must_use]
    pub fn listing_url<S: AsRef<str>>(&self, scene_id: &str, segments: &[S]) -> String {
        format!("{}/Nodes", self.node_path(scene_id, segments))
    }

    /// URL streaming the content of the file node at `segments`.
    #[must_use]
    pub fn content_url<S: AsRef<str>>(&self, scene_id: &str, segments: &[S]) -> String {
        format!("{}/$value", self.node_path(scene_id, segments))
    }

    fn node_path<S: AsRef<str>>(&self, scene_id: &str, segments: &[S]) -> String {
        let mut url = format!("{}/odata/v1/Products({scene_id})", self.base);
        for segment in segments {
            url.push_str("/Nodes(");
            url.push_str(&urlencoding::encode(segment.as_ref()));
            url.push(')');
        }
        url
    }
}

/// One child entry of a node listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NodeEntry {
    /// Node name (directory or file name).
    #[serde(rename = "Name", default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct NodeListing {
    #[serde(default)]
    result: Vec<NodeEntry>,
}

/// Lists the child nodes at `segments` inside a scene's archive.
///
/// # Errors
///
/// Returns [`DownloadError`] on transport failure, a non-success status, or an
/// undecodable listing body.
#[instrument(level = "debug", skip(session, urls, segments), fields(path = %segments.join("/")))]
pub async fn list_scene_children(
    session: &AuthSession,
    urls: &NodeUrls,
    scene_id: &str,
    segments: &[&str],
) -> Result<Vec<NodeEntry>, DownloadError> {
    let url = urls.listing_url(scene_id, segments);
    let listing: NodeListing = session
        .get_json(&url, std::time::Duration::from_secs(LISTING_TIMEOUT_SECS))
        .await?;
    Ok(listing.result)
}
