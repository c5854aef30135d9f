//! Scene Layout Resolver: discovers an archive's structure over the node
//! API and selects one file per requested band.
//!
//! Listing sequence for one scene:
//!
//! ```text
//! Products(id)/Nodes                               -> archive root (*.SAFE)
//! <root>/Nodes                                     -> has GRANULE?
//! <root>/GRANULE/Nodes                             -> granule directory
//! <root>/GRANULE/<granule>/IMG_DATA/R{10,20,60}m   -> band files per tier
//! <root>/GRANULE/<granule>/Nodes                   -> MTD_TL.xml present?
//! ```
//!
//! Only the first two listings are fatal when they fail. Tier and granule
//! metadata listings degrade to "nothing there".

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::resolution::{
    GRANULE_DIR, GRANULE_METADATA, GRANULE_PREFIX, IMG_DATA_DIR, S2_RESOLUTIONS, SAFE_SUFFIX,
    SCENE_METADATA, SCL_BAND, band_file_suffix, choose_best_resolution, tier_dir,
};
use crate::auth::AuthSession;
use crate::download::{DownloadError, DownloadTarget, NodeEntry, NodeUrls, list_scene_children};

/// Errors that prevent a scene's layout from being resolved.
#[derive(Debug, Error)]
pub enum LayoutError {
    /// The scene has no child nodes at all.
    #[error("no child nodes found for scene {scene_id}; is the id correct and the product online?")]
    EmptyScene {
        /// Catalogue id of the scene.
        scene_id: String,
    },

    /// A structural listing failed.
    #[error("failed to list nodes of scene {scene_id}: {source}")]
    Listing {
        /// Catalogue id of the scene.
        scene_id: String,
        /// The underlying transfer error.
        #[source]
        source: DownloadError,
    },
}

/// Which bands to select and at what resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandSelection {
    /// Reflectance band ids, e.g. `B02`, `B8A`.
    pub bands: Vec<String>,
    /// Desired ground sampling distance in meters.
    pub target_res: u32,
    /// Also select the classification band.
    pub include_scl: bool,
    /// Tiers that may exist in the archive.
    pub resolutions: Vec<u32>,
}

impl BandSelection {
    /// Selection over the standard tiers with the classification band included.
    pub fn new<I, S>(bands: I, target_res: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            bands: bands.into_iter().map(Into::into).collect(),
            target_res,
            include_scl: true,
            resolutions: S2_RESOLUTIONS.to_vec(),
        }
    }

    /// Sets whether the classification band is selected.
    #[must_use]
    pub fn with_scl(mut self, include_scl: bool) -> Self {
        self.include_scl = include_scl;
        self
    }
}

/// Resolved archive structure of one scene.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SceneLayout {
    /// Archive root directory name.
    pub root: String,
    /// Granule directory name, if one was found.
    pub granule: Option<String>,
    /// Band id to chosen tier; `None` when the band exists at no tier.
    pub band_resolutions: BTreeMap<String, Option<u32>>,
}

/// Layout plus the files to fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutResolution {
    /// Discovered structure.
    pub layout: SceneLayout,
    /// Band files, then granule metadata (if listed), then scene metadata.
    pub targets: Vec<DownloadTarget>,
}

/// Returns the tile id token of a scene name (`T` followed by five characters).
#[must_use]
pub fn extract_tile_id(scene_name: &str) -> Option<&str> {
    scene_name
        .split('_')
        .find(|part| part.starts_with('T') && part.len() == 6)
}

/// Resolves the archive root, granule, per-band tiers and download targets
/// of one scene.
///
/// # Errors
///
/// Returns [`LayoutError::EmptyScene`] if the scene has no children, or
/// [`LayoutError::Listing`] if the scene or root listing fails.
#[instrument(skip(session, urls, selection), fields(scene_id = %scene_id))]
pub async fn resolve_scene_layout(
    session: &AuthSession,
    urls: &NodeUrls,
    scene_id: &str,
    scene_name: &str,
    selection: &BandSelection,
) -> Result<LayoutResolution, LayoutError> {
    let listing_error = |source| LayoutError::Listing {
        scene_id: scene_id.to_string(),
        source,
    };

    let children = list_scene_children(session, urls, scene_id, &[])
        .await
        .map_err(listing_error)?;
    let root = select_archive_root(&children).ok_or_else(|| LayoutError::EmptyScene {
        scene_id: scene_id.to_string(),
    })?;

    let tile = extract_tile_id(scene_name);
    let granule = find_granule_directory(session, urls, scene_id, &root, tile)
        .await
        .map_err(listing_error)?;

    let mut resolution = LayoutResolution {
        layout: SceneLayout {
            root: root.clone(),
            granule: granule.clone(),
            band_resolutions: BTreeMap::new(),
        },
        targets: Vec::new(),
    };

    if let Some(granule) = &granule {
        let tiers = list_tiers(session, urls, scene_id, &root, granule, &selection.resolutions).await;
        let granule_base = [root.as_str(), GRANULE_DIR, granule.as_str(), IMG_DATA_DIR];

        let mut wanted: Vec<&str> = selection.bands.iter().map(String::as_str).collect();
        if selection.include_scl {
            wanted.push(SCL_BAND);
        }

        for band in wanted {
            let chosen = select_band_file(band, selection.target_res, &tiers);
            match &chosen {
                Some((tier, file_name)) => {
                    let tier_name = tier_dir(*tier);
                    let mut segments: Vec<&str> = granule_base.to_vec();
                    segments.push(&tier_name);
                    segments.push(file_name);
                    resolution.targets.push(DownloadTarget::new(segments));
                }
                None => warn!(band = %band, "band not available at any tier"),
            }
            resolution
                .layout
                .band_resolutions
                .insert(band.to_string(), chosen.map(|(tier, _)| tier));
        }

        let granule_path = [root.as_str(), GRANULE_DIR, granule.as_str()];
        match list_scene_children(session, urls, scene_id, &granule_path).await {
            Ok(entries) if entries.iter().any(|e| e.name == GRANULE_METADATA) => {
                resolution
                    .targets
                    .push(DownloadTarget::new(granule_path.into_iter().chain([GRANULE_METADATA])));
            }
            Ok(_) => debug!("granule metadata not listed"),
            Err(error) => debug!(error = %error, "granule listing failed; metadata skipped"),
        }
    } else {
        warn!(root = %root, "no granule directory found");
    }

    resolution
        .targets
        .push(DownloadTarget::new([root.as_str(), SCENE_METADATA]));

    info!(
        root = %root,
        granule = granule.as_deref().unwrap_or("-"),
        targets = resolution.targets.len(),
        "scene layout resolved"
    );
    Ok(resolution)
}

/// Child ending in `.SAFE`, else the first child; `None` if there are none.
fn select_archive_root(children: &[NodeEntry]) -> Option<String> {
    children
        .iter()
        .find(|child| child.name.ends_with(SAFE_SUFFIX))
        .or_else(|| children.first())
        .map(|child| child.name.clone())
}

/// Granule preference: prefix and tile id, then prefix only, then first child.
fn select_granule(children: &[NodeEntry], tile: Option<&str>) -> Option<String> {
    let with_prefix = |child: &&NodeEntry| child.name.starts_with(GRANULE_PREFIX);
    tile.and_then(|tile| {
        children
            .iter()
            .filter(with_prefix)
            .find(|child| child.name.contains(tile))
    })
    .or_else(|| children.iter().find(with_prefix))
    .or_else(|| children.first())
    .map(|child| child.name.clone())
}

/// Looks up the granule directory under `<root>/GRANULE`.
///
/// # Errors
///
/// Returns [`DownloadError`] if the root or `GRANULE` listing fails.
pub async fn find_granule_directory(
    session: &AuthSession,
    urls: &NodeUrls,
    scene_id: &str,
    root: &str,
    tile: Option<&str>,
) -> Result<Option<String>, DownloadError> {
    let root_children = list_scene_children(session, urls, scene_id, &[root]).await?;
    if !root_children.iter().any(|child| child.name == GRANULE_DIR) {
        return Ok(None);
    }
    let granules = list_scene_children(session, urls, scene_id, &[root, GRANULE_DIR]).await?;
    Ok(select_granule(&granules, tile))
}

async fn list_tiers(
    session: &AuthSession,
    urls: &NodeUrls,
    scene_id: &str,
    root: &str,
    granule: &str,
    resolutions: &[u32],
) -> BTreeMap<u32, Vec<NodeEntry>> {
    let mut tiers = BTreeMap::new();
    for &tier in resolutions {
        let tier_name = tier_dir(tier);
        let path = [root, GRANULE_DIR, granule, IMG_DATA_DIR, tier_name.as_str()];
        let entries = match list_scene_children(session, urls, scene_id, &path).await {
            Ok(entries) => entries,
            Err(error) => {
                debug!(tier = %tier_name, error = %error, "tier listing failed; treated as empty");
                Vec::new()
            }
        };
        tiers.insert(tier, entries);
    }
    tiers
}

/// Chosen tier and file name of `band`, if it exists at any tier.
fn select_band_file(
    band: &str,
    target_res: u32,
    tiers: &BTreeMap<u32, Vec<NodeEntry>>,
) -> Option<(u32, String)> {
    let matching = |tier: u32| {
        let suffix = band_file_suffix(band, tier);
        tiers
            .get(&tier)?
            .iter()
            .find(|entry| entry.name.ends_with(&suffix))
            .map(|entry| entry.name.clone())
    };

    let available: Vec<u32> = tiers
        .keys()
        .copied()
        .filter(|&tier| matching(tier).is_some())
        .collect();
    let chosen = choose_best_resolution(target_res, &available)?;
    matching(chosen).map(|name| (chosen, name))
}
