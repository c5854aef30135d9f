//! Scene Layout Resolver: archive discovery and per-band tier selection.

mod resolution;
mod resolver;

pub use resolution::{
    GRANULE_DIR, GRANULE_METADATA, GRANULE_PREFIX, IMG_DATA_DIR, S2_RESOLUTIONS, SAFE_SUFFIX,
    SCENE_METADATA, SCL_BAND, band_file_suffix, choose_best_resolution, tier_dir,
};
pub use resolver::{
    BandSelection, LayoutError, LayoutResolution, SceneLayout, extract_tile_id,
    find_granule_directory, resolve_scene_layout,
};
