//! Radiometric Normalization over a local mirror.
//!
//! ```text
//! find_band_paths -> BandRecord -> infer_pb_offset -> create_pb_offset_vrt
//!                                 find_scl_path ──> create_masked_vrt
//! ```
//!
//! Source files are never modified; every output is a derived raster
//! document next to, not on top of, its inputs.

use std::path::{Path, PathBuf};

use thiserror::Error;

mod band_paths;
mod baseline;
mod batch;
mod pixel_function;
mod raster_info;
mod vrt;

pub use band_paths::{BandRecord, DateFilter, acquisition_date, find_band_paths, find_scl_path};
pub use baseline::{BASELINE_04_OFFSET, baseline_code, infer_pb_offset, offset_for_code};
pub use batch::{BandJob, BandOutput, normalize_band, normalize_bands};
pub use pixel_function::{
    DEFAULT_NODATA, MAX_SCL_CLASS, MAX_VALID_DN, MaskParams, OffsetParams, PixelFunction,
};
pub use raster_info::{
    DataType, Jp2Header, Jp2Probe, RasterInfo, RasterProbe, TileGeocoding, read_jp2_header,
    tile_geocoding,
};
pub use vrt::{
    DerivedRaster, DerivedRasterSpec, MASKED_SUFFIX, PB_OFFSET_EXTENSION, SimpleSource,
    create_masked_vrt, create_pb_offset_vrt, masked_vrt_path, pb_offset_vrt_path,
};

/// Errors raised while preparing derived rasters.
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// A requested band exists at no resolution tier.
    #[error("no files for band {band} at any resolution under {dir}")]
    BandNotFound {
        /// Band id.
        band: String,
        /// Searched directory.
        dir: PathBuf,
    },

    /// Masking was requested but the band has no classification file.
    #[error("no SCL file found for {band_path}")]
    SclNotFound {
        /// Band file.
        band_path: PathBuf,
    },

    /// Filesystem failure.
    #[error("IO error on {path}: {source}")]
    Io {
        /// Affected path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Unreadable or unwritable XML.
    #[error("XML error in {path}: {message}")]
    Xml {
        /// Document path.
        path: PathBuf,
        /// Parser or writer message.
        message: String,
    },

    /// Transformation parameters rejected at construction.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// The output path equals a source path.
    #[error("refusing to overwrite source file {path}")]
    WouldOverwriteSource {
        /// Offending path.
        path: PathBuf,
    },

    /// A source file is not a raster this crate can describe.
    #[error("cannot describe raster {path}: {message}")]
    Probe {
        /// Source path.
        path: PathBuf,
        /// What was wrong.
        message: String,
    },

    /// The worker pool could not start.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),
}

impl NormalizeError {
    /// Creates an IO error for `path`.
    #[must_use]
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
