//! Parallel normalization of many band files.
//!
//! Jobs are plain values and run on a dedicated rayon pool. Each job returns
//! its own `Result`; a failed band never stops the others.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, instrument, warn};

use super::NormalizeError;
use super::band_paths::{BandRecord, find_scl_path};
use super::baseline::infer_pb_offset;
use super::raster_info::RasterProbe;
use super::vrt::{create_masked_vrt, create_pb_offset_vrt};

/// Normalization of one band file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BandJob {
    /// Band file to wrap.
    pub band_path: PathBuf,
    /// Directory receiving the offset raster.
    pub out_dir: PathBuf,
    /// No-data sentinel.
    pub nodata: u16,
    /// Classification codes to mask; `None` skips the mask stage.
    pub mask_classes: Option<Vec<u8>>,
}

impl BandJob {
    /// Job for a discovered band file.
    #[must_use]
    pub fn from_record(
        record: &BandRecord,
        out_dir: &Path,
        nodata: u16,
        mask_classes: Option<&[u8]>,
    ) -> Self {
        Self {
            band_path: record.path.clone(),
            out_dir: out_dir.to_path_buf(),
            nodata,
            mask_classes: mask_classes.map(<[u8]>::to_vec),
        }
    }
}

/// Files produced for one band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BandOutput {
    pub band_path: PathBuf,
    /// Offset removed from valid pixels.
    pub dn_offset: u16,
    pub offset_vrt: PathBuf,
    pub masked_vrt: Option<PathBuf>,
}

/// Runs the offset stage and, when requested, the mask stage for one band.
///
/// # Errors
///
/// Returns [`NormalizeError::SclNotFound`] when masking is requested but no
/// classification file exists, and the stage errors otherwise.
pub fn normalize_band(job: &BandJob, probe: &dyn RasterProbe) -> Result<BandOutput, NormalizeError> {
    let dn_offset = infer_pb_offset(&job.band_path);
    let offset = create_pb_offset_vrt(&job.band_path, dn_offset, &job.out_dir, job.nodata, probe)?;

    let masked_vrt = match &job.mask_classes {
        None => None,
        Some(classes) => {
            let scl = find_scl_path(&job.band_path).ok_or_else(|| NormalizeError::SclNotFound {
                band_path: job.band_path.clone(),
            })?;
            Some(create_masked_vrt(&offset, &scl, classes, job.nodata, probe)?.path)
        }
    };

    Ok(BandOutput {
        band_path: job.band_path.clone(),
        dn_offset,
        offset_vrt: offset.path,
        masked_vrt,
    })
}

/// Runs `jobs` on a pool of `workers` threads. Results keep job order.
///
/// # Errors
///
/// Returns [`NormalizeError::ThreadPool`] only if the pool cannot be built;
/// per-band failures are in the returned list.
#[instrument(skip(jobs, probe), fields(jobs = jobs.len()))]
pub fn normalize_bands(
    jobs: &[BandJob],
    workers: usize,
    probe: &dyn RasterProbe,
) -> Result<Vec<Result<BandOutput, NormalizeError>>, NormalizeError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .map_err(|e| NormalizeError::ThreadPool(e.to_string()))?;

    let results: Vec<_> = pool.install(|| {
        jobs.par_iter()
            .map(|job| normalize_band(job, probe))
            .collect()
    });

    let failed = results.iter().filter(|r| r.is_err()).count();
    if failed > 0 {
        warn!(failed, total = jobs.len(), "some bands could not be normalized");
    }
    info!(done = jobs.len() - failed, "normalization finished");
    Ok(results)
}
