//! Band file discovery over a local mirror.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use super::NormalizeError;
use crate::layout::{S2_RESOLUTIONS, SAFE_SUFFIX, SCL_BAND, band_file_suffix, tier_dir};
use crate::workflow::SeasonFilter;

/// Acquisition timestamp embedded in product and file names.
#[allow(clippy::expect_used)]
static ACQUISITION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{8})T\d{6}").expect("acquisition regex is valid") // Static pattern, safe to panic
});

/// One band file found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BandRecord {
    /// Band id.
    pub band: String,
    /// Local file path.
    pub path: PathBuf,
    /// Acquisition date parsed from the file or archive name.
    pub acquisition_date: Option<NaiveDate>,
    /// Tier the file was found at.
    pub resolution: u32,
}

/// Restricts discovery to certain years and/or a season.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateFilter {
    /// Acceptable acquisition years.
    pub years: Option<BTreeSet<i32>>,
    /// Acceptable (month, day) range.
    pub season: Option<SeasonFilter>,
}

impl DateFilter {
    /// True when no restriction is set.
    #[must_use]
    pub fn is_unrestricted(&self) -> bool {
        self.years.is_none() && self.season.is_none()
    }

    /// Whether a file with this acquisition date passes. An undated file
    /// passes only an unrestricted filter.
    #[must_use]
    pub fn accepts(&self, date: Option<NaiveDate>) -> bool {
        if self.is_unrestricted() {
            return true;
        }
        let Some(date) = date else {
            return false;
        };
        let year_ok = self
            .years
            .as_ref()
            .is_none_or(|years| years.contains(&date.year()));
        let season_ok = self.season.is_none_or(|season| season.contains(date));
        year_ok && season_ok
    }
}

/// Parses the acquisition date from the file name, else from the nearest
/// `.SAFE` ancestor.
#[must_use]
pub fn acquisition_date(path: &Path) -> Option<NaiveDate> {
    let from_name = |name: &str| {
        let captures = ACQUISITION_PATTERN.captures(name)?;
        NaiveDate::parse_from_str(captures.get(1)?.as_str(), "%Y%m%d").ok()
    };

    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(from_name)
        .or_else(|| {
            path.ancestors()
                .skip(1)
                .filter_map(|dir| dir.file_name().and_then(|name| name.to_str()))
                .find(|name| name.ends_with(SAFE_SUFFIX))
                .and_then(from_name)
        })
}

/// Finds band files under `data_dir` for every band in `bands`.
///
/// At `target_res` every matching file that passes `filter` is returned,
/// sorted by path. When a band has none there, the other tiers are tried in
/// order and only the first match is accepted.
///
/// # Errors
///
/// Returns [`NormalizeError::BandNotFound`] for a band present at no tier.
pub fn find_band_paths(
    data_dir: &Path,
    bands: &[String],
    target_res: u32,
    filter: &DateFilter,
) -> Result<Vec<BandRecord>, NormalizeError> {
    let files = collect_tier_files(data_dir);
    let mut records = Vec::new();

    for band in bands {
        let at_target = matches_at(&files, band, target_res, filter);
        if !at_target.is_empty() {
            records.extend(at_target);
            continue;
        }

        warn!(band = %band, target_res, dir = %data_dir.display(), "no files at target resolution");
        let fallback = S2_RESOLUTIONS
            .iter()
            .copied()
            .filter(|&tier| tier != target_res)
            .find_map(|tier| matches_at(&files, band, tier, filter).into_iter().next());

        match fallback {
            Some(record) => {
                info!(
                    band = %band,
                    found = record.resolution,
                    target_res,
                    "using band at substitute resolution"
                );
                records.push(record);
            }
            None => {
                return Err(NormalizeError::BandNotFound {
                    band: band.clone(),
                    dir: data_dir.to_path_buf(),
                });
            }
        }
    }
    Ok(records)
}

/// Locates the classification file matching a band file.
///
/// The band id and tier in the name are replaced by `SCL` and each tier in
/// turn; the band's own tier folder is checked first, then its siblings.
#[must_use]
pub fn find_scl_path(band_path: &Path) -> Option<PathBuf> {
    let name = band_path.file_name()?.to_str()?;
    let tier_folder = band_path.parent()?;
    let img_data = tier_folder.parent()?;
    let current_tier = S2_RESOLUTIONS.iter().copied().find(|&tier| {
        tier_folder.file_name().and_then(|n| n.to_str()) == Some(tier_dir(tier).as_str())
    });

    let prefix = name.strip_suffix(".jp2")?.rsplitn(3, '_').nth(2)?;
    let candidate = |tier: u32| {
        let path = img_data
            .join(tier_dir(tier))
            .join(format!("{prefix}{}", band_file_suffix(SCL_BAND, tier)));
        Some(path).filter(|path| path.is_file())
    };

    let found = current_tier.and_then(candidate).or_else(|| {
        S2_RESOLUTIONS
            .iter()
            .copied()
            .filter(|&tier| Some(tier) != current_tier)
            .find_map(candidate)
    });

    if found.is_none() {
        warn!(band_path = %band_path.display(), "no classification file found");
    }
    found
}

/// `(tier folder name, path)` of every `.jp2` file under `data_dir`, sorted by path.
fn collect_tier_files(data_dir: &Path) -> Vec<(String, PathBuf)> {
    let mut files: Vec<(String, PathBuf)> = WalkDir::new(data_dir)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "jp2"))
        .filter_map(|entry| {
            let folder = entry.path().parent()?.file_name()?.to_str()?.to_string();
            Some((folder, entry.into_path()))
        })
        .collect();
    files.sort_by(|a, b| a.1.cmp(&b.1));
    files
}

fn matches_at(
    files: &[(String, PathBuf)],
    band: &str,
    tier: u32,
    filter: &DateFilter,
) -> Vec<BandRecord> {
    let folder = tier_dir(tier);
    let suffix = band_file_suffix(band, tier);
    files
        .iter()
        .filter(|(dir, path)| {
            *dir == folder
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.ends_with(&suffix))
        })
        .map(|(_, path)| BandRecord {
            band: band.to_string(),
            path: path.clone(),
            acquisition_date: acquisition_date(path),
            resolution: tier,
        })
        .filter(|record| filter.accepts(record.acquisition_date))
        .collect()
}
