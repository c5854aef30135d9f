//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use sentinel_core::MonthDay;
use sentinel_core::download::DEFAULT_MAX_ATTEMPTS;
use sentinel_core::normalize::DEFAULT_NODATA;
use sentinel_core::workflow::{DEFAULT_COLLECTION, DEFAULT_PRODUCT_TYPE};

const DEFAULT_BAND_LIST: &str = "B02,B03,B04,B05,B06,B07,B08,B8A,B11,B12";

/// Seasonal Sentinel-2 acquisition and radiometric normalization.
///
/// `download` mirrors L2A scenes for an area and season from the Copernicus
/// Data Space Ecosystem; `normalize` wraps the mirrored bands in derived
/// rasters that remove the processing-baseline offset and mask by SCL.
#[derive(Parser, Debug)]
#[command(name = "sentinel-downloader")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search the catalogue per seasonal window and download band files
    Download(DownloadArgs),
    /// Build offset and mask rasters over a local mirror
    Normalize(NormalizeArgs),
}

#[derive(clap::Args, Debug)]
pub struct DownloadArgs {
    /// Area of interest file (.wkt or GeoJSON)
    #[arg(long, required_unless_present = "bbox", conflicts_with = "bbox")]
    pub aoi: Option<PathBuf>,

    /// Area of interest as xmin,ymin,xmax,ymax in degrees
    #[arg(long, value_delimiter = ',', num_args = 1, allow_hyphen_values = true)]
    pub bbox: Option<Vec<f64>>,

    /// Years to repeat the season over, comma separated
    #[arg(long, value_delimiter = ',', required = true)]
    pub years: Vec<i32>,

    /// First day of the season (MM-DD)
    #[arg(long, default_value = "06-01")]
    pub period_start: MonthDay,

    /// Last day of the season (MM-DD)
    #[arg(long, default_value = "08-31")]
    pub period_end: MonthDay,

    /// Bands to fetch, comma separated
    #[arg(long, value_delimiter = ',', default_value = DEFAULT_BAND_LIST)]
    pub bands: Vec<String>,

    /// Target resolution in meters (10, 20 or 60)
    #[arg(long, value_parser = parse_resolution)]
    pub target_res: Option<u32>,

    /// Do not fetch the SCL classification band
    #[arg(long)]
    pub no_scl: bool,

    /// Output root of the local mirror
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Concurrent file transfers per scene (1-16)
    #[arg(short = 'w', long, value_parser = clap::value_parser!(u8).range(1..=16))]
    pub max_workers: Option<u8>,

    /// Attempts per request for transient failures (1-10)
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub max_attempts: u32,

    /// Stop after this many scenes
    #[arg(long)]
    pub max_scenes: Option<usize>,

    /// Catalogue collection name
    #[arg(long, default_value = DEFAULT_COLLECTION)]
    pub collection: String,

    /// Catalogue product type
    #[arg(long, default_value = DEFAULT_PRODUCT_TYPE)]
    pub product_type: String,

    /// Account username (password comes from CDSE_PASSWORD or CDSE_PASSWORD_FILE)
    #[arg(long)]
    pub username: Option<String>,

    /// Ledger path (default: <output_dir>/download_report.json)
    #[arg(long)]
    pub report: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct NormalizeArgs {
    /// Local mirror root (default: configured output_dir, else ".")
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,

    /// Bands to normalize, comma separated
    #[arg(long, value_delimiter = ',', default_value = DEFAULT_BAND_LIST)]
    pub bands: Vec<String>,

    /// Target resolution in meters (10, 20 or 60)
    #[arg(long, value_parser = parse_resolution)]
    pub target_res: Option<u32>,

    /// Only files acquired in these years, comma separated
    #[arg(long, value_delimiter = ',')]
    pub years: Vec<i32>,

    /// Only files acquired on or after this day of the year (MM-DD)
    #[arg(long, requires = "period_end")]
    pub period_start: Option<MonthDay>,

    /// Only files acquired on or before this day of the year (MM-DD)
    #[arg(long, requires = "period_start")]
    pub period_end: Option<MonthDay>,

    /// SCL classes to mask in addition to 0 and >11; enables the mask stage
    #[arg(long, value_delimiter = ',', num_args = 1)]
    pub mask_classes: Option<Vec<u8>>,

    /// No-data value of the derived rasters
    #[arg(long, default_value_t = DEFAULT_NODATA)]
    pub nodata: u16,

    /// Directory for derived rasters (default: <data_dir>/vrt)
    #[arg(long)]
    pub out_dir: Option<PathBuf>,

    /// Parallel band jobs
    #[arg(short = 'j', long, default_value_t = 4, value_parser = clap::value_parser!(u16).range(1..=64))]
    pub jobs: u16,
}

fn parse_resolution(raw: &str) -> Result<u32, String> {
    match raw.trim().parse::<u32>() {
        Ok(res @ (10 | 20 | 60)) => Ok(res),
        Ok(other) => Err(format!("unsupported resolution {other}; expected 10, 20 or 60")),
        Err(e) => Err(e.to_string()),
    }
}
