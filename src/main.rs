//! CLI entry point for the Sentinel-2 downloader.

use std::collections::BTreeSet;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use sentinel_core::auth::{Credentials, SessionConfig};
use sentinel_core::download::RetryPolicy;
use sentinel_core::download::constants::DEFAULT_MAX_WORKERS;
use sentinel_core::layout::BandSelection;
use sentinel_core::normalize::{
    BandJob, DateFilter, Jp2Probe, OffsetParams, find_band_paths, normalize_bands,
};
use sentinel_core::workflow::{
    DEFAULT_TARGET_RES, DownloadRequest, SeasonFilter, SeasonalDownloader, TransferEndpoints,
    write_report,
};
use sentinel_core::Aoi;
use tracing::{debug, info, warn};

mod app_config;
mod cli;

use app_config::FileConfig;
use cli::{Args, Command, DownloadArgs, NormalizeArgs};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let file_config = match app_config::load_default_file_config()? {
        Some((path, config)) => {
            debug!(path = %path.display(), "loaded config file");
            config
        }
        None => FileConfig::default(),
    };

    let show_spinner = !args.quiet && io::stderr().is_terminal();
    match args.command {
        Command::Download(download) => run_download(download, &file_config, show_spinner).await,
        Command::Normalize(normalize) => {
            run_normalize(normalize, &file_config, show_spinner).await
        }
    }
}

async fn run_download(args: DownloadArgs, file: &FileConfig, show_spinner: bool) -> Result<()> {
    let aoi = load_aoi(args.aoi.as_deref(), args.bbox.as_deref())?;
    let target_res = args
        .target_res
        .or(file.target_res)
        .unwrap_or(DEFAULT_TARGET_RES);
    let output_root = args
        .output_dir
        .or_else(|| file.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."));

    let mut request = DownloadRequest::new(aoi, args.years, args.period_start, args.period_end)
        .with_selection(BandSelection::new(args.bands, target_res).with_scl(!args.no_scl));
    request.collection = args.collection;
    request.product_type = args.product_type;
    request.max_scenes = args.max_scenes;
    request.fetch.max_workers = args
        .max_workers
        .or(file.max_workers)
        .map_or(DEFAULT_MAX_WORKERS, usize::from);

    let mut session_config = SessionConfig {
        retry_policy: RetryPolicy::with_max_attempts(args.max_attempts),
        ..SessionConfig::default()
    };
    if let Some(url) = &file.token_url {
        session_config.token_endpoint.url.clone_from(url);
    }
    if let Some(secs) = file.connect_timeout_secs {
        session_config.connect_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = file.read_timeout_secs {
        session_config.read_timeout = Duration::from_secs(secs);
        request.fetch.timeout = Duration::from_secs(secs);
    }

    let mut endpoints = TransferEndpoints::default();
    if let Some(url) = &file.catalogue_url {
        endpoints.catalogue_url.clone_from(url);
    }
    if let Some(url) = &file.download_url {
        endpoints.download_url.clone_from(url);
    }

    let mut credentials = Credentials::from_env();
    if let Some(username) = args.username {
        credentials = credentials.with_username(username);
    }

    let downloader = SeasonalDownloader::new(credentials)
        .with_endpoints(endpoints)
        .with_session_config(session_config);

    let spinner = start_spinner(show_spinner, "Downloading scenes...");
    let outcome = downloader.run(&request, &output_root).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    let results = outcome.context("Seasonal download failed")?;

    let report_path = args
        .report
        .unwrap_or_else(|| output_root.join("download_report.json"));
    write_report(&report_path, &results)
        .with_context(|| format!("Failed to write report '{}'", report_path.display()))?;

    let incomplete = results.iter().filter(|row| !row.is_complete()).count();
    let failed_targets: usize = results.iter().map(|row| row.n_failures).sum();
    info!(
        scenes = results.len(),
        incomplete,
        failed_targets,
        report = %report_path.display(),
        "Download complete"
    );
    Ok(())
}

async fn run_normalize(args: NormalizeArgs, file: &FileConfig, show_spinner: bool) -> Result<()> {
    OffsetParams::new(0, args.nodata).context("Invalid --nodata")?;

    let data_dir = args
        .data_dir
        .or_else(|| file.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    let target_res = args
        .target_res
        .or(file.target_res)
        .unwrap_or(DEFAULT_TARGET_RES);
    let filter = DateFilter {
        years: (!args.years.is_empty()).then(|| args.years.iter().copied().collect::<BTreeSet<_>>()),
        season: args
            .period_start
            .zip(args.period_end)
            .map(|(start, end)| SeasonFilter::new(start, end)),
    };

    let records = find_band_paths(&data_dir, &args.bands, target_res, &filter)
        .with_context(|| format!("Band discovery failed under '{}'", data_dir.display()))?;
    info!(files = records.len(), "band files found");

    let out_dir = args.out_dir.unwrap_or_else(|| data_dir.join("vrt"));
    let jobs: Vec<BandJob> = records
        .iter()
        .map(|record| {
            BandJob::from_record(record, &out_dir, args.nodata, args.mask_classes.as_deref())
        })
        .collect();

    let spinner = start_spinner(show_spinner, "Building derived rasters...");
    let workers = usize::from(args.jobs);
    let (jobs, results) = tokio::task::spawn_blocking(move || {
        let results = normalize_bands(&jobs, workers, &Jp2Probe);
        (jobs, results)
    })
    .await
    .context("Normalization worker panicked")?;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    let results = results.context("Normalization failed")?;

    let mut outputs = Vec::with_capacity(results.len());
    for (job, result) in jobs.iter().zip(results) {
        match result {
            Ok(output) => outputs.push(output),
            Err(error) => warn!(band = %job.band_path.display(), error = %error, "band not normalized"),
        }
    }

    let manifest = out_dir.join("normalize_report.json");
    write_json(&manifest, &outputs)?;
    info!(
        normalized = outputs.len(),
        failed = jobs.len() - outputs.len(),
        manifest = %manifest.display(),
        "Normalization complete"
    );
    Ok(())
}

fn load_aoi(path: Option<&Path>, bbox: Option<&[f64]>) -> Result<Aoi> {
    match (path, bbox) {
        (Some(path), _) => Aoi::from_file(path)
            .with_context(|| format!("Failed to load AOI '{}'", path.display())),
        (None, Some(&[xmin, ymin, xmax, ymax])) => {
            if xmin >= xmax || ymin >= ymax {
                bail!("--bbox must be xmin,ymin,xmax,ymax with min < max");
            }
            Ok(Aoi::from_bbox(xmin, ymin, xmax, ymax))
        }
        (None, Some(values)) => bail!("--bbox expects 4 values, got {}", values.len()),
        (None, None) => bail!("either --aoi or --bbox is required"),
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create '{}'", parent.display()))?;
    }
    let body = serde_json::to_string_pretty(value)?;
    std::fs::write(path, body).with_context(|| format!("Failed to write '{}'", path.display()))
}

fn start_spinner(enabled: bool, message: &'static str) -> Option<ProgressBar> {
    if !enabled {
        return None;
    }
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    Some(spinner)
}
