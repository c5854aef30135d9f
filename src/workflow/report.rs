//! Per-scene result ledger.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::download::constants::PARTIAL_SUFFIX;
use crate::download::{DownloadFailure, FetchSummary};
use crate::layout::LayoutResolution;

/// Outcome of one scene in a seasonal run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SceneResult {
    /// Catalogue id.
    pub scene_id: String,
    /// Catalogue name.
    pub scene_name: String,
    /// Start instant of the query window that returned the scene.
    pub window_start: String,
    /// End instant of the query window that returned the scene.
    pub window_end: String,
    /// Archive root, if the layout was resolved.
    pub root: Option<String>,
    /// Granule directory, if found.
    pub granule: Option<String>,
    /// Band id to chosen tier.
    pub band_resolutions: BTreeMap<String, Option<u32>>,
    /// Files selected for download.
    pub n_targets: usize,
    /// Files that failed.
    pub n_failures: usize,
    /// Files already complete on disk.
    pub n_cached: usize,
    /// Per-file failures.
    pub failures: Vec<DownloadFailure>,
    /// Why the layout could not be resolved; no files were attempted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout_error: Option<String>,
}

impl SceneResult {
    /// Row for a scene whose layout resolved and whose targets were fetched.
    #[must_use]
    pub fn fetched(
        scene: SceneRef<'_>,
        resolution: LayoutResolution,
        summary: FetchSummary,
    ) -> Self {
        Self {
            root: Some(resolution.layout.root),
            granule: resolution.layout.granule,
            band_resolutions: resolution.layout.band_resolutions,
            n_targets: resolution.targets.len(),
            n_failures: summary.failures.len(),
            n_cached: summary.cached,
            failures: summary.failures,
            ..Self::base(scene)
        }
    }

    /// Row for a scene whose layout could not be resolved.
    #[must_use]
    pub fn unresolved(scene: SceneRef<'_>, error: &impl std::fmt::Display) -> Self {
        Self {
            layout_error: Some(error.to_string()),
            ..Self::base(scene)
        }
    }

    fn base(scene: SceneRef<'_>) -> Self {
        Self {
            scene_id: scene.id.to_string(),
            scene_name: scene.name.to_string(),
            window_start: scene.window_start.to_string(),
            window_end: scene.window_end.to_string(),
            ..Self::default()
        }
    }

    /// True when the layout resolved and every target is on disk.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.layout_error.is_none() && self.n_failures == 0
    }
}

/// Borrowed identity of one catalogue row.
#[derive(Debug, Clone, Copy)]
pub struct SceneRef<'a> {
    /// Catalogue id.
    pub id: &'a str,
    /// Catalogue name.
    pub name: &'a str,
    /// Window start instant.
    pub window_start: &'a str,
    /// Window end instant.
    pub window_end: &'a str,
}

/// Writes the ledger as pretty JSON through a `.part` sibling and a rename.
///
/// # Errors
///
/// Returns an IO error if the file cannot be written. A failed write leaves
/// any previous report untouched.
pub fn write_report(path: &Path, results: &[SceneResult]) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(results).map_err(std::io::Error::other)?;

    let mut temp = path.as_os_str().to_owned();
    temp.push(PARTIAL_SUFFIX);
    let temp = PathBuf::from(temp);
    std::fs::write(&temp, json)
        .and_then(|()| std::fs::rename(&temp, path))
        .inspect_err(|_| {
            let _ = std::fs::remove_file(&temp);
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::download::{DownloadError, DownloadTarget};
    use crate::layout::SceneLayout;

    fn scene() -> SceneRef<'static> {
        SceneRef {
            id: "id-1",
            name: "S2A_X.SAFE",
            window_start: "2021-06-01T00:00:00.000Z",
            window_end: "2021-08-31T23:59:59.999Z",
        }
    }

    #[test]
    fn test_fetched_row_counts() {
        let resolution = LayoutResolution {
            layout: SceneLayout {
                root: "S2A_X.SAFE".into(),
                granule: Some("L2A_T1".into()),
                band_resolutions: BTreeMap::from([("B02".to_string(), Some(10))]),
            },
            targets: vec![
                DownloadTarget::new(["S2A_X.SAFE", "a.jp2"]),
                DownloadTarget::new(["S2A_X.SAFE", "MTD_MSIL2A.xml"]),
            ],
        };
        let summary = FetchSummary {
            downloaded: 1,
            cached: 0,
            failures: vec![DownloadFailure::from_error(
                DownloadTarget::new(["S2A_X.SAFE", "a.jp2"]),
                &DownloadError::http_status("u", 500),
            )],
        };
        let row = SceneResult::fetched(scene(), resolution, summary);
        assert_eq!(row.n_targets, 2);
        assert_eq!(row.n_failures, 1);
        assert!(!row.is_complete());
        assert_eq!(row.root.as_deref(), Some("S2A_X.SAFE"));
    }

    #[test]
    fn test_unresolved_row_serializes_layout_error() {
        let row = SceneResult::unresolved(scene(), &"no child nodes");
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["layout_error"], "no child nodes");
        assert_eq!(json["n_targets"], 0);
        assert_eq!(json["root"], serde_json::Value::Null);
    }

    #[test]
    fn test_write_report_creates_parent() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out").join("report.json");
        write_report(&path, &[SceneResult::unresolved(scene(), &"x")]).unwrap();
        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed[0]["scene_id"], "id-1");
    }

    #[test]
    fn test_write_report_replaces_previous_without_leftovers() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("report.json");
        std::fs::write(&path, "stale").unwrap();

        write_report(&path, &[]).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("report.json")]);
    }

    #[test]
    fn test_failed_report_write_keeps_previous() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("report.json");
        std::fs::create_dir(&path).unwrap();

        assert!(write_report(&path, &[]).is_err());
        assert!(path.is_dir());
        assert!(!dir.path().join("report.json.part").exists());
    }
}
