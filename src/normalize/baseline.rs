//! Processing-baseline DN offset inference.
//!
//! Products from baseline 04.00 onward store reflectance with a +1000 DN
//! offset. The baseline is read from the `_N####_` token of the archive
//! root name, e.g. `..._N0509_...SAFE` is baseline 5.09.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::error;

use crate::layout::SAFE_SUFFIX;

/// DN offset of baseline 04.00 and later.
pub const BASELINE_04_OFFSET: u16 = 1000;

/// Baseline code (version x 100) from which the offset applies.
const OFFSET_FROM_CODE: u32 = 400;

#[allow(clippy::expect_used)]
static BASELINE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"_N(\d{4})_").expect("baseline regex is valid") // Static pattern, safe to panic
});

/// Baseline code (e.g. `509` for `N0509`) in an archive root name.
#[must_use]
pub fn baseline_code(root_name: &str) -> Option<u32> {
    BASELINE_PATTERN
        .captures(root_name)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

/// Offset for a baseline code.
#[must_use]
pub fn offset_for_code(code: u32) -> u16 {
    if code >= OFFSET_FROM_CODE {
        BASELINE_04_OFFSET
    } else {
        0
    }
}

/// Infers the DN offset of a band file from its nearest `.SAFE` ancestor.
///
/// A missing ancestor or an unparsable baseline logs an error and yields 0.
#[must_use]
pub fn infer_pb_offset(band_path: &Path) -> u16 {
    let Some(root) = band_path
        .ancestors()
        .skip(1)
        .filter_map(|dir| dir.file_name().and_then(|name| name.to_str()))
        .find(|name| name.ends_with(SAFE_SUFFIX))
    else {
        error!(path = %band_path.display(), "could not locate .SAFE directory above band file");
        return 0;
    };

    match baseline_code(root) {
        Some(code) => offset_for_code(code),
        None => {
            error!(root = %root, "could not extract processing baseline from archive name");
            0
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use tracing::field::{Field, Visit};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer};
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::registry::LookupSpan;

    #[derive(Default)]
    struct MessageVisitor {
        message: String,
    }

    impl Visit for MessageVisitor {
        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                self.message = format!("{value:?}");
            }
        }
    }

    #[derive(Clone, Default)]
    struct ErrorCaptureLayer {
        messages: Arc<Mutex<Vec<String>>>,
    }

    impl<S> Layer<S> for ErrorCaptureLayer
    where
        S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == Level::ERROR {
                let mut visitor = MessageVisitor::default();
                event.record(&mut visitor);
                self.messages.lock().unwrap().push(visitor.message);
            }
        }
    }

    fn band_under(root: &str) -> std::path::PathBuf {
        Path::new("/mirror")
            .join(root)
            .join("GRANULE/L2A_T1/IMG_DATA/R10m/T1_20220101T000000_B02_10m.jp2")
    }

    #[test]
    fn test_baseline_05_has_offset() {
        let path = band_under("S2A_MSIL2A_20220101T000000_N0500_R001_T32TQM_20220101T000001.SAFE");
        assert_eq!(infer_pb_offset(&path), 1000);
    }

    #[test]
    fn test_baseline_03_has_no_offset() {
        let path = band_under("S2A_MSIL2A_20210101T000000_N0350_R001_T32TQM_20210101T000001.SAFE");
        assert_eq!(infer_pb_offset(&path), 0);
    }

    #[test]
    fn test_boundary_at_baseline_04() {
        assert_eq!(offset_for_code(400), 1000);
        assert_eq!(offset_for_code(399), 0);
    }

    #[test]
    fn test_missing_pattern_or_ancestor_yields_zero() {
        assert_eq!(infer_pb_offset(&band_under("S2A_MSIL2A_nobaseline.SAFE")), 0);
        assert_eq!(infer_pb_offset(Path::new("/tmp/B02.jp2")), 0);
    }

    #[test]
    fn test_baseline_code_parses_digits() {
        assert_eq!(baseline_code("X_N0509_Y.SAFE"), Some(509));
        assert_eq!(baseline_code("X_N05_Y.SAFE"), None);
    }

    #[test]
    fn test_unparsable_baseline_logs_error() {
        let layer = ErrorCaptureLayer::default();
        let messages = Arc::clone(&layer.messages);
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::callsite::rebuild_interest_cache();
            let offset = infer_pb_offset(&band_under("S2A_MSIL2A_nobaseline.SAFE"));
            assert_eq!(offset, 0);
        });

        let messages = messages.lock().unwrap();
        assert!(
            messages.iter().any(|m| m.contains("processing baseline")),
            "Expected baseline error event in: {messages:?}"
        );
    }
}
