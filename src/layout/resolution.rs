//! Resolution tiers and the product's file naming conventions.

/// Resolution tiers of an L2A archive, in meters.
pub const S2_RESOLUTIONS: [u32; 3] = [10, 20, 60];

/// Suffix of the archive root directory.
pub const SAFE_SUFFIX: &str = ".SAFE";
/// Directory holding the per-tile granules.
pub const GRANULE_DIR: &str = "GRANULE";
/// Directory holding the tier folders inside a granule.
pub const IMG_DATA_DIR: &str = "IMG_DATA";
/// Name prefix of an L2A granule directory.
pub const GRANULE_PREFIX: &str = "L2A_";
/// Per-granule tile metadata.
pub const GRANULE_METADATA: &str = "MTD_TL.xml";
/// Per-scene product metadata.
pub const SCENE_METADATA: &str = "MTD_MSIL2A.xml";
/// Scene classification band id.
pub const SCL_BAND: &str = "SCL";

/// Tier folder name, e.g. `R20m`.
#[must_use]
pub fn tier_dir(resolution: u32) -> String {
    format!("R{resolution}m")
}

/// Filename suffix of a band file at a tier, e.g. `_B04_20m.jp2`.
#[must_use]
pub fn band_file_suffix(band: &str, resolution: u32) -> String {
    format!("_{band}_{resolution}m.jp2")
}

/// Picks the tier to use for `target` among `available`.
///
/// Exact match first; else the largest tier not exceeding `target`; else the
/// smallest tier overall. `None` only when `available` is empty.
#[must_use]
pub fn choose_best_resolution(target: u32, available: &[u32]) -> Option<u32> {
    if available.contains(&target) {
        return Some(target);
    }
    available
        .iter()
        .copied()
        .filter(|&tier| tier <= target)
        .max()
        .or_else(|| available.iter().copied().min())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choose_prefers_exact_match() {
        assert_eq!(choose_best_resolution(10, &[10, 20, 60]), Some(10));
        assert_eq!(choose_best_resolution(60, &[60, 10]), Some(60));
    }

    #[test]
    fn test_choose_largest_finer_tier() {
        assert_eq!(choose_best_resolution(20, &[10, 60]), Some(10));
        assert_eq!(choose_best_resolution(30, &[10, 20, 60]), Some(20));
    }

    #[test]
    fn test_choose_finest_when_all_coarser() {
        assert_eq!(choose_best_resolution(20, &[60]), Some(60));
        assert_eq!(choose_best_resolution(5, &[60, 20]), Some(20));
    }

    #[test]
    fn test_choose_empty_is_none() {
        assert_eq!(choose_best_resolution(20, &[]), None);
    }

    #[test]
    fn test_choose_always_returns_member() {
        let sets: [&[u32]; 5] = [&[10], &[20], &[60], &[10, 60], &[20, 60]];
        for target in [1, 10, 15, 20, 45, 60, 100] {
            for set in sets {
                let chosen = choose_best_resolution(target, set).unwrap_or_default();
                assert!(set.contains(&chosen), "{chosen} not in {set:?} for {target}");
            }
        }
    }

    #[test]
    fn test_naming_helpers() {
        assert_eq!(tier_dir(20), "R20m");
        assert_eq!(band_file_suffix("SCL", 20), "_SCL_20m.jp2");
    }
}
