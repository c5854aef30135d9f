//! Per-pixel transformations embedded in derived rasters.
//!
//! Parameters are typed and validated here. The raster container only
//! accepts string keyword arguments, so [`PixelFunction::arguments`] is the
//! single place where values are rendered to strings.

use std::collections::BTreeSet;

use super::NormalizeError;

/// No-data sentinel written into invalid pixels.
pub const DEFAULT_NODATA: u16 = u16::MAX;

/// Largest value a valid pixel may take after correction.
pub const MAX_VALID_DN: u16 = u16::MAX - 1;

/// Classification codes above this are always masked.
pub const MAX_SCL_CLASS: u8 = 11;

const PB_OFFSET_CODE: &str = r#"import numpy as np


def pb_offset(in_ar, out_ar, xoff, yoff, xsize, ysize, raster_xsize, raster_ysize, buf_radius, gt, **kwargs):
    offset = int(kwargs.get("dn_offset", "0"))
    nodata = int(kwargs.get("nodata", "65535"))
    src = in_ar[0].astype(np.uint16, copy=False)
    valid = src != nodata
    shifted = np.clip(src.astype(np.int32) - offset, 0, 65534).astype(np.uint16)
    out_ar[:] = np.where(valid, shifted, src)
"#;

const SCL_MASK_CODE: &str = r#"import numpy as np

_MASKED = None


def _masked_classes(raw):
    table = np.zeros(256, dtype=bool)
    for token in str(raw or "").replace(";", ",").split(","):
        token = token.strip().strip("'\"")
        if token:
            table[int(token)] = True
    return table


def scl_mask(in_ar, out_ar, xoff, yoff, xsize, ysize, raster_xsize, raster_ysize, buf_radius, gt, **kwargs):
    global _MASKED
    if _MASKED is None:
        _MASKED = _masked_classes(kwargs.get("classes"))
    nodata = int(kwargs.get("nodata", "65535"))
    src = in_ar[0].astype(np.uint16, copy=False)
    scl = in_ar[1].astype(np.uint8, copy=False)
    invalid = (scl == 0) | (scl > 11) | _MASKED[scl]
    out_ar[:] = np.where(invalid, np.uint16(nodata), src)
"#;

fn check_nodata(nodata: u16) -> Result<(), NormalizeError> {
    if nodata <= MAX_VALID_DN {
        return Err(NormalizeError::InvalidParams(format!(
            "nodata {nodata} collides with valid values 0..={MAX_VALID_DN}"
        )));
    }
    Ok(())
}

/// Parameters of the baseline offset correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetParams {
    dn_offset: u16,
    nodata: u16,
}

impl OffsetParams {
    /// Validates and creates offset parameters.
    ///
    /// # Errors
    ///
    /// Returns [`NormalizeError::InvalidParams`] if `nodata` could be produced
    /// by a valid corrected pixel.
    pub fn new(dn_offset: u16, nodata: u16) -> Result<Self, NormalizeError> {
        check_nodata(nodata)?;
        Ok(Self { dn_offset, nodata })
    }

    /// DN subtracted from valid pixels.
    #[must_use]
    pub fn dn_offset(&self) -> u16 {
        self.dn_offset
    }

    /// No-data sentinel.
    #[must_use]
    pub fn nodata(&self) -> u16 {
        self.nodata
    }

    /// Corrects one pixel: the sentinel passes through, anything else is
    /// shifted and clamped to `0..=MAX_VALID_DN`.
    #[must_use]
    pub fn apply(&self, value: u16) -> u16 {
        if value == self.nodata {
            return value;
        }
        value.saturating_sub(self.dn_offset).min(MAX_VALID_DN)
    }
}

/// Parameters of the classification mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskParams {
    nodata: u16,
    classes: BTreeSet<u8>,
}

impl MaskParams {
    /// Validates and creates mask parameters.
    ///
    /// # Errors
    ///
    /// Returns [`NormalizeError::InvalidParams`] for a colliding `nodata`.
    pub fn new<I>(nodata: u16, classes: I) -> Result<Self, NormalizeError>
    where
        I: IntoIterator<Item = u8>,
    {
        check_nodata(nodata)?;
        Ok(Self {
            nodata,
            classes: classes.into_iter().collect(),
        })
    }

    /// No-data sentinel.
    #[must_use]
    pub fn nodata(&self) -> u16 {
        self.nodata
    }

    /// Extra classification codes to mask.
    #[must_use]
    pub fn classes(&self) -> &BTreeSet<u8> {
        &self.classes
    }

    /// Whether a classification code is masked.
    #[must_use]
    pub fn is_masked(&self, class: u8) -> bool {
        class == 0 || class > MAX_SCL_CLASS || self.classes.contains(&class)
    }

    /// Masks one pixel by its classification code.
    #[must_use]
    pub fn apply(&self, value: u16, class: u8) -> u16 {
        if self.is_masked(class) {
            self.nodata
        } else {
            value
        }
    }
}

/// A transformation attached to a derived band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PixelFunction {
    /// Baseline offset removal over one source.
    PbOffset(OffsetParams),
    /// Classification mask over (band, classification) sources.
    SclMask(MaskParams),
}

impl PixelFunction {
    /// Function identifier inside the embedded code.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::PbOffset(_) => "pb_offset",
            Self::SclMask(_) => "scl_mask",
        }
    }

    /// Language tag for the container.
    #[must_use]
    pub fn language(&self) -> &'static str {
        "Python"
    }

    /// Embedded source code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::PbOffset(_) => PB_OFFSET_CODE,
            Self::SclMask(_) => SCL_MASK_CODE,
        }
    }

    /// Number of sources the function reads.
    #[must_use]
    pub fn source_count(&self) -> usize {
        match self {
            Self::PbOffset(_) => 1,
            Self::SclMask(_) => 2,
        }
    }

    /// No-data sentinel of the output band.
    #[must_use]
    pub fn nodata(&self) -> u16 {
        match self {
            Self::PbOffset(params) => params.nodata(),
            Self::SclMask(params) => params.nodata(),
        }
    }

    /// String keyword arguments in container order.
    #[must_use]
    pub fn arguments(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::PbOffset(params) => vec![
                ("dn_offset", params.dn_offset().to_string()),
                ("nodata", params.nodata().to_string()),
            ],
            Self::SclMask(params) => {
                let classes: Vec<String> = params.classes().iter().map(u8::to_string).collect();
                vec![
                    ("nodata", params.nodata().to_string()),
                    ("classes", classes.join(",")),
                ]
            }
        }
    }
}
