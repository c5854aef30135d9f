//! Derived raster documents.
//!
//! Each document is a single-band virtual raster over one or more simple
//! sources, optionally carrying a pixel function. No pixel data is copied.
//!
//! ```text
//! band.jp2 ──> <stem>.pb_offset.vrt ──┐
//!                                     ├──> <stem>.pb_offset.vrt.masked.vrt
//! SCL.jp2 ────────────────────────────┘
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use quick_xml::Writer;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use tracing::{debug, info};

use super::NormalizeError;
use super::pixel_function::{MaskParams, OffsetParams, PixelFunction};
use super::raster_info::{DataType, RasterInfo, RasterProbe};

/// File name suffix of the offset stage output.
pub const PB_OFFSET_EXTENSION: &str = "pb_offset.vrt";

/// Suffix appended to the offset stage path by the mask stage.
pub const MASKED_SUFFIX: &str = ".masked.vrt";

/// One upstream raster feeding a derived band.
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleSource {
    /// Source file.
    pub path: PathBuf,
    /// Band within the source, 1-based.
    pub band: u32,
    /// Source size and type.
    pub info: RasterInfo,
}

impl SimpleSource {
    /// First band of `path`.
    #[must_use]
    pub fn first_band(path: impl Into<PathBuf>, info: RasterInfo) -> Self {
        Self {
            path: path.into(),
            band: 1,
            info,
        }
    }
}

/// A single-band virtual raster description.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedRasterSpec {
    /// Upstream sources, in the order the pixel function reads them.
    pub sources: Vec<SimpleSource>,
    /// Transformation applied on read; `None` is a passthrough.
    pub function: Option<PixelFunction>,
    /// No-data value of the output band.
    pub nodata: Option<u16>,
    /// Output grid and sample type.
    pub info: RasterInfo,
}

impl DerivedRasterSpec {
    /// Checks the source count against the pixel function's arity.
    ///
    /// # Errors
    ///
    /// Returns [`NormalizeError::InvalidParams`] on a mismatch.
    pub fn validate(&self) -> Result<(), NormalizeError> {
        let expected = self.function.as_ref().map_or(1, PixelFunction::source_count);
        if self.sources.len() != expected {
            return Err(NormalizeError::InvalidParams(format!(
                "derived band needs {expected} source(s), got {}",
                self.sources.len()
            )));
        }
        Ok(())
    }

    /// Writes the document to `path` via a temporary sibling and a rename.
    ///
    /// # Errors
    ///
    /// Returns [`NormalizeError::WouldOverwriteSource`] if `path` is one of
    /// the sources, and IO or XML errors otherwise.
    pub fn write(&self, path: &Path) -> Result<(), NormalizeError> {
        self.validate()?;
        let target = absolute(path)?;
        for source in &self.sources {
            if absolute(&source.path)? == target {
                return Err(NormalizeError::WouldOverwriteSource {
                    path: path.to_path_buf(),
                });
            }
        }

        let document = self.render().map_err(|e| NormalizeError::Xml {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| NormalizeError::io(parent, e))?;
        }
        let temp = append_suffix(path, ".tmp");
        std::fs::write(&temp, document).map_err(|e| NormalizeError::io(&temp, e))?;
        if let Err(e) = std::fs::rename(&temp, path) {
            let _ = std::fs::remove_file(&temp);
            return Err(NormalizeError::io(path, e));
        }
        debug!(path = %path.display(), sources = self.sources.len(), "wrote derived raster");
        Ok(())
    }

    fn render(&self) -> quick_xml::Result<Vec<u8>> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let (width, height) = (self.info.width.to_string(), self.info.height.to_string());
        writer.write_event(Event::Start(BytesStart::new("VRTDataset").with_attributes([
            ("rasterXSize", width.as_str()),
            ("rasterYSize", height.as_str()),
        ])))?;

        if let Some(srs) = &self.info.srs {
            text_element(&mut writer, "SRS", srs)?;
        }
        if let Some(transform) = &self.info.geo_transform {
            let rendered: Vec<String> = transform.iter().map(f64::to_string).collect();
            text_element(&mut writer, "GeoTransform", &rendered.join(", "))?;
        }

        let mut band = BytesStart::new("VRTRasterBand").with_attributes([
            ("dataType", self.info.data_type.as_str()),
            ("band", "1"),
        ]);
        if self.function.is_some() {
            band.push_attribute(("subClass", "VRTDerivedRasterBand"));
        }
        writer.write_event(Event::Start(band))?;

        if let Some(nodata) = self.nodata {
            text_element(&mut writer, "NoDataValue", &nodata.to_string())?;
        }
        if let Some(function) = &self.function {
            write_pixel_function(&mut writer, function)?;
        }
        for source in &self.sources {
            self.write_source(&mut writer, source)?;
        }

        writer.write_event(Event::End(BytesEnd::new("VRTRasterBand")))?;
        writer.write_event(Event::End(BytesEnd::new("VRTDataset")))?;

        let mut bytes = writer.into_inner();
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Source rectangle covers the whole source; destination the whole
    /// output grid, so coarser sources are upsampled on read.
    fn write_source(
        &self,
        writer: &mut Writer<Vec<u8>>,
        source: &SimpleSource,
    ) -> quick_xml::Result<()> {
        let filename = std::path::absolute(&source.path)
            .unwrap_or_else(|_| source.path.clone())
            .display()
            .to_string();
        let (src_w, src_h) = (source.info.width.to_string(), source.info.height.to_string());
        let (dst_w, dst_h) = (self.info.width.to_string(), self.info.height.to_string());

        writer.write_event(Event::Start(BytesStart::new("SimpleSource")))?;
        writer.write_event(Event::Start(
            BytesStart::new("SourceFilename").with_attributes([("relativeToVRT", "0")]),
        ))?;
        writer.write_event(Event::Text(BytesText::new(&filename)))?;
        writer.write_event(Event::End(BytesEnd::new("SourceFilename")))?;
        text_element(writer, "SourceBand", &source.band.to_string())?;
        writer.write_event(Event::Empty(BytesStart::new("SourceProperties").with_attributes([
            ("RasterXSize", src_w.as_str()),
            ("RasterYSize", src_h.as_str()),
            ("DataType", source.info.data_type.as_str()),
        ])))?;
        writer.write_event(Event::Empty(BytesStart::new("SrcRect").with_attributes([
            ("xOff", "0"),
            ("yOff", "0"),
            ("xSize", src_w.as_str()),
            ("ySize", src_h.as_str()),
        ])))?;
        writer.write_event(Event::Empty(BytesStart::new("DstRect").with_attributes([
            ("xOff", "0"),
            ("yOff", "0"),
            ("xSize", dst_w.as_str()),
            ("ySize", dst_h.as_str()),
        ])))?;
        writer.write_event(Event::End(BytesEnd::new("SimpleSource")))
    }
}

fn write_pixel_function(
    writer: &mut Writer<Vec<u8>>,
    function: &PixelFunction,
) -> quick_xml::Result<()> {
    text_element(writer, "PixelFunctionLanguage", function.language())?;
    text_element(writer, "PixelFunctionType", function.name())?;

    let arguments = function.arguments();
    let mut element = BytesStart::new("PixelFunctionArguments");
    for (key, value) in &arguments {
        element.push_attribute((*key, value.as_str()));
    }
    writer.write_event(Event::Empty(element))?;

    writer.write_event(Event::Start(BytesStart::new("PixelFunctionCode")))?;
    writer.write_event(Event::CData(BytesCData::new(function.code())))?;
    writer.write_event(Event::End(BytesEnd::new("PixelFunctionCode")))
}

fn text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> quick_xml::Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))
}

fn absolute(path: &Path) -> Result<PathBuf, NormalizeError> {
    std::path::absolute(path).map_err(|e| NormalizeError::io(path, e))
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// A derived raster written to disk.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedRaster {
    /// Document path.
    pub path: PathBuf,
    /// Output grid and sample type.
    pub info: RasterInfo,
}

/// `<out_dir>/<stem>.pb_offset.vrt`.
///
/// # Errors
///
/// Returns [`NormalizeError::InvalidParams`] for a path without a file name.
pub fn pb_offset_vrt_path(band_path: &Path, out_dir: &Path) -> Result<PathBuf, NormalizeError> {
    let stem = band_path.file_stem().ok_or_else(|| {
        NormalizeError::InvalidParams(format!("no file name in {}", band_path.display()))
    })?;
    let mut name = OsString::from(stem);
    name.push(".");
    name.push(PB_OFFSET_EXTENSION);
    Ok(out_dir.join(name))
}

/// `<offset vrt>.masked.vrt`.
#[must_use]
pub fn masked_vrt_path(offset_vrt: &Path) -> PathBuf {
    append_suffix(offset_vrt, MASKED_SUFFIX)
}

/// Wraps a band file in a single-band virtual raster that removes
/// `dn_offset` from valid pixels. A zero offset yields a passthrough.
///
/// # Errors
///
/// Returns [`NormalizeError`] for a colliding `nodata`, an unreadable
/// source, or a failed write.
pub fn create_pb_offset_vrt(
    band_path: &Path,
    dn_offset: u16,
    out_dir: &Path,
    nodata: u16,
    probe: &dyn RasterProbe,
) -> Result<DerivedRaster, NormalizeError> {
    let params = OffsetParams::new(dn_offset, nodata)?;
    let source_info = probe.describe(band_path)?;
    let out_path = pb_offset_vrt_path(band_path, out_dir)?;

    let (function, info) = if dn_offset == 0 {
        (None, source_info.clone())
    } else {
        let info = RasterInfo {
            data_type: DataType::UInt16,
            ..source_info.clone()
        };
        (Some(PixelFunction::PbOffset(params)), info)
    };

    let spec = DerivedRasterSpec {
        sources: vec![SimpleSource::first_band(band_path, source_info)],
        nodata: function.as_ref().map(PixelFunction::nodata),
        function,
        info: info.clone(),
    };
    spec.write(&out_path)?;

    if dn_offset == 0 {
        info!(band = %band_path.display(), vrt = %out_path.display(), "no offset needed; passthrough raster written");
    } else {
        info!(band = %band_path.display(), vrt = %out_path.display(), dn_offset, "offset raster written");
    }
    Ok(DerivedRaster {
        path: out_path,
        info,
    })
}

/// Builds `<offset vrt>.masked.vrt`: one band reading the offset raster and
/// the classification file, writing `nodata` where the class is masked.
///
/// # Errors
///
/// Returns [`NormalizeError`] for a colliding `nodata`, an unreadable
/// classification file, or a failed write.
pub fn create_masked_vrt(
    offset: &DerivedRaster,
    scl_path: &Path,
    classes: &[u8],
    nodata: u16,
    probe: &dyn RasterProbe,
) -> Result<DerivedRaster, NormalizeError> {
    let params = MaskParams::new(nodata, classes.iter().copied())?;
    let scl_info = probe.describe(scl_path)?;
    let out_path = masked_vrt_path(&offset.path);

    let info = RasterInfo {
        data_type: DataType::UInt16,
        ..offset.info.clone()
    };
    let spec = DerivedRasterSpec {
        sources: vec![
            SimpleSource::first_band(&offset.path, offset.info.clone()),
            SimpleSource::first_band(scl_path, scl_info),
        ],
        nodata: Some(params.nodata()),
        function: Some(PixelFunction::SclMask(params)),
        info: info.clone(),
    };
    spec.write(&out_path)?;

    info!(vrt = %out_path.display(), scl = %scl_path.display(), "masked raster written");
    Ok(DerivedRaster {
        path: out_path,
        info,
    })
}
