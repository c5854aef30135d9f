//! Source raster description.
//!
//! A derived raster needs the size, sample type and georeferencing of its
//! sources. [`Jp2Probe`] reads them without decoding pixels: size and bit
//! depth come from the JPEG 2000 `ihdr` box, georeferencing from the
//! granule's `MTD_TL.xml`.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use quick_xml::Reader;
use quick_xml::events::Event;
use serde::Serialize;
use tracing::{debug, warn};

use super::NormalizeError;
use crate::layout::{GRANULE_METADATA, IMG_DATA_DIR};

/// Bytes read from the head of a JP2 file when looking for the header box.
const HEADER_SCAN_LIMIT: u64 = 64 * 1024;

/// Sample type of a raster band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DataType {
    Byte,
    UInt16,
    Int16,
}

impl DataType {
    /// Name used in raster container documents.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Byte => "Byte",
            Self::UInt16 => "UInt16",
            Self::Int16 => "Int16",
        }
    }

    /// Maps the `ihdr` BPC byte: low 7 bits are depth minus one, the high bit
    /// marks signed samples.
    fn from_bpc(bpc: u8) -> Option<Self> {
        let signed = bpc & 0x80 != 0;
        let depth = (bpc & 0x7f) + 1;
        match (depth, signed) {
            (1..=8, false) => Some(Self::Byte),
            (9..=16, false) => Some(Self::UInt16),
            (9..=16, true) => Some(Self::Int16),
            _ => None,
        }
    }
}

/// What a derived raster needs to know about a source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RasterInfo {
    /// Columns.
    pub width: u32,
    /// Rows.
    pub height: u32,
    /// Sample type.
    pub data_type: DataType,
    /// Affine transform `[ulx, xres, 0, uly, 0, yres]`.
    pub geo_transform: Option<[f64; 6]>,
    /// Spatial reference, e.g. `EPSG:32610`.
    pub srs: Option<String>,
}

/// Describes a raster file on disk.
pub trait RasterProbe: Send + Sync {
    /// Reads size, sample type and georeferencing of `path`.
    ///
    /// # Errors
    ///
    /// Returns [`NormalizeError`] if the file cannot be read or is not a
    /// supported raster.
    fn describe(&self, path: &Path) -> Result<RasterInfo, NormalizeError>;
}

/// Probe for Sentinel-2 JPEG 2000 band files.
#[derive(Debug, Clone, Copy, Default)]
pub struct Jp2Probe;

impl RasterProbe for Jp2Probe {
    fn describe(&self, path: &Path) -> Result<RasterInfo, NormalizeError> {
        let header = read_jp2_header(path)?;
        let mut info = RasterInfo {
            width: header.width,
            height: header.height,
            data_type: header.data_type,
            geo_transform: None,
            srs: None,
        };

        let geocoding = granule_metadata_for(path).zip(band_resolution(path));
        if let Some((metadata, resolution)) = geocoding {
            match tile_geocoding(&metadata, resolution) {
                Ok(Some(geo)) => {
                    info.geo_transform = Some(geo.geo_transform);
                    info.srs = Some(geo.srs);
                }
                Ok(None) => debug!(path = %metadata.display(), resolution, "no geoposition for resolution"),
                Err(error) => warn!(path = %metadata.display(), error = %error, "ignoring unreadable tile metadata"),
            }
        }
        Ok(info)
    }
}

/// Fields of the JP2 image header box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Jp2Header {
    pub width: u32,
    pub height: u32,
    pub data_type: DataType,
}

/// Reads the `jp2h/ihdr` box from the head of `path`.
///
/// # Errors
///
/// Returns [`NormalizeError::Io`] if the file cannot be read and
/// [`NormalizeError::Probe`] if no usable header is found.
pub fn read_jp2_header(path: &Path) -> Result<Jp2Header, NormalizeError> {
    let io_error = |source| NormalizeError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut head = Vec::new();
    File::open(path)
        .map_err(io_error)?
        .take(HEADER_SCAN_LIMIT)
        .read_to_end(&mut head)
        .map_err(io_error)?;

    let probe_error = |message: &str| NormalizeError::Probe {
        path: path.to_path_buf(),
        message: message.to_string(),
    };
    let ihdr = find_box(&head, b"jp2h")
        .and_then(|jp2h| find_box(jp2h, b"ihdr"))
        .ok_or_else(|| probe_error("no JP2 image header box"))?;
    if ihdr.len() < 14 {
        return Err(probe_error("truncated JP2 image header box"));
    }

    let height = u32::from_be_bytes([ihdr[0], ihdr[1], ihdr[2], ihdr[3]]);
    let width = u32::from_be_bytes([ihdr[4], ihdr[5], ihdr[6], ihdr[7]]);
    let data_type =
        DataType::from_bpc(ihdr[10]).ok_or_else(|| probe_error("unsupported JP2 bit depth"))?;
    Ok(Jp2Header {
        width,
        height,
        data_type,
    })
}

/// Returns the body of the first box of type `wanted` at this nesting level.
/// A box cut off by the read limit yields the bytes that were read.
fn find_box<'a>(mut data: &'a [u8], wanted: &[u8; 4]) -> Option<&'a [u8]> {
    while data.len() >= 8 {
        let declared = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let kind = &data[4..8];
        let (header_len, total) = match declared {
            0 => (8, data.len()),
            1 => {
                let extended: [u8; 8] = data.get(8..16)?.try_into().ok()?;
                (16, usize::try_from(u64::from_be_bytes(extended)).ok()?)
            }
            n => (8, usize::try_from(n).ok()?),
        };
        if total < header_len {
            return None;
        }
        if kind == wanted {
            return data.get(header_len..total.min(data.len()));
        }
        data = data.get(total..)?;
    }
    None
}

/// Georeferencing of one resolution of a tile.
#[derive(Debug, Clone, PartialEq)]
pub struct TileGeocoding {
    pub srs: String,
    pub geo_transform: [f64; 6],
}

/// Reads `HORIZONTAL_CS_CODE` and the `Geoposition` block for `resolution`
/// from a granule metadata file. `Ok(None)` when either is missing.
///
/// # Errors
///
/// Returns [`NormalizeError::Xml`] for unreadable or malformed XML.
pub fn tile_geocoding(path: &Path, resolution: u32) -> Result<Option<TileGeocoding>, NormalizeError> {
    let xml_error = |error: &dyn std::fmt::Display| NormalizeError::Xml {
        path: path.to_path_buf(),
        message: error.to_string(),
    };
    let mut reader = Reader::from_file(path).map_err(|e| xml_error(&e))?;
    reader.trim_text(true);

    let wanted = resolution.to_string();
    let mut buf = Vec::new();
    let mut current = String::new();
    let mut in_position = false;
    let mut srs = None;
    let (mut ulx, mut uly, mut xdim, mut ydim) = (None, None, None, None);

    loop {
        match reader.read_event_into(&mut buf).map_err(|e| xml_error(&e))? {
            Event::Start(ref e) => {
                current = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if current == "Geoposition" {
                    let attr = e
                        .try_get_attribute("resolution")
                        .map_err(|e| xml_error(&e))?;
                    in_position = match attr {
                        Some(attr) => attr.unescape_value().map_err(|e| xml_error(&e))? == wanted,
                        None => false,
                    };
                }
            }
            Event::End(ref e) => {
                if e.local_name().as_ref() == b"Geoposition" {
                    in_position = false;
                }
                current.clear();
            }
            Event::Text(e) => {
                let text = e.unescape().map_err(|e| xml_error(&e))?;
                let number = || text.trim().parse::<f64>().ok();
                match current.as_str() {
                    "HORIZONTAL_CS_CODE" => srs = Some(text.trim().to_string()),
                    "ULX" if in_position => ulx = number(),
                    "ULY" if in_position => uly = number(),
                    "XDIM" if in_position => xdim = number(),
                    "YDIM" if in_position => ydim = number(),
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(match (srs, ulx, uly, xdim, ydim) {
        (Some(srs), Some(ulx), Some(uly), Some(xdim), Some(ydim)) => Some(TileGeocoding {
            srs,
            geo_transform: [ulx, xdim, 0.0, uly, 0.0, ydim],
        }),
        _ => None,
    })
}

/// `<granule>/MTD_TL.xml` for a file under `<granule>/IMG_DATA/R<tier>m/`.
fn granule_metadata_for(band_path: &Path) -> Option<PathBuf> {
    let img_data = band_path.parent()?.parent()?;
    if img_data.file_name()? != IMG_DATA_DIR {
        return None;
    }
    Some(img_data.parent()?.join(GRANULE_METADATA)).filter(|path| path.is_file())
}

/// Tier encoded in a `..._<tier>m.jp2` file name.
fn band_resolution(band_path: &Path) -> Option<u32> {
    let name = band_path.file_name()?.to_str()?;
    name.rsplit('_').next()?.strip_suffix("m.jp2")?.parse().ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use tempfile::TempDir;

    use super::*;

    /// Minimal JP2 head: signature box, then `jp2h` holding `ihdr`.
    pub(crate) fn jp2_bytes(width: u32, height: u32, bpc: u8) -> Vec<u8> {
        let mut ihdr = Vec::new();
        ihdr.extend_from_slice(&height.to_be_bytes());
        ihdr.extend_from_slice(&width.to_be_bytes());
        ihdr.extend_from_slice(&1u16.to_be_bytes());
        ihdr.extend_from_slice(&[bpc, 7, 0, 0]);

        let boxed = |kind: &[u8; 4], body: &[u8]| {
            let mut out = u32::try_from(body.len() + 8).unwrap().to_be_bytes().to_vec();
            out.extend_from_slice(kind);
            out.extend_from_slice(body);
            out
        };
        let mut bytes = boxed(b"jP  ", &[0x0d, 0x0a, 0x87, 0x0a]);
        bytes.extend(boxed(b"ftyp", b"jp2 \0\0\0\0jp2 "));
        bytes.extend(boxed(b"jp2h", &boxed(b"ihdr", &ihdr)));
        bytes.extend(boxed(b"jp2c", &[0xff, 0x4f]));
        bytes
    }

    pub(crate) const TILE_METADATA: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<n1:Level-2A_Tile_ID xmlns:n1="https://psd-14.sentinel2.eo.esa.int/PSD/S2_PDI_Level-2A_Tile_Metadata.xsd">
  <n1:Geometric_Info>
    <Tile_Geocoding metadataLevel="Brief">
      <HORIZONTAL_CS_NAME>WGS84 / UTM zone 10N</HORIZONTAL_CS_NAME>
      <HORIZONTAL_CS_CODE>EPSG:32610</HORIZONTAL_CS_CODE>
      <Geoposition resolution="10">
        <ULX>600000</ULX><ULY>6400020</ULY><XDIM>10</XDIM><YDIM>-10</YDIM>
      </Geoposition>
      <Geoposition resolution="20">
        <ULX>600000</ULX><ULY>6400020</ULY><XDIM>20</XDIM><YDIM>-20</YDIM>
      </Geoposition>
    </Tile_Geocoding>
  </n1:Geometric_Info>
</n1:Level-2A_Tile_ID>
"#;

    #[test]
    fn test_read_jp2_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("B04.jp2");
        std::fs::write(&path, jp2_bytes(5490, 5491, 14)).unwrap();

        let header = read_jp2_header(&path).unwrap();
        assert_eq!(header.width, 5490);
        assert_eq!(header.height, 5491);
        assert_eq!(header.data_type, DataType::UInt16);
    }

    #[test]
    fn test_read_jp2_header_rejects_other_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("not.jp2");
        std::fs::write(&path, b"plain text, not a raster").unwrap();
        let err = read_jp2_header(&path).unwrap_err();
        assert!(
            matches!(err, NormalizeError::Probe { .. }),
            "Expected probe error, got: {err}"
        );
    }

    #[test]
    fn test_bpc_mapping() {
        assert_eq!(DataType::from_bpc(7), Some(DataType::Byte));
        assert_eq!(DataType::from_bpc(14), Some(DataType::UInt16));
        assert_eq!(DataType::from_bpc(0x80 | 15), Some(DataType::Int16));
        assert_eq!(DataType::from_bpc(31), None);
    }

    #[test]
    fn test_tile_geocoding_picks_resolution() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("MTD_TL.xml");
        std::fs::write(&path, TILE_METADATA).unwrap();

        let geo = tile_geocoding(&path, 20).unwrap().unwrap();
        assert_eq!(geo.srs, "EPSG:32610");
        assert_eq!(geo.geo_transform, [600_000.0, 20.0, 0.0, 6_400_020.0, 0.0, -20.0]);
        assert!(tile_geocoding(&path, 60).unwrap().is_none());
    }

    #[test]
    fn test_probe_uses_granule_metadata() {
        let dir = TempDir::new().unwrap();
        let granule = dir.path().join("L2A_T10VFU_A1");
        let tier = granule.join("IMG_DATA").join("R10m");
        std::fs::create_dir_all(&tier).unwrap();
        std::fs::write(granule.join("MTD_TL.xml"), TILE_METADATA).unwrap();
        let band = tier.join("T10VFU_20230928T190039_B02_10m.jp2");
        std::fs::write(&band, jp2_bytes(10980, 10980, 14)).unwrap();

        let info = Jp2Probe.describe(&band).unwrap();
        assert_eq!(info.width, 10980);
        assert_eq!(info.srs.as_deref(), Some("EPSG:32610"));
        assert_eq!(info.geo_transform.unwrap()[1], 10.0);
    }
}
