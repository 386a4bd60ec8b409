//! Recovering the physical resolution of a page image.
//!
//! hOCR coordinates are in pixels, but the host pipeline needs to know how
//! many pixels make an inch before it can lay text over a PDF page. Scanners
//! and rasterizers usually record this in the image header, so we go look.

use std::{
    fs::File,
    io::{BufRead, BufReader, Read as _, Seek, SeekFrom},
};

use tiff::{
    decoder::{Decoder, ifd::Value},
    tags::Tag,
};

use crate::prelude::*;

/// Centimetres per inch.
const CM_PER_INCH: f64 = 2.54;

/// Metres per inch.
const METERS_PER_INCH: f64 = 0.0254;

/// Horizontal and vertical resolution in dots per inch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolutionPair {
    x: f64,
    y: f64,
}

impl ResolutionPair {
    /// Create a resolution pair. Both components must be positive and finite.
    pub fn new(x: f64, y: f64) -> Option<Self> {
        let valid = |v: f64| v.is_finite() && v > 0.0;
        (valid(x) && valid(y)).then_some(Self { x, y })
    }

    /// The same resolution on both axes.
    pub fn uniform(dpi: f64) -> Option<Self> {
        Self::new(dpi, dpi)
    }

    /// Horizontal DPI.
    pub fn x(&self) -> f64 {
        self.x
    }

    /// Vertical DPI.
    pub fn y(&self) -> f64 {
        self.y
    }
}

/// Read the declared resolution of an image, if it has a usable one.
///
/// Any problem reading the image is logged and reported as `None`.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub fn read_resolution(path: &Path) -> Option<ResolutionPair> {
    match try_read_resolution(path) {
        Ok(Some(dpi)) => {
            debug!(x = dpi.x, y = dpi.y, "Detected image DPI");
            Some(dpi)
        }
        Ok(None) => {
            warn!("Image does not declare a usable DPI");
            None
        }
        Err(err) => {
            warn!("Could not read DPI: {:#}", err);
            None
        }
    }
}

/// Read the declared resolution of an image, falling back to `default_dpi`
/// on both axes.
///
/// Text positions stay consistent with each other even when the fallback is
/// wrong; only the overall scale of the text layer suffers.
pub fn resolve_or_default(path: &Path, default_dpi: ResolutionPair) -> ResolutionPair {
    read_resolution(path).unwrap_or_else(|| {
        warn!(
            path = %path.display(),
            dpi = default_dpi.x,
            "Using default DPI, text placement may be inaccurate"
        );
        default_dpi
    })
}

/// Get the pixel size of an image without decoding it.
pub fn read_pixel_size(path: &Path) -> Option<(u32, u32)> {
    image::image_dimensions(path)
        .inspect_err(|err| debug!(path = %path.display(), "Could not read image size: {err}"))
        .ok()
}

/// Dispatch on the detected image type.
fn try_read_resolution(path: &Path) -> Result<Option<ResolutionPair>> {
    let kind = infer::get_from_path(path)
        .with_context(|| format!("failed to read {:?}", path.display()))?
        .ok_or_else(|| anyhow!("unrecognized image format"))?;
    match kind.mime_type() {
        "image/png" => png_resolution(path),
        "image/tiff" => tiff_resolution(path),
        "image/jpeg" => jpeg_resolution(path),
        other => Err(anyhow!("no DPI support for {}", other)),
    }
}

/// Read the `pHYs` chunk of a PNG.
fn png_resolution(path: &Path) -> Result<Option<ResolutionPair>> {
    let file = File::open(path).context("failed to open PNG")?;
    let reader = png::Decoder::new(BufReader::new(file))
        .read_info()
        .context("failed to read PNG header")?;
    let Some(dims) = reader.info().pixel_dims else {
        return Ok(None);
    };
    match dims.unit {
        png::Unit::Meter => Ok(ResolutionPair::new(
            f64::from(dims.xppu) * METERS_PER_INCH,
            f64::from(dims.yppu) * METERS_PER_INCH,
        )),
        // Only an aspect ratio, not a density.
        png::Unit::Unspecified => Ok(None),
    }
}

/// Read `XResolution`, `YResolution` and `ResolutionUnit` from the first IFD
/// of a TIFF.
fn tiff_resolution(path: &Path) -> Result<Option<ResolutionPair>> {
    let file = File::open(path).context("failed to open TIFF")?;
    let mut decoder =
        Decoder::new(BufReader::new(file)).context("failed to read TIFF header")?;

    let x = decoder.find_tag(Tag::XResolution)?.and_then(tiff_number);
    let y = decoder.find_tag(Tag::YResolution)?.and_then(tiff_number);
    let (Some(x), Some(y)) = (x, y) else {
        return Ok(None);
    };

    // A missing unit means inches.
    let unit = decoder
        .find_tag(Tag::ResolutionUnit)?
        .map(|v| v.into_u32())
        .transpose()?
        .unwrap_or(2);
    match unit {
        2 => Ok(ResolutionPair::new(x, y)),
        3 => Ok(ResolutionPair::new(x * CM_PER_INCH, y * CM_PER_INCH)),
        _ => Ok(None),
    }
}

/// Convert a numeric TIFF tag value to `f64`.
fn tiff_number(value: Value) -> Option<f64> {
    match value {
        Value::Rational(n, d) if d != 0 => Some(f64::from(n) / f64::from(d)),
        Value::Unsigned(n) => Some(f64::from(n)),
        Value::Short(n) => Some(f64::from(n)),
        Value::Float(n) => Some(f64::from(n)),
        Value::Double(n) => Some(n),
        Value::List(mut values) if values.len() == 1 => tiff_number(values.remove(0)),
        _ => None,
    }
}

/// Read the density of a JPEG. The JFIF `APP0` segment wins if it declares
/// one; otherwise we look for the TIFF-style resolution tags in an Exif
/// `APP1` segment, which is where most cameras and phones put it.
fn jpeg_resolution(path: &Path) -> Result<Option<ResolutionPair>> {
    let mut file = File::open(path).context("failed to open JPEG")?;
    let mut header = [0u8; 18];
    file.read_exact(&mut header).context("JPEG too short")?;
    if let Some(dpi) = parse_jfif_density(&header) {
        return Ok(Some(dpi));
    }
    file.seek(SeekFrom::Start(0))
        .context("failed to rewind JPEG")?;
    exif_resolution(&mut BufReader::new(file))
}

/// Read `XResolution`, `YResolution` and `ResolutionUnit` from the primary
/// image of an Exif container.
fn exif_resolution<R: BufRead + Seek>(reader: &mut R) -> Result<Option<ResolutionPair>> {
    let exif = match exif::Reader::new().read_from_container(reader) {
        Ok(exif) => exif,
        Err(exif::Error::NotFound(_)) => return Ok(None),
        Err(err) => return Err(err).context("failed to read Exif data"),
    };
    let rational = |tag| match exif.get_field(tag, exif::In::PRIMARY)?.value {
        exif::Value::Rational(ref values) => values.first().map(|r| r.to_f64()),
        _ => None,
    };
    let (Some(x), Some(y)) = (
        rational(exif::Tag::XResolution),
        rational(exif::Tag::YResolution),
    ) else {
        return Ok(None);
    };

    // A missing unit means inches, as in TIFF.
    let unit = exif
        .get_field(exif::Tag::ResolutionUnit, exif::In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .unwrap_or(2);
    match unit {
        2 => Ok(ResolutionPair::new(x, y)),
        3 => Ok(ResolutionPair::new(x * CM_PER_INCH, y * CM_PER_INCH)),
        _ => Ok(None),
    }
}

/// Parse the density from the first 18 bytes of a JPEG file.
fn parse_jfif_density(header: &[u8; 18]) -> Option<ResolutionPair> {
    if header[0..4] != [0xFF, 0xD8, 0xFF, 0xE0] || &header[6..11] != b"JFIF\0" {
        return None;
    }
    let units = header[13];
    let x = f64::from(u16::from_be_bytes([header[14], header[15]]));
    let y = f64::from(u16::from_be_bytes([header[16], header[17]]));
    match units {
        1 => ResolutionPair::new(x, y),
        2 => ResolutionPair::new(x * CM_PER_INCH, y * CM_PER_INCH),
        // 0 is an aspect ratio.
        _ => None,
    }
}
