//! Descriptor extractors.
//!
//! Every extractor is a pure function of the decoded raster and the
//! [`ExtractionParams`]. Histogram extractors each commit to one
//! normalization convention; fused scores depend on those scales, so they
//! are not interchangeable.

use std::error::Error;
use std::fmt;
use std::path::Path;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::descriptor::{Descriptor, Histogram};
use crate::store::EmbeddingStore;

pub const DEFAULT_PATCH_SIZE: u32 = 7;
pub const DEFAULT_RG_BINS: usize = 30;
pub const DEFAULT_HSV_HUE_BINS: usize = 30;
pub const DEFAULT_HSV_SAT_BINS: usize = 30;
pub const DEFAULT_TEXTURE_BINS: usize = 256;

/// 8-bit hue covers half a turn.
const HUE_RANGE: f32 = 180.0;
const SATURATION_RANGE: f32 = 256.0;

/// The descriptor families the retrieval modes draw from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorFamily {
    CenterPatch,
    RgChromaticity,
    Hsv,
    Texture,
    DeepEmbedding,
}

impl DescriptorFamily {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CenterPatch => "center_patch",
            Self::RgChromaticity => "rg_chromaticity",
            Self::Hsv => "hsv",
            Self::Texture => "texture",
            Self::DeepEmbedding => "deep_embedding",
        }
    }

    /// False only for families read from the descriptor store.
    pub const fn needs_pixels(self) -> bool {
        !matches!(self, Self::DeepEmbedding)
    }
}

impl fmt::Display for DescriptorFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated extractor settings. Only [`ExtractionParams::new`] and
/// `Default` construct one, so every bin count is non-zero and the patch
/// size is odd.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionParams {
    patch_size: u32,
    rg_bins: usize,
    hsv_hue_bins: usize,
    hsv_sat_bins: usize,
    texture_bins: usize,
}

impl Default for ExtractionParams {
    fn default() -> Self {
        Self {
            patch_size: DEFAULT_PATCH_SIZE,
            rg_bins: DEFAULT_RG_BINS,
            hsv_hue_bins: DEFAULT_HSV_HUE_BINS,
            hsv_sat_bins: DEFAULT_HSV_SAT_BINS,
            texture_bins: DEFAULT_TEXTURE_BINS,
        }
    }
}

impl ExtractionParams {
    pub fn new(
        patch_size: u32,
        rg_bins: usize,
        hsv_hue_bins: usize,
        hsv_sat_bins: usize,
        texture_bins: usize,
    ) -> Result<Self, ConfigError> {
        if patch_size == 0 || patch_size % 2 == 0 {
            return Err(ConfigError(format!(
                "patch size must be odd and > 0, got {patch_size}"
            )));
        }
        ensure_bins("rg_bins", rg_bins)?;
        ensure_bins("hsv_hue_bins", hsv_hue_bins)?;
        ensure_bins("hsv_sat_bins", hsv_sat_bins)?;
        ensure_bins("texture_bins", texture_bins)?;

        Ok(Self {
            patch_size,
            rg_bins,
            hsv_hue_bins,
            hsv_sat_bins,
            texture_bins,
        })
    }

    pub fn patch_size(&self) -> u32 {
        self.patch_size
    }

    pub fn rg_bins(&self) -> usize {
        self.rg_bins
    }

    pub fn hsv_hue_bins(&self) -> usize {
        self.hsv_hue_bins
    }

    pub fn hsv_sat_bins(&self) -> usize {
        self.hsv_sat_bins
    }

    pub fn texture_bins(&self) -> usize {
        self.texture_bins
    }
}

fn ensure_bins(name: &str, bins: usize) -> Result<(), ConfigError> {
    if bins == 0 {
        return Err(ConfigError(format!("{name} must be > 0")));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid extraction params: {}", self.0)
    }
}

impl Error for ConfigError {}

/// The raster could not be interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Width or height is zero.
    EmptyRaster { width: u32, height: u32 },
    /// The raster is smaller than the region an extractor reads.
    TooSmall {
        width: u32,
        height: u32,
        required: u32,
    },
    /// Pixels were required but the candidate carried none.
    MissingPixels,
    /// The upstream decoder failed.
    Unreadable(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRaster { width, height } => {
                write!(f, "image has zero dimension ({width}x{height})")
            }
            Self::TooSmall {
                width,
                height,
                required,
            } => write!(
                f,
                "image {width}x{height} is smaller than the {required}x{required} patch"
            ),
            Self::MissingPixels => write!(f, "no decoded pixels available"),
            Self::Unreadable(reason) => write!(f, "unreadable image: {reason}"),
        }
    }
}

impl Error for DecodeError {}

/// Error type for descriptor extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    Decode(DecodeError),
    /// No precomputed embedding is stored under this base filename.
    NotFound { key: String },
    /// A histogram was requested with zero bins.
    Config(ConfigError),
}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(error) => write!(f, "decode error: {error}"),
            Self::NotFound { key } => write!(f, "no stored embedding for '{key}'"),
            Self::Config(error) => write!(f, "{error}"),
        }
    }
}

impl Error for ExtractError {}

impl From<DecodeError> for ExtractError {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

impl From<ConfigError> for ExtractError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

/// Extracts one family's descriptor for the image identified by `id`.
///
/// `image` may be `None` for families that do not read pixels; `store` is
/// consulted only for [`DescriptorFamily::DeepEmbedding`].
pub fn extract(
    family: DescriptorFamily,
    id: &str,
    image: Option<&RgbImage>,
    params: &ExtractionParams,
    store: Option<&EmbeddingStore>,
) -> Result<Descriptor, ExtractError> {
    match family {
        DescriptorFamily::DeepEmbedding => lookup_embedding(id, store),
        DescriptorFamily::CenterPatch => Ok(Descriptor::Vector(center_patch(
            pixels(image)?,
            params.patch_size(),
        )?)),
        DescriptorFamily::RgChromaticity => Ok(Descriptor::Histogram(
            rg_chromaticity_histogram(pixels(image)?, params.rg_bins())?,
        )),
        DescriptorFamily::Hsv => Ok(Descriptor::Histogram(hsv_histogram(
            pixels(image)?,
            params.hsv_hue_bins(),
            params.hsv_sat_bins(),
        )?)),
        DescriptorFamily::Texture => Ok(Descriptor::Histogram(texture_histogram(
            pixels(image)?,
            params.texture_bins(),
        )?)),
    }
}

fn pixels(image: Option<&RgbImage>) -> Result<&RgbImage, DecodeError> {
    image.ok_or(DecodeError::MissingPixels)
}

fn ensure_non_empty(image: &RgbImage) -> Result<(), DecodeError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(DecodeError::EmptyRaster { width, height });
    }
    Ok(())
}

/// BT.601 luma in the fixed-point form common to 8-bit image libraries.
pub fn intensity(pixel: [u8; 3]) -> u8 {
    let [red, green, blue] = pixel.map(u32::from);
    ((red * 4_899 + green * 9_617 + blue * 1_868 + (1 << 13)) >> 14) as u8
}

/// Flattens the `patch_size` square around `(width/2, height/2)` row-major.
pub fn center_patch(image: &RgbImage, patch_size: u32) -> Result<Vec<f32>, DecodeError> {
    ensure_non_empty(image)?;
    let (width, height) = image.dimensions();
    if width < patch_size || height < patch_size {
        return Err(DecodeError::TooSmall {
            width,
            height,
            required: patch_size,
        });
    }

    let half = patch_size / 2;
    let left = width / 2 - half;
    let top = height / 2 - half;

    let mut values = Vec::with_capacity((patch_size * patch_size) as usize);
    for y in top..top + patch_size {
        for x in left..left + patch_size {
            values.push(f32::from(intensity(image.get_pixel(x, y).0)));
        }
    }
    Ok(values)
}

/// `bins × bins` histogram over (r, g) chromaticity, summing to one.
pub fn rg_chromaticity_histogram(image: &RgbImage, bins: usize) -> Result<Histogram, ExtractError> {
    ensure_bins("rg_bins", bins)?;
    ensure_non_empty(image)?;
    let mut histogram = Histogram::zeros(bins, bins);
    let last = bins - 1;
    let scale = last as f32;

    for pixel in image.pixels() {
        let [red, green, blue] = pixel.0.map(f32::from);
        let divisor = (red + green + blue).max(1.0);
        let r_index = ((red / divisor * scale).round() as usize).min(last);
        let g_index = ((green / divisor * scale).round() as usize).min(last);
        histogram.increment(r_index, g_index);
    }

    let (width, height) = image.dimensions();
    histogram.normalize_probability(width as f32 * height as f32);
    Ok(histogram)
}

/// Converts one RGB pixel to 8-bit HSV with hue in `[0, 180]` and
/// saturation/value in `[0, 255]`.
pub fn rgb_to_hsv(pixel: [u8; 3]) -> (u8, u8, u8) {
    let [red, green, blue] = pixel.map(f32::from);
    let value = red.max(green).max(blue);
    let min = red.min(green).min(blue);
    let delta = value - min;

    let saturation = if value > 0.0 {
        (delta * 255.0 / value).round()
    } else {
        0.0
    };

    let mut hue = if delta == 0.0 {
        0.0
    } else if value == red {
        60.0 * (green - blue) / delta
    } else if value == green {
        120.0 + 60.0 * (blue - red) / delta
    } else {
        240.0 + 60.0 * (red - green) / delta
    };
    if hue < 0.0 {
        hue += 360.0;
    }

    (
        (hue / 2.0).round().min(HUE_RANGE) as u8,
        saturation as u8,
        value as u8,
    )
}

/// `hue_bins × sat_bins` hue/saturation histogram, min-max normalized.
pub fn hsv_histogram(
    image: &RgbImage,
    hue_bins: usize,
    sat_bins: usize,
) -> Result<Histogram, ExtractError> {
    ensure_bins("hsv_hue_bins", hue_bins)?;
    ensure_bins("hsv_sat_bins", sat_bins)?;
    ensure_non_empty(image)?;
    let mut histogram = Histogram::zeros(hue_bins, sat_bins);

    for pixel in image.pixels() {
        let (hue, saturation, _) = rgb_to_hsv(pixel.0);
        let h_index = bin_floor(f32::from(hue), hue_bins, HUE_RANGE);
        let s_index = bin_floor(f32::from(saturation), sat_bins, SATURATION_RANGE);
        histogram.increment(h_index, s_index);
    }

    histogram.normalize_min_max();
    Ok(histogram)
}

fn bin_floor(value: f32, bins: usize, range: f32) -> usize {
    ((value * bins as f32 / range).floor() as usize).min(bins.saturating_sub(1))
}

/// Sobel gradient magnitude of the intensity image, saturated to 255 and
/// scaled to `[0, 1]`. Borders replicate the edge pixel.
pub fn gradient_magnitude(image: &RgbImage) -> Result<Vec<f32>, DecodeError> {
    ensure_non_empty(image)?;
    let (width, height) = image.dimensions();
    let (width, height) = (width as usize, height as usize);

    let gray: Vec<f32> = image
        .pixels()
        .map(|pixel| f32::from(intensity(pixel.0)))
        .collect();
    let at = |x: isize, y: isize| -> f32 {
        let x = x.clamp(0, width as isize - 1) as usize;
        let y = y.clamp(0, height as isize - 1) as usize;
        gray[y * width + x]
    };

    let mut magnitude = Vec::with_capacity(width * height);
    for y in 0..height as isize {
        for x in 0..width as isize {
            let gx = (at(x + 1, y - 1) + 2.0 * at(x + 1, y) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2.0 * at(x - 1, y) + at(x - 1, y + 1));
            let gy = (at(x - 1, y + 1) + 2.0 * at(x, y + 1) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2.0 * at(x, y - 1) + at(x + 1, y - 1));
            let value = (gx * gx + gy * gy).sqrt().min(255.0);
            magnitude.push(value / 255.0);
        }
    }
    Ok(magnitude)
}

/// Single-row histogram of gradient magnitudes, min-max normalized.
pub fn texture_histogram(image: &RgbImage, bins: usize) -> Result<Histogram, ExtractError> {
    ensure_bins("texture_bins", bins)?;
    let magnitude = gradient_magnitude(image)?;
    Ok(uniform_histogram(&magnitude, bins)?)
}

/// Buckets `values` uniformly between their own minimum and maximum.
/// Values equal to the maximum land in the last bucket; a constant input
/// lands entirely in the first.
pub fn uniform_histogram(values: &[f32], bins: usize) -> Result<Histogram, ConfigError> {
    ensure_bins("bins", bins)?;
    let mut histogram = Histogram::zeros(1, bins);
    let (min, max) = values
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), value| {
            (min.min(*value), max.max(*value))
        });
    let bin_width = (max - min) / bins as f32;
    let last = bins - 1;

    for value in values {
        let index = if bin_width > 0.0 {
            (((value - min) / bin_width).floor() as usize).min(last)
        } else {
            0
        };
        histogram.increment(0, index);
    }

    histogram.normalize_min_max();
    Ok(histogram)
}

/// Base filename used as the descriptor store key.
///
/// Images with the same file name in different directories share a key.
pub fn embedding_key(id: &str) -> &str {
    Path::new(id)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(id)
}

fn lookup_embedding(id: &str, store: Option<&EmbeddingStore>) -> Result<Descriptor, ExtractError> {
    let key = embedding_key(id);
    store
        .and_then(|store| store.get(key))
        .map(|values| Descriptor::Vector(values.to_vec()))
        .ok_or_else(|| ExtractError::NotFound {
            key: key.to_string(),
        })
}
