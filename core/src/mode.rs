use std::error::Error;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::extract::DescriptorFamily;
use crate::metric::{Metric, Orientation};

/// One extractor paired with the metric that compares its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FamilyMetric {
    pub family: DescriptorFamily,
    pub metric: Metric,
}

const fn pair(family: DescriptorFamily, metric: Metric) -> FamilyMetric {
    FamilyMetric { family, metric }
}

const BASELINE_PATCH: &[FamilyMetric] = &[pair(
    DescriptorFamily::CenterPatch,
    Metric::SumSquaredDifferences,
)];
const RG_CHROMATICITY: &[FamilyMetric] = &[pair(
    DescriptorFamily::RgChromaticity,
    Metric::HistogramIntersection,
)];
const HSV: &[FamilyMetric] = &[pair(DescriptorFamily::Hsv, Metric::HistogramIntersection)];
const RG_HSV: &[FamilyMetric] = &[
    pair(
        DescriptorFamily::RgChromaticity,
        Metric::HistogramIntersection,
    ),
    pair(DescriptorFamily::Hsv, Metric::HistogramIntersection),
];
const COLOR_TEXTURE: &[FamilyMetric] = &[
    pair(
        DescriptorFamily::RgChromaticity,
        Metric::HistogramIntersection,
    ),
    pair(DescriptorFamily::Texture, Metric::HistogramIntersection),
];
const DEEP_EMBEDDING: &[FamilyMetric] = &[pair(
    DescriptorFamily::DeepEmbedding,
    Metric::CosineDistance,
)];
// The embedding joins the fused sum as a similarity so every component
// shares the descending orientation.
const COLOR_TEXTURE_DEEP: &[FamilyMetric] = &[
    pair(
        DescriptorFamily::RgChromaticity,
        Metric::HistogramIntersection,
    ),
    pair(DescriptorFamily::Texture, Metric::HistogramIntersection),
    pair(DescriptorFamily::DeepEmbedding, Metric::CosineSimilarity),
];

/// Closed set of retrieval strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RetrievalMode {
    #[serde(rename = "baseline-patch")]
    BaselinePatch,
    #[serde(rename = "rg-chromaticity")]
    RgChromaticity,
    #[serde(rename = "hsv")]
    Hsv,
    #[serde(rename = "rg+hsv")]
    RgHsv,
    #[serde(rename = "color+texture")]
    ColorTexture,
    #[serde(rename = "deep-embedding")]
    DeepEmbedding,
    #[serde(rename = "color+texture+deep-embedding")]
    ColorTextureDeepEmbedding,
}

impl RetrievalMode {
    pub const ALL: [Self; 7] = [
        Self::BaselinePatch,
        Self::RgChromaticity,
        Self::Hsv,
        Self::RgHsv,
        Self::ColorTexture,
        Self::DeepEmbedding,
        Self::ColorTextureDeepEmbedding,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BaselinePatch => "baseline-patch",
            Self::RgChromaticity => "rg-chromaticity",
            Self::Hsv => "hsv",
            Self::RgHsv => "rg+hsv",
            Self::ColorTexture => "color+texture",
            Self::DeepEmbedding => "deep-embedding",
            Self::ColorTextureDeepEmbedding => "color+texture+deep-embedding",
        }
    }

    /// Extractor/metric pairs in the order their scores are fused.
    pub const fn components(self) -> &'static [FamilyMetric] {
        match self {
            Self::BaselinePatch => BASELINE_PATCH,
            Self::RgChromaticity => RG_CHROMATICITY,
            Self::Hsv => HSV,
            Self::RgHsv => RG_HSV,
            Self::ColorTexture => COLOR_TEXTURE,
            Self::DeepEmbedding => DEEP_EMBEDDING,
            Self::ColorTextureDeepEmbedding => COLOR_TEXTURE_DEEP,
        }
    }

    /// Sort direction of the final (possibly fused) score.
    pub const fn orientation(self) -> Orientation {
        self.components()[0].metric.orientation()
    }

    pub fn is_fused(self) -> bool {
        self.components().len() > 1
    }

    pub fn needs_pixels(self) -> bool {
        self.components()
            .iter()
            .any(|component| component.family.needs_pixels())
    }

    pub fn needs_store(self) -> bool {
        self.components()
            .iter()
            .any(|component| component.family == DescriptorFamily::DeepEmbedding)
    }
}

impl fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidModeError {
    pub requested: String,
}

impl fmt::Display for InvalidModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let allowed: Vec<&str> = RetrievalMode::ALL.iter().map(|mode| mode.as_str()).collect();
        write!(
            f,
            "unknown retrieval mode '{}', allowed: {}",
            self.requested,
            allowed.join(", ")
        )
    }
}

impl Error for InvalidModeError {}

impl FromStr for RetrievalMode {
    type Err = InvalidModeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == normalized)
            .ok_or_else(|| InvalidModeError {
                requested: raw.to_string(),
            })
    }
}
