use std::error::Error;
use std::fmt;

use serde::{Deserialize, Serialize};
use wide::f32x8;

use crate::descriptor::{Descriptor, DescriptorShape, Histogram};

/// Squared norm at or below which cosine treats a vector as zero-magnitude.
pub const ZERO_NORM_EPSILON: f32 = f32::EPSILON;

/// Identifies which descriptor triggered a validation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Query,
    Candidate,
}

/// Whether a smaller or a larger score means a closer match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    /// Distances: 0 is an exact match, results sort ascending.
    Ascending,
    /// Similarities: larger is closer, results sort descending.
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    SumSquaredDifferences,
    HistogramIntersection,
    CosineDistance,
    CosineSimilarity,
}

impl Metric {
    pub const fn orientation(self) -> Orientation {
        match self {
            Self::SumSquaredDifferences | Self::CosineDistance => Orientation::Ascending,
            Self::HistogramIntersection | Self::CosineSimilarity => Orientation::Descending,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SumSquaredDifferences => "ssd",
            Self::HistogramIntersection => "intersection",
            Self::CosineDistance => "cosine_distance",
            Self::CosineSimilarity => "cosine_similarity",
        }
    }

    /// Scores `candidate` against `query`.
    pub fn score(self, query: &Descriptor, candidate: &Descriptor) -> Result<f32, MetricError> {
        match self {
            Self::SumSquaredDifferences => {
                let (left, right) = vector_pair(query, candidate)?;
                sum_squared_differences(left, right)
            }
            Self::HistogramIntersection => match (query, candidate) {
                (Descriptor::Histogram(left), Descriptor::Histogram(right)) => {
                    histogram_intersection(left, right)
                }
                _ => Err(MetricError::ShapeMismatch {
                    query: query.shape(),
                    candidate: candidate.shape(),
                }),
            },
            Self::CosineDistance => {
                let (left, right) = vector_pair(query, candidate)?;
                cosine_distance(left, right)
            }
            Self::CosineSimilarity => {
                let (left, right) = vector_pair(query, candidate)?;
                cosine_distance(left, right).map(|distance| 1.0 - distance)
            }
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for metric evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricError {
    /// Returned when the two descriptors do not share one shape or kind.
    ShapeMismatch {
        query: DescriptorShape,
        candidate: DescriptorShape,
    },
    /// Returned when one or both descriptors hold no values.
    EmptyDescriptor,
    /// Returned when a descriptor carries NaN or Infinity.
    NonFinite { side: Side, index: usize, value: f32 },
}

impl MetricError {
    /// True for errors caused by one candidate's data rather than by the mode.
    pub fn is_per_candidate(&self) -> bool {
        matches!(
            self,
            Self::NonFinite {
                side: Side::Candidate,
                ..
            }
        )
    }
}

impl fmt::Display for MetricError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShapeMismatch { query, candidate } => {
                write!(
                    f,
                    "descriptor shape mismatch: query={query}, candidate={candidate}"
                )
            }
            Self::EmptyDescriptor => write!(f, "descriptor is empty"),
            Self::NonFinite { side, index, value } => {
                let side = match side {
                    Side::Query => "query",
                    Side::Candidate => "candidate",
                };
                write!(
                    f,
                    "non-finite value in {side} descriptor at index {index}: {value}"
                )
            }
        }
    }
}

impl Error for MetricError {}

fn vector_pair<'a>(
    query: &'a Descriptor,
    candidate: &'a Descriptor,
) -> Result<(&'a [f32], &'a [f32]), MetricError> {
    match (query, candidate) {
        (Descriptor::Vector(left), Descriptor::Vector(right)) => Ok((left, right)),
        _ => Err(MetricError::ShapeMismatch {
            query: query.shape(),
            candidate: candidate.shape(),
        }),
    }
}

fn validate_values(
    query: &[f32],
    candidate: &[f32],
    query_shape: DescriptorShape,
    candidate_shape: DescriptorShape,
) -> Result<(), MetricError> {
    if query_shape != candidate_shape {
        return Err(MetricError::ShapeMismatch {
            query: query_shape,
            candidate: candidate_shape,
        });
    }
    if query.is_empty() || candidate.is_empty() {
        return Err(MetricError::EmptyDescriptor);
    }

    if let Some((index, value)) = query
        .iter()
        .copied()
        .enumerate()
        .find(|(_, value)| !value.is_finite())
    {
        return Err(MetricError::NonFinite {
            side: Side::Query,
            index,
            value,
        });
    }
    if let Some((index, value)) = candidate
        .iter()
        .copied()
        .enumerate()
        .find(|(_, value)| !value.is_finite())
    {
        return Err(MetricError::NonFinite {
            side: Side::Candidate,
            index,
            value,
        });
    }

    Ok(())
}

/// Computes `Σ (query[i] - candidate[i])²`. Zero means identical.
pub fn sum_squared_differences(query: &[f32], candidate: &[f32]) -> Result<f32, MetricError> {
    validate_values(
        query,
        candidate,
        DescriptorShape::vector(query.len()),
        DescriptorShape::vector(candidate.len()),
    )?;
    Ok(simd_squared_differences(query, candidate))
}

/// Computes `Σ min(query[i][j], candidate[i][j])` over equal-shaped grids.
pub fn histogram_intersection(query: &Histogram, candidate: &Histogram) -> Result<f32, MetricError> {
    validate_values(
        query.bins(),
        candidate.bins(),
        query.shape(),
        candidate.shape(),
    )?;
    Ok(simd_intersection(query.bins(), candidate.bins()))
}

/// Computes `1 - cos(query, candidate)`.
///
/// A zero-magnitude vector on either side yields `1.0` instead of a
/// division by zero.
pub fn cosine_distance(query: &[f32], candidate: &[f32]) -> Result<f32, MetricError> {
    validate_values(
        query,
        candidate,
        DescriptorShape::vector(query.len()),
        DescriptorShape::vector(candidate.len()),
    )?;

    let (dot, query_sq_sum, candidate_sq_sum) = simd_dot_and_norms(query, candidate);
    if query_sq_sum <= ZERO_NORM_EPSILON || candidate_sq_sum <= ZERO_NORM_EPSILON {
        return Ok(1.0);
    }
    let similarity = dot / (query_sq_sum.sqrt() * candidate_sq_sum.sqrt());
    Ok((1.0 - similarity).clamp(0.0, 2.0))
}

const SIMD_WIDTH: usize = 8;

fn load_f32x8(values: &[f32]) -> f32x8 {
    debug_assert_eq!(values.len(), SIMD_WIDTH);
    f32x8::from([
        values[0], values[1], values[2], values[3], values[4], values[5], values[6], values[7],
    ])
}

fn simd_scan(
    left: &[f32],
    right: &[f32],
    mut simd_step: impl FnMut(f32x8, f32x8),
    mut scalar_step: impl FnMut(f32, f32),
) {
    let mut left_chunks = left.chunks_exact(SIMD_WIDTH);
    let mut right_chunks = right.chunks_exact(SIMD_WIDTH);

    for (left_chunk, right_chunk) in left_chunks.by_ref().zip(right_chunks.by_ref()) {
        simd_step(load_f32x8(left_chunk), load_f32x8(right_chunk));
    }

    for (&left_value, &right_value) in left_chunks.remainder().iter().zip(right_chunks.remainder())
    {
        scalar_step(left_value, right_value);
    }
}

fn simd_squared_differences(left: &[f32], right: &[f32]) -> f32 {
    let mut simd_sum = f32x8::ZERO;
    let mut scalar_sum = 0.0;

    simd_scan(
        left,
        right,
        |left_v, right_v| {
            let delta = left_v - right_v;
            simd_sum += delta * delta;
        },
        |left_value, right_value| {
            let delta = left_value - right_value;
            scalar_sum += delta * delta;
        },
    );

    simd_sum.reduce_add() + scalar_sum
}

fn simd_intersection(left: &[f32], right: &[f32]) -> f32 {
    let mut simd_sum = f32x8::ZERO;
    let mut scalar_sum = 0.0;

    simd_scan(
        left,
        right,
        |left_v, right_v| {
            simd_sum += left_v.min(right_v);
        },
        |left_value, right_value| {
            scalar_sum += left_value.min(right_value);
        },
    );

    simd_sum.reduce_add() + scalar_sum
}

fn simd_dot_and_norms(left: &[f32], right: &[f32]) -> (f32, f32, f32) {
    let mut dot_sum = f32x8::ZERO;
    let mut left_sq_sum = f32x8::ZERO;
    let mut right_sq_sum = f32x8::ZERO;
    let mut dot_scalar = 0.0;
    let mut left_sq_scalar = 0.0;
    let mut right_sq_scalar = 0.0;

    simd_scan(
        left,
        right,
        |left_v, right_v| {
            dot_sum += left_v * right_v;
            left_sq_sum += left_v * left_v;
            right_sq_sum += right_v * right_v;
        },
        |left_value, right_value| {
            dot_scalar += left_value * right_value;
            left_sq_scalar += left_value * left_value;
            right_sq_scalar += right_value * right_value;
        },
    );

    (
        dot_sum.reduce_add() + dot_scalar,
        left_sq_sum.reduce_add() + left_sq_scalar,
        right_sq_sum.reduce_add() + right_sq_scalar,
    )
}
