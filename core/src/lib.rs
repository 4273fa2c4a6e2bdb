#![forbid(unsafe_code)]
//! Retrieval engine for the CBIR harness.
//!
//! Descriptor extraction, similarity metrics, score fusion and ranking.
//! Image decoding, directory traversal and output formatting live in the
//! binary crates.

pub mod descriptor;
pub mod extract;
pub mod fusion;
pub mod metric;
pub mod mode;
pub mod retrieval;
pub mod store;

pub use descriptor::{Descriptor, DescriptorShape, Histogram, Normalization};
pub use extract::{
    center_patch, embedding_key, extract, gradient_magnitude, hsv_histogram,
    rg_chromaticity_histogram, texture_histogram, ConfigError, DecodeError, DescriptorFamily,
    ExtractError, ExtractionParams,
};
pub use fusion::{fuse, FusionError, ScoreList};
pub use metric::{
    cosine_distance, histogram_intersection, sum_squared_differences, Metric, MetricError,
    Orientation,
};
pub use mode::{FamilyMetric, InvalidModeError, RetrievalMode};
pub use retrieval::{
    rank, retrieve, retrieve_parallel, retrieve_records, retrieve_with_report, CandidateError,
    CandidateRecord, ImageEntry, MatchResult, RetrievalError, RetrievalReport, RetrievalRequest,
    SkippedCandidate,
};
pub use store::{append_record, EmbeddingStore, StoreError};
