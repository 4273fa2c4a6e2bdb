//! Retrieval orchestration.
//!
//! A retrieval call extracts the query's descriptors once, streams the
//! candidates, scores every family the mode selects, fuses the aligned
//! per-family lists and returns the stably sorted top-N.
//!
//! Failures tied to one candidate (undecodable raster, missing embedding,
//! non-finite descriptor values) drop that candidate from every list and
//! traversal continues. Failures that would affect every comparison (shape
//! mismatch, missing store, unreadable query) abort the call.

use std::error::Error;
use std::fmt;

use image::RgbImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::descriptor::Descriptor;
use crate::extract::{extract, DecodeError, ExtractError, ExtractionParams};
use crate::fusion::{fuse, FusionError, ScoreList};
use crate::metric::{Metric, MetricError, Orientation};
use crate::mode::{InvalidModeError, RetrievalMode};
use crate::store::EmbeddingStore;

/// One ranked entry of a retrieval result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub id: String,
    pub score: f32,
}

/// An identified image. `image` is `None` when pixels were not loaded, which
/// is only valid for modes that read every descriptor from the store.
#[derive(Debug, Clone)]
pub struct ImageEntry {
    pub id: String,
    pub image: Option<RgbImage>,
}

impl ImageEntry {
    pub fn new(id: impl Into<String>, image: RgbImage) -> Self {
        Self {
            id: id.into(),
            image: Some(image),
        }
    }

    pub fn without_pixels(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            image: None,
        }
    }
}

/// A candidate the source could not produce, e.g. an undecodable file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateError {
    pub id: String,
    pub error: DecodeError,
}

/// A precomputed descriptor paired with its identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRecord {
    pub id: String,
    pub descriptor: Descriptor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedCandidate {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalReport {
    pub mode: RetrievalMode,
    pub matches: Vec<MatchResult>,
    /// Candidates that produced a valid score for every family.
    pub scored: usize,
    /// Candidates dropped because their identifier equals the query's.
    pub excluded_self: usize,
    pub skipped: Vec<SkippedCandidate>,
}

#[derive(Debug)]
pub enum RetrievalError {
    InvalidMode(InvalidModeError),
    /// The mode reads embeddings but no store was supplied.
    MissingStore { mode: RetrievalMode },
    /// The query's own descriptor could not be produced.
    Query { id: String, error: ExtractError },
    /// A comparison failed in a way that affects every candidate.
    Metric { id: String, error: MetricError },
    Fusion(FusionError),
}

impl fmt::Display for RetrievalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidMode(error) => write!(f, "{error}"),
            Self::MissingStore { mode } => {
                write!(f, "mode '{mode}' requires an embedding store")
            }
            Self::Query { id, error } => write!(f, "query '{id}': {error}"),
            Self::Metric { id, error } => write!(f, "comparing '{id}': {error}"),
            Self::Fusion(error) => write!(f, "score fusion failed: {error}"),
        }
    }
}

impl Error for RetrievalError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidMode(error) => Some(error),
            Self::MissingStore { .. } => None,
            Self::Query { error, .. } => Some(error),
            Self::Metric { error, .. } => Some(error),
            Self::Fusion(error) => Some(error),
        }
    }
}

impl From<InvalidModeError> for RetrievalError {
    fn from(value: InvalidModeError) -> Self {
        Self::InvalidMode(value)
    }
}

impl From<FusionError> for RetrievalError {
    fn from(value: FusionError) -> Self {
        Self::Fusion(value)
    }
}

/// Immutable inputs of one retrieval call, apart from the candidates.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalRequest<'a> {
    pub query: &'a ImageEntry,
    pub mode: RetrievalMode,
    pub top_n: usize,
    pub params: ExtractionParams,
    pub store: Option<&'a EmbeddingStore>,
}

impl<'a> RetrievalRequest<'a> {
    pub fn new(query: &'a ImageEntry, mode: RetrievalMode, top_n: usize) -> Self {
        Self {
            query,
            mode,
            top_n,
            params: ExtractionParams::default(),
            store: None,
        }
    }

    /// Parses `mode` first so an unknown name fails before any extraction.
    pub fn parse(query: &'a ImageEntry, mode: &str, top_n: usize) -> Result<Self, RetrievalError> {
        let mode = mode.parse::<RetrievalMode>()?;
        Ok(Self::new(query, mode, top_n))
    }

    pub fn with_params(mut self, params: ExtractionParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_store(mut self, store: &'a EmbeddingStore) -> Self {
        self.store = Some(store);
        self
    }
}

/// Ranks `candidates` against the query and returns at most `top_n` matches.
pub fn retrieve<I>(
    request: &RetrievalRequest<'_>,
    candidates: I,
) -> Result<Vec<MatchResult>, RetrievalError>
where
    I: IntoIterator<Item = Result<ImageEntry, CandidateError>>,
{
    retrieve_with_report(request, candidates).map(|report| report.matches)
}

/// Same as [`retrieve`], also reporting skipped candidates.
pub fn retrieve_with_report<I>(
    request: &RetrievalRequest<'_>,
    candidates: I,
) -> Result<RetrievalReport, RetrievalError>
where
    I: IntoIterator<Item = Result<ImageEntry, CandidateError>>,
{
    let context = ScoringContext::prepare(request)?;
    let mut outcomes = Vec::new();
    for candidate in candidates {
        outcomes.push(context.score(candidate.as_ref())?);
    }
    context.finish(outcomes)
}

/// Loads and scores `sources` on the rayon pool.
///
/// `load` runs inside the worker, so each raster lives only until its
/// descriptors are scored. Outcomes are merged in source order before
/// ranking, so the result is the same as [`retrieve_with_report`] over
/// `sources.iter().map(load)`.
pub fn retrieve_parallel<S, F>(
    request: &RetrievalRequest<'_>,
    sources: &[S],
    load: F,
) -> Result<RetrievalReport, RetrievalError>
where
    S: Sync,
    F: Fn(&S) -> Result<ImageEntry, CandidateError> + Sync,
{
    let context = ScoringContext::prepare(request)?;
    let outcomes = sources
        .par_iter()
        .map(|source| {
            let candidate = load(source);
            context.score(candidate.as_ref())
        })
        .collect::<Result<Vec<_>, _>>()?;
    context.finish(outcomes)
}

/// Ranks precomputed descriptors against `query` with a single metric.
pub fn retrieve_records(
    query_id: &str,
    query: &Descriptor,
    metric: Metric,
    records: &[CandidateRecord],
    top_n: usize,
) -> Result<Vec<MatchResult>, RetrievalError> {
    let mut scores = ScoreList::with_capacity(metric, records.len());
    for record in records {
        if record.id == query_id {
            continue;
        }
        match metric.score(query, &record.descriptor) {
            Ok(score) if score.is_finite() => scores.push(record.id.clone(), score),
            Ok(score) => {
                tracing::warn!(candidate = %record.id, score, "skipping non-finite score");
            }
            Err(error) if error.is_per_candidate() => {
                tracing::warn!(candidate = %record.id, %error, "skipping candidate");
            }
            Err(error) => {
                return Err(RetrievalError::Metric {
                    id: record.id.clone(),
                    error,
                })
            }
        }
    }

    let mut matches = scores.entries;
    rank(&mut matches, metric.orientation(), top_n);
    Ok(matches)
}

/// Stable sort by orientation, then truncate. Ties keep traversal order.
pub fn rank(matches: &mut Vec<MatchResult>, orientation: Orientation, top_n: usize) {
    matches.sort_by(|left, right| match orientation {
        Orientation::Ascending => left.score.total_cmp(&right.score),
        Orientation::Descending => right.score.total_cmp(&left.score),
    });
    matches.truncate(top_n);
}

enum Outcome {
    Scored { id: String, components: Vec<f32> },
    Skipped(SkippedCandidate),
    SelfMatch,
}

struct ScoringContext<'a> {
    request: &'a RetrievalRequest<'a>,
    query_descriptors: Vec<Descriptor>,
}

impl<'a> ScoringContext<'a> {
    fn prepare(request: &'a RetrievalRequest<'a>) -> Result<Self, RetrievalError> {
        let mode = request.mode;
        if mode.needs_store() && request.store.is_none() {
            return Err(RetrievalError::MissingStore { mode });
        }

        let query = request.query;
        let query_descriptors = mode
            .components()
            .iter()
            .map(|component| {
                extract(
                    component.family,
                    &query.id,
                    query.image.as_ref(),
                    &request.params,
                    request.store,
                )
                .map_err(|error| RetrievalError::Query {
                    id: query.id.clone(),
                    error,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            query = %query.id,
            mode = %mode,
            families = query_descriptors.len(),
            "query descriptors extracted"
        );

        Ok(Self {
            request,
            query_descriptors,
        })
    }

    fn score(&self, candidate: Result<&ImageEntry, &CandidateError>) -> Result<Outcome, RetrievalError> {
        let entry = match candidate {
            Ok(entry) => entry,
            Err(failure) => {
                return Ok(skip(&failure.id, &ExtractError::Decode(failure.error.clone())));
            }
        };
        if entry.id == self.request.query.id {
            return Ok(Outcome::SelfMatch);
        }

        let components = self.request.mode.components();
        let mut scores = Vec::with_capacity(components.len());
        for (component, query_descriptor) in components.iter().zip(&self.query_descriptors) {
            let descriptor = match extract(
                component.family,
                &entry.id,
                entry.image.as_ref(),
                &self.request.params,
                self.request.store,
            ) {
                Ok(descriptor) => descriptor,
                Err(error) => return Ok(skip(&entry.id, &error)),
            };

            match component.metric.score(query_descriptor, &descriptor) {
                Ok(score) if score.is_finite() => scores.push(score),
                Ok(score) => {
                    return Ok(skip(
                        &entry.id,
                        &format!("{} produced non-finite score {score}", component.metric),
                    ))
                }
                Err(error) if error.is_per_candidate() => return Ok(skip(&entry.id, &error)),
                Err(error) => {
                    return Err(RetrievalError::Metric {
                        id: entry.id.clone(),
                        error,
                    })
                }
            }
        }

        Ok(Outcome::Scored {
            id: entry.id.clone(),
            components: scores,
        })
    }

    fn finish(&self, outcomes: Vec<Outcome>) -> Result<RetrievalReport, RetrievalError> {
        let mode = self.request.mode;
        let components = mode.components();
        let mut lists: Vec<ScoreList> = components
            .iter()
            .map(|component| ScoreList::with_capacity(component.metric, outcomes.len()))
            .collect();
        let mut skipped = Vec::new();
        let mut excluded_self = 0usize;

        for outcome in outcomes {
            match outcome {
                Outcome::Scored { id, components } => {
                    for (list, score) in lists.iter_mut().zip(components) {
                        list.push(id.clone(), score);
                    }
                }
                Outcome::Skipped(candidate) => skipped.push(candidate),
                Outcome::SelfMatch => excluded_self += 1,
            }
        }

        let mut matches = fuse(&lists)?;
        let scored = matches.len();
        rank(&mut matches, mode.orientation(), self.request.top_n);

        tracing::debug!(
            mode = %mode,
            scored,
            skipped = skipped.len(),
            excluded_self,
            returned = matches.len(),
            "retrieval finished"
        );

        Ok(RetrievalReport {
            mode,
            matches,
            scored,
            excluded_self,
            skipped,
        })
    }
}

fn skip(id: &str, reason: &dyn fmt::Display) -> Outcome {
    tracing::warn!(candidate = %id, reason = %reason, "skipping candidate");
    Outcome::Skipped(SkippedCandidate {
        id: id.to_string(),
        reason: reason.to_string(),
    })
}

#[cfg(test)]
mod tests;
