use std::error::Error;
use std::fmt;

use crate::metric::{Metric, Orientation};
use crate::retrieval::MatchResult;

/// Scores for one descriptor family, in candidate traversal order.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreList {
    pub metric: Metric,
    pub entries: Vec<MatchResult>,
}

impl ScoreList {
    pub fn new(metric: Metric) -> Self {
        Self {
            metric,
            entries: Vec::new(),
        }
    }

    pub fn with_capacity(metric: Metric, capacity: usize) -> Self {
        Self {
            metric,
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, id: impl Into<String>, score: f32) {
        self.entries.push(MatchResult {
            id: id.into(),
            score,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn orientation(&self) -> Orientation {
        self.metric.orientation()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FusionError {
    /// No score lists were supplied.
    Empty,
    LengthMismatch {
        list: usize,
        expected: usize,
        got: usize,
    },
    /// The same position holds different candidates in two lists.
    Misaligned {
        list: usize,
        position: usize,
        expected: String,
        got: String,
    },
    OrientationMismatch {
        list: usize,
        expected: Orientation,
        got: Orientation,
    },
}

impl fmt::Display for FusionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "no score lists to fuse"),
            Self::LengthMismatch {
                list,
                expected,
                got,
            } => write!(
                f,
                "score list {list} has {got} entries, expected {expected}"
            ),
            Self::Misaligned {
                list,
                position,
                expected,
                got,
            } => write!(
                f,
                "score list {list} position {position} holds '{got}', expected '{expected}'"
            ),
            Self::OrientationMismatch {
                list,
                expected,
                got,
            } => write!(
                f,
                "score list {list} is {got:?}, expected {expected:?}"
            ),
        }
    }
}

impl Error for FusionError {}

/// Sums aligned score lists position by position, in list order.
///
/// A single list passes through unchanged.
pub fn fuse(lists: &[ScoreList]) -> Result<Vec<MatchResult>, FusionError> {
    let (first, rest) = lists.split_first().ok_or(FusionError::Empty)?;
    let orientation = first.orientation();
    let expected = first.len();

    for (offset, list) in rest.iter().enumerate() {
        let index = offset + 1;
        if list.orientation() != orientation {
            return Err(FusionError::OrientationMismatch {
                list: index,
                expected: orientation,
                got: list.orientation(),
            });
        }
        if list.len() != expected {
            return Err(FusionError::LengthMismatch {
                list: index,
                expected,
                got: list.len(),
            });
        }
        if let Some((position, (left, right))) = first
            .entries
            .iter()
            .zip(&list.entries)
            .enumerate()
            .find(|(_, (left, right))| left.id != right.id)
        {
            return Err(FusionError::Misaligned {
                list: index,
                position,
                expected: left.id.clone(),
                got: right.id.clone(),
            });
        }
    }

    if first.is_empty() {
        return Ok(Vec::new());
    }

    let mut fused = first.entries.clone();
    for list in rest {
        for (total, entry) in fused.iter_mut().zip(&list.entries) {
            total.score += entry.score;
        }
    }
    Ok(fused)
}
