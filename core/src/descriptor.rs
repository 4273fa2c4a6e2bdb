use std::fmt;

/// Shape of a descriptor. Vectors are reported as a single row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorShape {
    pub rows: usize,
    pub cols: usize,
}

impl DescriptorShape {
    pub const fn vector(len: usize) -> Self {
        Self { rows: 1, cols: len }
    }

    pub const fn grid(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    pub const fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for DescriptorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

/// How a histogram's bins were scaled after counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
    /// Every bin divided by the largest bin, so the maximum is 1.
    MinMax,
    /// Every bin divided by the total count, so the bins sum to 1.
    Probability,
}

/// Row-major grid of non-negative bin values.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    rows: usize,
    cols: usize,
    bins: Vec<f32>,
    normalization: Option<Normalization>,
}

impl Histogram {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            bins: vec![0.0; rows * cols],
            normalization: None,
        }
    }

    /// Builds a histogram from row-major bins. Returns `None` when the bin
    /// count does not match `rows * cols`.
    pub fn from_bins(rows: usize, cols: usize, bins: Vec<f32>) -> Option<Self> {
        if bins.len() != rows * cols {
            return None;
        }
        Some(Self {
            rows,
            cols,
            bins,
            normalization: None,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> DescriptorShape {
        DescriptorShape::grid(self.rows, self.cols)
    }

    pub fn bins(&self) -> &[f32] {
        &self.bins
    }

    #[cfg(test)]
    pub(crate) fn get(&self, row: usize, col: usize) -> f32 {
        self.bins[row * self.cols + col]
    }

    pub fn normalization(&self) -> Option<Normalization> {
        self.normalization
    }

    pub fn sum(&self) -> f32 {
        self.bins.iter().sum()
    }

    pub(crate) fn increment(&mut self, row: usize, col: usize) {
        self.bins[row * self.cols + col] += 1.0;
    }

    /// Divides every bin by `total`. A zero total leaves the bins untouched.
    pub(crate) fn normalize_probability(&mut self, total: f32) {
        if total > 0.0 {
            for bin in &mut self.bins {
                *bin /= total;
            }
        }
        self.normalization = Some(Normalization::Probability);
    }

    /// Divides every bin by the largest bin. An all-zero histogram stays zero.
    pub(crate) fn normalize_min_max(&mut self) {
        let max = self.bins.iter().copied().fold(0.0f32, f32::max);
        if max > 0.0 {
            for bin in &mut self.bins {
                *bin /= max;
            }
        }
        self.normalization = Some(Normalization::MinMax);
    }
}

/// A fixed-shape numeric summary of one image.
#[derive(Debug, Clone, PartialEq)]
pub enum Descriptor {
    Vector(Vec<f32>),
    Histogram(Histogram),
}

impl Descriptor {
    pub fn shape(&self) -> DescriptorShape {
        match self {
            Self::Vector(values) => DescriptorShape::vector(values.len()),
            Self::Histogram(histogram) => histogram.shape(),
        }
    }

    pub fn values(&self) -> &[f32] {
        match self {
            Self::Vector(values) => values,
            Self::Histogram(histogram) => histogram.bins(),
        }
    }
}
