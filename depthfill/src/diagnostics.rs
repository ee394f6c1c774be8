//! Compare a reconstruction with ground truth.

use std::{fmt::Write as _, path::Path};

use crate::{
    error::{DepthError, GridError},
    grid::Grid,
};

/// Number of thresholds in an [`ErrorHistogram`] unless told otherwise.
pub const DEFAULT_BINS: usize = 100;

/// Summary of absolute depth errors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorStats {
    /// Pixels known in both grids.
    pub count: usize,
    /// Smallest error.
    pub min: f64,
    /// Largest error.
    pub max: f64,
    /// Mean error.
    pub mean: f64,
    /// Median error.
    pub median: f64,
}

/// Cumulative distribution of absolute errors, after both grids are shifted
/// to a median of zero so that a constant offset isn't counted as error.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorHistogram {
    /// `(threshold, fraction of pixels with error ≤ threshold)`, starting at `(0, 0)`.
    rows: Vec<(f64, f64)>,
    stats: ErrorStats,
    /// Medians subtracted from `(output, truth)`.
    medians: (f64, f64),
}

impl ErrorHistogram {
    /// Errors of `output` w.r.t. `truth`, at `bins` evenly spaced thresholds up to `max_value`.
    /// Only pixels known in `truth` count.
    ///
    /// `None` if no pixel is known in both, or the thresholds are empty.
    pub fn compute(
        output: &Grid,
        truth: &Grid,
        max_value: f64,
        bins: usize,
    ) -> Result<Option<Self>, DepthError> {
        if output.resolution() != truth.resolution() {
            return Err(DepthError::ResolutionMismatch {
                name: "true depth",
                expected: output.resolution(),
                actual: truth.resolution(),
            });
        }
        if bins == 0 || max_value <= 0.0 {
            return Ok(None);
        }
        let output = output.clone().mask(truth);
        let (Some(output_median), Some(truth_median)) = (output.median(), truth.median()) else {
            return Ok(None);
        };
        let difference = output
            .add_scalar(-output_median)
            .subtract(&truth.clone().add_scalar(-truth_median));
        let mut errors: Vec<f64> = difference.known_values().map(f64::abs).collect();
        if errors.is_empty() {
            return Ok(None);
        }
        errors.sort_by(f64::total_cmp);

        let n = errors.len();
        let mut rows = Vec::with_capacity(bins + 1);
        rows.push((0.0, 0.0));
        let mut count = 0;
        for k in 1..=bins {
            let threshold = k as f64 * max_value / bins as f64;
            count += errors[count..].iter().take_while(|e| **e <= threshold).count();
            rows.push((threshold, count as f64 / n as f64));
        }

        let stats = ErrorStats {
            count: n,
            min: errors[0],
            max: errors[n - 1],
            mean: errors.iter().sum::<f64>() / n as f64,
            median: errors[n / 2],
        };
        Ok(Some(Self {
            rows,
            stats,
            medians: (output_median, truth_median),
        }))
    }

    /// `(threshold, cumulative fraction)` rows.
    pub fn rows(&self) -> &[(f64, f64)] {
        &self.rows
    }

    /// Summary statistics of the errors.
    pub fn stats(&self) -> ErrorStats {
        self.stats
    }

    /// Medians that were subtracted from `(output, truth)`.
    pub fn medians(&self) -> (f64, f64) {
        self.medians
    }

    /// One `"threshold fraction"` line per row.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (threshold, fraction) in &self.rows {
            let _ = writeln!(out, "{threshold} {fraction}");
        }
        out
    }

    /// Write [`Self::to_text`] to a file.
    pub fn write(&self, path: &Path) -> Result<(), GridError> {
        std::fs::write(path, self.to_text()).map_err(|source| GridError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
