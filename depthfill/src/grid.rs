//! Dense 2D scalar rasters where any cell may be unknown.
//!
//! Cells hold `Option<f64>`. The numeric [`UNKNOWN_SENTINEL`] only exists at the
//! file boundary, for compatibility with existing depth files.

use crate::error::GridError;

mod io;
mod pfm;

pub use io::{PngScaling, read_channels};
pub use pfm::{read_pfm_bytes, write_pfm_bytes};

/// Value used by depth files to mark a cell as unknown.
pub const UNKNOWN_SENTINEL: f64 = -987_654_321.0;

/// A `width × height` raster, stored row-major with `iy = 0` as the top row.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    width: usize,
    height: usize,
    cells: Vec<Option<f64>>,
}

impl Grid {
    /// Every cell unknown.
    pub fn unknown(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            cells: vec![None; width * height],
        }
    }

    /// Every cell known and equal to `value`.
    pub fn filled(width: usize, height: usize, value: f64) -> Self {
        Self {
            width,
            height,
            cells: vec![Some(value); width * height],
        }
    }

    /// Build a grid by calling `f(ix, iy)` for each cell.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> Option<f64>) -> Self {
        let mut cells = Vec::with_capacity(width * height);
        for iy in 0..height {
            for ix in 0..width {
                cells.push(f(ix, iy));
            }
        }
        Self {
            width,
            height,
            cells,
        }
    }

    /// Row-major cells.
    pub fn from_cells(width: usize, height: usize, cells: Vec<Option<f64>>) -> Result<Self, GridError> {
        if cells.len() != width * height {
            return Err(GridError::WrongLength {
                width,
                height,
                actual: cells.len(),
            });
        }
        Ok(Self {
            width,
            height,
            cells,
        })
    }

    /// Row-major values, all known.
    pub fn from_values(width: usize, height: usize, values: Vec<f64>) -> Result<Self, GridError> {
        Self::from_cells(width, height, values.into_iter().map(Some).collect())
    }

    /// Row-major values where [`UNKNOWN_SENTINEL`] and non-finite numbers mean unknown.
    #[allow(clippy::float_cmp)]
    pub fn from_sentinel_values(
        width: usize,
        height: usize,
        values: impl IntoIterator<Item = f64>,
    ) -> Result<Self, GridError> {
        let cells = values
            .into_iter()
            .map(|v| (v.is_finite() && v != UNKNOWN_SENTINEL).then_some(v))
            .collect();
        Self::from_cells(width, height, cells)
    }

    /// Row-major values with unknown cells written as [`UNKNOWN_SENTINEL`].
    pub fn to_sentinel_values(&self) -> Vec<f64> {
        self.cells
            .iter()
            .map(|c| c.unwrap_or(UNKNOWN_SENTINEL))
            .collect()
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.height
    }

    /// `(width, height)`
    pub fn resolution(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Total number of cells, known or not.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// No cells at all.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Row-major index of `(ix, iy)`.
    #[inline(always)]
    pub fn index_of(&self, ix: usize, iy: usize) -> usize {
        iy * self.width + ix
    }

    /// Value at `(ix, iy)`, or `None` if unknown.
    /// Panics if out of bounds.
    #[inline(always)]
    pub fn get(&self, ix: usize, iy: usize) -> Option<f64> {
        self.cells[self.index_of(ix, iy)]
    }

    /// Overwrite the cell at `(ix, iy)`.
    pub fn set(&mut self, ix: usize, iy: usize, value: Option<f64>) {
        let i = self.index_of(ix, iy);
        self.cells[i] = value;
    }

    /// All cells in row-major order.
    pub fn cells(&self) -> &[Option<f64>] {
        &self.cells
    }

    /// Known values in row-major order.
    pub fn known_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.cells.iter().flatten().copied()
    }

    /// Number of known cells.
    pub fn cardinality(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }

    /// Nearest-neighbour resampling:
    /// `new[i, j] = old[round(i·old_w/new_w), round(j·old_h/new_h)]`, clamped to the old grid.
    /// Resampling to the current resolution returns an identical grid.
    pub fn resample(&self, width: usize, height: usize) -> Self {
        if (width, height) == self.resolution() {
            return self.clone();
        }
        if self.is_empty() {
            return Self::unknown(width, height);
        }
        let xscale = self.width as f64 / width as f64;
        let yscale = self.height as f64 / height as f64;
        Self::from_fn(width, height, |ix, iy| {
            let sx = ((ix as f64 * xscale + 0.5) as usize).min(self.width - 1);
            let sy = ((iy as f64 * yscale + 0.5) as usize).min(self.height - 1);
            self.get(sx, sy)
        })
    }

    /// Apply `f` to every known cell. Unknown cells stay unknown.
    pub fn map_known(mut self, f: impl Fn(f64) -> f64) -> Self {
        self.cells.iter_mut().flatten().for_each(|v| *v = f(*v));
        self
    }

    /// Add `k` to every known cell.
    pub fn add_scalar(self, k: f64) -> Self {
        self.map_known(|v| v + k)
    }

    /// Cellwise `self - other`; unknown wherever either is unknown.
    /// Panics if the resolutions differ.
    pub fn subtract(&self, other: &Self) -> Self {
        assert_eq!(
            self.resolution(),
            other.resolution(),
            "can only subtract grids of the same resolution"
        );
        let cells = self
            .cells
            .iter()
            .zip(&other.cells)
            .map(|(a, b)| Some((*a)? - (*b)?))
            .collect();
        Self {
            width: self.width,
            height: self.height,
            cells,
        }
    }

    /// Replace every known cell exactly equal to `value` with `replacement`.
    /// Used to turn "0 means missing" files into unknown cells.
    #[allow(clippy::float_cmp)]
    pub fn substitute(mut self, value: f64, replacement: Option<f64>) -> Self {
        for cell in &mut self.cells {
            if cell.is_some_and(|v| v == value) {
                *cell = replacement;
            }
        }
        self
    }

    /// Make known cells `≤ lo` or `> hi` unknown.
    pub fn discard_outside(mut self, lo: f64, hi: f64) -> Self {
        for cell in &mut self.cells {
            if cell.is_some_and(|v| v <= lo || v > hi) {
                *cell = None;
            }
        }
        self
    }

    /// Make cells unknown wherever `mask` is unknown.
    /// Panics if the resolutions differ.
    pub fn mask(mut self, mask: &Self) -> Self {
        assert_eq!(
            self.resolution(),
            mask.resolution(),
            "can only mask grids of the same resolution"
        );
        for (cell, m) in self.cells.iter_mut().zip(&mask.cells) {
            if m.is_none() {
                *cell = None;
            }
        }
        self
    }

    /// `(min, max)` of the known cells.
    pub fn range(&self) -> Option<(f64, f64)> {
        self.known_values().fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((libm::fmin(lo, v), libm::fmax(hi, v))),
        })
    }

    /// Mean of the known cells.
    pub fn mean(&self) -> Option<f64> {
        let n = self.cardinality();
        (n > 0).then(|| self.known_values().sum::<f64>() / n as f64)
    }

    /// The value at fraction `p` (0 to 1) through the sorted known cells.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        let mut values: Vec<f64> = self.known_values().collect();
        if values.is_empty() {
            return None;
        }
        values.sort_by(f64::total_cmp);
        let i = ((p.clamp(0.0, 1.0) * values.len() as f64) as usize).min(values.len() - 1);
        Some(values[i])
    }

    /// 50th percentile of the known cells.
    pub fn median(&self) -> Option<f64> {
        self.percentile(0.5)
    }
}
