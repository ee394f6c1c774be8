use faer::sparse::{Pair, SymbolicSparseColMat, linalg::solvers::SymbolicLu};

use crate::{
    NonLinearSystemError,
    equations::{Equation, JacobianVar},
    id::Id,
};

mod newton;

pub use newton::SuccessfulSolve;

// Most residuals touch 2 unknowns, normal residuals touch 3.
const NONZEROES_PER_ROW: usize = 4;

/// Which minimization loop to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Gauss-Newton with a tiny Tikhonov term. Solves linear systems in one step.
    #[default]
    SparseDirect,
    /// Levenberg-Marquardt with identity damping.
    LevenbergMarquardt,
    /// Levenberg-Marquardt with damping scaled by the diagonal of `JᵀJ`,
    /// i.e. an elliptical trust region.
    TrustRegion,
}

impl Backend {
    /// Every backend, in the order they're listed to users.
    pub const ALL: [Backend; 3] = [
        Backend::SparseDirect,
        Backend::LevenbergMarquardt,
        Backend::TrustRegion,
    ];

    /// Name used on the command line.
    pub fn name(self) -> &'static str {
        match self {
            Backend::SparseDirect => "sparse-direct",
            Backend::LevenbergMarquardt => "levenberg-marquardt",
            Backend::TrustRegion => "trust-region",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Backend::ALL
            .into_iter()
            .find(|b| b.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let names: Vec<_> = Backend::ALL.iter().map(|b| b.name()).collect();
                format!("unknown solver '{s}', expected one of {}", names.join(", "))
            })
    }
}

/// Iteration limit and tolerance for a minimization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverConfig {
    /// Give up after this many iterations.
    pub max_iterations: usize,
    /// Relative step and cost-decrease tolerance.
    pub tolerance: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-3,
        }
    }
}

/// Residual equations over bounded unknowns.
/// Built fresh for every reconstruction, then minimized.
#[derive(Debug, Clone)]
pub struct EquationSystem {
    equations: Vec<Equation>,
    lower_bounds: Vec<f64>,
    upper_bounds: Vec<f64>,
}

impl EquationSystem {
    /// `num_variables` unbounded unknowns, no equations yet.
    pub fn new(num_variables: usize) -> Self {
        Self {
            equations: Vec::new(),
            lower_bounds: vec![f64::NEG_INFINITY; num_variables],
            upper_bounds: vec![f64::INFINITY; num_variables],
        }
    }

    /// Add one residual.
    pub fn insert_equation(&mut self, equation: impl Into<Equation>) {
        self.equations.push(equation.into());
    }

    /// Unknown `id` may not go below `value`.
    pub fn set_lower_bound(&mut self, id: Id, value: f64) {
        self.lower_bounds[id as usize] = value;
    }

    /// Unknown `id` may not go above `value`.
    pub fn set_upper_bound(&mut self, id: Id, value: f64) {
        self.upper_bounds[id as usize] = value;
    }

    /// `(lower, upper)` for unknown `id`.
    pub fn bounds(&self, id: Id) -> (f64, f64) {
        (self.lower_bounds[id as usize], self.upper_bounds[id as usize])
    }

    /// Number of unknowns.
    pub fn n_variables(&self) -> usize {
        self.lower_bounds.len()
    }

    /// Number of residuals.
    pub fn n_equations(&self) -> usize {
        self.equations.len()
    }

    /// All residuals, in insertion order.
    pub fn equations(&self) -> &[Equation] {
        &self.equations
    }

    /// Evaluate every residual into `out`.
    pub fn residuals(&self, values: &[f64], out: &mut [f64]) {
        for (slot, equation) in out.iter_mut().zip(&self.equations) {
            *slot = equation.value(values);
        }
    }

    /// `Σ rᵢ²` at the given values.
    pub fn sum_of_squared_residuals(&self, values: &[f64]) -> f64 {
        self.equations
            .iter()
            .map(|e| {
                let r = e.value(values);
                r * r
            })
            .sum()
    }

    /// Clamp every value into its bounds.
    pub fn project(&self, values: &mut [f64]) {
        for ((v, lo), hi) in values
            .iter_mut()
            .zip(&self.lower_bounds)
            .zip(&self.upper_bounds)
        {
            *v = libm::fmin(libm::fmax(*v, *lo), *hi);
        }
    }

    /// Minimize `Σ rᵢ²` starting from `values`, which are overwritten with the result.
    /// Every iterate, and so the result, respects the bounds. Unknowns that end on a
    /// bound are only left there when the cost would fall by crossing it.
    pub fn minimize(
        &self,
        values: &mut [f64],
        backend: Backend,
        config: &SolverConfig,
    ) -> Result<SuccessfulSolve, NonLinearSystemError> {
        if values.len() != self.n_variables() {
            return Err(NonLinearSystemError::WrongNumberGuesses {
                variables: self.n_variables(),
                guesses: values.len(),
            });
        }
        if self.equations.is_empty() || values.is_empty() {
            return Err(NonLinearSystemError::EmptySystemNotAllowed);
        }
        self.project(values);
        let mut model = Model::new(self)?;
        match backend {
            Backend::SparseDirect => model.solve_gauss_newton(values, config),
            Backend::LevenbergMarquardt => {
                model.solve_levenberg_marquardt(values, config, Scaling::Identity)
            }
            Backend::TrustRegion => {
                model.solve_levenberg_marquardt(values, config, Scaling::Marquardt)
            }
        }
    }
}

/// How damping is distributed across unknowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scaling {
    /// `λI`
    Identity,
    /// `λ·diag(JᵀJ)`
    Marquardt,
}

/// A Jacobian cache.
/// Stores the Jacobian so we don't constantly reallocate it.
struct Jc {
    /// The symbolic structure of the matrix (i.e. which cells are non-zero).
    /// Allocated once, reused for every Jacobian evaluation.
    sym: SymbolicSparseColMat<usize>,
    /// The values which belong in that symbolic matrix, sorted in column-major order.
    /// Must be column-major because faer expects that.
    vals: Vec<f64>,
}

/// The problem being minimized.
///
/// Rows `0..m` of the Jacobian are the residuals. Rows `m..m+n` hold one damping
/// entry per unknown, so `JᵀJ` picks up the damping on its diagonal without
/// a separate matrix addition. Their residuals are always zero.
struct Model<'s> {
    system: &'s EquationSystem,
    jc: Jc,
    lu_symbolic: Option<SymbolicLu<usize>>,
    row_scratch: Vec<JacobianVar>,
}

impl<'s> Model<'s> {
    fn new(system: &'s EquationSystem) -> Result<Self, NonLinearSystemError> {
        let num_equations = system.n_equations();
        let num_cols = system.n_variables();
        let num_rows = num_equations + num_cols;

        let mut nonzero_cells: Vec<Pair<usize, usize>> =
            Vec::with_capacity(NONZEROES_PER_ROW * num_equations + num_cols);
        let mut nonzeroes_scratch = Vec::with_capacity(NONZEROES_PER_ROW);
        for (row, equation) in system.equations.iter().enumerate() {
            nonzeroes_scratch.clear();
            equation.nonzeroes(&mut nonzeroes_scratch);
            for var in &nonzeroes_scratch {
                nonzero_cells.push(Pair {
                    row,
                    col: *var as usize,
                });
            }
        }
        // Stack the damping rows below the residual rows.
        for col in 0..num_cols {
            nonzero_cells.push(Pair {
                row: num_equations + col,
                col,
            });
        }

        // Create symbolic structure; this will automatically deduplicate and sort.
        let (sym, _) = SymbolicSparseColMat::try_new_from_indices(num_rows, num_cols, &nonzero_cells)?;

        Ok(Self {
            system,
            jc: Jc {
                vals: vec![0.0; sym.compute_nnz()],
                sym,
            },
            lu_symbolic: None,
            row_scratch: Vec::with_capacity(NONZEROES_PER_ROW),
        })
    }

    fn num_equations(&self) -> usize {
        self.system.n_equations()
    }

    fn num_rows(&self) -> usize {
        self.system.n_equations() + self.system.n_variables()
    }

    /// Position of `(row, col)` in `jc.vals`. Row indices within a column are sorted.
    fn value_index(&self, row: usize, col: usize) -> Option<usize> {
        let col_range = self.jc.sym.col_range(col);
        let start = col_range.start;
        self.jc.sym.row_idx()[col_range]
            .binary_search(&row)
            .ok()
            .map(|offset| start + offset)
    }

    /// Residual rows then zeroed damping rows.
    fn residual(&self, values: &[f64], out: &mut [f64]) {
        let m = self.num_equations();
        self.system.residuals(values, &mut out[..m]);
        out[m..].fill(0.0);
    }

    /// Recompute the residual rows of the Jacobian at `values`.
    fn refresh_jacobian(&mut self, values: &[f64]) {
        // Partials are accumulated, so start from zero.
        self.jc.vals.fill(0.0);
        let system = self.system;
        for (row, equation) in system.equations.iter().enumerate() {
            self.row_scratch.clear();
            equation.jacobian_row(values, &mut self.row_scratch);
            for i in 0..self.row_scratch.len() {
                let JacobianVar {
                    id,
                    partial_derivative,
                } = self.row_scratch[i];
                let idx = self.value_index(row, id as usize);
                debug_assert!(idx.is_some(), "({row}, {id}) missing from the Jacobian pattern");
                if let Some(idx) = idx {
                    self.jc.vals[idx] += partial_derivative;
                }
            }
        }
    }

    /// Overwrite the damping rows so that `JᵀJ` gains `damping[i]` on its diagonal.
    fn set_damping(&mut self, damping: &[f64]) {
        let m = self.num_equations();
        for (col, d) in damping.iter().enumerate() {
            if let Some(idx) = self.value_index(m + col, col) {
                self.jc.vals[idx] = libm::sqrt(*d);
            }
        }
    }

    /// Sum of squares over the residual rows only.
    fn cost(&self, residual: &[f64]) -> f64 {
        residual[..self.num_equations()].iter().map(|r| r * r).sum()
    }
}
