use crate::{DepthError, Warning, constraints::Family, grid::Grid};

/// The two minimizations of a reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Inertia and smoothness only, from a uniform start.
    Init,
    /// Every family, warm-started from [`Phase::Init`].
    Refine,
}

impl std::fmt::Display for Phase {
    #[mutants::skip]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Init => f.write_str("Initial"),
            Phase::Refine => f.write_str("Refinement"),
        }
    }
}

/// How many equations each family contributed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EquationCounts {
    /// Anchors to a reference depth.
    pub inertia: usize,
    /// Neighbour equality.
    pub smoothness: usize,
    /// Measured neighbour differences.
    pub derivative: usize,
    /// Cross-product normals, three per edge pair.
    pub normal: usize,
    /// Edge-normal orthogonality.
    pub tangent: usize,
    /// Range barriers, two per pixel.
    pub range: usize,
}

impl EquationCounts {
    /// Equations from this family.
    pub fn get(&self, family: Family) -> usize {
        match family {
            Family::Inertia => self.inertia,
            Family::Smoothness => self.smoothness,
            Family::Derivative => self.derivative,
            Family::Normal => self.normal,
            Family::Tangent => self.tangent,
            Family::Range => self.range,
        }
    }

    pub(crate) fn set(&mut self, family: Family, count: usize) {
        let slot = match family {
            Family::Inertia => &mut self.inertia,
            Family::Smoothness => &mut self.smoothness,
            Family::Derivative => &mut self.derivative,
            Family::Normal => &mut self.normal,
            Family::Tangent => &mut self.tangent,
            Family::Range => &mut self.range,
        };
        *slot = count;
    }

    /// Equations from every family.
    pub fn total(&self) -> usize {
        Family::ALL.into_iter().map(|f| self.get(f)).sum()
    }
}

/// Iterations used by each phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseIterations {
    /// The linear initial solve.
    pub init: usize,
    /// The full nonlinear solve.
    pub refine: usize,
}

/// Data from a successful reconstruction.
#[derive(Debug)]
#[cfg_attr(not(feature = "unstable-exhaustive"), non_exhaustive)]
pub struct SolveOutcome {
    pub(crate) depth: Grid,
    pub(crate) initial_guess: Grid,
    pub(crate) counts: EquationCounts,
    pub(crate) initial_ssd: f64,
    pub(crate) final_ssd: f64,
    pub(crate) iterations: PhaseIterations,
    pub(crate) warnings: Vec<Warning>,
}

impl SolveOutcome {
    /// The reconstructed depth, every cell known and within the depth bounds.
    pub fn depth(&self) -> &Grid {
        &self.depth
    }

    /// Consume the outcome, keeping only the depth.
    pub fn into_depth(self) -> Grid {
        self.depth
    }

    /// Depth after the linear first phase.
    pub fn initial_guess(&self) -> &Grid {
        &self.initial_guess
    }

    /// How many equations each family contributed.
    pub fn counts(&self) -> &EquationCounts {
        &self.counts
    }

    /// Sum of squared residuals of the full system at the first phase's solution.
    pub fn initial_ssd(&self) -> f64 {
        self.initial_ssd
    }

    /// Sum of squared residuals of the full system at the final solution.
    pub fn final_ssd(&self) -> f64 {
        self.final_ssd
    }

    /// Iterations used by each phase.
    pub fn iterations(&self) -> PhaseIterations {
        self.iterations
    }

    /// Anything suspicious about the inputs.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }
}

/// Returned when a depth field could not be reconstructed.
#[derive(Debug)]
#[cfg_attr(not(feature = "unstable-exhaustive"), non_exhaustive)]
pub struct FailureOutcome {
    /// The error that stopped the reconstruction.
    pub error: DepthError,
    /// Other warnings which might have contributed.
    pub warnings: Vec<Warning>,
    /// Size of the system.
    pub num_vars: usize,
    /// Size of the system when it failed.
    pub num_eqs: usize,
}

impl FailureOutcome {
    /// The error that stopped the reconstruction.
    pub fn error(&self) -> &DepthError {
        &self.error
    }

    /// Other warnings which might have contributed.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Size of the system.
    pub fn num_vars(&self) -> usize {
        self.num_vars
    }

    /// Size of the system when it failed.
    pub fn num_eqs(&self) -> usize {
        self.num_eqs
    }
}
