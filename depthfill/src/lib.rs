//! Dense depth reconstruction.
//!
//! Fills in a per-pixel depth field from sparse or noisy depth, measured depth
//! differences, surface normals and smoothness priors, by minimizing a weighted
//! sum of squared residuals over bounded depth unknowns.
//!
//! Solving happens in two phases. The first poses only the linear inertia and
//! smoothness residuals, which gives a starting point for the second phase where
//! every residual family is active.

use log::{debug, info, warn};
use rand::Rng;

pub use crate::camera::{CameraIntrinsics, PinholeCamera};
pub use crate::config::{Config, RangeInterval, Weights};
pub use crate::constraints::Family;
pub use crate::error::{DepthError, GridError, NonLinearSystemError};
pub use crate::grid::Grid;
pub use crate::id::{Id, pixel_id};
pub use crate::observations::{DUV_OFFSETS, NormalMap, Observations, SmoothnessWeights};
pub use crate::solve_outcome::{
    EquationCounts, FailureOutcome, Phase, PhaseIterations, SolveOutcome,
};
pub use crate::solver::{Backend, EquationSystem, SolverConfig, SuccessfulSolve};
pub use crate::vector::V3;
pub use crate::warnings::{Warning, WarningContent};

/// Pinhole back-projection.
mod camera;
/// Everything that controls a reconstruction.
mod config;
/// Each family of residuals, and how it's posed.
mod constraints;
/// Compare a reconstruction with ground truth.
pub mod diagnostics;
/// Symbolic residuals and their derivatives.
pub mod equations;
mod error;
/// 2D scalar rasters with unknown cells, and their file formats.
pub mod grid;
/// IDs of depth unknowns.
mod id;
/// Input grids for one reconstruction.
mod observations;
/// Results of a reconstruction.
mod solve_outcome;
/// Bounded least-squares solver using sparse matrices.
pub mod solver;
/// Unit tests
#[cfg(test)]
mod tests;
mod vector;
/// Lints for inputs that don't meet.
mod warnings;

/// Reconstruct depth from these observations.
///
/// The inertia fallback (a reference depth with no inertia weight) anchors a random
/// central pixel, see [`solve_with_rng`] to control that choice.
pub fn solve(observations: &Observations, config: &Config) -> Result<SolveOutcome, FailureOutcome> {
    solve_with_rng(observations, config, &mut rand::thread_rng())
}

/// Like [`solve`], drawing any random choices from `rng`.
pub fn solve_with_rng(
    observations: &Observations,
    config: &Config,
    rng: &mut impl Rng,
) -> Result<SolveOutcome, FailureOutcome> {
    let warnings = warnings::lint(observations, config);
    for warning in &warnings {
        warn!("{warning}");
    }

    let mut system = EquationSystem::new(observations.num_pixels());
    match reconstruct(&mut system, observations, config, rng) {
        Ok(r) => Ok(SolveOutcome {
            depth: r.depth,
            initial_guess: r.initial_guess,
            counts: r.counts,
            initial_ssd: r.initial_ssd,
            final_ssd: r.final_ssd,
            iterations: r.iterations,
            warnings,
        }),
        Err(error) => Err(FailureOutcome {
            error,
            warnings,
            num_vars: system.n_variables(),
            num_eqs: system.n_equations(),
        }),
    }
}

struct Reconstruction {
    depth: Grid,
    initial_guess: Grid,
    counts: EquationCounts,
    initial_ssd: f64,
    final_ssd: f64,
    iterations: PhaseIterations,
}

fn reconstruct(
    system: &mut EquationSystem,
    observations: &Observations,
    config: &Config,
    rng: &mut impl Rng,
) -> Result<Reconstruction, DepthError> {
    config.validate()?;
    observations.validate()?;
    // Fail before any solving if a later phase can't be posed.
    for family in Family::ALL {
        if family.uses_camera(observations, config) {
            constraints::camera_for(family, observations, config)?;
        }
    }

    let width = observations.width();
    let height = observations.height();
    let n = system.n_variables();
    for id in 0..n as Id {
        system.set_lower_bound(id, config.minimum_depth);
        system.set_upper_bound(id, config.maximum_depth);
    }
    let mut depth = vec![1.0; n];

    // Phase 1: linear equations only.
    let mut counts = EquationCounts::default();
    counts.set(
        Family::Inertia,
        constraints::insert_inertia_equations(system, observations, config, rng),
    );
    counts.set(
        Family::Smoothness,
        constraints::insert_smoothness_equations(system, observations, config),
    );
    debug!(
        "Initial system: {} unknowns, {} inertia and {} smoothness equations",
        n, counts.inertia, counts.smoothness
    );
    let init = system
        .minimize(&mut depth, config.init_backend, &config.solver)
        .map_err(|source| DepthError::Solve {
            phase: Phase::Init,
            source,
        })?;
    info!(
        "Initial guess after {} iterations, SSD = {:e}",
        init.iterations, init.final_cost
    );
    let initial_guess = Grid::from_values(width, height, depth.clone())?;

    // Phase 2: everything, warm-started.
    counts.set(
        Family::Derivative,
        constraints::insert_derivative_equations(system, observations, config),
    );
    counts.set(
        Family::Normal,
        constraints::insert_normal_equations(system, observations, config)?,
    );
    counts.set(
        Family::Tangent,
        constraints::insert_tangent_equations(system, observations, config)?,
    );
    counts.set(
        Family::Range,
        constraints::insert_range_equations(system, observations, config),
    );
    for family in [Family::Derivative, Family::Normal, Family::Tangent, Family::Range] {
        debug!("{family} equations: {}", counts.get(family));
    }

    let initial_ssd = system.sum_of_squared_residuals(&depth);
    let refine = system
        .minimize(&mut depth, config.backend, &config.solver)
        .map_err(|source| DepthError::Solve {
            phase: Phase::Refine,
            source,
        })?;
    let final_ssd = system.sum_of_squared_residuals(&depth);
    info!(
        "Solved {} unknowns with {} equations in {} iterations, SSD {initial_ssd:e} -> {final_ssd:e}",
        n,
        system.n_equations(),
        refine.iterations
    );

    Ok(Reconstruction {
        depth: Grid::from_values(width, height, depth)?,
        initial_guess,
        counts,
        initial_ssd,
        final_ssd,
        iterations: PhaseIterations {
            init: init.iterations,
            refine: refine.iterations,
        },
    })
}
