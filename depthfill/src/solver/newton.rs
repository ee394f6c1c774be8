use faer::{
    ColRef,
    prelude::Solve,
    sparse::{
        SparseColMatRef,
        linalg::solvers::{Lu, SymbolicLu},
    },
};
use log::debug;

use super::{Jc, Model, Scaling};
use crate::{NonLinearSystemError, id::Id, solver::SolverConfig};

// Tikhonov term that keeps `JᵀJ` invertible when an unknown appears in no residual.
const REGULARIZATION_LAMBDA: f64 = 1e-9;
// Line searches halve the step down to this fraction.
const MIN_STEP_FRACTION: f64 = 1.0 / 1024.0;
// Initial Levenberg-Marquardt damping, relative to the largest diagonal entry of `JᵀJ`.
const INITIAL_DAMPING_TAU: f64 = 1e-3;
// Floor for Marquardt scale factors, so unknowns without residuals stay damped.
const MIN_SCALE: f64 = 1e-12;
// A relative cost decrease below `tolerance * COST_STALL` counts as converged.
const COST_STALL: f64 = 1e-3;
// Sufficient decrease constant of the Armijo condition.
const ARMIJO: f64 = 1e-4;

/// Statistics from a successful minimization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SuccessfulSolve {
    /// Number of linear solves performed.
    pub iterations: usize,
    /// `Σ rᵢ²` at the solution.
    pub final_cost: f64,
}

/// Result of a line search along a projection arc.
enum Search {
    Accepted { cost: f64, alpha: f64 },
    /// No fraction of the step decreased the cost enough.
    /// `non_finite` is the first bad residual at the shortest step tried, if any.
    Failed { non_finite: Option<usize> },
}

fn max_abs(values: &[f64]) -> f64 {
    values.iter().map(|v| v.abs()).fold(0.0, libm::fmax)
}

impl Model<'_> {
    /// Factor and solve the damped normal equations `(JᵀJ + D) step = −Jᵀr`
    /// for the current Jacobian.
    fn solve_damped(&mut self, residual: &[f64]) -> Result<Vec<f64>, NonLinearSystemError> {
        /* The damping rows are part of J, so
           JᵀJ already equals JᵀJ_residuals + D
           and b = -Jᵀr only sees the residual rows because the damping residuals are zero.
        */
        let j = SparseColMatRef::new(self.jc.sym.as_ref(), &self.jc.vals);
        let jtj = j.transpose().to_col_major()? * j;
        let b = j.transpose() * -ColRef::from_slice(residual);

        // The sparsity pattern never changes between iterations, so the symbolic
        // factorization is computed once.
        let symbolic = match &self.lu_symbolic {
            Some(symbolic) => symbolic.clone(),
            None => {
                let symbolic = SymbolicLu::try_new(jtj.symbolic())?;
                self.lu_symbolic = Some(symbolic.clone());
                symbolic
            }
        };
        let factored = Lu::try_new_with_symbolic(symbolic, jtj.as_ref())?;
        let d = factored.solve(&b);
        debug_assert_eq!(
            d.nrows(),
            self.system.n_variables(),
            "the step must have one entry per unknown"
        );
        Ok(d.iter().copied().collect())
    }

    /// `−Jᵀr` over the residual rows, i.e. the steepest descent direction of `½‖r‖²`.
    fn descent(&self, residual: &[f64]) -> Vec<f64> {
        let m = self.num_equations();
        let row_idx = self.jc.sym.row_idx();
        (0..self.system.n_variables())
            .map(|col| {
                -self
                    .jc
                    .sym
                    .col_range(col)
                    .filter(|idx| row_idx[*idx] < m)
                    .map(|idx| self.jc.vals[idx] * residual[row_idx[idx]])
                    .sum::<f64>()
            })
            .collect()
    }

    /// `‖P(x + descent) − x‖∞`. Zero exactly at a stationary point of the bounded problem.
    fn projected_gradient_norm(&self, values: &[f64], descent: &[f64]) -> f64 {
        values
            .iter()
            .zip(descent)
            .enumerate()
            .map(|(id, (x, d))| {
                let (lo, hi) = self.system.bounds(id as Id);
                (libm::fmin(libm::fmax(x + d, lo), hi) - x).abs()
            })
            .fold(0.0, libm::fmax)
    }

    /// Whether moving unknown `id` from `value` along `direction` leaves the box.
    fn points_outward(&self, id: usize, value: f64, direction: f64) -> bool {
        let (lo, hi) = self.system.bounds(id as Id);
        (value <= lo && direction < 0.0) || (value >= hi && direction > 0.0)
    }

    /// Zero the residual rows of every frozen column, removing those unknowns
    /// from the normal equations.
    fn freeze(&mut self, frozen: &[bool]) {
        let m = self.num_equations();
        let Jc { sym, vals } = &mut self.jc;
        let row_idx = sym.row_idx();
        for col in frozen.iter().enumerate().filter_map(|(col, f)| f.then_some(col)) {
            for idx in sym.col_range(col) {
                if row_idx[idx] < m {
                    vals[idx] = 0.0;
                }
            }
        }
    }

    /// Damped step over the unknowns that are free to move.
    ///
    /// An unknown sitting on a bound is held there when the gradient pushes it
    /// outwards. Holding some unknowns changes the step of the others, so the held
    /// set grows until no free unknown on a bound steps out of the box.
    /// Held unknowns get a zero step.
    fn constrained_step(
        &mut self,
        values: &[f64],
        residual: &[f64],
        descent: &[f64],
        damping: &[f64],
    ) -> Result<Vec<f64>, NonLinearSystemError> {
        let mut held: Vec<bool> = values
            .iter()
            .zip(descent)
            .enumerate()
            .map(|(id, (v, d))| self.points_outward(id, *v, *d))
            .collect();
        let mut held_damping = damping.to_vec();
        loop {
            self.freeze(&held);
            for ((h, d), frozen) in held_damping.iter_mut().zip(damping).zip(&held) {
                *h = if *frozen { 1.0 } else { *d };
            }
            self.set_damping(&held_damping);
            let mut step = self.solve_damped(residual)?;

            let mut grew = false;
            for (id, (s, frozen)) in step.iter().zip(held.iter_mut()).enumerate() {
                if !*frozen && self.points_outward(id, values[id], *s) {
                    *frozen = true;
                    grew = true;
                }
            }
            if !grew {
                for (s, frozen) in step.iter_mut().zip(&held) {
                    if *frozen {
                        *s = 0.0;
                    }
                }
                return Ok(step);
            }
        }
    }

    /// `diag(JᵀJ)` over the residual rows.
    fn jtj_diagonal(&self) -> Vec<f64> {
        let m = self.num_equations();
        let row_idx = self.jc.sym.row_idx();
        (0..self.system.n_variables())
            .map(|col| {
                self.jc
                    .sym
                    .col_range(col)
                    .filter(|idx| row_idx[*idx] < m)
                    .map(|idx| self.jc.vals[idx] * self.jc.vals[idx])
                    .sum()
            })
            .collect()
    }

    /// `‖J s‖²` over the residual rows.
    fn jacobian_norm_squared(&self, s: &[f64]) -> f64 {
        let m = self.num_equations();
        let row_idx = self.jc.sym.row_idx();
        let mut js = vec![0.0; m];
        for (col, s_col) in s.iter().enumerate() {
            for idx in self.jc.sym.col_range(col) {
                let row = row_idx[idx];
                if row < m {
                    js[row] += self.jc.vals[idx] * s_col;
                }
            }
        }
        js.iter().map(|v| v * v).sum()
    }

    fn check_finite(&self, residual: &[f64]) -> Result<(), NonLinearSystemError> {
        match residual[..self.num_equations()]
            .iter()
            .position(|r| !r.is_finite())
        {
            Some(row) => Err(NonLinearSystemError::NonFiniteResidual { row }),
            None => Ok(()),
        }
    }

    /// `trial = project(values + alpha * step)`
    fn take_step(&self, values: &[f64], step: &[f64], alpha: f64, trial: &mut [f64]) {
        for ((t, v), s) in trial.iter_mut().zip(values).zip(step) {
            *t = v + alpha * s;
        }
        self.system.project(trial);
    }

    /// Backtracking search along the projection arc `P(x + α·direction)`,
    /// accepting the first point that satisfies the Armijo condition.
    /// On success `trial` and `trial_residual` hold the accepted point.
    fn search_arc(
        &self,
        values: &[f64],
        direction: &[f64],
        descent: &[f64],
        cost: f64,
        trial: &mut [f64],
        trial_residual: &mut [f64],
    ) -> Search {
        let m = self.num_equations();
        let mut alpha = 1.0;
        let mut non_finite = None;
        while alpha >= MIN_STEP_FRACTION {
            self.take_step(values, direction, alpha, trial);
            self.residual(trial, trial_residual);
            let trial_cost = self.cost(trial_residual);
            // First-order decrease of ½‖r‖² along the projected step.
            let predicted: f64 = descent
                .iter()
                .zip(trial.iter().zip(values))
                .map(|(g, (t, v))| g * (t - v))
                .sum();
            non_finite = trial_residual[..m].iter().position(|r| !r.is_finite());
            if non_finite.is_none()
                && predicted > 0.0
                && trial_cost <= cost - 2.0 * ARMIJO * predicted
            {
                return Search::Accepted {
                    cost: trial_cost,
                    alpha,
                };
            }
            alpha *= 0.5;
        }
        Search::Failed { non_finite }
    }

    /// Projected Gauss-Newton over the unknowns not held at a bound.
    /// Linear systems without active bounds converge after one step.
    #[inline(never)]
    pub fn solve_gauss_newton(
        &mut self,
        values: &mut [f64],
        config: &SolverConfig,
    ) -> Result<SuccessfulSolve, NonLinearSystemError> {
        let n = values.len();
        let m = self.num_equations();
        let mut residual = vec![0.0; self.num_rows()];
        let mut trial_residual = vec![0.0; self.num_rows()];
        let mut trial = vec![0.0; n];
        let damping = vec![REGULARIZATION_LAMBDA; n];
        let tol = config.tolerance;

        self.residual(values, &mut residual);
        self.check_finite(&residual)?;
        let mut cost = self.cost(&residual);
        let mut initial_stationarity = None;

        for this_iteration in 0..config.max_iterations {
            // Convergence check: the residual is (practically) zero.
            if max_abs(&residual[..m]) <= tol * tol {
                return Ok(SuccessfulSolve {
                    iterations: this_iteration,
                    final_cost: cost,
                });
            }

            self.refresh_jacobian(values);
            let curvature = self.jtj_diagonal().into_iter().fold(MIN_SCALE, libm::fmax);
            let descent = self.descent(&residual);
            let stationarity = self.projected_gradient_norm(values, &descent);
            let gradient_scale = *initial_stationarity.get_or_insert(libm::fmax(stationarity, 1.0));
            // Convergence check: no feasible descent direction is left.
            if stationarity <= tol * tol * gradient_scale {
                return Ok(SuccessfulSolve {
                    iterations: this_iteration,
                    final_cost: cost,
                });
            }

            let step = self.constrained_step(values, &residual, &descent, &damping)?;
            let mut search =
                self.search_arc(values, &step, &descent, cost, &mut trial, &mut trial_residual);
            if matches!(search, Search::Failed { .. }) {
                // Fall back to projected steepest descent.
                let steepest: Vec<f64> = descent.iter().map(|d| d / curvature).collect();
                search =
                    self.search_arc(values, &steepest, &descent, cost, &mut trial, &mut trial_residual);
            }
            let trial_cost = match search {
                Search::Accepted {
                    cost: accepted,
                    alpha,
                } => {
                    debug!("gauss-newton iteration {this_iteration}: cost = {accepted:.6e}, alpha = {alpha}");
                    accepted
                }
                // Only close to a stationary point is a stalled search a solution.
                Search::Failed { .. } if stationarity <= tol * gradient_scale => {
                    return Ok(SuccessfulSolve {
                        iterations: this_iteration + 1,
                        final_cost: cost,
                    });
                }
                Search::Failed {
                    non_finite: Some(row),
                } => return Err(NonLinearSystemError::NonFiniteResidual { row }),
                Search::Failed { non_finite: None } => {
                    return Err(NonLinearSystemError::DidNotConverge);
                }
            };

            let current_inf_norm = max_abs(values);
            let step_inf_norm = trial
                .iter()
                .zip(values.iter())
                .map(|(t, v)| (t - v).abs())
                .fold(0.0, libm::fmax);
            values.copy_from_slice(&trial);
            std::mem::swap(&mut residual, &mut trial_residual);
            let previous_cost = cost;
            cost = trial_cost;

            // Convergence check: the step (after projection onto the bounds) is tiny,
            // so this is a least-squares solution even if the residual isn't zero.
            if step_inf_norm <= tol * (current_inf_norm + tol)
                || previous_cost - cost <= tol * COST_STALL * previous_cost
            {
                return Ok(SuccessfulSolve {
                    iterations: this_iteration + 1,
                    final_cost: cost,
                });
            }
        }
        Err(NonLinearSystemError::DidNotConverge)
    }

    /// Projected Levenberg-Marquardt with Nielsen's damping update,
    /// over the unknowns not held at a bound.
    #[inline(never)]
    pub fn solve_levenberg_marquardt(
        &mut self,
        values: &mut [f64],
        config: &SolverConfig,
        scaling: Scaling,
    ) -> Result<SuccessfulSolve, NonLinearSystemError> {
        let n = values.len();
        let m = self.num_equations();
        let mut residual = vec![0.0; self.num_rows()];
        let mut trial_residual = vec![0.0; self.num_rows()];
        let mut trial = vec![0.0; n];
        let mut actual_step = vec![0.0; n];
        let mut damping = vec![0.0; n];
        let tol = config.tolerance;

        self.residual(values, &mut residual);
        self.check_finite(&residual)?;
        let mut cost = self.cost(&residual);
        let mut lambda: Option<f64> = None;
        let mut nu = 2.0;
        let mut initial_stationarity = None;

        for this_iteration in 0..config.max_iterations {
            if max_abs(&residual[..m]) <= tol * tol {
                return Ok(SuccessfulSolve {
                    iterations: this_iteration,
                    final_cost: cost,
                });
            }

            self.refresh_jacobian(values);
            let diagonal = self.jtj_diagonal();
            let descent = self.descent(&residual);
            let stationarity = self.projected_gradient_norm(values, &descent);
            let gradient_scale = *initial_stationarity.get_or_insert(libm::fmax(stationarity, 1.0));
            if stationarity <= tol * tol * gradient_scale {
                return Ok(SuccessfulSolve {
                    iterations: this_iteration,
                    final_cost: cost,
                });
            }

            let scale: Vec<f64> = match scaling {
                Scaling::Identity => vec![1.0; n],
                Scaling::Marquardt => diagonal.iter().map(|d| libm::fmax(*d, MIN_SCALE)).collect(),
            };
            let lambda_now = *lambda.get_or_insert_with(|| {
                let reference = match scaling {
                    Scaling::Identity => diagonal.iter().copied().fold(0.0, libm::fmax),
                    Scaling::Marquardt => 1.0,
                };
                libm::fmax(INITIAL_DAMPING_TAU * reference, REGULARIZATION_LAMBDA)
            });
            for (d, s) in damping.iter_mut().zip(&scale) {
                *d = lambda_now * s + REGULARIZATION_LAMBDA;
            }
            let step = self.constrained_step(values, &residual, &descent, &damping)?;

            self.take_step(values, &step, 1.0, &mut trial);
            for ((a, t), v) in actual_step.iter_mut().zip(&trial).zip(values.iter()) {
                *a = t - v;
            }
            let current_inf_norm = max_abs(values);
            let step_inf_norm = max_abs(&actual_step);
            // A tiny step only means convergence near a stationary point;
            // elsewhere it's the damping that's too large.
            if step_inf_norm <= tol * (current_inf_norm + tol)
                && stationarity <= tol * gradient_scale
            {
                return Ok(SuccessfulSolve {
                    iterations: this_iteration + 1,
                    final_cost: cost,
                });
            }

            self.residual(&trial, &mut trial_residual);
            let trial_cost = self.cost(&trial_residual);

            // Gain ratio between the actual and the linearly predicted decrease of ½‖r‖².
            let descent_dot_step: f64 = descent.iter().zip(&actual_step).map(|(g, s)| g * s).sum();
            let predicted = descent_dot_step - 0.5 * self.jacobian_norm_squared(&actual_step);
            let actual = 0.5 * (cost - trial_cost);
            let rho = if predicted > 0.0 { actual / predicted } else { -1.0 };
            debug!(
                "levenberg-marquardt iteration {this_iteration}: cost = {trial_cost:.6e}, lambda = {lambda_now:.3e}, rho = {rho:.3}"
            );

            if trial_cost.is_finite() && rho > 0.0 {
                values.copy_from_slice(&trial);
                std::mem::swap(&mut residual, &mut trial_residual);
                let previous_cost = cost;
                cost = trial_cost;
                let shrink = libm::fmax(1.0 / 3.0, 1.0 - libm::pow(2.0 * rho - 1.0, 3.0));
                lambda = Some(lambda_now * shrink);
                nu = 2.0;
                if previous_cost - cost <= tol * COST_STALL * previous_cost {
                    return Ok(SuccessfulSolve {
                        iterations: this_iteration + 1,
                        final_cost: cost,
                    });
                }
            } else {
                lambda = Some(lambda_now * nu);
                nu *= 2.0;
            }
        }
        Err(NonLinearSystemError::DidNotConverge)
    }
}
