use crate::{
    camera::CameraIntrinsics,
    error::DepthError,
    solver::{Backend, SolverConfig},
};

/// Global weight of each constraint family.
/// A family whose weight is 0 contributes no equations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    /// Pull towards the reference depth.
    pub inertia: f64,
    /// Pull towards equal neighbouring depths.
    pub smoothness: f64,
    /// Match measured depth differences.
    pub derivative: f64,
    /// Match measured normals through the cross product of two edges.
    pub normal: f64,
    /// Keep edges orthogonal to measured normals.
    pub tangent: f64,
    /// Barrier keeping depth away from the edges of the range interval.
    pub range: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            inertia: 0.0,
            smoothness: 1e-3,
            derivative: 1.0,
            normal: 0.0,
            tangent: 1.0,
            range: 0.0,
        }
    }
}

/// Interval used by the range barrier. Separate from the hard depth bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeInterval {
    /// Lower edge.
    pub minimum: f64,
    /// Upper edge.
    pub maximum: f64,
}

impl Default for RangeInterval {
    fn default() -> Self {
        Self {
            minimum: 0.1,
            maximum: 20.0,
        }
    }
}

/// Everything that controls a reconstruction, apart from the input grids.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Hard lower bound on every depth.
    pub minimum_depth: f64,
    /// Hard upper bound on every depth.
    pub maximum_depth: f64,
    /// Global weight per family.
    pub weights: Weights,
    /// Interval the range barrier pushes away from.
    pub range_interval: RangeInterval,
    /// Divide tangent edges by their length, and drop the `fx` scale
    /// from tangent and normal weights.
    pub normalize_tangent_vectors: bool,
    /// Needed when normal or tangent equations are active.
    pub intrinsics: Option<CameraIntrinsics>,
    /// Backend for the linear first phase.
    pub init_backend: Backend,
    /// Backend for the full nonlinear second phase.
    pub backend: Backend,
    /// Iteration limits and tolerance for both phases.
    pub solver: SolverConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            minimum_depth: 0.05,
            maximum_depth: 20.0,
            weights: Weights::default(),
            range_interval: RangeInterval::default(),
            normalize_tangent_vectors: false,
            intrinsics: None,
            init_backend: Backend::SparseDirect,
            backend: Backend::SparseDirect,
            solver: SolverConfig::default(),
        }
    }
}

impl Config {
    /// Set the hard depth bounds.
    pub fn with_depth_bounds(mut self, minimum_depth: f64, maximum_depth: f64) -> Self {
        self.minimum_depth = minimum_depth;
        self.maximum_depth = maximum_depth;
        self
    }

    /// Set every family weight.
    pub fn with_weights(mut self, weights: Weights) -> Self {
        self.weights = weights;
        self
    }

    /// Set the range barrier's interval.
    pub fn with_range_interval(mut self, minimum: f64, maximum: f64) -> Self {
        self.range_interval = RangeInterval { minimum, maximum };
        self
    }

    /// Set the camera.
    pub fn with_intrinsics(mut self, intrinsics: CameraIntrinsics) -> Self {
        self.intrinsics = Some(intrinsics);
        self
    }

    /// Normalize tangent vectors.
    pub fn with_normalized_tangents(mut self, normalize: bool) -> Self {
        self.normalize_tangent_vectors = normalize;
        self
    }

    /// Choose the second-phase backend.
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Change iteration limits and tolerance.
    pub fn with_solver(mut self, solver: SolverConfig) -> Self {
        self.solver = solver;
        self
    }

    /// Reject bounds that can't hold any depth.
    pub fn validate(&self) -> Result<(), DepthError> {
        let Self {
            minimum_depth,
            maximum_depth,
            ..
        } = *self;
        if !minimum_depth.is_finite() || !maximum_depth.is_finite() || minimum_depth > maximum_depth {
            return Err(DepthError::InvalidBounds {
                minimum: minimum_depth,
                maximum: maximum_depth,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverted_bounds_are_rejected() {
        let config = Config::default().with_depth_bounds(5.0, 1.0);
        assert!(matches!(
            config.validate(),
            Err(DepthError::InvalidBounds { .. })
        ));
        Config::default().validate().unwrap();
    }
}
