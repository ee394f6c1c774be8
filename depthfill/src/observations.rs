use crate::{error::DepthError, grid::Grid};

/// Per-pixel target normals. Every pixel needs all three components.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalMap {
    /// x component.
    pub nx: Grid,
    /// y component.
    pub ny: Grid,
    /// z component, positive towards the camera.
    pub nz: Grid,
}

impl NormalMap {
    /// Normal at `(ix, iy)` if all three components are known.
    pub fn get(&self, ix: usize, iy: usize) -> Option<(f64, f64, f64)> {
        Some((
            self.nx.get(ix, iy)?,
            self.ny.get(ix, iy)?,
            self.nz.get(ix, iy)?,
        ))
    }
}

/// Per-edge smoothness weights. `x` holds the weight of the edge from `(ix, iy)`
/// to `(ix + 1, iy)`, `y` the edge from `(ix, iy)` to `(ix, iy + 1)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SmoothnessWeights {
    /// Horizontal edge weights.
    pub x: Option<Grid>,
    /// Vertical edge weights.
    pub y: Option<Grid>,
}

/// Offsets `(sx, sy)` of the eight measured depth differences, in slot order.
pub const DUV_OFFSETS: [(isize, isize); 8] = [
    (-1, 1),
    (0, 1),
    (1, 1),
    (-1, 0),
    (1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

/// All observation grids for one image. Every grid is optional and read-only,
/// and every grid must match the output resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Observations {
    width: usize,
    height: usize,
    /// Measured depth, also the default inertia reference.
    pub depth: Option<Grid>,
    /// Reference depth for inertia, overriding `depth`.
    pub inertia_depth: Option<Grid>,
    /// Per-pixel inertia weights.
    pub inertia_weight: Option<Grid>,
    /// Per-edge smoothness weights.
    pub smoothness_weight: SmoothnessWeights,
    /// Measured `d(self) − d(self + offset)` per slot of [`DUV_OFFSETS`].
    pub duv: [Option<Grid>; 8],
    /// Per-pixel derivative weights.
    pub derivative_weight: Option<Grid>,
    /// Target normals.
    pub normals: Option<NormalMap>,
    /// Per-pixel normal weights.
    pub normal_weight: Option<Grid>,
    /// Per-pixel tangent weights.
    pub tangent_weight: Option<Grid>,
    /// Per-pixel range weights.
    pub range_weight: Option<Grid>,
}

impl Observations {
    /// No observations yet, for an output of this resolution.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            depth: None,
            inertia_depth: None,
            inertia_weight: None,
            smoothness_weight: SmoothnessWeights::default(),
            duv: Default::default(),
            derivative_weight: None,
            normals: None,
            normal_weight: None,
            tangent_weight: None,
            range_weight: None,
        }
    }

    /// Output width.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Output height.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of depth unknowns.
    pub fn num_pixels(&self) -> usize {
        self.width * self.height
    }

    /// Set the measured depth.
    pub fn with_depth(mut self, depth: Grid) -> Self {
        self.depth = Some(depth);
        self
    }

    /// Set a separate inertia reference.
    pub fn with_inertia_depth(mut self, depth: Grid) -> Self {
        self.inertia_depth = Some(depth);
        self
    }

    /// Set per-pixel inertia weights.
    pub fn with_inertia_weight(mut self, weight: Grid) -> Self {
        self.inertia_weight = Some(weight);
        self
    }

    /// Set per-edge smoothness weights.
    pub fn with_smoothness_weights(mut self, x: Option<Grid>, y: Option<Grid>) -> Self {
        self.smoothness_weight = SmoothnessWeights { x, y };
        self
    }

    /// Set one measured difference grid, `slot` indexing [`DUV_OFFSETS`].
    ///
    /// # Panics
    ///
    /// If `slot` is not below `DUV_OFFSETS.len()`.
    pub fn with_duv(mut self, slot: usize, duv: Grid) -> Self {
        self.duv[slot] = Some(duv);
        self
    }

    /// Set separate du and dv grids. They occupy the first two slots.
    pub fn with_du_dv(mut self, du: Option<Grid>, dv: Option<Grid>) -> Self {
        self.duv[0] = du;
        self.duv[1] = dv;
        self
    }

    /// Set per-pixel derivative weights.
    pub fn with_derivative_weight(mut self, weight: Grid) -> Self {
        self.derivative_weight = Some(weight);
        self
    }

    /// Set target normals.
    pub fn with_normals(mut self, nx: Grid, ny: Grid, nz: Grid) -> Self {
        self.normals = Some(NormalMap { nx, ny, nz });
        self
    }

    /// Set per-pixel normal weights.
    pub fn with_normal_weight(mut self, weight: Grid) -> Self {
        self.normal_weight = Some(weight);
        self
    }

    /// Set per-pixel tangent weights.
    pub fn with_tangent_weight(mut self, weight: Grid) -> Self {
        self.tangent_weight = Some(weight);
        self
    }

    /// Set per-pixel range weights.
    pub fn with_range_weight(mut self, weight: Grid) -> Self {
        self.range_weight = Some(weight);
        self
    }

    /// Reference depth for inertia: `inertia_depth`, else `depth`.
    pub fn inertia_reference(&self) -> Option<&Grid> {
        self.inertia_depth.as_ref().or(self.depth.as_ref())
    }

    /// Any measured difference grid present.
    pub fn has_duv(&self) -> bool {
        self.duv.iter().any(Option::is_some)
    }

    fn named_grids(&self) -> impl Iterator<Item = (&'static str, &Grid)> + '_ {
        const DUV_NAMES: [&str; 8] = [
            "duv[0]", "duv[1]", "duv[2]", "duv[3]", "duv[4]", "duv[5]", "duv[6]", "duv[7]",
        ];
        let singles = [
            ("depth", self.depth.as_ref()),
            ("inertia depth", self.inertia_depth.as_ref()),
            ("inertia weight", self.inertia_weight.as_ref()),
            ("x smoothness weight", self.smoothness_weight.x.as_ref()),
            ("y smoothness weight", self.smoothness_weight.y.as_ref()),
            ("derivative weight", self.derivative_weight.as_ref()),
            ("normal weight", self.normal_weight.as_ref()),
            ("tangent weight", self.tangent_weight.as_ref()),
            ("range weight", self.range_weight.as_ref()),
            ("nx", self.normals.as_ref().map(|n| &n.nx)),
            ("ny", self.normals.as_ref().map(|n| &n.ny)),
            ("nz", self.normals.as_ref().map(|n| &n.nz)),
        ];
        singles
            .into_iter()
            .chain(DUV_NAMES.into_iter().zip(self.duv.iter().map(Option::as_ref)))
            .filter_map(|(name, grid)| Some((name, grid?)))
    }

    /// Every grid must have the output resolution, and that resolution must be nonempty.
    pub fn validate(&self) -> Result<(), DepthError> {
        if self.width == 0 || self.height == 0 {
            return Err(DepthError::EmptyResolution);
        }
        let expected = (self.width, self.height);
        for (name, grid) in self.named_grids() {
            if grid.resolution() != expected {
                return Err(DepthError::ResolutionMismatch {
                    name,
                    expected,
                    actual: grid.resolution(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatched_grid_is_named() {
        let obs = Observations::new(4, 4)
            .with_depth(Grid::filled(4, 4, 1.0))
            .with_duv(4, Grid::filled(4, 3, 0.0));
        let err = obs.validate().unwrap_err();
        assert!(matches!(
            err,
            DepthError::ResolutionMismatch {
                name: "duv[4]",
                expected: (4, 4),
                actual: (4, 3)
            }
        ));
    }

    #[test]
    #[should_panic]
    fn duv_slot_out_of_range() {
        let _ = Observations::new(2, 2).with_duv(DUV_OFFSETS.len(), Grid::filled(2, 2, 0.0));
    }

    #[test]
    fn empty_resolution_is_rejected() {
        assert!(matches!(
            Observations::new(0, 3).validate(),
            Err(DepthError::EmptyResolution)
        ));
    }

    #[test]
    fn inertia_reference_prefers_dedicated_grid() {
        let obs = Observations::new(1, 1).with_depth(Grid::filled(1, 1, 2.0));
        assert_eq!(obs.inertia_reference().and_then(|g| g.get(0, 0)), Some(2.0));
        let obs = obs.with_inertia_depth(Grid::filled(1, 1, 3.0));
        assert_eq!(obs.inertia_reference().and_then(|g| g.get(0, 0)), Some(3.0));
    }

    #[test]
    fn normals_need_all_components() {
        let mut nz = Grid::filled(2, 1, 1.0);
        nz.set(1, 0, None);
        let normals = NormalMap {
            nx: Grid::filled(2, 1, 0.0),
            ny: Grid::filled(2, 1, 0.0),
            nz,
        };
        assert_eq!(normals.get(0, 0), Some((0.0, 0.0, 1.0)));
        assert_eq!(normals.get(1, 0), None);
    }
}
