use crate::{
    camera::PinholeCamera, config::Config, equations::Polynomial, error::DepthError, grid::Grid,
    id::pixel_id, observations::Observations, vector::V3,
};

mod derivative;
mod inertia;
mod normal;
mod range;
mod smoothness;
mod tangent;

pub(crate) use derivative::insert_derivative_equations;
pub(crate) use inertia::{DEGENERATE_ANCHOR_WEIGHT, insert_inertia_equations};
pub(crate) use normal::insert_normal_equations;
pub(crate) use range::insert_range_equations;
pub(crate) use smoothness::insert_smoothness_equations;
pub(crate) use tangent::insert_tangent_equations;

/// Each kind of residual the reconstruction poses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Family {
    /// Pull towards a reference depth.
    Inertia,
    /// Neighbouring depths should be equal.
    Smoothness,
    /// Neighbouring depths should differ by a measured amount.
    Derivative,
    /// Local surface normal should match a measured normal.
    Normal,
    /// Local edges should be orthogonal to a measured normal.
    Tangent,
    /// Depth should stay away from the edges of a valid interval.
    Range,
}

impl Family {
    /// Every family, in the order their equations are inserted.
    pub const ALL: [Family; 6] = [
        Family::Inertia,
        Family::Smoothness,
        Family::Derivative,
        Family::Normal,
        Family::Tangent,
        Family::Range,
    ];

    /// This family's global weight.
    pub fn weight(self, config: &Config) -> f64 {
        let w = &config.weights;
        match self {
            Family::Inertia => w.inertia,
            Family::Smoothness => w.smoothness,
            Family::Derivative => w.derivative,
            Family::Normal => w.normal,
            Family::Tangent => w.tangent,
            Family::Range => w.range,
        }
    }

    /// Normal and tangent equations back-project pixels, so they need a camera.
    pub fn needs_camera(self) -> bool {
        matches!(self, Family::Normal | Family::Tangent)
    }

    /// Will this family add any equations that need a camera?
    pub(crate) fn uses_camera(self, observations: &Observations, config: &Config) -> bool {
        self.needs_camera() && observations.normals.is_some() && self.weight(config) > 0.0
    }
}

impl std::fmt::Display for Family {
    #[mutants::skip]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Family::Inertia => "Inertia",
            Family::Smoothness => "Smoothness",
            Family::Derivative => "Derivative",
            Family::Normal => "Normal",
            Family::Tangent => "Tangent",
            Family::Range => "Range",
        };
        f.write_str(name)
    }
}

/// Resolved weight at one pixel: `global · map(ix, iy)`, or just `global`
/// if there's no map. `None` if the residual at this pixel should be omitted,
/// i.e. the map cell is unknown or the product isn't positive.
#[inline]
pub(crate) fn pixel_weight(global: f64, map: Option<&Grid>, ix: usize, iy: usize) -> Option<f64> {
    let w = match map {
        Some(map) => global * map.get(ix, iy)?,
        None => global,
    };
    (w > 0.0).then_some(w)
}

/// The camera for a family that back-projects, or an error if the intrinsics
/// can't be divided by.
pub(crate) fn camera_for(
    family: Family,
    observations: &Observations,
    config: &Config,
) -> Result<PinholeCamera, DepthError> {
    match config.intrinsics {
        Some(intrinsics) if intrinsics.is_usable() => {
            Ok(intrinsics.resolve(observations.width(), observations.height()))
        }
        _ => Err(DepthError::MissingIntrinsics { family }),
    }
}

/// Edge from pixel `from` to pixel `to`, both back-projected with unknown depth:
/// `(X_to − X_from, Y_to − Y_from, d_from − d_to)`.
/// Note the depth component points from `to` back to `from`.
pub(crate) fn edge(
    camera: &PinholeCamera,
    from: (usize, usize),
    to: (usize, usize),
    width: usize,
) -> V3<Polynomial> {
    let p = camera.back_project_unknown(from.0, from.1, pixel_id(from.0, from.1, width));
    let q = camera.back_project_unknown(to.0, to.1, pixel_id(to.0, to.1, width));
    V3::new(q.x - p.x, q.y - p.y, p.z - q.z)
}

/// Neighbour `(ix + dx, iy + dy)` if it's inside a `width × height` image.
#[inline]
pub(crate) fn neighbour(
    ix: usize,
    iy: usize,
    (dx, dy): (isize, isize),
    width: usize,
    height: usize,
) -> Option<(usize, usize)> {
    let nx = ix.checked_add_signed(dx)?;
    let ny = iy.checked_add_signed(dy)?;
    (nx < width && ny < height).then_some((nx, ny))
}
