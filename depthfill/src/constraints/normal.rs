use crate::{
    config::Config,
    constraints::{Family, camera_for, edge, neighbour, pixel_weight},
    equations::Expr,
    error::DepthError,
    observations::Observations,
    solver::EquationSystem,
    vector::V3,
};

/// Neighbour pairs `(A, B)` spanning the local surface. Each pair is the previous
/// one rotated by 90°, so `A × B` always faces the camera on a flat surface.
const EDGE_PAIRS: [((isize, isize), (isize, isize)); 4] = [
    ((1, 0), (0, 1)),
    ((0, 1), (-1, 0)),
    ((-1, 0), (0, -1)),
    ((0, -1), (1, 0)),
];

/// For each pixel with a measured normal facing the camera and each edge pair
/// inside the image, three residuals `w · (cᵢ/|c| − nᵢ)` where `c = A × B`.
///
/// These divide by `|c|`, which is why they're only added after the linear
/// phase has produced a reasonable starting point.
pub(crate) fn insert_normal_equations(
    system: &mut EquationSystem,
    observations: &Observations,
    config: &Config,
) -> Result<usize, DepthError> {
    let global = config.weights.normal;
    let Some(normals) = observations.normals.as_ref() else {
        return Ok(0);
    };
    if global <= 0.0 {
        return Ok(0);
    }
    let camera = camera_for(Family::Normal, observations, config)?;
    let scale = if config.normalize_tangent_vectors {
        1.0
    } else {
        camera.fx.abs()
    };
    let width = observations.width();
    let height = observations.height();
    let weight_map = observations.normal_weight.as_ref();
    let mut count = 0;
    for iy in 0..height {
        for ix in 0..width {
            let Some((nx, ny, nz)) = normals.get(ix, iy) else {
                continue;
            };
            let Some(w) = pixel_weight(global * scale, weight_map, ix, iy) else {
                continue;
            };
            // Facing away from the camera.
            if nz <= 0.0 {
                continue;
            }
            for (a, b) in EDGE_PAIRS {
                let (Some(a), Some(b)) = (
                    neighbour(ix, iy, a, width, height),
                    neighbour(ix, iy, b, width, height),
                ) else {
                    continue;
                };
                let ea = edge(&camera, (ix, iy), a, width).map(Expr::from);
                let eb = edge(&camera, (ix, iy), b, width).map(Expr::from);
                let c = ea.cross(&eb);
                let len = c.magnitude_squared().sqrt();
                let V3 { x, y, z } = c;
                for (component, target) in [(x, nx), (y, ny), (z, nz)] {
                    system.insert_equation((component / len.clone() - target) * w);
                }
                count += 3;
            }
        }
    }
    Ok(count)
}
