use crate::{
    config::Config,
    constraints::{Family, camera_for, edge, neighbour, pixel_weight},
    equations::{Expr, Polynomial},
    error::DepthError,
    observations::Observations,
    solver::EquationSystem,
    vector::V3,
};

const NEIGHBOURS: [(isize, isize); 4] = [(1, 0), (0, 1), (-1, 0), (0, -1)];

/// For each pixel with a measured normal facing the camera and each neighbour
/// inside the image, one residual `w · (e · n)` where `e` is the edge to that
/// neighbour. Without normalization this is linear in depth.
pub(crate) fn insert_tangent_equations(
    system: &mut EquationSystem,
    observations: &Observations,
    config: &Config,
) -> Result<usize, DepthError> {
    let global = config.weights.tangent;
    let Some(normals) = observations.normals.as_ref() else {
        return Ok(0);
    };
    if global <= 0.0 {
        return Ok(0);
    }
    let camera = camera_for(Family::Tangent, observations, config)?;
    let normalize = config.normalize_tangent_vectors;
    let scale = if normalize { 1.0 } else { camera.fx.abs() };
    let width = observations.width();
    let height = observations.height();
    let weight_map = observations.tangent_weight.as_ref();
    let mut count = 0;
    for iy in 0..height {
        for ix in 0..width {
            let Some((nx, ny, nz)) = normals.get(ix, iy) else {
                continue;
            };
            let Some(w) = pixel_weight(global * scale, weight_map, ix, iy) else {
                continue;
            };
            if nz <= 0.0 {
                continue;
            }
            for offset in NEIGHBOURS {
                let Some(other) = neighbour(ix, iy, offset, width, height) else {
                    continue;
                };
                let e = edge(&camera, (ix, iy), other, width);
                if normalize {
                    let e = e.map(Expr::from);
                    let len = e.magnitude_squared().sqrt();
                    let V3 { x, y, z } = e;
                    let dot = x / len.clone() * nx + y / len.clone() * ny + z / len * nz;
                    system.insert_equation(dot * w);
                } else {
                    let V3 { x, y, z } = e;
                    let dot: Polynomial = x * nx + y * ny + z * nz;
                    system.insert_equation(dot * w);
                }
                count += 1;
            }
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{camera::CameraIntrinsics, config::Weights, equations::Equation, grid::Grid};

    fn setup(normalize: bool) -> (Observations, Config) {
        let obs = Observations::new(3, 2).with_normals(
            Grid::filled(3, 2, 0.0),
            Grid::filled(3, 2, 0.0),
            Grid::filled(3, 2, 1.0),
        );
        let config = Config::default()
            .with_weights(Weights {
                tangent: 1.0,
                ..Default::default()
            })
            .with_intrinsics(CameraIntrinsics::new(4.0, 4.0))
            .with_normalized_tangents(normalize);
        (obs, config)
    }

    #[test]
    fn unnormalized_tangents_are_linear() {
        let (obs, config) = setup(false);
        let mut system = EquationSystem::new(6);
        // 3x2 grid: 7 edges, each seen from both ends.
        assert_eq!(insert_tangent_equations(&mut system, &obs, &config).unwrap(), 14);
        assert!(
            system
                .equations()
                .iter()
                .all(|e| matches!(e, Equation::Linear(_)))
        );
        // Facing the camera, any constant depth is orthogonal to every edge.
        assert!(system.equations().iter().all(|e| e.value(&[2.5; 6]) == 0.0));
    }

    #[test]
    fn depth_step_is_penalized_with_focal_scale() {
        let (obs, config) = setup(false);
        let mut system = EquationSystem::new(6);
        insert_tangent_equations(&mut system, &obs, &config).unwrap();
        // Pixel (0,0) to (1,0): z = d0 − d1 = −1, weight 1 · fx = 4.
        let values = [1.0, 2.0, 2.0, 2.0, 2.0, 2.0];
        assert_eq!(system.equations()[0].value(&values), -4.0);
    }

    #[test]
    fn normalized_tangents_are_unit_length() {
        let (obs, config) = setup(true);
        let mut system = EquationSystem::new(6);
        insert_tangent_equations(&mut system, &obs, &config).unwrap();
        assert!(
            system
                .equations()
                .iter()
                .all(|e| matches!(e, Equation::Algebraic(_)))
        );
        // Unit edges make the residual independent of the overall depth scale.
        let values = [1.0, 2.0, 1.0, 1.0, 1.0, 1.0];
        let scaled = values.map(|v| v * 10.0);
        for e in system.equations() {
            let r = e.value(&values);
            assert!(r.abs() <= 1.0);
            assert!((r - e.value(&scaled)).abs() < 1e-12);
        }
        assert!(system.equations()[0].value(&values) < 0.0);
    }

    #[test]
    fn missing_normals_add_nothing() {
        let (_, config) = setup(false);
        let obs = Observations::new(3, 2);
        let mut system = EquationSystem::new(6);
        assert_eq!(insert_tangent_equations(&mut system, &obs, &config).unwrap(), 0);
    }
}
