use crate::{
    config::Config,
    constraints::{neighbour, pixel_weight},
    equations::Polynomial,
    id::pixel_id,
    observations::{DUV_OFFSETS, Observations},
    solver::EquationSystem,
};

/// `w · (d_self − d_neighbour − measured)` for every known measured difference
/// whose neighbour is inside the image.
pub(crate) fn insert_derivative_equations(
    system: &mut EquationSystem,
    observations: &Observations,
    config: &Config,
) -> usize {
    let global = config.weights.derivative;
    if global == 0.0 || !observations.has_duv() {
        return 0;
    }
    let width = observations.width();
    let height = observations.height();
    let weight_map = observations.derivative_weight.as_ref();
    let mut count = 0;
    for (offset, duv) in DUV_OFFSETS.into_iter().zip(&observations.duv) {
        let Some(duv) = duv else {
            continue;
        };
        for iy in 0..height {
            for ix in 0..width {
                let Some((nx, ny)) = neighbour(ix, iy, offset, width, height) else {
                    continue;
                };
                let Some(measured) = duv.get(ix, iy) else {
                    continue;
                };
                let Some(w) = pixel_weight(global, weight_map, ix, iy) else {
                    continue;
                };
                let e = (Polynomial::variable(pixel_id(ix, iy, width))
                    - Polynomial::variable(pixel_id(nx, ny, width))
                    - measured)
                    * w;
                system.insert_equation(e);
                count += 1;
            }
        }
    }
    count
}
