use crate::{
    config::Config,
    constraints::{neighbour, pixel_weight},
    equations::Polynomial,
    id::pixel_id,
    observations::Observations,
    solver::EquationSystem,
};

/// `w · (d_neighbour − d_self)` for every pixel and each of its 4 neighbours.
/// Every edge is posed from both ends. The x weight map holds the weight of the
/// edge to the right of each pixel, the y map the edge below it.
pub(crate) fn insert_smoothness_equations(
    system: &mut EquationSystem,
    observations: &Observations,
    config: &Config,
) -> usize {
    let global = config.weights.smoothness;
    let maps = &observations.smoothness_weight;
    if global == 0.0 && maps.x.is_none() && maps.y.is_none() {
        return 0;
    }
    let width = observations.width();
    let height = observations.height();
    let mut count = 0;
    for iy in 0..height {
        for ix in 0..width {
            let me = pixel_id(ix, iy, width);
            // (offset, weight map, cell holding this edge's weight)
            let edges = [
                ((-1, 0), maps.x.as_ref(), ix.checked_sub(1).map(|x| (x, iy))),
                ((1, 0), maps.x.as_ref(), Some((ix, iy))),
                ((0, -1), maps.y.as_ref(), iy.checked_sub(1).map(|y| (ix, y))),
                ((0, 1), maps.y.as_ref(), Some((ix, iy))),
            ];
            for (offset, map, edge_cell) in edges {
                let Some((nx, ny)) = neighbour(ix, iy, offset, width, height) else {
                    continue;
                };
                let Some((ex, ey)) = edge_cell else {
                    continue;
                };
                let Some(w) = pixel_weight(global, map, ex, ey) else {
                    continue;
                };
                let other = pixel_id(nx, ny, width);
                let e = (Polynomial::variable(other) - Polynomial::variable(me)) * w;
                system.insert_equation(e);
                count += 1;
            }
        }
    }
    count
}
