use crate::{
    config::Config,
    constraints::pixel_weight,
    equations::{Expr, Polynomial},
    id::pixel_id,
    observations::Observations,
    solver::EquationSystem,
};

/// Two inverse-square barriers per pixel, `w · (d − min + 1)⁻²` and
/// `w · (max − 1 − d)⁻²`, which grow as depth nears either end of the range
/// interval. Soft, unlike the box bounds.
pub(crate) fn insert_range_equations(
    system: &mut EquationSystem,
    observations: &Observations,
    config: &Config,
) -> usize {
    let global = config.weights.range;
    if global == 0.0 {
        return 0;
    }
    let minimum = config.range_interval.minimum;
    let maximum = config.range_interval.maximum;
    let width = observations.width();
    let height = observations.height();
    let weight_map = observations.range_weight.as_ref();
    let mut count = 0;
    for iy in 0..height {
        for ix in 0..width {
            let Some(w) = pixel_weight(global, weight_map, ix, iy) else {
                continue;
            };
            let d = Polynomial::variable(pixel_id(ix, iy, width));
            let low = Expr::from(d.clone() + (1.0 - minimum)).powf(-2.0) * w;
            let high = Expr::from(Polynomial::constant(maximum - 1.0) - d).powf(-2.0) * w;
            system.insert_equation(low);
            system.insert_equation(high);
            count += 2;
        }
    }
    count
}
