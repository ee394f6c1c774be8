use log::{debug, warn};
use rand::Rng;

use crate::{
    config::Config,
    constraints::pixel_weight,
    equations::Polynomial,
    grid::Grid,
    id::pixel_id,
    observations::Observations,
    solver::EquationSystem,
};

/// Weight of the single anchor used when no per-pixel inertia is requested.
pub(crate) const DEGENERATE_ANCHOR_WEIGHT: f64 = 1000.0;

/// Zero means "no measurement" in reference depth maps.
fn reference_at(reference: &Grid, ix: usize, iy: usize) -> Option<f64> {
    reference.get(ix, iy).filter(|d| *d != 0.0)
}

/// `weight · (d − reference)`
fn anchor(id: u32, reference: f64, weight: f64) -> Polynomial {
    (Polynomial::variable(id) - reference) * weight
}

/// Anchor absolute depth. Always inserts at least one equation, so that a system
/// built only from relative constraints still has full rank.
///
/// 1. Reference depth, per-pixel weights and a positive global weight:
///    one weighted residual per valid pixel.
/// 2. Reference depth and a positive global weight: same, unweighted per pixel.
/// 3. Reference depth only: one strong anchor on a random valid pixel
///    in the central half of the image.
/// 4. Otherwise pin the centre pixel to zero.
pub(crate) fn insert_inertia_equations(
    system: &mut EquationSystem,
    observations: &Observations,
    config: &Config,
    rng: &mut impl Rng,
) -> usize {
    let width = observations.width();
    let height = observations.height();
    let global = config.weights.inertia;
    let mut count = 0;

    if let Some(reference) = observations.inertia_reference() {
        if global > 0.0 {
            let weight_map = observations.inertia_weight.as_ref();
            for iy in 0..height {
                for ix in 0..width {
                    let Some(w) = pixel_weight(global, weight_map, ix, iy) else {
                        continue;
                    };
                    let Some(d) = reference_at(reference, ix, iy) else {
                        continue;
                    };
                    system.insert_equation(anchor(pixel_id(ix, iy, width), d, w));
                    count += 1;
                }
            }
        } else {
            count += insert_random_anchor(system, reference, rng);
        }
    }

    if count == 0 {
        warn!("No reference depth to anchor to, pinning the centre pixel to zero");
        let center = pixel_id(width / 2, height / 2, width);
        system.insert_equation(Polynomial::term(DEGENERATE_ANCHOR_WEIGHT, center));
        count = 1;
    }
    count
}

/// Anchor one random pixel from the central region. Gives up after one attempt
/// per pixel, which leaves the caller to fall back to the degenerate anchor.
fn insert_random_anchor(
    system: &mut EquationSystem,
    reference: &Grid,
    rng: &mut impl Rng,
) -> usize {
    let width = reference.width();
    let height = reference.height();
    let n = reference.len();
    for _ in 0..n {
        let index = rng.gen_range(0..n);
        let (ix, iy) = (index % width, index / width);
        if ix < width / 4 || ix > 3 * width / 4 || iy < height / 4 || iy > 3 * height / 4 {
            continue;
        }
        if let Some(d) = reference_at(reference, ix, iy) {
            debug!("Anchoring pixel ({ix}, {iy}) to reference depth {d}");
            system.insert_equation(anchor(index as u32, d, DEGENERATE_ANCHOR_WEIGHT));
            return 1;
        }
    }
    0
}
