use rand::{SeedableRng, rngs::StdRng};

use super::*;
use crate::constraints::DEGENERATE_ANCHOR_WEIGHT;


pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[track_caller]
pub(crate) fn assert_nearly_eq(actual: f64, expected: f64, tolerance: f64) {
    let diff = (actual - expected).abs();
    assert!(
        diff <= tolerance,
        "expected {expected}, got {actual} (off by {diff}, tolerance {tolerance})"
    );
}

/// Default config with these weights.
fn only(weights: Weights) -> Config {
    Config::default().with_weights(weights)
}

const NONE: Weights = Weights {
    inertia: 0.0,
    smoothness: 0.0,
    derivative: 0.0,
    normal: 0.0,
    tangent: 0.0,
    range: 0.0,
};

fn values(grid: &Grid) -> Vec<f64> {
    grid.cells().iter().map(|c| c.unwrap()).collect()
}

#[test]
fn smoothness_propagates_a_single_anchor() {
    init_logger();
    let depth = Grid::from_cells(3, 1, vec![Some(5.0), None, None]).unwrap();
    let obs = Observations::new(3, 1).with_depth(depth);
    let config = only(Weights {
        inertia: 1000.0,
        smoothness: 1.0,
        ..NONE
    });
    let outcome = solve(&obs, &config).unwrap();
    for d in values(outcome.depth()) {
        assert_nearly_eq(d, 5.0, 1e-6);
    }
    assert_eq!(outcome.counts().inertia, 1);
    assert_eq!(outcome.counts().smoothness, 4);
}

#[test]
fn derivative_offsets_the_neighbour() {
    init_logger();
    let depth = Grid::from_cells(2, 1, vec![None, Some(3.0)]).unwrap();
    let duv = Grid::from_cells(2, 1, vec![Some(2.0), None]).unwrap();
    // Slot 4 is the right neighbour.
    assert_eq!(DUV_OFFSETS[4], (1, 0));
    let obs = Observations::new(2, 1).with_depth(depth).with_duv(4, duv);
    let config = only(Weights {
        inertia: 1000.0,
        derivative: 1.0,
        ..NONE
    });
    let outcome = solve(&obs, &config).unwrap();
    let d = values(outcome.depth());
    assert_nearly_eq(d[0], 5.0, 1e-4);
    assert_nearly_eq(d[1], 3.0, 1e-4);
    assert_eq!(outcome.counts().derivative, 1);
}

#[test]
fn no_reference_pins_centre() {
    init_logger();
    let obs = Observations::new(3, 3);
    let config = Config::default();
    let outcome = solve(&obs, &config).unwrap();
    assert_eq!(outcome.counts().inertia, 1);
    assert!(outcome.warnings().contains(&Warning {
        about_family: Some(Family::Inertia),
        content: WarningContent::DegenerateAnchor,
    }));
    // Pinned towards zero, so everything ends up on the lower bound.
    for d in values(outcome.depth()) {
        assert_nearly_eq(d, config.minimum_depth, 1e-9);
    }
}

#[test]
fn degenerate_anchor_is_the_only_inertia_equation() {
    let obs = Observations::new(4, 3);
    let mut system = EquationSystem::new(12);
    let mut rng = StdRng::seed_from_u64(0);
    let n = constraints::insert_inertia_equations(&mut system, &obs, &Config::default(), &mut rng);
    assert_eq!(n, 1);
    let mut row = Vec::new();
    system.equations()[0].jacobian_row(&[1.0; 12], &mut row);
    assert_eq!(row.len(), 1);
    assert_eq!(row[0].id, pixel_id(2, 1, 4));
    assert_nearly_eq(row[0].partial_derivative, DEGENERATE_ANCHOR_WEIGHT, 0.0);
}

#[test]
fn ramp_between_two_anchored_columns() {
    init_logger();
    let depth = Grid::from_fn(4, 4, |ix, _| match ix {
        0 => Some(10.0),
        3 => Some(13.0),
        _ => None,
    });
    let obs = Observations::new(4, 4).with_depth(depth);
    let config = only(Weights {
        inertia: 1000.0,
        smoothness: 1.0,
        ..NONE
    });
    let outcome = solve(&obs, &config).unwrap();
    let depth = outcome.depth();
    for iy in 0..4 {
        for ix in 0..4 {
            let d = depth.get(ix, iy).unwrap();
            assert_nearly_eq(d, 10.0 + ix as f64, 1e-2);
            if ix > 0 {
                assert!(d > depth.get(ix - 1, iy).unwrap());
            }
        }
    }
    assert!(outcome.final_ssd() <= outcome.initial_ssd() + 1e-9);
}

#[test]
fn single_sample_spreads_over_the_field() {
    init_logger();
    let mut depth = Grid::unknown(4, 4);
    depth.set(0, 0, Some(10.0));
    let obs = Observations::new(4, 4).with_depth(depth);
    let config = only(Weights {
        inertia: 1000.0,
        smoothness: 1.0,
        ..NONE
    });
    let outcome = solve(&obs, &config).unwrap();
    for d in values(outcome.depth()) {
        assert_nearly_eq(d, 10.0, 1e-4);
    }
}

#[test]
fn depth_stays_within_bounds() {
    init_logger();
    let depth = Grid::from_values(3, 1, vec![50.0, 1.0, -4.0]).unwrap();
    let obs = Observations::new(3, 1).with_depth(depth);
    let config = only(Weights {
        inertia: 1.0,
        smoothness: 1.0,
        ..NONE
    })
    .with_depth_bounds(0.5, 20.0);
    for backend in Backend::ALL {
        let outcome = solve(&obs, &config.clone().with_backend(backend)).unwrap();
        for d in values(outcome.depth()) {
            assert!((0.5..=20.0).contains(&d), "{backend}: {d} is out of bounds");
        }
    }
}

#[test]
fn tangents_need_intrinsics() {
    let obs = Observations::new(2, 2)
        .with_depth(Grid::filled(2, 2, 1.0))
        .with_normals(
            Grid::filled(2, 2, 0.0),
            Grid::filled(2, 2, 0.0),
            Grid::filled(2, 2, 1.0),
        );
    let failure = solve(&obs, &Config::default()).unwrap_err();
    assert!(matches!(
        failure.error(),
        DepthError::MissingIntrinsics {
            family: Family::Tangent
        }
    ));
    // Nothing was posed yet.
    assert_eq!(failure.num_eqs(), 0);
    assert_eq!(failure.num_vars(), 4);
}

#[test]
fn mismatched_input_fails() {
    let obs = Observations::new(2, 2).with_depth(Grid::filled(3, 2, 1.0));
    let failure = solve(&obs, &Config::default()).unwrap_err();
    assert!(matches!(
        failure.error(),
        DepthError::ResolutionMismatch { name: "depth", .. }
    ));
}

/// Every measurement a reconstruction can use.
fn everything(width: usize, height: usize) -> Observations {
    let mut obs = Observations::new(width, height)
        .with_depth(Grid::filled(width, height, 2.0))
        .with_normals(
            Grid::filled(width, height, 0.0),
            Grid::filled(width, height, 0.0),
            Grid::filled(width, height, 1.0),
        );
    for slot in 0..DUV_OFFSETS.len() {
        obs = obs.with_duv(slot, Grid::filled(width, height, 0.0));
    }
    obs
}

/// How many equations `family` poses on its own.
fn posed(family: Family, obs: &Observations, config: &Config) -> usize {
    let mut system = EquationSystem::new(obs.num_pixels());
    let mut rng = StdRng::seed_from_u64(1);
    match family {
        Family::Inertia => constraints::insert_inertia_equations(&mut system, obs, config, &mut rng),
        Family::Smoothness => constraints::insert_smoothness_equations(&mut system, obs, config),
        Family::Derivative => constraints::insert_derivative_equations(&mut system, obs, config),
        Family::Normal => constraints::insert_normal_equations(&mut system, obs, config).unwrap(),
        Family::Tangent => constraints::insert_tangent_equations(&mut system, obs, config).unwrap(),
        Family::Range => constraints::insert_range_equations(&mut system, obs, config),
    }
}

#[test]
fn zero_weight_disables_each_family() {
    let obs = everything(3, 3);
    let base = only(NONE).with_intrinsics(CameraIntrinsics::new(3.0, 3.0));
    for family in Family::ALL {
        let quiet = posed(family, &obs, &base);
        if family == Family::Inertia {
            // Falls back to one random anchor.
            assert_eq!(quiet, 1);
        } else {
            assert_eq!(quiet, 0, "{family} posed equations with zero weight");
        }

        let mut config = base.clone();
        let weight = match family {
            Family::Inertia => &mut config.weights.inertia,
            Family::Smoothness => &mut config.weights.smoothness,
            Family::Derivative => &mut config.weights.derivative,
            Family::Normal => &mut config.weights.normal,
            Family::Tangent => &mut config.weights.tangent,
            Family::Range => &mut config.weights.range,
        };
        *weight = 1.0;
        assert!(posed(family, &obs, &config) > 1, "{family} posed too few equations");
    }
}

#[test]
fn weight_maps_gate_single_pixels() {
    type WithMap = fn(Observations, Grid) -> Observations;
    // Map setter, and how many equations the centre of a 3x3 image owns in it.
    let cases: [(Family, WithMap, usize); 7] = [
        (Family::Inertia, |o, g| o.with_inertia_weight(g), 1),
        // The edge to the right of, or below, the centre, posed from both ends.
        (Family::Smoothness, |o, g| o.with_smoothness_weights(Some(g), None), 2),
        (Family::Smoothness, |o, g| o.with_smoothness_weights(None, Some(g)), 2),
        (Family::Derivative, |o, g| o.with_derivative_weight(g), 8),
        (Family::Normal, |o, g| o.with_normal_weight(g), 12),
        (Family::Tangent, |o, g| o.with_tangent_weight(g), 4),
        (Family::Range, |o, g| o.with_range_weight(g), 2),
    ];
    let config = only(Weights {
        inertia: 1.0,
        smoothness: 1.0,
        derivative: 1.0,
        normal: 1.0,
        tangent: 1.0,
        range: 1.0,
    })
    .with_intrinsics(CameraIntrinsics::new(3.0, 3.0));
    let ones = Grid::filled(3, 3, 1.0);
    let mut zeroed = ones.clone();
    zeroed.set(1, 1, Some(0.0));
    let mut unknown = ones.clone();
    unknown.set(1, 1, None);

    for (case, (family, with_map, centre_terms)) in cases.into_iter().enumerate() {
        let unmapped = posed(family, &everything(3, 3), &config);
        let full = posed(family, &with_map(everything(3, 3), ones.clone()), &config);
        assert_eq!(full, unmapped, "case {case} ({family}): a map of ones changed the equations");
        for gate in [&zeroed, &unknown] {
            let gated = posed(family, &with_map(everything(3, 3), gate.clone()), &config);
            assert_eq!(
                full - gated,
                centre_terms,
                "case {case} ({family}): gating the centre removed the wrong equations"
            );
        }
    }
}

#[test]
fn consistent_normals_keep_a_flat_plane() {
    init_logger();
    let obs = everything(4, 4);
    let config = only(Weights {
        inertia: 1.0,
        smoothness: 1e-3,
        derivative: 1.0,
        normal: 1.0,
        tangent: 1.0,
        ..NONE
    })
    .with_intrinsics(CameraIntrinsics::new(4.0, 4.0));
    for backend in Backend::ALL {
        let outcome = solve(&obs, &config.clone().with_backend(backend)).unwrap();
        for d in values(outcome.depth()) {
            assert_nearly_eq(d, 2.0, 1e-6);
        }
        assert!(outcome.final_ssd() <= outcome.initial_ssd() + 1e-12);
        assert!(outcome.counts().normal > 0);
        assert!(outcome.counts().tangent > 0);
    }
}

#[test]
fn refinement_tilts_towards_measured_normals() {
    init_logger();
    // Every pixel sees the same tilted plane 0.1·X − Z = −2, but depth is only
    // measured at two pixels. Smoothness alone flattens it out.
    let (width, height) = (6, 6);
    let camera = CameraIntrinsics::new(5.0, 5.0);
    let pinhole = camera.resolve(width, height);
    let truth = Grid::from_fn(width, height, |ix, iy| {
        Some(2.0 / (1.0 - 0.1 * pinhole.ray(ix, iy).x))
    });
    let norm = libm::hypot(0.1, 1.0);

    let mut depth = Grid::unknown(width, height);
    depth.set(2, 2, truth.get(2, 2));
    depth.set(3, 3, truth.get(3, 3));
    let obs = Observations::new(width, height)
        .with_depth(depth)
        .with_normals(
            Grid::filled(width, height, 0.1 / norm),
            Grid::filled(width, height, 0.0),
            Grid::filled(width, height, 1.0 / norm),
        );
    let config = only(Weights {
        inertia: 10.0,
        smoothness: 1e-3,
        tangent: 1.0,
        ..NONE
    })
    .with_intrinsics(camera);
    let outcome = solve(&obs, &config).unwrap();
    let worst = |g: &Grid| {
        g.subtract(&truth)
            .known_values()
            .map(f64::abs)
            .fold(0.0, f64::max)
    };
    assert!(worst(outcome.initial_guess()) > 0.05);
    assert!(worst(outcome.depth()) < 0.01);
    assert!(outcome.final_ssd() < outcome.initial_ssd());
}

#[test]
fn random_anchor_is_reproducible_with_a_seeded_rng() {
    let depth = Grid::from_fn(8, 8, |ix, iy| Some(1.0 + (ix + iy) as f64));
    let obs = Observations::new(8, 8).with_depth(depth);
    let run = |seed| {
        let mut rng = StdRng::seed_from_u64(seed);
        solve_with_rng(&obs, &Config::default(), &mut rng)
            .unwrap()
            .into_depth()
    };
    assert_eq!(run(7), run(7));
}
