//! A basic example for how to fill holes in a depth map.
use depthfill::{Config, Grid, Observations, Weights, solve};

fn main() {
    // A 5x4 depth map of a wall at depth 3, with a hole in the middle.
    // Unknown cells are `None`.
    let depth = Grid::from_fn(5, 4, |ix, iy| {
        let in_hole = (1..4).contains(&ix) && (1..3).contains(&iy);
        (!in_hole).then_some(3.0)
    });

    // Keep measured pixels close to their measurement, and fill the rest
    // by keeping neighbours at similar depths.
    let observations = Observations::new(5, 4).with_depth(depth);
    let config = Config::default().with_weights(Weights {
        inertia: 1.0,
        ..Default::default()
    });

    // Run the solver!
    match solve(&observations, &config) {
        Ok(outcome) => {
            for warning in outcome.warnings() {
                println!("warning: {warning}");
            }
            let depth = outcome.depth();
            for iy in 0..depth.height() {
                let row: Vec<_> = (0..depth.width())
                    .map(|ix| format!("{:.3}", depth.get(ix, iy).unwrap_or(f64::NAN)))
                    .collect();
                println!("{}", row.join(" "));
            }
        }
        Err(e) => {
            eprintln!("depthfill could not reconstruct this depth map: {}", e.error());
        }
    }
}
