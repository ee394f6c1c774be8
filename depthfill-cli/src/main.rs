use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use clap::{ArgAction, Parser};
use depthfill::{
    Backend, CameraIntrinsics, Config, EquationCounts, FailureOutcome, Family, Grid,
    SolveOutcome, SolverConfig, Warning, Weights,
    diagnostics::{DEFAULT_BINS, ErrorHistogram},
    grid::PngScaling,
};

mod inputs;
mod visualize;

#[derive(Parser)]
#[command(name = "depthfill", version, about, long_about = None)]
struct Cli {
    /// Input depth (.png or .pfm). Zero means unknown.
    input_depth: PathBuf,

    /// Where to write the reconstructed depth (.png or .pfm).
    output_depth: PathBuf,

    /// Ground-truth depth, for the error plot.
    #[arg(long, alias = "true-depth")]
    input_true_depth: Option<PathBuf>,

    /// Target normals, as one 3-channel file.
    #[arg(long)]
    input_normals: Option<PathBuf>,

    /// Target normal x component.
    #[arg(long)]
    input_nx: Option<PathBuf>,

    /// Target normal y component.
    #[arg(long)]
    input_ny: Option<PathBuf>,

    /// Target normal z component.
    #[arg(long)]
    input_nz: Option<PathBuf>,

    /// Eight measured depth differences, one file per neighbour.
    #[arg(long, num_args = 8, value_name = "FILE", alias = "input-derivatives")]
    input_duv: Option<Vec<PathBuf>>,

    /// Measured horizontal depth difference.
    #[arg(long)]
    input_du: Option<PathBuf>,

    /// Measured vertical depth difference.
    #[arg(long)]
    input_dv: Option<PathBuf>,

    /// Reference depth for inertia, instead of the input depth.
    #[arg(long)]
    input_inertia_depth: Option<PathBuf>,

    /// Per-pixel inertia weights.
    #[arg(long)]
    input_inertia_weight: Option<PathBuf>,

    /// Per-edge horizontal smoothness weights.
    #[arg(long)]
    input_xsmoothness_weight: Option<PathBuf>,

    /// Per-edge vertical smoothness weights.
    #[arg(long)]
    input_ysmoothness_weight: Option<PathBuf>,

    /// Per-pixel derivative weights.
    #[arg(long)]
    input_derivative_weight: Option<PathBuf>,

    /// Per-pixel normal weights.
    #[arg(long)]
    input_normal_weight: Option<PathBuf>,

    /// Per-pixel tangent weights.
    #[arg(long)]
    input_tangent_weight: Option<PathBuf>,

    /// Per-pixel range weights.
    #[arg(long)]
    input_range_weight: Option<PathBuf>,

    #[arg(long, default_value_t = 0.0)]
    inertia_weight: f64,

    #[arg(long, default_value_t = 1e-3)]
    smoothness_weight: f64,

    #[arg(long, default_value_t = 1.0, alias = "duv-weight")]
    derivative_weight: f64,

    #[arg(long, default_value_t = 0.0)]
    normal_weight: f64,

    #[arg(long, default_value_t = 1.0)]
    tangent_weight: f64,

    #[arg(long, default_value_t = 0.0)]
    range_weight: f64,

    #[arg(long, default_value_t = 0.05)]
    minimum_depth: f64,

    #[arg(long, default_value_t = 20.0)]
    maximum_depth: f64,

    /// Focal length along x, in pixels.
    #[arg(long)]
    fx: Option<f64>,

    /// Focal length along y, in pixels.
    #[arg(long)]
    fy: Option<f64>,

    /// Principal point x. Defaults to the image centre.
    #[arg(long)]
    cx: Option<f64>,

    /// Principal point y. Defaults to the image centre.
    #[arg(long)]
    cy: Option<f64>,

    /// Output width. Defaults to the input depth's width.
    #[arg(long)]
    xres: Option<usize>,

    /// Output height. Defaults to the input depth's height.
    #[arg(long)]
    yres: Option<usize>,

    /// PNG depth units per depth unit.
    #[arg(long, default_value_t = 4000.0)]
    png_depth_scale: f64,

    #[arg(long)]
    normalize_tangent_vectors: bool,

    /// Backend for the full solve.
    #[arg(long, default_value_t = Backend::SparseDirect)]
    solver: Backend,

    /// Backend for the initial linear solve.
    #[arg(long, default_value_t = Backend::SparseDirect)]
    init_solver: Backend,

    #[arg(long, default_value_t = SolverConfig::default().max_iterations)]
    max_iterations: usize,

    #[arg(long, default_value_t = SolverConfig::default().tolerance)]
    tolerance: f64,

    /// Write the cumulative error distribution as text. Needs true depth.
    #[arg(long, alias = "output-plot")]
    output_error_plot: Option<PathBuf>,

    /// Largest error threshold in the error plot.
    #[arg(long, default_value_t = 1.0)]
    plot_max_value: f64,

    /// Chart the cumulative error distribution as a PNG. Needs true depth.
    #[arg(long)]
    output_error_png: Option<PathBuf>,

    /// Also write the result of the initial linear solve.
    #[arg(long)]
    output_initial_guess: Option<PathBuf>,

    /// More logging, repeat for even more.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn config(&self) -> Config {
        let mut config = Config::default()
            .with_depth_bounds(self.minimum_depth, self.maximum_depth)
            .with_weights(Weights {
                inertia: self.inertia_weight,
                smoothness: self.smoothness_weight,
                derivative: self.derivative_weight,
                normal: self.normal_weight,
                tangent: self.tangent_weight,
                range: self.range_weight,
            })
            .with_normalized_tangents(self.normalize_tangent_vectors)
            .with_backend(self.solver)
            .with_solver(SolverConfig {
                max_iterations: self.max_iterations,
                tolerance: self.tolerance,
            });
        config.init_backend = self.init_solver;
        if self.fx.is_some() || self.fy.is_some() {
            let mut intrinsics =
                CameraIntrinsics::new(self.fx.unwrap_or_default(), self.fy.unwrap_or_default());
            intrinsics.cx = self.cx;
            intrinsics.cy = self.cy;
            config = config.with_intrinsics(intrinsics);
        }
        config
    }

    fn depth_scaling(&self) -> PngScaling {
        PngScaling::new(self.png_depth_scale, 0.0)
    }
}

fn main() {
    let cli = Cli::parse();
    init_logger(cli.verbose);
    let run = match main_inner(&cli) {
        Ok(run) => run,
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    };
    let run = match run {
        Ok(run) => run,
        Err(outcome) => {
            print_failure_output(outcome);
            std::process::exit(1);
        }
    };
    if let Err(e) = handle_output(&run, &cli) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_logger(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

/// A successful reconstruction, and what's needed to report on it.
struct Run {
    outcome: SolveOutcome,
    true_depth: Option<Grid>,
    duration: Duration,
}

type RunResult = Result<Run, FailureOutcome>;

fn main_inner(cli: &Cli) -> anyhow::Result<RunResult> {
    let inputs = inputs::read_inputs(cli)?;
    let config = cli.config();

    let now = std::time::Instant::now();
    let outcome = match depthfill::solve(&inputs.observations, &config) {
        Ok(o) => o,
        Err(e) => return Ok(Err(e)),
    };
    Ok(Ok(Run {
        outcome,
        true_depth: inputs.true_depth,
        duration: now.elapsed(),
    }))
}

fn handle_output(run: &Run, cli: &Cli) -> anyhow::Result<()> {
    print_output(run);
    let outcome = &run.outcome;
    outcome
        .depth()
        .write(&cli.output_depth, cli.depth_scaling())
        .with_context(|| format!("writing {}", cli.output_depth.display()))?;
    println!("Depth written to {}", cli.output_depth.display());
    if let Some(path) = &cli.output_initial_guess {
        outcome
            .initial_guess()
            .write(path, cli.depth_scaling())
            .with_context(|| format!("writing {}", path.display()))?;
    }

    let wants_errors = cli.output_error_plot.is_some() || cli.output_error_png.is_some();
    let Some(true_depth) = run.true_depth.as_ref().filter(|_| wants_errors) else {
        if wants_errors {
            eprintln!("No true depth was given, so there is no error plot");
        }
        return Ok(());
    };
    let Some(histogram) =
        ErrorHistogram::compute(outcome.depth(), true_depth, cli.plot_max_value, DEFAULT_BINS)?
    else {
        eprintln!("True depth and output share no known pixels, so there is no error plot");
        return Ok(());
    };
    print_error_stats(&histogram);
    if let Some(path) = &cli.output_error_plot {
        histogram
            .write(path)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("Error plot written to {}", path.display());
    }
    if let Some(path) = &cli.output_error_png {
        let name = cli.output_depth.display().to_string();
        visualize::save_png(&histogram, &name, path)?;
    }
    Ok(())
}

/// Prints the output nicely to stdout.
fn print_output(run: &Run) {
    let outcome = &run.outcome;
    print_warnings(outcome.warnings());
    let (width, height) = outcome.depth().resolution();
    print_problem_size(width * height, outcome.counts().total());
    print_counts(outcome.counts());
    let iterations = outcome.iterations();
    println!(
        "Iterations needed: {} initial, {} refinement",
        iterations.init, iterations.refine
    );
    println!(
        "Sum of squared residuals: {:.6e} -> {:.6e}",
        outcome.initial_ssd(),
        outcome.final_ssd()
    );
    print_performance(run.duration);
}

fn print_counts(counts: &EquationCounts) {
    println!("Equations:");
    for family in Family::ALL {
        let n = counts.get(family);
        if n > 0 {
            println!("\t{family}: {n}");
        }
    }
}

fn print_performance(duration: Duration) {
    use colored::Colorize;
    let time = format!("{:.3}s", duration.as_secs_f64());
    if duration > Duration::from_secs(60) {
        println!("Solved in {}", time.red());
    } else {
        println!("Solved in {time}");
    }
}

fn print_error_stats(histogram: &ErrorHistogram) {
    let stats = histogram.stats();
    let (output_median, true_median) = histogram.medians();
    println!("Errors over {} pixels:", stats.count);
    println!(
        "\tMedian depths = {true_median} {output_median} ({})",
        (true_median - output_median).abs()
    );
    println!("\tMin error = {}", stats.min);
    println!("\tMax error = {}", stats.max);
    println!("\tMean error = {}", stats.mean);
    println!("\tMedian error = {}", stats.median);
}

fn print_warnings(warnings: &[Warning]) {
    use colored::Colorize;
    if !warnings.is_empty() {
        println!("Warnings:");
        for warning in warnings {
            println!("\t{}", warning.to_string().yellow());
        }
    }
}

fn print_problem_size(num_vars: usize, num_eqs: usize) {
    use colored::Colorize;
    print!("Problem size: ");
    if num_eqs < num_vars {
        let l = format!("{num_eqs} rows, {num_vars} vars");
        println!("{}", l.yellow());
    } else {
        println!("{num_eqs} rows, {num_vars} vars");
    }
}

fn print_failure_output(outcome: FailureOutcome) {
    use colored::Colorize;
    print_warnings(outcome.warnings());
    print_problem_size(outcome.num_vars(), outcome.num_eqs());
    eprintln!("{}: {}", "Could not reconstruct depth".red(), outcome.error());
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use clap::Parser;
    use depthfill::grid::PngScaling;

    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("depthfill-cli-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn path_str(path: &Path) -> &str {
        path.to_str().unwrap()
    }

    fn write_depth(path: &Path, grid: &Grid) {
        grid.write(path, PngScaling::new(4000.0, 0.0)).unwrap();
    }

    #[test]
    fn defaults_match_the_library() {
        let cli = Cli::try_parse_from(["depthfill", "in.png", "out.png"]).unwrap();
        assert_eq!(cli.config(), Config::default());
    }

    #[test]
    fn parses_flags() {
        let cli = Cli::try_parse_from([
            "depthfill",
            "in.png",
            "out.pfm",
            "--fx",
            "500",
            "--fy",
            "400",
            "--solver",
            "trust-region",
            "--duv-weight",
            "2",
            "--normalize-tangent-vectors",
            "--input-duv",
            "0.pfm",
            "1.pfm",
            "2.pfm",
            "3.pfm",
            "4.pfm",
            "5.pfm",
            "6.pfm",
            "7.pfm",
            "-vv",
        ])
        .unwrap();
        let config = cli.config();
        assert_eq!(config.backend, Backend::TrustRegion);
        assert_eq!(config.weights.derivative, 2.0);
        assert!(config.normalize_tangent_vectors);
        assert_eq!(config.intrinsics, Some(CameraIntrinsics::new(500.0, 400.0)));
        assert_eq!(cli.input_duv.map(|v| v.len()), Some(8));
        assert_eq!(cli.verbose, 2);

        assert!(Cli::try_parse_from(["depthfill", "in.png", "out.png", "--solver", "csparse"]).is_err());
    }

    #[test]
    fn fills_a_hole() {
        let dir = scratch_dir("hole");
        let input = dir.join("in.pfm");
        let truth = dir.join("truth.pfm");
        let output = dir.join("out.pfm");
        let plot = dir.join("plot.txt");
        let mut depth = Grid::filled(8, 6, 2.0);
        write_depth(&truth, &depth);
        depth.set(3, 3, None);
        depth.set(4, 3, Some(0.0));
        write_depth(&input, &depth);

        let cli = Cli::try_parse_from([
            "depthfill",
            path_str(&input),
            path_str(&output),
            "--inertia-weight",
            "1",
            "--input-true-depth",
            path_str(&truth),
            "--output-error-plot",
            path_str(&plot),
        ])
        .unwrap();
        let run = main_inner(&cli).unwrap().unwrap();
        handle_output(&run, &cli).unwrap();

        let result = Grid::read(&output, PngScaling::IDENTITY).unwrap();
        assert_eq!(result.resolution(), (8, 6));
        for d in result.known_values() {
            assert!((d - 2.0).abs() < 1e-6, "{d}");
        }
        let text = std::fs::read_to_string(&plot).unwrap();
        assert!(text.starts_with("0 0\n"));
        assert_eq!(text.lines().count(), DEFAULT_BINS + 1);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_intrinsics_is_a_failure() {
        let dir = scratch_dir("intrinsics");
        let input = dir.join("in.pfm");
        let nz = dir.join("nz.pfm");
        let zero = dir.join("zero.pfm");
        write_depth(&input, &Grid::filled(4, 4, 1.0));
        Grid::filled(4, 4, 1.0).write(&nz, PngScaling::IDENTITY).unwrap();
        Grid::filled(4, 4, 0.0).write(&zero, PngScaling::IDENTITY).unwrap();
        let output = dir.join("out.pfm");
        let cli = Cli::try_parse_from([
            "depthfill",
            path_str(&input),
            path_str(&output),
            "--input-nx",
            path_str(&zero),
            "--input-ny",
            path_str(&zero),
            "--input-nz",
            path_str(&nz),
        ])
        .unwrap();
        let failure = match main_inner(&cli).unwrap() {
            Ok(_) => panic!("expected the solve to fail without intrinsics"),
            Err(failure) => failure,
        };
        assert!(failure.error().to_string().contains("Tangent"));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
