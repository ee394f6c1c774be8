//! Turning the files named on the command line into [`Observations`].
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use depthfill::{
    Grid, Observations,
    grid::{PngScaling, read_channels},
};
use log::debug;

use crate::Cli;

/// Weight maps store `1000 × weight` in PNGs.
const PNG_WEIGHT_SCALE: f64 = 1000.0;
/// Signed PNG quantities store `raw = value × scale + 32768`.
const PNG_SIGNED_OFFSET: f64 = 32768.0;
/// Normals use the full signed 16-bit range for [-1, 1].
const PNG_NORMAL_SCALE: f64 = 32768.0;
/// Measured depth differences outside `(-LIMIT, LIMIT]` are outliers.
const DUV_LIMIT: f64 = 20.0;

/// Everything read from disk for one run.
pub struct Inputs {
    pub observations: Observations,
    pub true_depth: Option<Grid>,
}

/// How a file's values are mapped into the grid before use.
#[derive(Clone, Copy)]
enum Kind {
    /// Depth, zero means missing.
    Depth,
    /// Per-pixel weight.
    Weight,
    /// A signed depth difference.
    Difference,
    /// One normal component.
    NormalComponent,
}

impl Kind {
    fn png_scaling(self, png_depth_scale: f64) -> PngScaling {
        match self {
            Kind::Depth => PngScaling::new(png_depth_scale, 0.0),
            Kind::Weight => PngScaling::new(PNG_WEIGHT_SCALE, 0.0),
            Kind::Difference => PngScaling::new(png_depth_scale, PNG_SIGNED_OFFSET),
            Kind::NormalComponent => PngScaling::new(PNG_NORMAL_SCALE, PNG_SIGNED_OFFSET),
        }
    }

    fn clean(self, grid: Grid) -> Grid {
        match self {
            Kind::Depth => grid.substitute(0.0, None),
            Kind::Difference => grid.discard_outside(-DUV_LIMIT, DUV_LIMIT),
            Kind::Weight | Kind::NormalComponent => grid,
        }
    }
}

struct Reader {
    png_depth_scale: f64,
    width: usize,
    height: usize,
}

impl Reader {
    fn read_raw(&self, path: &Path, kind: Kind) -> anyhow::Result<Grid> {
        let grid = Grid::read(path, kind.png_scaling(self.png_depth_scale))
            .with_context(|| format!("reading {}", path.display()))?;
        log_grid(path, &grid);
        Ok(kind.clean(grid))
    }

    /// Read and resample to the output resolution.
    fn read(&self, path: &Path, kind: Kind) -> anyhow::Result<Grid> {
        Ok(self.read_raw(path, kind)?.resample(self.width, self.height))
    }

    fn read_optional(&self, path: Option<&PathBuf>, kind: Kind) -> anyhow::Result<Option<Grid>> {
        path.map(|p| self.read(p, kind)).transpose()
    }

    /// Read without resampling. Differences are only meaningful at the
    /// resolution they were measured at.
    fn read_exact(&self, path: &Path, kind: Kind) -> anyhow::Result<Grid> {
        let grid = self.read_raw(path, kind)?;
        if grid.resolution() != (self.width, self.height) {
            bail!(
                "{} is {}x{} but the output resolution is {}x{}",
                path.display(),
                grid.width(),
                grid.height(),
                self.width,
                self.height
            );
        }
        Ok(grid)
    }
}

fn log_grid(path: &Path, grid: &Grid) {
    debug!(
        "Read {}: {}x{}, {} known cells",
        path.display(),
        grid.width(),
        grid.height(),
        grid.cardinality()
    );
    if let (Some((lo, hi)), Some(mean)) = (grid.range(), grid.mean()) {
        debug!("  range [{lo}, {hi}], mean {mean}");
    }
}

/// Read every input named on the command line.
/// The output resolution is `--xres`/`--yres`, or the input depth's resolution.
pub fn read_inputs(cli: &Cli) -> anyhow::Result<Inputs> {
    let depth_scaling = Kind::Depth.png_scaling(cli.png_depth_scale);
    let depth = Kind::Depth.clean(
        Grid::read(&cli.input_depth, depth_scaling)
            .with_context(|| format!("reading {}", cli.input_depth.display()))?,
    );
    log_grid(&cli.input_depth, &depth);
    let width = cli.xres.unwrap_or(depth.width());
    let height = cli.yres.unwrap_or(depth.height());
    let reader = Reader {
        png_depth_scale: cli.png_depth_scale,
        width,
        height,
    };

    let mut observations = Observations::new(width, height).with_depth(depth.resample(width, height));
    let true_depth = reader.read_optional(cli.input_true_depth.as_ref(), Kind::Depth)?;

    if let Some(paths) = &cli.input_duv {
        for (slot, path) in paths.iter().enumerate() {
            observations = observations.with_duv(slot, reader.read_exact(path, Kind::Difference)?);
        }
    } else if cli.input_du.is_some() || cli.input_dv.is_some() {
        let du = cli
            .input_du
            .as_ref()
            .map(|p| reader.read_exact(p, Kind::Difference))
            .transpose()?;
        let dv = cli
            .input_dv
            .as_ref()
            .map(|p| reader.read_exact(p, Kind::Difference))
            .transpose()?;
        observations = observations.with_du_dv(du, dv);
    }

    if let Some(path) = &cli.input_normals {
        let scaling = Kind::NormalComponent.png_scaling(cli.png_depth_scale);
        let channels =
            read_channels(path, scaling).with_context(|| format!("reading {}", path.display()))?;
        let [nx, ny, nz]: [Grid; 3] = channels.try_into().map_err(|channels: Vec<Grid>| {
            anyhow::anyhow!(
                "{} has {} channels but normals need 3",
                path.display(),
                channels.len()
            )
        })?;
        observations = observations.with_normals(
            nx.resample(width, height),
            ny.resample(width, height),
            nz.resample(width, height),
        );
    } else {
        let nx = reader.read_optional(cli.input_nx.as_ref(), Kind::NormalComponent)?;
        let ny = reader.read_optional(cli.input_ny.as_ref(), Kind::NormalComponent)?;
        let nz = reader.read_optional(cli.input_nz.as_ref(), Kind::NormalComponent)?;
        match (nx, ny, nz) {
            (Some(nx), Some(ny), Some(nz)) => observations = observations.with_normals(nx, ny, nz),
            (None, None, None) => {}
            _ => bail!("--input-nx, --input-ny and --input-nz must be given together"),
        }
    }

    if let Some(grid) = reader.read_optional(cli.input_inertia_depth.as_ref(), Kind::Depth)? {
        observations = observations.with_inertia_depth(grid);
    }
    if let Some(grid) = reader.read_optional(cli.input_inertia_weight.as_ref(), Kind::Weight)? {
        observations = observations.with_inertia_weight(grid);
    }
    let xsmoothness = reader.read_optional(cli.input_xsmoothness_weight.as_ref(), Kind::Weight)?;
    let ysmoothness = reader.read_optional(cli.input_ysmoothness_weight.as_ref(), Kind::Weight)?;
    observations = observations.with_smoothness_weights(xsmoothness, ysmoothness);
    if let Some(grid) = reader.read_optional(cli.input_derivative_weight.as_ref(), Kind::Weight)? {
        observations = observations.with_derivative_weight(grid);
    }
    if let Some(grid) = reader.read_optional(cli.input_normal_weight.as_ref(), Kind::Weight)? {
        observations = observations.with_normal_weight(grid);
    }
    if let Some(grid) = reader.read_optional(cli.input_tangent_weight.as_ref(), Kind::Weight)? {
        observations = observations.with_tangent_weight(grid);
    }
    if let Some(grid) = reader.read_optional(cli.input_range_weight.as_ref(), Kind::Weight)? {
        observations = observations.with_range_weight(grid);
    }

    Ok(Inputs {
        observations,
        true_depth,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_conventions() {
        let difference = Kind::Difference.png_scaling(4000.0);
        assert_eq!(difference.decode(32768), 0.0);
        assert_eq!(difference.decode(32768 + 4000), 1.0);
        let normal = Kind::NormalComponent.png_scaling(4000.0);
        assert_eq!(normal.decode(0), -1.0);
        assert_eq!(Kind::Weight.png_scaling(4000.0).decode(500), 0.5);
        assert_eq!(Kind::Depth.png_scaling(4000.0).decode(8000), 2.0);
    }

    #[test]
    fn cleaning() {
        let depth = Grid::from_values(3, 1, vec![0.0, 1.5, 0.0]).unwrap();
        assert_eq!(Kind::Depth.clean(depth).cells(), &[None, Some(1.5), None]);

        let duv = Grid::from_values(4, 1, vec![-20.0, -19.5, 20.0, 20.5]).unwrap();
        assert_eq!(
            Kind::Difference.clean(duv).cells(),
            &[None, Some(-19.5), Some(20.0), None]
        );
    }
}
