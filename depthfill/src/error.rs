use std::path::PathBuf;

use faer::sparse::{CreationError, FaerError, linalg::LuError};

use crate::{constraints::Family, solve_outcome::Phase};

/// Errors that could occur when minimizing an equation system.
#[derive(thiserror::Error, Debug)]
#[cfg_attr(not(feature = "unstable-exhaustive"), non_exhaustive)]
pub enum NonLinearSystemError {
    /// There should be exactly 1 starting value per unknown, but you supplied the wrong number.
    #[error(
        "There should be exactly 1 starting value per unknown, but the system has {variables} unknowns and you supplied {guesses} values"
    )]
    WrongNumberGuesses {
        /// How many unknowns the system has.
        variables: usize,
        /// How many values were given.
        guesses: usize,
    },
    /// Faer: could not create a matrix.
    #[error("Could not create matrix: {error}")]
    FaerMatrix {
        /// Underlying error.
        #[from]
        error: CreationError,
    },
    /// Faer: general error.
    #[error("Something went wrong in faer: {error}")]
    Faer {
        /// Underlying error.
        #[from]
        error: FaerError,
    },
    /// Faer: could not factor the normal equations.
    #[error("Something went wrong doing matrix solves in faer: {error}")]
    FaerSolve {
        /// Underlying error.
        #[from]
        error: LuError,
    },
    /// Solver did not find a solution within the allowed number of iterations.
    #[error("Could not find a solution in the allowed number of iterations")]
    DidNotConverge,
    /// You provided a system without any unknowns or equations.
    #[error("Cannot solve an empty system")]
    EmptySystemNotAllowed,
    /// Some residual is NaN or infinite at the starting point.
    #[error("Residual {row} is not finite at the starting point")]
    NonFiniteResidual {
        /// Which equation.
        row: usize,
    },
}

/// Errors reading or writing grids.
#[derive(thiserror::Error, Debug)]
#[cfg_attr(not(feature = "unstable-exhaustive"), non_exhaustive)]
pub enum GridError {
    /// Filesystem error.
    #[error("Could not access {}: {source}", path.display())]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// PNG decoding or encoding failed.
    #[error("Could not process image {}: {source}", path.display())]
    Image {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        source: image::ImageError,
    },
    /// Malformed PFM header.
    #[error("Invalid PFM header: {reason}")]
    PfmHeader {
        /// What was wrong.
        reason: String,
    },
    /// PFM payload shorter than its header promised.
    #[error("PFM data is truncated: expected {expected} bytes but found {actual}")]
    Truncated {
        /// Bytes the header implies.
        expected: usize,
        /// Bytes actually present.
        actual: usize,
    },
    /// Neither `.png` nor `.pfm`.
    #[error("Unsupported grid file extension for {}", path.display())]
    UnsupportedExtension {
        /// File involved.
        path: PathBuf,
    },
    /// File had the wrong number of channels for this use.
    #[error("{} has {actual} channels but {expected} were expected", path.display())]
    ChannelCount {
        /// File involved.
        path: PathBuf,
        /// Channels needed.
        expected: usize,
        /// Channels found.
        actual: usize,
    },
    /// Cell count doesn't match `width * height`.
    #[error("A {width}x{height} grid needs {} cells but {actual} were given", width * height)]
    WrongLength {
        /// Grid width.
        width: usize,
        /// Grid height.
        height: usize,
        /// Cells given.
        actual: usize,
    },
    /// The grid is too big to encode.
    #[error("A {width}x{height} grid is too large to write as an image")]
    TooLarge {
        /// Grid width.
        width: usize,
        /// Grid height.
        height: usize,
    },
}

/// Everything that can stop a depth reconstruction.
#[derive(thiserror::Error, Debug)]
#[cfg_attr(not(feature = "unstable-exhaustive"), non_exhaustive)]
pub enum DepthError {
    /// Reading or writing a grid failed.
    #[error(transparent)]
    Grid(#[from] GridError),
    /// An input grid doesn't have the output resolution.
    #[error(
        "{name} is {}x{} but the output resolution is {}x{}",
        actual.0, actual.1, expected.0, expected.1
    )]
    ResolutionMismatch {
        /// Which input.
        name: &'static str,
        /// Output resolution.
        expected: (usize, usize),
        /// Input resolution.
        actual: (usize, usize),
    },
    /// Width or height is zero.
    #[error("Cannot reconstruct an image with no pixels")]
    EmptyResolution,
    /// Normal or tangent equations need focal lengths.
    #[error("{family} constraints need nonzero camera intrinsics fx and fy")]
    MissingIntrinsics {
        /// Which constraint family asked.
        family: Family,
    },
    /// Depth bounds are not a usable interval.
    #[error("Invalid depth bounds [{minimum}, {maximum}]")]
    InvalidBounds {
        /// Lower bound.
        minimum: f64,
        /// Upper bound.
        maximum: f64,
    },
    /// The solver failed in one of the phases.
    #[error("{phase} solve failed: {source}")]
    Solve {
        /// Which phase.
        phase: Phase,
        /// Why.
        source: NonLinearSystemError,
    },
}
