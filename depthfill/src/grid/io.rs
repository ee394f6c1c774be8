//! Reading and writing grids, chosen by file extension.
//!
//! - `.pfm`: floats as stored, unknown cells use the sentinel.
//! - `.png`: 16-bit samples mapped through a [`PngScaling`].
use std::{fs, path::Path};

use image::{DynamicImage, ImageBuffer, Luma};

use super::{Grid, pfm};
use crate::error::GridError;

/// Maps 16-bit PNG samples to grid values: `value = (raw − offset) / scale`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PngScaling {
    /// Raw units per grid unit.
    pub scale: f64,
    /// Raw value that represents zero.
    pub offset: f64,
}

impl Default for PngScaling {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl PngScaling {
    /// Raw samples are the values.
    pub const IDENTITY: Self = Self {
        scale: 1.0,
        offset: 0.0,
    };

    /// Custom scale and offset.
    pub fn new(scale: f64, offset: f64) -> Self {
        Self { scale, offset }
    }

    /// Raw sample to grid value.
    pub fn decode(&self, raw: u16) -> f64 {
        (f64::from(raw) - self.offset) / self.scale
    }

    /// Grid value to raw sample, saturating at the 16-bit range.
    pub fn encode(&self, value: f64) -> u16 {
        (value * self.scale + self.offset).clamp(0.0, f64::from(u16::MAX)) as u16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Png,
    Pfm,
}

fn format_of(path: &Path) -> Result<Format, GridError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("png") => Ok(Format::Png),
        Some("pfm") => Ok(Format::Pfm),
        _ => Err(GridError::UnsupportedExtension {
            path: path.to_owned(),
        }),
    }
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, GridError> {
    fs::read(path).map_err(|source| GridError::Io {
        path: path.to_owned(),
        source,
    })
}

fn open_png(path: &Path) -> Result<DynamicImage, GridError> {
    image::open(path).map_err(|source| GridError::Image {
        path: path.to_owned(),
        source,
    })
}

fn png_plane(
    width: usize,
    height: usize,
    raw: impl Iterator<Item = u16>,
    scaling: PngScaling,
) -> Result<Grid, GridError> {
    Grid::from_values(width, height, raw.map(|r| scaling.decode(r)).collect())
}

impl Grid {
    /// Read a single-channel grid.
    /// PNG samples go through `scaling`; it is ignored for PFM.
    pub fn read(path: &Path, scaling: PngScaling) -> Result<Self, GridError> {
        match format_of(path)? {
            Format::Pfm => {
                let mut channels = pfm::read_pfm_bytes(&read_bytes(path)?)?;
                if channels.len() != 1 {
                    return Err(GridError::ChannelCount {
                        path: path.to_owned(),
                        expected: 1,
                        actual: channels.len(),
                    });
                }
                Ok(channels.remove(0))
            }
            Format::Png => {
                let img = open_png(path)?.into_luma16();
                let (width, height) = (img.width() as usize, img.height() as usize);
                png_plane(width, height, img.into_raw().into_iter(), scaling)
            }
        }
    }

    /// Write this grid. Unknown cells become the sentinel (PFM) or raw 0 (PNG).
    pub fn write(&self, path: &Path, scaling: PngScaling) -> Result<(), GridError> {
        ensure_parent_dir(path)?;
        match format_of(path)? {
            Format::Pfm => {
                let bytes = pfm::write_pfm_bytes(&[self])?;
                fs::write(path, bytes).map_err(|source| GridError::Io {
                    path: path.to_owned(),
                    source,
                })
            }
            Format::Png => {
                let too_large = || GridError::TooLarge {
                    width: self.width,
                    height: self.height,
                };
                let width = u32::try_from(self.width).map_err(|_| too_large())?;
                let height = u32::try_from(self.height).map_err(|_| too_large())?;
                let raw: Vec<u16> = self
                    .cells
                    .iter()
                    .map(|c| c.map_or(0, |v| scaling.encode(v)))
                    .collect();
                let buffer: ImageBuffer<Luma<u16>, Vec<u16>> =
                    ImageBuffer::from_raw(width, height, raw).ok_or_else(too_large)?;
                DynamicImage::ImageLuma16(buffer)
                    .save(path)
                    .map_err(|source| GridError::Image {
                        path: path.to_owned(),
                        source,
                    })
            }
        }
    }
}

/// Read every channel of a file: 1 or 3 for PFM, 3 for PNG (as 16-bit RGB).
pub fn read_channels(path: &Path, scaling: PngScaling) -> Result<Vec<Grid>, GridError> {
    match format_of(path)? {
        Format::Pfm => pfm::read_pfm_bytes(&read_bytes(path)?),
        Format::Png => {
            let img = open_png(path)?.into_rgb16();
            let (width, height) = (img.width() as usize, img.height() as usize);
            let raw = img.into_raw();
            (0..3)
                .map(|c| png_plane(width, height, raw.iter().skip(c).step_by(3).copied(), scaling))
                .collect()
        }
    }
}

fn ensure_parent_dir(path: &Path) -> Result<(), GridError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|source| GridError::Io {
            path: parent.to_owned(),
            source,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("depthfill-io-{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn png_scaling_matches_depth_convention() {
        let depth = PngScaling::new(4000.0, 0.0);
        assert_eq!(depth.encode(1.5), 6000);
        assert_eq!(depth.decode(6000), 1.5);
        let signed = PngScaling::new(32768.0, 32768.0);
        assert_eq!(signed.decode(16384), -0.5);
        // Saturates instead of wrapping.
        assert_eq!(depth.encode(100.0), u16::MAX);
        assert_eq!(depth.encode(-1.0), 0);
    }

    #[test]
    fn png_write_then_read() {
        let path = scratch_path("depth.png");
        let grid = Grid::from_cells(3, 2, vec![Some(0.5), Some(1.0), None, Some(2.0), Some(3.5), Some(4.0)])
            .unwrap();
        let scaling = PngScaling::new(1000.0, 0.0);
        grid.write(&path, scaling).unwrap();
        let back = Grid::read(&path, scaling).unwrap();
        // PNG has no unknown marker, so the hole comes back as 0.
        assert_eq!(
            back.cells(),
            &[Some(0.5), Some(1.0), Some(0.0), Some(2.0), Some(3.5), Some(4.0)]
        );
    }

    #[test]
    fn pfm_write_then_read() {
        let path = scratch_path("depth.pfm");
        let grid = Grid::from_cells(2, 2, vec![Some(0.5), None, Some(2.0), Some(3.5)]).unwrap();
        grid.write(&path, PngScaling::IDENTITY).unwrap();
        assert_eq!(Grid::read(&path, PngScaling::IDENTITY).unwrap(), grid);
        assert_eq!(read_channels(&path, PngScaling::IDENTITY).unwrap(), vec![grid]);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = Grid::read(Path::new("depth.exr"), PngScaling::IDENTITY).unwrap_err();
        assert!(matches!(err, GridError::UnsupportedExtension { .. }));
    }

    #[test]
    fn missing_file_names_the_path() {
        let path = scratch_path("does-not-exist.pfm");
        let err = Grid::read(&path, PngScaling::IDENTITY).unwrap_err();
        assert!(err.to_string().contains("does-not-exist.pfm"));
    }
}
