//! Portable Float Map encoding.
//!
//! Header: `Pf` (1 channel) or `PF` (3 channels), width, height, then a scale
//! whose sign gives the byte order (negative = little-endian). The payload is
//! `f32` samples, channels interleaved, rows stored bottom-up.

use winnow::{
    Result as WResult,
    ascii::{dec_uint, float, multispace1},
    combinator::alt,
    prelude::*,
    token::one_of,
};

use super::{Grid, UNKNOWN_SENTINEL};
use crate::error::GridError;

/// Headers longer than this are rejected before parsing.
const MAX_HEADER_LEN: usize = 256;

#[derive(Debug, PartialEq)]
struct Header {
    channels: usize,
    width: usize,
    height: usize,
    little_endian: bool,
}

impl Header {
    fn parse(i: &mut &str) -> WResult<Self> {
        let channels = alt(("PF".value(3usize), "Pf".value(1usize))).parse_next(i)?;
        multispace1.parse_next(i)?;
        let width: u32 = dec_uint.parse_next(i)?;
        multispace1.parse_next(i)?;
        let height: u32 = dec_uint.parse_next(i)?;
        multispace1.parse_next(i)?;
        let scale: f64 = float.parse_next(i)?;
        // Exactly one whitespace byte separates the header from the samples.
        one_of([' ', '\t', '\n', '\r']).parse_next(i)?;
        Ok(Self {
            channels,
            width: width as usize,
            height: height as usize,
            little_endian: scale < 0.0,
        })
    }
}

/// Length of the header including its final whitespace byte: four
/// whitespace-terminated tokens.
fn header_len(bytes: &[u8]) -> Option<usize> {
    let mut tokens = 0;
    let mut in_token = false;
    for (i, b) in bytes.iter().take(MAX_HEADER_LEN).enumerate() {
        if b.is_ascii_whitespace() {
            if in_token {
                tokens += 1;
                in_token = false;
                if tokens == 4 {
                    return Some(i + 1);
                }
            }
        } else {
            in_token = true;
        }
    }
    None
}

/// Decode a PFM file into one grid per channel.
pub fn read_pfm_bytes(bytes: &[u8]) -> Result<Vec<Grid>, GridError> {
    let header_error = |reason: String| GridError::PfmHeader { reason };
    let len = header_len(bytes).ok_or_else(|| header_error("header not terminated".to_owned()))?;
    let text = std::str::from_utf8(&bytes[..len])
        .map_err(|_| header_error("header is not ASCII".to_owned()))?;
    let header = Header::parse
        .parse(text)
        .map_err(|e| header_error(e.to_string()))?;

    let Header {
        channels,
        width,
        height,
        little_endian,
    } = header;
    let samples = width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(channels))
        .ok_or_else(|| header_error(format!("{width}x{height} is too large")))?;
    let payload = &bytes[len..];
    let expected = samples
        .checked_mul(4)
        .ok_or_else(|| header_error(format!("{width}x{height} is too large")))?;
    if payload.len() < expected {
        return Err(GridError::Truncated {
            expected,
            actual: payload.len(),
        });
    }

    let mut planes = vec![Vec::with_capacity(width * height); channels];
    let mut sample = payload.chunks_exact(4).map(|b| {
        let b = [b[0], b[1], b[2], b[3]];
        if little_endian {
            f32::from_le_bytes(b)
        } else {
            f32::from_be_bytes(b)
        }
    });
    // Samples come bottom row first; grids keep the top row first.
    let mut rows: Vec<Vec<f32>> = Vec::with_capacity(height);
    for _ in 0..height {
        rows.push(sample.by_ref().take(width * channels).collect());
    }
    for row in rows.iter().rev() {
        for pixel in row.chunks_exact(channels) {
            for (plane, v) in planes.iter_mut().zip(pixel) {
                plane.push(widen(*v));
            }
        }
    }
    planes
        .into_iter()
        .map(|plane| Grid::from_sentinel_values(width, height, plane))
        .collect()
}

/// The sentinel doesn't survive the round trip through `f32` exactly,
/// so it's recognised at single precision.
#[allow(clippy::float_cmp)]
fn widen(v: f32) -> f64 {
    if v == UNKNOWN_SENTINEL as f32 {
        f64::NAN
    } else {
        f64::from(v)
    }
}

/// Encode one grid (`Pf`) or three grids (`PF`) of equal resolution.
/// Unknown cells are written as the sentinel value.
pub fn write_pfm_bytes(channels: &[&Grid]) -> Result<Vec<u8>, GridError> {
    let Some(first) = channels.first() else {
        return Err(header_error_for_channels(0));
    };
    let magic = match channels.len() {
        1 => "Pf",
        3 => "PF",
        n => return Err(header_error_for_channels(n)),
    };
    let (width, height) = first.resolution();
    if let Some(other) = channels.iter().find(|g| g.resolution() != (width, height)) {
        return Err(GridError::WrongLength {
            width,
            height,
            actual: other.len(),
        });
    }

    let header = format!("{magic}\n{width} {height}\n-1\n");
    let mut out = Vec::with_capacity(header.len() + 4 * width * height * channels.len());
    out.extend_from_slice(header.as_bytes());
    let values: Vec<Vec<f64>> = channels.iter().map(|g| g.to_sentinel_values()).collect();
    for iy in (0..height).rev() {
        for ix in 0..width {
            let i = iy * width + ix;
            for plane in &values {
                out.extend_from_slice(&(plane[i] as f32).to_le_bytes());
            }
        }
    }
    Ok(out)
}

fn header_error_for_channels(n: usize) -> GridError {
    GridError::PfmHeader {
        reason: format!("PFM files hold 1 or 3 channels, not {n}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_header() {
        let mut input = "PF\n640 480\n-1.000000\n";
        let header = Header::parse(&mut input).unwrap();
        assert_eq!(
            header,
            Header {
                channels: 3,
                width: 640,
                height: 480,
                little_endian: true,
            }
        );
        assert!(input.is_empty());
    }

    #[test]
    fn rejects_bad_magic() {
        let err = read_pfm_bytes(b"P6\n1 1\n-1\n\0\0\0\0").unwrap_err();
        assert!(matches!(err, GridError::PfmHeader { .. }));
    }

    #[test]
    fn rejects_truncated_payload() {
        let err = read_pfm_bytes(b"Pf\n2 2\n-1\n\0\0\0\0").unwrap_err();
        assert!(matches!(
            err,
            GridError::Truncated {
                expected: 16,
                actual: 4
            }
        ));
    }

    #[test]
    fn reads_big_endian_bottom_up() {
        let mut bytes = b"Pf\n1 2\n1.0\n".to_vec();
        // Bottom row first.
        bytes.extend_from_slice(&2.0f32.to_be_bytes());
        bytes.extend_from_slice(&1.0f32.to_be_bytes());
        let grids = read_pfm_bytes(&bytes).unwrap();
        assert_eq!(grids.len(), 1);
        assert_eq!(grids[0].cells(), &[Some(1.0), Some(2.0)]);
    }

    #[test]
    fn writes_readable_color_file() {
        let nx = Grid::from_cells(2, 1, vec![Some(0.5), None]).unwrap();
        let ny = Grid::from_values(2, 1, vec![0.25, -0.5]).unwrap();
        let nz = Grid::from_values(2, 1, vec![0.75, 1.0]).unwrap();
        let bytes = write_pfm_bytes(&[&nx, &ny, &nz]).unwrap();
        assert!(bytes.starts_with(b"PF\n2 1\n-1\n"));
        let back = read_pfm_bytes(&bytes).unwrap();
        assert_eq!(back, vec![nx, ny, nz]);
    }

    #[test]
    fn refuses_two_channels() {
        let g = Grid::filled(1, 1, 0.0);
        assert!(matches!(
            write_pfm_bytes(&[&g, &g]),
            Err(GridError::PfmHeader { .. })
        ));
    }
}
