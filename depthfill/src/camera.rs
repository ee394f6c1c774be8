use crate::{equations::Polynomial, id::Id, vector::V3};

/// Pinhole intrinsics as the user supplies them.
/// The principal point is optional and defaults to the image centre.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    /// Focal length along x, in pixels.
    pub fx: f64,
    /// Focal length along y, in pixels.
    pub fy: f64,
    /// Principal point x. `None` means `width / 2`.
    pub cx: Option<f64>,
    /// Principal point y. `None` means `height / 2`.
    pub cy: Option<f64>,
}

impl CameraIntrinsics {
    /// Focal lengths only, principal point at the image centre.
    pub fn new(fx: f64, fy: f64) -> Self {
        Self {
            fx,
            fy,
            cx: None,
            cy: None,
        }
    }

    /// Set an explicit principal point.
    pub fn with_principal_point(mut self, cx: f64, cy: f64) -> Self {
        self.cx = Some(cx);
        self.cy = Some(cy);
        self
    }

    /// Fill in the principal point for an image of this resolution.
    pub fn resolve(&self, width: usize, height: usize) -> PinholeCamera {
        PinholeCamera {
            fx: self.fx,
            fy: self.fy,
            cx: self.cx.unwrap_or(0.5 * width as f64),
            cy: self.cy.unwrap_or(0.5 * height as f64),
        }
    }

    /// Both focal lengths are usable as divisors.
    pub fn is_usable(&self) -> bool {
        self.fx.is_normal() && self.fy.is_normal()
    }
}

/// Fully resolved pinhole model, no skew and no distortion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PinholeCamera {
    /// Focal length along x, in pixels.
    pub fx: f64,
    /// Focal length along y, in pixels.
    pub fy: f64,
    /// Principal point x.
    pub cx: f64,
    /// Principal point y.
    pub cy: f64,
}

impl PinholeCamera {
    /// Camera-space point at depth 1 along the ray through pixel `(ix, iy)`.
    #[inline(always)]
    pub fn ray(&self, ix: usize, iy: usize) -> V3<f64> {
        V3::new(
            (ix as f64 - self.cx) / self.fx,
            (iy as f64 - self.cy) / self.fy,
            1.0,
        )
    }

    /// `(X, Y, Z) = (d·(ix − cx)/fx, d·(iy − cy)/fy, d)`.
    pub fn back_project(&self, ix: usize, iy: usize, depth: f64) -> V3<f64> {
        self.ray(ix, iy).map(|c| c * depth)
    }

    /// Same as [`Self::back_project`], but the depth is the unknown `id`.
    /// Each coordinate is linear in that unknown.
    pub fn back_project_unknown(&self, ix: usize, iy: usize, id: Id) -> V3<Polynomial> {
        self.ray(ix, iy).map(|c| Polynomial::term(c, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn principal_point_defaults_to_centre() {
        let camera = CameraIntrinsics::new(500.0, 400.0).resolve(640, 480);
        assert_eq!(
            camera,
            PinholeCamera {
                fx: 500.0,
                fy: 400.0,
                cx: 320.0,
                cy: 240.0
            }
        );
        let explicit = CameraIntrinsics::new(500.0, 400.0)
            .with_principal_point(300.0, 200.0)
            .resolve(640, 480);
        assert_eq!(explicit.cx, 300.0);
        assert_eq!(explicit.cy, 200.0);
    }

    #[test]
    fn back_projection() {
        let camera = CameraIntrinsics::new(2.0, 4.0)
            .with_principal_point(1.0, 1.0)
            .resolve(3, 3);
        let p = camera.back_project(2, 0, 10.0);
        assert_eq!(p, V3::new(5.0, -2.5, 10.0));

        let symbolic = camera.back_project_unknown(2, 0, 7);
        let mut values = vec![0.0; 8];
        values[7] = 10.0;
        assert_eq!(symbolic.map(|c| c.evaluate(&values)), p);
    }

    #[test]
    fn zero_focal_length_is_unusable() {
        assert!(!CameraIntrinsics::new(0.0, 1.0).is_usable());
        assert!(!CameraIntrinsics::new(1.0, 0.0).is_usable());
        assert!(CameraIntrinsics::new(1.0, 1.0).is_usable());
    }
}
