use std::ops::{Add, Mul, Sub};

/// A 3D vector in camera space.
/// Generic so the same algebra works on plain numbers and on symbolic depth expressions.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct V3<T> {
    /// Right.
    pub x: T,
    /// Down.
    pub y: T,
    /// Along the optical axis.
    pub z: T,
}

impl<T> V3<T> {
    /// Build from components.
    #[inline(always)]
    pub fn new(x: T, y: T, z: T) -> Self {
        Self { x, y, z }
    }

    /// Apply `f` to each component.
    #[inline(always)]
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> V3<U> {
        V3 {
            x: f(self.x),
            y: f(self.y),
            z: f(self.z),
        }
    }
}

impl<T> V3<T>
where
    T: Clone + Add<Output = T> + Sub<Output = T> + Mul<Output = T>,
{
    /// Scalar product.
    #[inline(always)]
    pub fn dot(&self, rhs: &Self) -> T {
        self.x.clone() * rhs.x.clone()
            + self.y.clone() * rhs.y.clone()
            + self.z.clone() * rhs.z.clone()
    }

    /// Right-handed cross product.
    #[inline(always)]
    pub fn cross(&self, rhs: &Self) -> Self {
        Self {
            x: self.y.clone() * rhs.z.clone() - self.z.clone() * rhs.y.clone(),
            y: self.z.clone() * rhs.x.clone() - self.x.clone() * rhs.z.clone(),
            z: self.x.clone() * rhs.y.clone() - self.y.clone() * rhs.x.clone(),
        }
    }

    /// `self · self`. Stays symbolic, so callers take the root themselves.
    #[inline(always)]
    pub fn magnitude_squared(&self) -> T {
        self.dot(self)
    }
}

impl<T: Sub<Output = T>> Sub<Self> for V3<T> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
            z: self.z - rhs.z,
        }
    }
}
