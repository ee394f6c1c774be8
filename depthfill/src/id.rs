/// The ID of a depth unknown, i.e. the row-major index of its pixel.
pub type Id = u32;

/// Row-major ID of the unknown at pixel `(ix, iy)` in a grid `width` pixels wide.
#[inline(always)]
pub fn pixel_id(ix: usize, iy: usize, width: usize) -> Id {
    (iy * width + ix) as Id
}
