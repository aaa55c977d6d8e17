use super::AffineQuantizer;

/// Affine scheme over a range centered on zero, `[-max|w|, max|w|]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineSymmetric {
    nbits: u8,
    max_abs: f32,
}

impl AffineSymmetric {
    pub fn new(min_val: f32, max_val: f32, nbits: u8) -> Self {
        AffineSymmetric {
            nbits,
            max_abs: min_val.abs().max(max_val.abs()),
        }
    }

    /// The equivalent unsigned affine parameters, as stored on disk.
    pub fn into_affine(self) -> AffineQuantizer {
        AffineQuantizer::new(-self.max_abs, self.max_abs, self.nbits)
    }
}
