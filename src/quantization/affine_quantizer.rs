use super::{max_level, Quantizer};

/// Affine scheme `w = scale * q + bias` with codes in `0..=2^nbits - 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineQuantizer {
    pub nbits: u8,
    pub scale: f32,
    pub bias: f32,
}

impl AffineQuantizer {
    pub fn new(min_val: f32, max_val: f32, nbits: u8) -> Self {
        let range = max_val - min_val;
        // a constant channel quantizes to code 0 and reconstructs exactly
        let scale = if range > 0.0 {
            range / max_level(nbits) as f32
        } else {
            1.0
        };
        AffineQuantizer {
            nbits,
            scale,
            bias: min_val,
        }
    }

    pub fn from_params(scale: f32, bias: f32, nbits: u8) -> Self {
        AffineQuantizer { nbits, scale, bias }
    }
}

impl Quantizer for AffineQuantizer {
    fn nbits(&self) -> u8 {
        self.nbits
    }

    fn quantize(&self, real_val: f32) -> u32 {
        ((real_val - self.bias) / self.scale)
            .round()
            .clamp(0., max_level(self.nbits) as f32) as u32
    }

    fn dequantize(&self, q_val: u32) -> f32 {
        self.scale * q_val as f32 + self.bias
    }
}
