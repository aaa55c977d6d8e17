pub mod affine_quantizer;
pub mod affine_symmetric;
pub mod kmeans;
pub mod lookup_table;
pub mod packing;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use affine_quantizer::AffineQuantizer;
pub use affine_symmetric::AffineSymmetric;
pub use kmeans::KMeans;
pub use lookup_table::LookupTable;
pub use packing::{pack_bits, packed_len, unpack_bits};

use crate::error::{Error, Result};
use crate::matrices::Matrix;
use crate::model::{Model, QuantizationParams, QuantizedWeights, WeightParams};

/// Bit-widths accepted by [`quantize_weights`]. 16 means IEEE half precision.
pub const SUPPORTED_BIT_WIDTHS: [u8; 9] = [16, 8, 7, 6, 5, 4, 3, 2, 1];

/// Seed for k-means++ so repeated sweeps produce identical files.
pub const KMEANS_SEED: u64 = 0;

/// Maps real values onto `nbits`-wide integer codes and back.
pub trait Quantizer {
    fn nbits(&self) -> u8;
    fn quantize(&self, real_val: f32) -> u32;
    fn dequantize(&self, q_val: u32) -> f32;
}

/// Largest code representable in `nbits`.
pub fn max_level(nbits: u8) -> u32 {
    ((1u64 << nbits) - 1) as u32
}

pub fn validate_bit_width(nbits: u8) -> Result<()> {
    if (1..=8).contains(&nbits) || nbits == 16 {
        Ok(())
    } else {
        Err(Error::UnsupportedBitWidth(nbits))
    }
}

pub fn quantize_and_pack(quantizer: &impl Quantizer, values: &[f32]) -> Vec<u8> {
    let codes: Vec<u32> = values.iter().map(|&v| quantizer.quantize(v)).collect();
    pack_bits(&codes, quantizer.nbits())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantizationMode {
    /// Per output channel affine quantization over `[min, max]`.
    Linear,
    /// Uniformly spaced lookup table over the whole tensor.
    LinearLut,
    /// Lookup table of 1-D k-means centroids over the whole tensor.
    Kmeans,
    /// Per output channel affine quantization over `[-max|w|, max|w|]`.
    LinearSymmetric,
}

impl QuantizationMode {
    pub const ALL: [QuantizationMode; 4] = [
        QuantizationMode::Linear,
        QuantizationMode::LinearLut,
        QuantizationMode::Kmeans,
        QuantizationMode::LinearSymmetric,
    ];

    /// Modes swept when none are configured.
    pub const DEFAULT_SWEEP: [QuantizationMode; 3] = [
        QuantizationMode::Linear,
        QuantizationMode::LinearLut,
        QuantizationMode::Kmeans,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            QuantizationMode::Linear => "linear",
            QuantizationMode::LinearLut => "linear_lut",
            QuantizationMode::Kmeans => "kmeans",
            QuantizationMode::LinearSymmetric => "linear_symmetric",
        }
    }
}

impl fmt::Display for QuantizationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for QuantizationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        QuantizationMode::ALL
            .into_iter()
            .find(|mode| mode.name() == s.trim())
            .ok_or_else(|| Error::UnknownMode(s.to_string()))
    }
}

/// Quantize a `[out, in]` weight matrix with `nbits` per weight.
pub fn quantize_matrix(
    weights: &Matrix<f32>,
    nbits: u8,
    mode: QuantizationMode,
) -> Result<QuantizedWeights> {
    if !(1..=8).contains(&nbits) {
        return Err(Error::UnsupportedBitWidth(nbits));
    }

    let (params, packed) = match mode {
        QuantizationMode::Linear | QuantizationMode::LinearSymmetric => {
            let mut scale = Vec::with_capacity(weights.rows);
            let mut bias = Vec::with_capacity(weights.rows);
            let mut codes = Vec::with_capacity(weights.len());

            for r in 0..weights.rows {
                let (min_val, max_val) = weights.row_min_and_max(r);
                let quantizer = if mode == QuantizationMode::Linear {
                    AffineQuantizer::new(min_val, max_val, nbits)
                } else {
                    AffineSymmetric::new(min_val, max_val, nbits).into_affine()
                };
                codes.extend(weights.row(r).iter().map(|&v| quantizer.quantize(v)));
                scale.push(quantizer.scale);
                bias.push(quantizer.bias);
            }

            (QuantizationParams::Linear { scale, bias }, pack_bits(&codes, nbits))
        }
        QuantizationMode::LinearLut | QuantizationMode::Kmeans => {
            let table = if mode == QuantizationMode::LinearLut {
                let (min_val, max_val) = weights.min_and_max();
                LookupTable::linear(min_val, max_val, nbits)
            } else {
                LookupTable::kmeans(&weights.data, nbits, KMEANS_SEED)
            };
            let packed = quantize_and_pack(&table, &weights.data);

            (QuantizationParams::LookupTable(table.into_values()), packed)
        }
    };

    Ok(QuantizedWeights {
        nbits,
        params,
        packed,
    })
}

/// Returns a copy of `model` with every layer's weights stored in `nbits`.
///
/// At 16 bits weights and biases are converted to half precision whatever the
/// mode. Below that only weight matrices are quantized; biases stay f32.
pub fn quantize_weights(model: &Model, nbits: u8, mode: QuantizationMode) -> Result<Model> {
    validate_bit_width(nbits)?;

    let mut quantized = model.clone();
    for layer in &mut quantized.layers {
        if !layer.weights.is_float32() {
            return Err(Error::AlreadyQuantized(layer.name.clone()));
        }

        let before = layer.weights.storage_bytes();
        if nbits == 16 {
            layer.weights = layer.weights.to_float16()?;
            if let Some(bias) = layer.bias.as_mut() {
                *bias = bias.to_float16()?;
            }
        } else {
            let matrix = layer.weights.to_matrix()?;
            let rows = matrix.rows;
            let cols = matrix.cols;
            layer.weights = WeightParams::quantized(rows, cols, quantize_matrix(&matrix, nbits, mode)?);
        }

        debug!(
            layer = %layer.name,
            %mode,
            nbits,
            before,
            after = layer.weights.storage_bytes(),
            "quantized layer"
        );
    }

    Ok(quantized)
}
