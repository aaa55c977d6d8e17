//! In-memory representation of a fully connected model.
//!
//! A [`Model`] is a chain of dense [`Layer`]s, `y = act(W x + b)`, plus a
//! [`ModelDescription`] carrying the feature shapes, optional class labels and
//! the free-form short description that each sweep variant rewrites.

use std::collections::BTreeMap;

use half::f16;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::matrices::Matrix;
use crate::quantization::{packed_len, unpack_bits, AffineQuantizer, Quantizer};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDescription {
    pub name: String,
    pub shape: Vec<usize>,
}

impl FeatureDescription {
    pub fn new(name: impl Into<String>, shape: Vec<usize>) -> Self {
        FeatureDescription {
            name: name.into(),
            shape,
        }
    }

    /// Number of scalar values in one sample, saturating on overflow.
    pub fn size(&self) -> usize {
        self.checked_size().unwrap_or(usize::MAX)
    }

    pub fn checked_size(&self) -> Option<usize> {
        self.shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescription {
    pub short_description: String,
    pub input: FeatureDescription,
    pub output: FeatureDescription,
    /// Present for classifiers, one label per output value.
    #[serde(default)]
    pub class_labels: Option<Vec<String>>,
    #[serde(default)]
    pub user_defined: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Linear,
    Relu,
    Sigmoid,
    Tanh,
    Softmax,
}

impl Activation {
    pub fn apply(&self, values: &mut [f32]) {
        match self {
            Activation::Linear => {}
            Activation::Relu => values.iter_mut().for_each(|v| *v = v.max(0.0)),
            Activation::Sigmoid => values.iter_mut().for_each(|v| *v = 1.0 / (1.0 + (-*v).exp())),
            Activation::Tanh => values.iter_mut().for_each(|v| *v = v.tanh()),
            Activation::Softmax => {
                let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let mut sum = 0.0;
                for v in values.iter_mut() {
                    *v = (*v - max).exp();
                    sum += *v;
                }
                if sum > 0.0 {
                    values.iter_mut().for_each(|v| *v /= sum);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QuantizationParams {
    /// Per row: `w = scale[r] * q + bias[r]`.
    Linear { scale: Vec<f32>, bias: Vec<f32> },
    /// `w = lut[q]`, `2^nbits` entries.
    LookupTable(Vec<f32>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedWeights {
    pub nbits: u8,
    pub params: QuantizationParams,
    /// Codes packed with [`crate::quantization::pack_bits`].
    pub packed: Vec<u8>,
}

impl QuantizedWeights {
    pub fn dequantize(&self, rows: usize, cols: usize) -> Result<Vec<f32>> {
        let count = rows
            .checked_mul(cols)
            .ok_or_else(|| Error::InvalidModel(format!("shape {rows}x{cols} overflows")))?;
        let codes = unpack_bits(&self.packed, self.nbits, count)?;

        match &self.params {
            QuantizationParams::Linear { scale, bias } => {
                if scale.len() != rows || bias.len() != rows {
                    return Err(Error::InvalidModel(format!(
                        "linear quantization has {} scales and {} biases for {rows} rows",
                        scale.len(),
                        bias.len()
                    )));
                }
                let nbits = self.nbits;
                Ok(codes
                    .chunks(cols.max(1))
                    .zip(scale.iter().zip(bias.iter()))
                    .flat_map(|(row, (&s, &b))| {
                        let quantizer = AffineQuantizer::from_params(s, b, nbits);
                        row.iter().map(move |&q| quantizer.dequantize(q))
                    })
                    .collect())
            }
            QuantizationParams::LookupTable(lut) => codes
                .into_iter()
                .map(|q| {
                    lut.get(q as usize).copied().ok_or_else(|| {
                        Error::InvalidModel(format!(
                            "code {q} outside a lookup table of {} entries",
                            lut.len()
                        ))
                    })
                })
                .collect(),
        }
    }

    pub fn storage_bytes(&self) -> usize {
        let params = match &self.params {
            QuantizationParams::Linear { scale, bias } => scale.len() + bias.len(),
            QuantizationParams::LookupTable(lut) => lut.len(),
        };
        self.packed.len() + params * std::mem::size_of::<f32>()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WeightValues {
    Float32(Vec<f32>),
    Float16(Vec<f16>),
    Quantized(QuantizedWeights),
}

/// A `rows x cols` weight tensor in one of the supported encodings.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightParams {
    pub rows: usize,
    pub cols: usize,
    pub values: WeightValues,
}

impl WeightParams {
    pub fn float32(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        let expected = rows
            .checked_mul(cols)
            .ok_or_else(|| Error::InvalidModel(format!("shape {rows}x{cols} overflows")))?;
        if data.len() != expected {
            return Err(Error::DimensionMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(WeightParams {
            rows,
            cols,
            values: WeightValues::Float32(data),
        })
    }

    /// A bias is stored as a `len x 1` column.
    pub fn bias(data: Vec<f32>) -> Self {
        WeightParams {
            rows: data.len(),
            cols: 1,
            values: WeightValues::Float32(data),
        }
    }

    pub fn quantized(rows: usize, cols: usize, weights: QuantizedWeights) -> Self {
        WeightParams {
            rows,
            cols,
            values: WeightValues::Quantized(weights),
        }
    }

    /// Element count, saturating on overflow; [`Model::validate`] rejects
    /// shapes where that happens.
    pub fn len(&self) -> usize {
        self.rows.saturating_mul(self.cols)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_float32(&self) -> bool {
        matches!(self.values, WeightValues::Float32(_))
    }

    pub fn to_f32(&self) -> Result<Vec<f32>> {
        match &self.values {
            WeightValues::Float32(data) => Ok(data.clone()),
            WeightValues::Float16(data) => Ok(data.iter().map(|v| v.to_f32()).collect()),
            WeightValues::Quantized(q) => q.dequantize(self.rows, self.cols),
        }
    }

    pub fn to_matrix(&self) -> Result<Matrix<f32>> {
        Matrix::from_vec(self.to_f32()?, self.rows, self.cols)
    }

    pub fn to_float16(&self) -> Result<Self> {
        Ok(WeightParams {
            rows: self.rows,
            cols: self.cols,
            values: WeightValues::Float16(self.to_f32()?.into_iter().map(f16::from_f32).collect()),
        })
    }

    /// Size of the tensor payload as written to disk.
    pub fn storage_bytes(&self) -> usize {
        match &self.values {
            WeightValues::Float32(data) => data.len() * 4,
            WeightValues::Float16(data) => data.len() * 2,
            WeightValues::Quantized(q) => q.storage_bytes(),
        }
    }

    fn validate(&self, what: &str) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidModel(format!("{what}: {msg}")));
        let Some(count) = self.rows.checked_mul(self.cols) else {
            return invalid(format!("shape {}x{} overflows", self.rows, self.cols));
        };

        match &self.values {
            WeightValues::Float32(data) if data.len() != count => {
                invalid(format!("{} values for shape {}x{}", data.len(), self.rows, self.cols))
            }
            WeightValues::Float16(data) if data.len() != count => {
                invalid(format!("{} values for shape {}x{}", data.len(), self.rows, self.cols))
            }
            WeightValues::Quantized(q) => {
                if !(1..=8).contains(&q.nbits) {
                    return invalid(format!("{} bit codes", q.nbits));
                }
                if q.packed.len() != packed_len(count, q.nbits) {
                    return invalid(format!(
                        "{} packed bytes, expected {}",
                        q.packed.len(),
                        packed_len(count, q.nbits)
                    ));
                }
                match &q.params {
                    QuantizationParams::Linear { scale, bias }
                        if scale.len() != self.rows || bias.len() != self.rows =>
                    {
                        invalid(format!("linear parameters do not match {} rows", self.rows))
                    }
                    QuantizationParams::LookupTable(lut) if lut.len() != 1usize << q.nbits => {
                        invalid(format!("lookup table of {} entries", lut.len()))
                    }
                    _ => Ok(()),
                }
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub name: String,
    /// `[out, in]`
    pub weights: WeightParams,
    pub bias: Option<WeightParams>,
    pub activation: Activation,
}

impl Layer {
    pub fn dense(
        name: impl Into<String>,
        weights: Matrix<f32>,
        bias: Option<Vec<f32>>,
        activation: Activation,
    ) -> Self {
        Layer {
            name: name.into(),
            weights: WeightParams {
                rows: weights.rows,
                cols: weights.cols,
                values: WeightValues::Float32(weights.data),
            },
            bias: bias.map(WeightParams::bias),
            activation,
        }
    }

    pub fn input_size(&self) -> usize {
        self.weights.cols
    }

    pub fn output_size(&self) -> usize {
        self.weights.rows
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub specification_version: u32,
    pub description: ModelDescription,
    pub layers: Vec<Layer>,
}

impl Model {
    pub const SPECIFICATION_VERSION: u32 = 1;

    pub fn new(description: ModelDescription, layers: Vec<Layer>) -> Result<Self> {
        let model = Model {
            specification_version: Self::SPECIFICATION_VERSION,
            description,
            layers,
        };
        model.validate()?;
        Ok(model)
    }

    pub fn is_classifier(&self) -> bool {
        self.description.class_labels.is_some()
    }

    pub fn input_size(&self) -> usize {
        self.description.input.size()
    }

    pub fn output_size(&self) -> usize {
        self.description.output.size()
    }

    /// Total weight and bias payload in bytes.
    pub fn weight_bytes(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.weights.storage_bytes() + l.bias.as_ref().map_or(0, |b| b.storage_bytes()))
            .sum()
    }

    pub fn validate(&self) -> Result<()> {
        if self.layers.is_empty() {
            return Err(Error::InvalidModel("model has no layers".to_string()));
        }

        for feature in [&self.description.input, &self.description.output] {
            if feature.checked_size().is_none() {
                return Err(Error::InvalidModel(format!(
                    "feature `{}` has shape {:?} that overflows",
                    feature.name, feature.shape
                )));
            }
        }

        let mut names = std::collections::HashSet::new();
        let mut width = self.input_size();
        for layer in &self.layers {
            if !names.insert(layer.name.as_str()) {
                return Err(Error::InvalidModel(format!(
                    "duplicate layer name `{}`",
                    layer.name
                )));
            }
            if layer.input_size() != width {
                return Err(Error::InvalidModel(format!(
                    "layer `{}` takes {} inputs but receives {width}",
                    layer.name,
                    layer.input_size()
                )));
            }
            layer.weights.validate(&layer.name)?;
            if let Some(bias) = &layer.bias {
                if bias.len() != layer.output_size() {
                    return Err(Error::InvalidModel(format!(
                        "layer `{}` has {} biases for {} outputs",
                        layer.name,
                        bias.len(),
                        layer.output_size()
                    )));
                }
                bias.validate(&format!("{} bias", layer.name))?;
            }
            width = layer.output_size();
        }

        if width != self.output_size() {
            return Err(Error::InvalidModel(format!(
                "last layer produces {width} values, output `{}` expects {}",
                self.description.output.name,
                self.output_size()
            )));
        }

        if let Some(labels) = &self.description.class_labels {
            if labels.len() != width {
                return Err(Error::InvalidModel(format!(
                    "{} class labels for {width} outputs",
                    labels.len()
                )));
            }
        }

        Ok(())
    }
}
