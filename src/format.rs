//! On-disk model container.
//!
//! A model file is a safetensors archive. The `__metadata__` map holds a
//! format tag and a JSON header describing the description and every layer;
//! the tensor payloads are stored under `<layer>.weight`, `<layer>.bias` and,
//! for quantized weights, `<layer>.weight.scale`, `<layer>.weight.quant_bias`
//! or `<layer>.weight.lut`.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use half::f16;
use safetensors::{Dtype, SafeTensors, View};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{
    Activation, Layer, Model, ModelDescription, QuantizationParams, QuantizedWeights,
    WeightParams, WeightValues,
};
use crate::quantization::packed_len;

pub const FORMAT_TAG: &str = "quantized_model_sweep";
pub const FORMAT_VERSION: &str = "1";

const META_FORMAT: &str = "format";
const META_VERSION: &str = "format_version";
const META_MODEL: &str = "model";

#[derive(Debug, Serialize, Deserialize)]
struct ModelHeader {
    specification_version: u32,
    description: ModelDescription,
    layers: Vec<LayerHeader>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LayerHeader {
    name: String,
    activation: Activation,
    weights: TensorHeader,
    bias: Option<TensorHeader>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TensorHeader {
    rows: usize,
    cols: usize,
    encoding: Encoding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Encoding {
    Float32,
    Float16,
    Linear { nbits: u8 },
    LookupTable { nbits: u8 },
}

struct OwnedTensor {
    dtype: Dtype,
    shape: Vec<usize>,
    bytes: Vec<u8>,
}

impl View for OwnedTensor {
    fn dtype(&self) -> Dtype {
        self.dtype
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn data(&self) -> Cow<[u8]> {
        Cow::Borrowed(&self.bytes)
    }

    fn data_len(&self) -> usize {
        self.bytes.len()
    }
}

fn f32_tensor(values: &[f32], shape: Vec<usize>) -> OwnedTensor {
    OwnedTensor {
        dtype: Dtype::F32,
        shape,
        bytes: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
    }
}

fn f16_tensor(values: &[f16], shape: Vec<usize>) -> OwnedTensor {
    OwnedTensor {
        dtype: Dtype::F16,
        shape,
        bytes: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
    }
}

fn encode_weights(
    name: &str,
    params: &WeightParams,
    tensors: &mut Vec<(String, OwnedTensor)>,
) -> TensorHeader {
    let shape = vec![params.rows, params.cols];
    let encoding = match &params.values {
        WeightValues::Float32(data) => {
            tensors.push((name.to_string(), f32_tensor(data, shape)));
            Encoding::Float32
        }
        WeightValues::Float16(data) => {
            tensors.push((name.to_string(), f16_tensor(data, shape)));
            Encoding::Float16
        }
        WeightValues::Quantized(q) => {
            tensors.push((
                name.to_string(),
                OwnedTensor {
                    dtype: Dtype::U8,
                    shape: vec![q.packed.len()],
                    bytes: q.packed.clone(),
                },
            ));
            match &q.params {
                QuantizationParams::Linear { scale, bias } => {
                    tensors.push((format!("{name}.scale"), f32_tensor(scale, vec![scale.len()])));
                    tensors.push((format!("{name}.quant_bias"), f32_tensor(bias, vec![bias.len()])));
                    Encoding::Linear { nbits: q.nbits }
                }
                QuantizationParams::LookupTable(lut) => {
                    tensors.push((format!("{name}.lut"), f32_tensor(lut, vec![lut.len()])));
                    Encoding::LookupTable { nbits: q.nbits }
                }
            }
        }
    };

    TensorHeader {
        rows: params.rows,
        cols: params.cols,
        encoding,
    }
}

/// Serialize `model` into the container format.
pub fn to_bytes(model: &Model) -> Result<Vec<u8>> {
    model.validate()?;

    let mut tensors = Vec::new();
    let mut layers = Vec::with_capacity(model.layers.len());
    for layer in &model.layers {
        let weights = encode_weights(&format!("{}.weight", layer.name), &layer.weights, &mut tensors);
        let bias = layer
            .bias
            .as_ref()
            .map(|b| encode_weights(&format!("{}.bias", layer.name), b, &mut tensors));
        layers.push(LayerHeader {
            name: layer.name.clone(),
            activation: layer.activation,
            weights,
            bias,
        });
    }

    let header = ModelHeader {
        specification_version: model.specification_version,
        description: model.description.clone(),
        layers,
    };

    let metadata = HashMap::from([
        (META_FORMAT.to_string(), FORMAT_TAG.to_string()),
        (META_VERSION.to_string(), FORMAT_VERSION.to_string()),
        (META_MODEL.to_string(), serde_json::to_string(&header)?),
    ]);

    Ok(safetensors::serialize(tensors, &Some(metadata))?)
}

pub fn save(model: &Model, path: &Path) -> Result<()> {
    let bytes = to_bytes(model)?;
    fs::write(path, &bytes).map_err(|e| Error::io(path, e))?;
    debug!(path = %path.display(), bytes = bytes.len(), "saved model");
    Ok(())
}

struct TensorReader<'a> {
    archive: SafeTensors<'a>,
}

impl TensorReader<'_> {
    fn raw(&self, name: &str, dtype: Dtype, count: usize) -> Result<Vec<u8>> {
        let view = self
            .archive
            .tensor(name)
            .map_err(|_| Error::Format(format!("missing tensor `{name}`")))?;
        if view.dtype() != dtype {
            return Err(Error::Format(format!(
                "tensor `{name}` is {:?}, expected {dtype:?}",
                view.dtype()
            )));
        }
        let elements: usize = view.shape().iter().product();
        if elements != count {
            return Err(Error::Format(format!(
                "tensor `{name}` has {elements} elements, expected {count}"
            )));
        }
        Ok(view.data().to_vec())
    }

    fn f32s(&self, name: &str, count: usize) -> Result<Vec<f32>> {
        Ok(self
            .raw(name, Dtype::F32, count)?
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    fn f16s(&self, name: &str, count: usize) -> Result<Vec<f16>> {
        Ok(self
            .raw(name, Dtype::F16, count)?
            .chunks_exact(2)
            .map(|c| f16::from_le_bytes([c[0], c[1]]))
            .collect())
    }

    fn weights(&self, name: &str, header: &TensorHeader) -> Result<WeightParams> {
        let (rows, cols) = (header.rows, header.cols);
        let count = rows
            .checked_mul(cols)
            .ok_or_else(|| Error::Format(format!("`{name}` has shape {rows}x{cols} that overflows")))?;

        let values = match header.encoding {
            Encoding::Float32 => WeightValues::Float32(self.f32s(name, count)?),
            Encoding::Float16 => WeightValues::Float16(self.f16s(name, count)?),
            Encoding::Linear { nbits } | Encoding::LookupTable { nbits } => {
                if !(1..=8).contains(&nbits) {
                    return Err(Error::Format(format!("`{name}` uses {nbits} bit codes")));
                }
                let packed = self.raw(name, Dtype::U8, packed_len(count, nbits))?;
                let params = match header.encoding {
                    Encoding::Linear { .. } => QuantizationParams::Linear {
                        scale: self.f32s(&format!("{name}.scale"), rows)?,
                        bias: self.f32s(&format!("{name}.quant_bias"), rows)?,
                    },
                    _ => QuantizationParams::LookupTable(
                        self.f32s(&format!("{name}.lut"), 1usize << nbits)?,
                    ),
                };
                WeightValues::Quantized(QuantizedWeights {
                    nbits,
                    params,
                    packed,
                })
            }
        };

        Ok(WeightParams { rows, cols, values })
    }
}

/// Parse and validate a model from container bytes.
pub fn from_bytes(bytes: &[u8]) -> Result<Model> {
    let (_, metadata) = SafeTensors::read_metadata(bytes)?;
    let entries = metadata
        .metadata()
        .as_ref()
        .ok_or_else(|| Error::Format("no metadata".to_string()))?;

    match entries.get(META_FORMAT) {
        Some(tag) if tag == FORMAT_TAG => {}
        other => {
            return Err(Error::Format(format!(
                "unexpected format tag {other:?}, expected `{FORMAT_TAG}`"
            )))
        }
    }
    match entries.get(META_VERSION) {
        Some(version) if version == FORMAT_VERSION => {}
        other => {
            return Err(Error::Format(format!(
                "unsupported format version {other:?}, expected `{FORMAT_VERSION}`"
            )))
        }
    }
    let header: ModelHeader = serde_json::from_str(
        entries
            .get(META_MODEL)
            .ok_or_else(|| Error::Format("no model header".to_string()))?,
    )?;

    let reader = TensorReader {
        archive: SafeTensors::deserialize(bytes)?,
    };

    let mut layers = Vec::with_capacity(header.layers.len());
    for layer in &header.layers {
        layers.push(Layer {
            name: layer.name.clone(),
            weights: reader.weights(&format!("{}.weight", layer.name), &layer.weights)?,
            bias: layer
                .bias
                .as_ref()
                .map(|b| reader.weights(&format!("{}.bias", layer.name), b))
                .transpose()?,
            activation: layer.activation,
        });
    }

    let model = Model {
        specification_version: header.specification_version,
        description: header.description,
        layers,
    };
    model.validate()?;
    Ok(model)
}

pub fn load(path: &Path) -> Result<Model> {
    let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
    let model = from_bytes(&bytes)?;
    debug!(path = %path.display(), layers = model.layers.len(), "loaded model");
    Ok(model)
}

impl Model {
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        save(self, path.as_ref())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Model> {
        load(path.as_ref())
    }
}
