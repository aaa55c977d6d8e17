//! Agreement and signal-to-noise metrics between a model and its quantized copy.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::inference::{CompiledModel, Prediction};
use crate::model::Model;
use crate::samples::Sample;

/// Added to the noise energy so identical outputs give a finite ratio.
const NOISE_FLOOR: f64 = 1e-7;

/// `f64` fields that may hold infinities or NaN, written as the strings
/// `inf`, `-inf` and `NaN` since JSON numbers cannot.
mod any_f64 {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_str(&value.to_string())
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(value) => Ok(value),
            Repr::Text(text) => text.parse().map_err(D::Error::custom),
        }
    }
}

/// Mean and population standard deviation. A sample whose reference output
/// is all zeros has an SNR of `-inf`, which carries through to the mean.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stat {
    #[serde(with = "any_f64")]
    pub mean: f64,
    #[serde(with = "any_f64")]
    pub std_dev: f64,
}

impl Stat {
    pub fn of(values: &[f64]) -> Self {
        if values.is_empty() {
            return Stat {
                mean: 0.0,
                std_dev: 0.0,
            };
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Stat {
            mean,
            std_dev: variance.sqrt(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub output_name: String,
    pub samples: usize,
    /// Percentage of samples with the same arg-max label; classifiers only.
    pub top1_agreement: Option<f64>,
    /// Fraction of each label's samples the quantized model classifies as
    /// that label; classifiers only.
    #[serde(default)]
    pub label_accuracy: BTreeMap<String, f64>,
    pub snr_db: Stat,
    pub psnr_db: Stat,
    #[serde(with = "any_f64")]
    pub mse: f64,
}

impl fmt::Display for ComparisonReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Analyzing {} samples", self.samples)?;
        writeln!(f, "Output {}:", self.output_name)?;
        writeln!(f, "--------------------")?;
        if let Some(agreement) = self.top1_agreement {
            writeln!(f, "Top 1 Agreement: {agreement:.2}%")?;
        }
        for (label, accuracy) in &self.label_accuracy {
            writeln!(f, "Accuracy on {label}: {:.2}%", 100.0 * accuracy)?;
        }
        writeln!(
            f,
            "SNR: {:.2} +/- {:.2} dB",
            self.snr_db.mean, self.snr_db.std_dev
        )?;
        writeln!(
            f,
            "PSNR: {:.2} +/- {:.2} dB",
            self.psnr_db.mean, self.psnr_db.std_dev
        )?;
        write!(f, "MSE: {:.6e}", self.mse)
    }
}

pub fn mean_squared_error(a: &[f32], b: &[f32]) -> f64 {
    debug_assert_eq!(a.len(), b.len(), "Number of values must be equal");
    if a.is_empty() {
        return 0.0;
    }
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x as f64 - y as f64).powi(2))
        .sum::<f64>()
        / a.len() as f64
}

/// `(SNR, PSNR)` in dB of `quantized` against `reference`.
pub fn signal_to_noise(reference: &[f32], quantized: &[f32]) -> (f64, f64) {
    let noise = mean_squared_error(reference, quantized) + NOISE_FLOOR;
    let n = reference.len().max(1) as f64;
    let signal = reference.iter().map(|&x| (x as f64).powi(2)).sum::<f64>() / n;
    let peak = reference
        .iter()
        .map(|&x| (x as f64).powi(2))
        .fold(0.0, f64::max);

    (10.0 * (signal / noise).log10(), 10.0 * (peak / noise).log10())
}

pub fn predict_all(model: &Model, samples: &[Sample]) -> Result<Vec<Prediction>> {
    let compiled = CompiledModel::compile(model)?;
    samples.iter().map(|s| compiled.predict(&s.values)).collect()
}

/// Fraction of each label's samples whose top prediction is that label.
/// Unlabelled samples are ignored.
pub fn label_accuracy(samples: &[Sample], predictions: &[Prediction]) -> BTreeMap<String, f64> {
    let mut counts: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for (sample, prediction) in samples.iter().zip(predictions) {
        let Some(label) = &sample.label else {
            continue;
        };
        let (matched, total) = counts.entry(label.as_str()).or_default();
        *total += 1;
        if prediction
            .top_label
            .as_ref()
            .is_some_and(|(_, predicted)| predicted == label)
        {
            *matched += 1;
        }
    }

    counts
        .into_iter()
        .map(|(label, (matched, total))| (label.to_string(), matched as f64 / total as f64))
        .collect()
}

/// Predictions of the full-precision model, computed once and compared
/// against any number of quantized variants.
pub struct Reference {
    input_size: usize,
    output_size: usize,
    output_name: String,
    classifier: bool,
    samples: Vec<Sample>,
    predictions: Vec<Prediction>,
}

impl Reference {
    pub fn new(full: &Model, samples: &[Sample]) -> Result<Self> {
        if samples.is_empty() {
            return Err(Error::SampleData("no samples to compare on".to_string()));
        }

        let predictions = predict_all(full, samples)?;

        Ok(Reference {
            input_size: full.input_size(),
            output_size: full.output_size(),
            output_name: full.description.output.name.clone(),
            classifier: full.is_classifier(),
            samples: samples.to_vec(),
            predictions,
        })
    }

    /// Labelled accuracy of the full-precision model itself.
    pub fn label_accuracy(&self) -> BTreeMap<String, f64> {
        if self.classifier {
            label_accuracy(&self.samples, &self.predictions)
        } else {
            BTreeMap::new()
        }
    }

    pub fn compare(&self, quantized: &Model) -> Result<ComparisonReport> {
        if quantized.input_size() != self.input_size {
            return Err(Error::DimensionMismatch {
                expected: self.input_size,
                actual: quantized.input_size(),
            });
        }
        if quantized.output_size() != self.output_size {
            return Err(Error::DimensionMismatch {
                expected: self.output_size,
                actual: quantized.output_size(),
            });
        }

        info!("Running analysis on {} samples", self.samples.len());
        let predictions = predict_all(quantized, &self.samples)?;

        let mut matched = 0usize;
        let mut snr = Vec::with_capacity(self.samples.len());
        let mut psnr = Vec::with_capacity(self.samples.len());
        let mut mse = 0.0;
        for (reference, prediction) in self.predictions.iter().zip(&predictions) {
            if let (Some((a, _)), Some((b, _))) = (&reference.top_label, &prediction.top_label) {
                if a == b {
                    matched += 1;
                }
            }
            let (s, p) = signal_to_noise(&reference.output, &prediction.output);
            snr.push(s);
            psnr.push(p);
            mse += mean_squared_error(&reference.output, &prediction.output);
        }

        let n = self.samples.len() as f64;
        Ok(ComparisonReport {
            output_name: self.output_name.clone(),
            samples: self.samples.len(),
            top1_agreement: self
                .classifier
                .then(|| 100.0 * matched as f64 / n),
            label_accuracy: if self.classifier {
                label_accuracy(&self.samples, &predictions)
            } else {
                BTreeMap::new()
            },
            snr_db: Stat::of(&snr),
            psnr_db: Stat::of(&psnr),
            mse: mse / n,
        })
    }
}

/// Compare `quantized` against `full` on every sample.
pub fn compare_models(
    full: &Model,
    quantized: &Model,
    samples: &[Sample],
) -> Result<ComparisonReport> {
    Reference::new(full, samples)?.compare(quantized)
}
