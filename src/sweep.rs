//! Quantize one model across every configured mode and bit-width.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, info_span};

use crate::compare::{ComparisonReport, Reference};
use crate::error::{Error, Result};
use crate::evaluate::{AccuracyRow, AccuracyTable};
use crate::model::Model;
use crate::quantization::{quantize_weights, validate_bit_width, QuantizationMode, SUPPORTED_BIT_WIDTHS};
use crate::samples::load_samples;

#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Base name of the model, without extension.
    pub model_name: String,
    pub model_dir: PathBuf,
    pub output_dir: PathBuf,
    pub extension: String,
    pub modes: Vec<QuantizationMode>,
    /// Swept in the given order.
    pub bit_widths: Vec<u8>,
    /// Sample directory for comparisons; `None` skips them.
    pub testing_data: Option<PathBuf>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            model_name: "food".to_string(),
            model_dir: PathBuf::from("."),
            output_dir: PathBuf::from("."),
            extension: "mlmodel".to_string(),
            modes: QuantizationMode::DEFAULT_SWEEP.to_vec(),
            bit_widths: SUPPORTED_BIT_WIDTHS.to_vec(),
            testing_data: Some(PathBuf::from("testing_data/pizza")),
        }
    }
}

impl SweepConfig {
    pub fn input_path(&self) -> PathBuf {
        self.model_dir
            .join(format!("{}.{}", self.model_name, self.extension))
    }

    /// `<output_dir>/<name>_<mode>_<bits>.<ext>`
    pub fn output_path(&self, mode: QuantizationMode, nbits: u8) -> PathBuf {
        self.output_dir.join(format!(
            "{}_{}_{}.{}",
            self.model_name, mode, nbits, self.extension
        ))
    }

    pub fn validate(&self) -> Result<()> {
        if self.model_name.is_empty() {
            return Err(Error::InvalidModel("empty model name".to_string()));
        }
        for &nbits in &self.bit_widths {
            validate_bit_width(nbits)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepEntry {
    pub mode: QuantizationMode,
    pub nbits: u8,
    pub path: PathBuf,
    pub file_bytes: u64,
    /// Weight and bias payload, without container overhead.
    pub weight_bytes: u64,
    pub comparison: Option<ComparisonReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub model: PathBuf,
    pub original_bytes: u64,
    pub original_weight_bytes: u64,
    /// Labelled accuracy of the unquantized model; empty without comparisons.
    #[serde(default)]
    pub original_accuracy: BTreeMap<String, f64>,
    pub entries: Vec<SweepEntry>,
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl SweepReport {
    /// The original model and every variant, sorted by file name.
    pub fn accuracy_table(&self) -> AccuracyTable {
        let mut rows = vec![AccuracyRow {
            model: file_name(&self.model),
            file_bytes: self.original_bytes,
            accuracy: self.original_accuracy.clone(),
        }];
        rows.extend(self.entries.iter().map(|entry| AccuracyRow {
            model: file_name(&entry.path),
            file_bytes: entry.file_bytes,
            accuracy: entry
                .comparison
                .as_ref()
                .map(|c| c.label_accuracy.clone())
                .unwrap_or_default(),
        }));
        rows.sort_by(|a, b| a.model.cmp(&b.model));

        AccuracyTable {
            source: self.model.parent().map(Path::to_path_buf).unwrap_or_default(),
            rows,
        }
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| Error::io(path, e))
    }

    pub fn read_json(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Short description written into each variant.
pub fn variant_description(mode: QuantizationMode, nbits: u8) -> String {
    format!("{nbits} bit per quantized weight, using {mode}.")
}

fn file_size(path: &Path) -> Result<u64> {
    Ok(fs::metadata(path).map_err(|e| Error::io(path, e))?.len())
}

pub fn run_sweep(config: &SweepConfig) -> Result<SweepReport> {
    config.validate()?;

    let input = config.input_path();
    let model = Model::load(&input)?;
    let original_bytes = file_size(&input)?;
    info!(
        model = %input.display(),
        layers = model.layers.len(),
        bytes = original_bytes,
        "loaded model"
    );

    let reference = match &config.testing_data {
        Some(dir) => Some(Reference::new(&model, &load_samples(dir)?)?),
        None => None,
    };
    let original_accuracy = reference
        .as_ref()
        .map(Reference::label_accuracy)
        .unwrap_or_default();

    fs::create_dir_all(&config.output_dir).map_err(|e| Error::io(&config.output_dir, e))?;

    let mut entries = Vec::with_capacity(config.modes.len() * config.bit_widths.len());
    for &mode in &config.modes {
        for &nbits in &config.bit_widths {
            let _span = info_span!("variant", %mode, nbits).entered();
            println!("processing {mode} on {nbits}.");
            let start = Instant::now();

            let mut quantized = quantize_weights(&model, nbits, mode)?;
            quantized.description.short_description = variant_description(mode, nbits);

            let path = config.output_path(mode, nbits);
            quantized.save(&path)?;
            let file_bytes = file_size(&path)?;
            let weight_bytes = quantized.weight_bytes() as u64;

            let comparison = match &reference {
                Some(reference) => {
                    let report = reference.compare(&quantized)?;
                    println!("{report}");
                    Some(report)
                }
                None => None,
            };

            info!(
                path = %path.display(),
                file_bytes,
                weight_bytes,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "saved variant"
            );
            entries.push(SweepEntry {
                mode,
                nbits,
                path,
                file_bytes,
                weight_bytes,
                comparison,
            });
        }
    }

    Ok(SweepReport {
        model: input,
        original_bytes,
        original_weight_bytes: model.weight_bytes() as u64,
        original_accuracy,
        entries,
    })
}
