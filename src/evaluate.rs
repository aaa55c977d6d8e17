//! Labelled accuracy of every model file in a directory.
//!
//! Each subdirectory of the testing root is one class. Every model is run on
//! every sample and scored by how often its top label matches the class of
//! the sample. Results are tabulated one row per model, sorted by file name,
//! and written as CSV.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::compare::{label_accuracy, predict_all};
use crate::error::{Error, Result};
use crate::model::Model;
use crate::samples::load_labelled_samples;

/// File written next to the evaluated models.
pub const RESULT_FILE: &str = "result.csv";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyRow {
    /// File name of the model.
    pub model: String,
    pub file_bytes: u64,
    /// Label -> fraction of that label's samples classified correctly.
    pub accuracy: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccuracyTable {
    pub source: PathBuf,
    pub rows: Vec<AccuracyRow>,
}

impl AccuracyTable {
    /// Every label that appears in any row, sorted.
    pub fn labels(&self) -> Vec<String> {
        self.rows
            .iter()
            .flat_map(|row| row.accuracy.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// `model,size,<label>...` header, one line per row. A label a model was
    /// not scored on is left empty.
    pub fn to_csv(&self) -> String {
        let labels = self.labels();

        let mut header = vec!["model".to_string(), "size".to_string()];
        header.extend(labels.iter().map(|l| csv_field(l)));
        let mut csv = header.join(",");
        csv.push('\n');

        for row in &self.rows {
            let mut fields = vec![csv_field(&row.model), row.file_bytes.to_string()];
            fields.extend(
                labels
                    .iter()
                    .map(|l| row.accuracy.get(l).map_or_else(String::new, |a| a.to_string())),
            );
            csv.push_str(&fields.join(","));
            csv.push('\n');
        }
        csv
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_csv()).map_err(|e| Error::io(path, e))
    }
}

impl fmt::Display for AccuracyTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "report for {}", self.source.display())?;
        writeln!(f, "total of {} models", self.rows.len())?;
        for row in &self.rows {
            writeln!(f, "\tmodel:\t{}", row.model)?;
            writeln!(f, "\tsize:\t{}", row.file_bytes)?;
            for (label, accuracy) in &row.accuracy {
                writeln!(f, "\t\t{label}:\t\t\t{accuracy}")?;
            }
        }
        Ok(())
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Non-hidden `*.<extension>` files directly under `dir`, sorted by name.
pub fn model_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
        let path = entry.map_err(|e| Error::io(dir, e))?.path();
        let visible = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| !n.starts_with('.'));
        if visible && path.is_file() && path.extension().is_some_and(|e| e == extension) {
            paths.push(path);
        }
    }
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(paths)
}

/// Score every model in `model_dir` against the classes under `testing_root`.
pub fn evaluate_directory(
    model_dir: &Path,
    extension: &str,
    testing_root: &Path,
) -> Result<AccuracyTable> {
    let samples = load_labelled_samples(testing_root)?;
    let paths = model_files(model_dir, extension)?;
    if paths.is_empty() {
        return Err(Error::InvalidModel(format!(
            "no .{extension} models in {}",
            model_dir.display()
        )));
    }

    let mut rows = Vec::with_capacity(paths.len());
    for path in &paths {
        let model = Model::load(path)?;
        let file_bytes = fs::metadata(path).map_err(|e| Error::io(path, e))?.len();

        let accuracy = if model.is_classifier() {
            label_accuracy(&samples, &predict_all(&model, &samples)?)
        } else {
            warn!(model = %path.display(), "model has no class labels; skipping accuracy");
            BTreeMap::new()
        };

        info!(model = %path.display(), file_bytes, "evaluated model");
        rows.push(AccuracyRow {
            model: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            file_bytes,
            accuracy,
        });
    }

    Ok(AccuracyTable {
        source: model_dir.to_path_buf(),
        rows,
    })
}
