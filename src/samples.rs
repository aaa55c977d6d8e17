//! Test samples used to compare a quantized model with its source.
//!
//! A sample directory holds one file per sample: `.json` files containing a
//! flat array of numbers, or `.f32` files of raw little-endian floats. The
//! directory name is the ground-truth label of its samples, with `_` read as
//! a space, so `testing_data/french_fries` holds samples of `french fries`.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub path: PathBuf,
    pub label: Option<String>,
    pub values: Vec<f32>,
}

/// Class label named by a sample directory.
pub fn label_for_dir(dir: &Path) -> Option<String> {
    dir.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.replace('_', " "))
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

/// Samples of one directory, sorted by file name and labelled by the
/// directory name.
pub fn load_samples(dir: &Path) -> Result<Vec<Sample>> {
    if !dir.is_dir() {
        return Err(Error::SampleData(format!(
            "{} is not a directory",
            dir.display()
        )));
    }

    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
        let path = entry.map_err(|e| Error::io(dir, e))?.path();
        if path.is_file() && !is_hidden(&path) {
            paths.push(path);
        }
    }
    paths.sort();

    let label = label_for_dir(dir);
    let mut samples = Vec::with_capacity(paths.len());
    for path in paths {
        let values = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => read_json(&path)?,
            Some("f32") => read_raw(&path)?,
            _ => {
                warn!(path = %path.display(), "skipping file with unknown sample format");
                continue;
            }
        };
        samples.push(Sample {
            path,
            label: label.clone(),
            values,
        });
    }

    if samples.is_empty() {
        return Err(Error::SampleData(format!(
            "no .json or .f32 samples in {}",
            dir.display()
        )));
    }

    debug!(dir = %dir.display(), count = samples.len(), "loaded samples");
    Ok(samples)
}

/// Every subdirectory of `root` is one class; returns the samples of all of
/// them, ordered by label.
pub fn load_labelled_samples(root: &Path) -> Result<Vec<Sample>> {
    if !root.is_dir() {
        return Err(Error::SampleData(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let mut dirs = Vec::new();
    for entry in fs::read_dir(root).map_err(|e| Error::io(root, e))? {
        let path = entry.map_err(|e| Error::io(root, e))?.path();
        if path.is_dir() && !is_hidden(&path) {
            dirs.push(path);
        }
    }
    if dirs.is_empty() {
        return Err(Error::SampleData(format!(
            "no class directories in {}",
            root.display()
        )));
    }
    dirs.sort_by_key(|dir| label_for_dir(dir));

    let mut samples = Vec::new();
    for dir in &dirs {
        samples.extend(load_samples(dir)?);
    }
    debug!(root = %root.display(), classes = dirs.len(), count = samples.len(), "loaded labelled samples");
    Ok(samples)
}

fn read_json(path: &Path) -> Result<Vec<f32>> {
    let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    serde_json::from_str(&text).map_err(|e| {
        Error::SampleData(format!("{}: expected an array of numbers: {e}", path.display()))
    })
}

fn read_raw(path: &Path) -> Result<Vec<f32>> {
    let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
    if bytes.len() % 4 != 0 {
        return Err(Error::SampleData(format!(
            "{}: {} bytes is not a whole number of f32 values",
            path.display(),
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_json_and_raw_sorted_by_name() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.json"), "[1.5, -2, 3e-1]").unwrap();
        let raw: Vec<u8> = [0.25f32, 4.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        fs::write(dir.path().join("a.f32"), raw).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        fs::write(dir.path().join(".hidden.json"), "[9]").unwrap();
        fs::create_dir(dir.path().join("nested.json")).unwrap();

        let samples = load_samples(dir.path()).unwrap();

        assert_eq!(2, samples.len());
        assert_eq!(vec![0.25, 4.0], samples[0].values);
        assert_eq!(vec![1.5, -2.0, 0.3], samples[1].values);
    }

    #[test]
    fn directory_name_is_the_label() {
        let dir = tempfile::tempdir().unwrap();
        let fries = dir.path().join("french_fries");
        fs::create_dir(&fries).unwrap();
        fs::write(fries.join("0.json"), "[1]").unwrap();

        let samples = load_samples(&fries).unwrap();

        assert_eq!(Some("french fries".to_string()), samples[0].label);
    }

    #[test]
    fn every_class_directory_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        for (class, count) in [("sushi", 2), ("pizza", 3), (".cache", 1)] {
            let class_dir = dir.path().join(class);
            fs::create_dir(&class_dir).unwrap();
            for i in 0..count {
                fs::write(class_dir.join(format!("{i}.json")), "[0.5, 1]").unwrap();
            }
        }
        fs::write(dir.path().join("stray.json"), "[1, 2]").unwrap();

        let samples = load_labelled_samples(dir.path()).unwrap();
        let labels: Vec<&str> = samples
            .iter()
            .map(|s| s.label.as_deref().unwrap())
            .collect();

        assert_eq!(vec!["pizza", "pizza", "pizza", "sushi", "sushi"], labels);
    }

    #[test]
    fn labelled_root_needs_class_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("0.json"), "[1]").unwrap();

        assert!(matches!(
            load_labelled_samples(dir.path()),
            Err(Error::SampleData(_))
        ));
        assert!(matches!(
            load_labelled_samples(&dir.path().join("absent")),
            Err(Error::SampleData(_))
        ));
    }

    #[test]
    fn missing_directory() {
        let dir = tempfile::tempdir().unwrap();

        assert!(matches!(
            load_samples(&dir.path().join("pizza")),
            Err(Error::SampleData(_))
        ));
    }

    #[test]
    fn directory_without_samples() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("readme.md"), "#").unwrap();

        assert!(matches!(load_samples(dir.path()), Err(Error::SampleData(_))));
    }

    #[test]
    fn malformed_samples() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad.json"), "{\"x\": 1}").unwrap();
        assert!(matches!(load_samples(dir.path()), Err(Error::SampleData(_))));

        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad.f32"), [0u8; 6]).unwrap();
        assert!(matches!(load_samples(dir.path()), Err(Error::SampleData(_))));
    }
}
