use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use quantized_model_sweep::matrices::Matrix;
use quantized_model_sweep::model::WeightValues;
use quantized_model_sweep::report::plot_sweep;
use quantized_model_sweep::{
    evaluate_directory, run_sweep, Activation, Error, FeatureDescription, Layer, Model,
    ModelDescription, QuantizationMode, SweepConfig,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn food_classifier() -> Model {
    let mut rng = StdRng::seed_from_u64(42);
    let description = ModelDescription {
        short_description: "Food classifier".to_string(),
        input: FeatureDescription::new("image", vec![3, 4, 4]),
        output: FeatureDescription::new("classLabelProbs", vec![4]),
        class_labels: Some(
            ["pizza", "hotdog", "sushi", "salad"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        ),
        user_defined: BTreeMap::new(),
    };

    Model::new(
        description,
        vec![
            Layer::dense(
                "fc1",
                Matrix::random(16, 48, -0.5..0.5, &mut rng),
                Some(vec![0.01; 16]),
                Activation::Relu,
            ),
            Layer::dense(
                "fc2",
                Matrix::random(4, 16, -0.5..0.5, &mut rng),
                Some(vec![0.0, 0.1, -0.1, 0.05]),
                Activation::Softmax,
            ),
        ],
    )
    .unwrap()
}

fn write_samples(dir: &Path, count: usize) {
    let mut rng = StdRng::seed_from_u64(7);
    fs::create_dir_all(dir).unwrap();
    for i in 0..count {
        let values: Vec<f32> = (0..48).map(|_| rng.random_range(0.0..1.0)).collect();
        fs::write(
            dir.join(format!("pizza_{i:02}.json")),
            serde_json::to_string(&values).unwrap(),
        )
        .unwrap();
    }
}

#[test]
fn default_sweep_writes_every_variant() {
    let dir = tempfile::tempdir().unwrap();
    food_classifier().save(dir.path().join("food.mlmodel")).unwrap();
    write_samples(&dir.path().join("testing_data/pizza"), 6);

    let config = SweepConfig {
        model_dir: dir.path().to_path_buf(),
        output_dir: dir.path().to_path_buf(),
        testing_data: Some(dir.path().join("testing_data/pizza")),
        ..Default::default()
    };
    let report = run_sweep(&config).unwrap();

    assert_eq!(27, report.entries.len());
    for mode in ["linear", "linear_lut", "kmeans"] {
        for bits in [16, 8, 7, 6, 5, 4, 3, 2, 1] {
            let path = dir.path().join(format!("food_{mode}_{bits}.mlmodel"));
            assert!(path.is_file(), "missing {}", path.display());
        }
    }

    // sweep order: every bit-width of a mode before the next mode
    let order: Vec<(QuantizationMode, u8)> =
        report.entries.iter().map(|e| (e.mode, e.nbits)).collect();
    assert_eq!((QuantizationMode::Linear, 16), order[0]);
    assert_eq!((QuantizationMode::Linear, 1), order[8]);
    assert_eq!((QuantizationMode::LinearLut, 16), order[9]);
    assert_eq!((QuantizationMode::Kmeans, 1), order[26]);

    for entry in &report.entries {
        let comparison = entry.comparison.as_ref().unwrap();
        assert_eq!(6, comparison.samples);
        let agreement = comparison.top1_agreement.unwrap();
        assert!((0.0..=100.0).contains(&agreement));
        if entry.nbits == 16 {
            assert_eq!(100.0, agreement, "{} at 16 bits", entry.mode);
        }
    }

    let plot = dir.path().join("sweep.svg");
    plot_sweep(&report, &plot).unwrap();
    assert!(plot.is_file());
}

#[test]
fn saved_variant_reloads_with_annotation() {
    let dir = tempfile::tempdir().unwrap();
    food_classifier().save(dir.path().join("food.mlmodel")).unwrap();

    let config = SweepConfig {
        model_dir: dir.path().to_path_buf(),
        output_dir: dir.path().join("variants"),
        modes: vec![QuantizationMode::Kmeans, QuantizationMode::LinearSymmetric],
        bit_widths: vec![4],
        testing_data: None,
        ..Default::default()
    };
    let report = run_sweep(&config).unwrap();

    assert_eq!(2, report.entries.len());
    let kmeans = Model::load(dir.path().join("variants/food_kmeans_4.mlmodel")).unwrap();
    assert_eq!(
        "4 bit per quantized weight, using kmeans.",
        kmeans.description.short_description
    );
    assert!(kmeans
        .layers
        .iter()
        .all(|l| matches!(l.weights.values, WeightValues::Quantized(ref q) if q.nbits == 4)));
    assert!(dir
        .path()
        .join("variants/food_linear_symmetric_4.mlmodel")
        .is_file());
}

#[test]
fn missing_testing_data_stops_the_sweep() {
    let dir = tempfile::tempdir().unwrap();
    food_classifier().save(dir.path().join("food.mlmodel")).unwrap();

    let config = SweepConfig {
        model_dir: dir.path().to_path_buf(),
        output_dir: dir.path().to_path_buf(),
        testing_data: Some(dir.path().join("testing_data/pizza")),
        ..Default::default()
    };

    assert!(matches!(run_sweep(&config), Err(Error::SampleData(_))));
    assert!(!dir.path().join("food_linear_16.mlmodel").exists());
}

#[test]
fn sweep_output_is_scored_per_class() {
    let dir = tempfile::tempdir().unwrap();
    food_classifier().save(dir.path().join("food.mlmodel")).unwrap();
    write_samples(&dir.path().join("testing_data/pizza"), 4);
    write_samples(&dir.path().join("testing_data/sushi"), 2);

    let config = SweepConfig {
        model_dir: dir.path().to_path_buf(),
        output_dir: dir.path().to_path_buf(),
        modes: vec![QuantizationMode::LinearLut],
        bit_widths: vec![8, 2],
        testing_data: Some(dir.path().join("testing_data/pizza")),
        ..Default::default()
    };
    let report = run_sweep(&config).unwrap();

    let table = evaluate_directory(dir.path(), "mlmodel", &dir.path().join("testing_data")).unwrap();
    let names: Vec<&str> = table.rows.iter().map(|r| r.model.as_str()).collect();
    assert_eq!(
        vec!["food.mlmodel", "food_linear_lut_2.mlmodel", "food_linear_lut_8.mlmodel"],
        names
    );
    assert_eq!(vec!["pizza", "sushi"], table.labels());

    // the sweep scores only the pizza directory, so its pizza column agrees
    let swept = report.accuracy_table();
    for (evaluated, swept) in table.rows.iter().zip(&swept.rows) {
        assert_eq!(evaluated.model, swept.model);
        assert_eq!(evaluated.file_bytes, swept.file_bytes);
        assert_eq!(evaluated.accuracy.get("pizza"), swept.accuracy.get("pizza"));
    }
}
