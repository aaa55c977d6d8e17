//! Weight quantization sweeps for small fully connected models.
//!
//! A model is loaded once, its weights are quantized with each
//! [`QuantizationMode`] at each bit-width, every variant is saved next to the
//! original and compared with it on a directory of test samples. A directory
//! of models can also be scored against labelled classes of samples.

pub mod compare;
pub mod error;
pub mod evaluate;
pub mod format;
pub mod inference;
pub mod matrices;
pub mod model;
pub mod quantization;
pub mod report;
pub mod samples;
pub mod sweep;

pub use compare::{compare_models, ComparisonReport};
pub use error::{Error, Result};
pub use evaluate::{evaluate_directory, AccuracyTable};
pub use inference::{CompiledModel, Prediction};
pub use model::{Activation, FeatureDescription, Layer, Model, ModelDescription, WeightParams};
pub use quantization::{quantize_weights, QuantizationMode};
pub use samples::{load_labelled_samples, load_samples, Sample};
pub use sweep::{run_sweep, SweepConfig, SweepEntry, SweepReport};
