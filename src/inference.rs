use crate::error::{Error, Result};
use crate::matrices::Matrix;
use crate::model::{Activation, Model};

struct DenseLayer {
    weights: Matrix<f32>,
    bias: Option<Vec<f32>>,
    activation: Activation,
}

/// A model with every layer dequantized to f32, ready for repeated prediction.
pub struct CompiledModel {
    input_size: usize,
    layers: Vec<DenseLayer>,
    class_labels: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub output: Vec<f32>,
    /// Arg-max index and label, for classifiers.
    pub top_label: Option<(usize, String)>,
}

impl CompiledModel {
    pub fn compile(model: &Model) -> Result<Self> {
        model.validate()?;

        let layers = model
            .layers
            .iter()
            .map(|layer| -> Result<DenseLayer> {
                Ok(DenseLayer {
                    weights: layer.weights.to_matrix()?,
                    bias: layer.bias.as_ref().map(|b| b.to_f32()).transpose()?,
                    activation: layer.activation,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(CompiledModel {
            input_size: model.input_size(),
            layers,
            class_labels: model.description.class_labels.clone(),
        })
    }

    pub fn predict(&self, input: &[f32]) -> Result<Prediction> {
        if input.len() != self.input_size {
            return Err(Error::InputShape {
                expected: self.input_size,
                actual: input.len(),
            });
        }

        let mut values = input.to_vec();
        for layer in &self.layers {
            values = layer.weights.matvec(&values)?;
            if let Some(bias) = &layer.bias {
                values.iter_mut().zip(bias).for_each(|(v, b)| *v += b);
            }
            layer.activation.apply(&mut values);
        }

        let top_label = match &self.class_labels {
            Some(labels) => argmax(&values).and_then(|i| labels.get(i).map(|l| (i, l.clone()))),
            None => None,
        };

        Ok(Prediction {
            output: values,
            top_label,
        })
    }
}

/// Index of the largest value; the first one wins ties. NaNs never win.
pub fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::model::tests::tiny_classifier;
    use crate::model::{FeatureDescription, Layer, ModelDescription};

    fn affine_regressor() -> Model {
        let description = ModelDescription {
            short_description: String::new(),
            input: FeatureDescription::new("x", vec![2]),
            output: FeatureDescription::new("y", vec![2]),
            class_labels: None,
            user_defined: BTreeMap::new(),
        };
        let weights = Matrix::from_vec(vec![1., 2., -1., 0.5], 2, 2).unwrap();
        Model::new(
            description,
            vec![Layer::dense("dense", weights, Some(vec![0.5, -3.0]), Activation::Relu)],
        )
        .unwrap()
    }

    #[test]
    fn dense_relu_forward() {
        let compiled = CompiledModel::compile(&affine_regressor()).unwrap();
        let prediction = compiled.predict(&[1.0, 2.0]).unwrap();

        // [1 + 4 + 0.5, -1 + 1 - 3] -> relu
        assert_eq!(vec![5.5, 0.0], prediction.output);
        assert_eq!(None, prediction.top_label);
    }

    #[test]
    fn classifier_reports_top_label() {
        let compiled = CompiledModel::compile(&tiny_classifier()).unwrap();
        let prediction = compiled.predict(&[0.3, -0.2, 0.9, 0.1]).unwrap();

        assert_abs_diff_eq!(prediction.output.iter().sum::<f32>(), 1.0, epsilon = 1e-5);
        let (index, label) = prediction.top_label.unwrap();
        assert_eq!(Some(index), argmax(&prediction.output));
        assert!(["pizza", "sushi", "salad"].contains(&label.as_str()));
    }

    #[test]
    fn wrong_input_length() {
        let compiled = CompiledModel::compile(&tiny_classifier()).unwrap();

        assert!(matches!(
            compiled.predict(&[1.0; 3]),
            Err(Error::InputShape {
                expected: 4,
                actual: 3
            })
        ));
    }

    #[test]
    fn argmax_ties_and_nan() {
        assert_eq!(Some(1), argmax(&[0.0, 2.0, 2.0]));
        assert_eq!(Some(2), argmax(&[f32::NAN, -1.0, 0.0]));
        assert_eq!(None, argmax(&[]));
    }
}
