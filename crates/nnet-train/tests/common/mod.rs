//! Common test utilities for nnet-train tests

#![allow(dead_code)] // These utilities may be used by various test files

use nnet_core::components::AffineComponent;
use nnet_core::{
    Component, InputNode, Matrix, Nnet, NnetConfig, NnetExample, NnetIo, ObjectiveType,
    OutputNode, SparseMatrix,
};
use nnet_train::NnetTrainerOptions;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

/// 4 inputs, 3 classes, with a natural-gradient affine layer and dropout
pub const CLASSIFIER: &str = r#"
[input]
dim = 4

[[component]]
name = "affine1"
type = "affine"
input_dim = 4
output_dim = 8
learning_rate = 0.05
max_change = 0.75
natural_gradient = true

[[component]]
name = "relu1"
type = "relu"
dim = 8

[[component]]
name = "dropout1"
type = "dropout"
dim = 8
proportion = 0.2

[[component]]
name = "affine2"
type = "affine"
input_dim = 8
output_dim = 3
learning_rate = 0.05
max_change = 0.75

[[component]]
name = "logsoftmax"
type = "log_softmax"
dim = 3

[[output]]
objective = "linear"
"#;

pub fn classifier(seed: u64) -> Nnet {
    let cfg = NnetConfig::from_toml_str(CLASSIFIER).expect("valid config");
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    Nnet::from_config(&cfg, &mut rng).expect("valid nnet")
}

/// Random inputs; the label is the index of the largest of the first 3 features
pub fn classification_eg(rows: usize, seed: u64) -> NnetExample {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut features = Vec::with_capacity(rows);
    let mut labels = Vec::with_capacity(rows);
    for _ in 0..rows {
        let row: Vec<f32> = (0..4).map(|_| rng.random_range(-1.0..1.0)).collect();
        let label = (0..3)
            .max_by(|&a, &b| row[a].total_cmp(&row[b]))
            .expect("non-empty");
        features.push(row);
        labels.push(label);
    }
    NnetExample::new(vec![
        NnetIo::new("input", Matrix::from_rows(&features).expect("rectangular")),
        NnetIo::new("output", SparseMatrix::one_hot(3, &labels).expect("labels in range")),
    ])
}

/// y = w x + b with a quadratic objective
pub fn scalar_nnet(w: f32, learning_rate: f32) -> Nnet {
    let comps: Vec<(String, Box<dyn Component>)> = vec![(
        "affine".into(),
        Box::new(AffineComponent::from_params(1, 1, vec![w, 0.0], learning_rate, 0.0, false)),
    )];
    Nnet::new(
        InputNode {
            name: "input".into(),
            dim: 1,
        },
        comps,
        vec![OutputNode {
            name: "output".into(),
            objective_type: ObjectiveType::Quadratic,
            tap: 1,
        }],
    )
    .expect("valid nnet")
}

pub fn scalar_eg(x: f32, y: f32) -> NnetExample {
    NnetExample::new(vec![
        NnetIo::new("input", Matrix::from_rows(&[vec![x]]).expect("1x1")),
        NnetIo::new("output", Matrix::from_rows(&[vec![y]]).expect("1x1")),
    ])
}

/// Params of every updatable component, in order
pub fn params(nnet: &Nnet) -> Vec<Vec<f32>> {
    nnet.updatable_components()
        .map(|(_, c)| c.params().to_vec())
        .collect()
}

/// Options with a fixed seed and no global max-change
pub fn options() -> NnetTrainerOptions {
    NnetTrainerOptions {
        max_param_change: 0.0,
        srand_seed: Some(7),
        ..Default::default()
    }
}

pub fn assert_close(a: f32, b: f32, tol: f32) {
    assert!((a - b).abs() <= tol, "{a} != {b} (tol {tol})");
}
