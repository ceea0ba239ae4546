//! Input perturbation along the input derivative

mod common;

use common::{assert_close, classification_eg, classifier, options, params};
use nnet_core::components::AffineComponent;
use nnet_core::{Component, InputNode, Matrix, Nnet, NnetExample, NnetIo, ObjectiveType, OutputNode};
use nnet_train::{NnetTrainer, NnetTrainerOptions};

/// y = x · [1, 2] (no bias), quadratic objective
fn projection_nnet() -> Nnet {
    let comps: Vec<(String, Box<dyn Component>)> = vec![(
        "affine".into(),
        Box::new(AffineComponent::from_params(2, 1, vec![1.0, 2.0, 0.0], 0.1, 0.0, false)),
    )];
    Nnet::new(
        InputNode {
            name: "input".into(),
            dim: 2,
        },
        comps,
        vec![OutputNode {
            name: "output".into(),
            objective_type: ObjectiveType::Quadratic,
            tap: 1,
        }],
    )
    .unwrap()
}

fn perturb_options(epsilon: f32) -> NnetTrainerOptions {
    NnetTrainerOptions {
        perturb_epsilon: epsilon,
        ..options()
    }
}

#[test]
fn test_each_sequence_is_normalized_separately() {
    let mut nnet = projection_nnet();
    let mut trainer = NnetTrainer::new(perturb_options(0.1), &mut nnet).unwrap();

    // Row 0: output 1, target 0 -> d/dx = -(1) * [1, 2]
    // Row 1: output 0, target 0 -> zero derivative, left untouched
    let eg = NnetExample::new(vec![
        NnetIo::new("input", Matrix::from_rows(&[vec![1.0, 0.0], vec![0.0, 0.0]]).unwrap()),
        NnetIo::new("output", Matrix::from_rows(&[vec![0.0], vec![0.0]]).unwrap()),
    ]);
    assert_eq!(eg.minibatch_size, 2);
    let perturbed = trainer.perturb_input_with_input_deriv(&eg).unwrap();
    let x = perturbed.find("input").unwrap().features.to_dense();

    let norm = 5.0f32.sqrt();
    assert_close(x.get(0, 0), 1.0 + 0.1 / norm, 1e-6);
    assert_close(x.get(0, 1), 0.2 / norm, 1e-6);
    assert_eq!(x.row(1), &[0.0, 0.0]);
}

#[test]
fn test_whole_minibatch_as_one_sequence() {
    let mut nnet = projection_nnet();
    let mut trainer = NnetTrainer::new(perturb_options(1.0), &mut nnet).unwrap();
    let eg = NnetExample::new(vec![
        NnetIo::new("input", Matrix::from_rows(&[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap()),
        NnetIo::new("output", Matrix::from_rows(&[vec![0.0], vec![0.0]]).unwrap()),
    ])
    .with_minibatch_size(1);
    let perturbed = trainer.perturb_input_with_input_deriv(&eg).unwrap();
    let x = perturbed.find("input").unwrap().features.to_dense();
    let d = Matrix::from_rows(&[vec![1.0, 2.0], vec![2.0, 4.0]]).unwrap();
    let norm = d.frobenius_norm();
    // x - eps * (-d / norm)
    assert_close(x.get(0, 0), 1.0 + 1.0 / norm, 1e-6);
    assert_close(x.get(1, 1), 1.0 + 4.0 / norm, 1e-6);
}

#[test]
fn test_perturbation_does_not_train() {
    let mut nnet = classifier(9);
    let mut trainer = NnetTrainer::new(perturb_options(0.01), &mut nnet).unwrap();
    let before = params(trainer.nnet());
    let eg = classification_eg(5, 3);
    let perturbed = trainer.perturb_input_with_input_deriv(&eg).unwrap();
    assert_eq!(params(trainer.nnet()), before);
    assert!(params(trainer.delta()).iter().flatten().all(|&p| p == 0.0));
    assert_ne!(perturbed.find("input"), eg.find("input"));
    assert_eq!(perturbed.find("output"), eg.find("output"));

    // The perturbed example can be trained on directly
    trainer.train(&perturbed).unwrap();
    assert_eq!(trainer.compiler().num_compilations(), 2);
}
