//! Phase statistics, objectives and accuracy

mod common;

use common::{assert_close, classification_eg, classifier, options, scalar_eg, scalar_nnet};
use nnet_core::components::LogSoftmaxComponent;
use nnet_core::{
    CachingCompiler, Component, GeneralMatrix, InputNode, Matrix, Nnet, NnetComputer, NnetExample,
    NnetIo, ObjectiveType, OutputNode, SparseMatrix, get_computation_request,
};
use nnet_train::{
    NnetTrainer, NnetTrainerOptions, ObjectiveFunctionInfo, compute_objective_function,
};

#[test]
fn test_phase_emissions_and_lifetime_average() {
    let mut info = ObjectiveFunctionInfo::new();
    let emitted: Vec<_> = (0..25)
        .filter_map(|counter| info.update_stats("output", 10, counter, 1.0, 2.0, 0.0).unwrap())
        .collect();
    assert_eq!(emitted.len(), 2);
    assert_eq!(emitted[0].end_minibatch + 1, 10);
    assert_eq!(emitted[1].end_minibatch + 1, 20);
    assert_eq!(info.tot_weight(), 25.0);
    assert_eq!(info.average_objf(), Some(2.0));
    assert!(info.print_total_stats("output"));
}

#[test]
fn test_trainer_phases_follow_print_interval() {
    let mut nnet = scalar_nnet(0.0, 0.01);
    let config = NnetTrainerOptions {
        print_interval: 10,
        ..options()
    };
    let mut trainer = NnetTrainer::new(config, &mut nnet).unwrap();
    for _ in 0..25 {
        trainer.train(&scalar_eg(1.0, 0.5)).unwrap();
    }
    let info = trainer.output_stats().get_objf_info("output").unwrap();
    assert_eq!(info.current_phase(), 2);
    assert_eq!(info.tot_weight(), 25.0);
    // Quadratic outputs have no accuracy
    assert!(trainer.output_stats().get_accuracy_info("output").is_none());
    assert!(trainer.print_total_stats());
}

#[test]
fn test_print_total_stats_without_data_is_false() {
    let mut nnet = scalar_nnet(0.0, 0.01);
    let trainer = NnetTrainer::new(options(), &mut nnet).unwrap();
    assert!(!trainer.print_total_stats());
}

#[test]
fn test_accuracy_tracked_for_linear_outputs() {
    let mut nnet = classifier(5);
    let mut trainer = NnetTrainer::new(options(), &mut nnet).unwrap();
    trainer.train(&classification_eg(10, 1)).unwrap();
    let acc = trainer.output_stats().get_accuracy_info("output").unwrap();
    assert_eq!(acc.tot_weight(), 10.0);
    assert!(acc.tot_objf() >= 0.0 && acc.tot_objf() <= 10.0);
}

fn log_softmax_nnet() -> Nnet {
    let comps: Vec<(String, Box<dyn Component>)> =
        vec![("logsoftmax".into(), Box::new(LogSoftmaxComponent::new(3)))];
    Nnet::new(
        InputNode {
            name: "input".into(),
            dim: 3,
        },
        comps,
        vec![OutputNode {
            name: "output".into(),
            objective_type: ObjectiveType::Linear,
            tap: 1,
        }],
    )
    .unwrap()
}

#[test]
fn test_linear_objective_sums_selected_log_probs() {
    let nnet = log_softmax_nnet();
    let x = Matrix::from_rows(&[vec![1.0, 2.0, 3.0], vec![0.0, 0.0, 0.0]]).unwrap();
    let labels = [2, 0];
    let supervision: GeneralMatrix = SparseMatrix::one_hot(3, &labels).unwrap().into();
    let eg = NnetExample::new(vec![
        NnetIo::new("input", x),
        NnetIo::new("output", supervision.clone()),
    ]);
    let request = get_computation_request(&nnet, &eg, true, false).unwrap();
    let mut compiler = CachingCompiler::new(&nnet);
    let computation = compiler.compile(&nnet, &request).unwrap();

    let mut computer = NnetComputer::new(&computation, &nnet, None);
    computer.accept_inputs(&nnet, &eg.io).unwrap();
    computer.run().unwrap();
    let log_probs = computer.get_output("output").unwrap().clone();
    let (weight, objf) = compute_objective_function(
        &supervision,
        ObjectiveType::Linear,
        "output",
        true,
        &mut computer,
    )
    .unwrap();
    computer.run().unwrap();

    assert_eq!(weight, 2.0);
    let expected = log_probs.get(0, 2) + log_probs.get(1, 0);
    assert_close(objf, expected, 1e-6);
    assert_close(log_probs.get(1, 0), -(3.0f32).ln(), 1e-6);
}

#[test]
fn test_quadratic_objective_identical_tensors_is_zero() {
    let x = Matrix::from_rows(&[vec![0.25, -1.0], vec![4.0, 2.0]]).unwrap();
    let v = nnet_train::objective::evaluate(
        "output",
        &x,
        &x.clone().into(),
        ObjectiveType::Quadratic,
        true,
    )
    .unwrap();
    assert_eq!(v.objf, 0.0);
    assert_eq!(v.weight, 2.0);
}

#[test]
fn test_phase_regression_is_fatal() {
    let mut info = ObjectiveFunctionInfo::new();
    info.update_stats("output", 5, 20, 1.0, 1.0, 0.0).unwrap();
    assert!(info.update_stats("output", 5, 4, 1.0, 1.0, 0.0).is_err());
}
