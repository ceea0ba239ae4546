//! Momentum carry-over and max-change through the trainer

mod common;

use common::{
    assert_close, classification_eg, classifier, options, params, scalar_eg, scalar_nnet,
};
use nnet_train::{NnetTrainer, NnetTrainerOptions, TrainError};

#[test]
fn test_momentum_carries_pre_merge_delta() {
    let mut nnet = scalar_nnet(0.0, 0.1);
    let config = NnetTrainerOptions {
        momentum: 0.5,
        ..options()
    };
    let mut trainer = NnetTrainer::new(config, &mut nnet).unwrap();
    trainer.train(&scalar_eg(1.0, 1.0)).unwrap();

    // delta = 0.1 * grad(=1), nnet += (1 - 0.5) * delta, then delta *= 0.5
    let p = params(trainer.nnet());
    assert_close(p[0][0], 0.05, 1e-6);
    assert_close(p[0][1], 0.05, 1e-6);
    let d = params(trainer.delta());
    assert_close(d[0][0], 0.05, 1e-6);
    assert_close(d[0][1], 0.05, 1e-6);

    // Next step starts from the carried delta
    trainer.train(&scalar_eg(1.0, 1.0)).unwrap();
    let grad = 1.0 - (0.05 + 0.05);
    let delta = 0.05 + 0.1 * grad;
    let p = params(trainer.nnet());
    assert_close(p[0][0], 0.05 + 0.5 * delta, 1e-6);
    let d = params(trainer.delta());
    assert_close(d[0][0], 0.5 * delta, 1e-6);
}

#[test]
fn test_momentum_uses_pre_clip_delta() {
    let mut nnet = scalar_nnet(0.0, 0.1);
    let config = NnetTrainerOptions {
        momentum: 0.5,
        max_param_change: 0.01,
        ..options()
    };
    let mut trainer = NnetTrainer::new(config, &mut nnet).unwrap();
    trainer.train(&scalar_eg(1.0, 1.0)).unwrap();

    // |0.5 * delta| = 0.0707 > 0.01, so the applied change is clipped to 0.01
    let p = params(trainer.nnet());
    let change = (p[0][0] * p[0][0] + p[0][1] * p[0][1]).sqrt();
    assert_close(change, 0.01, 1e-6);
    assert_eq!(trainer.max_change_stats().global, 1);

    // ... while the carried delta is half of the unclipped one
    let d = params(trainer.delta());
    assert_close(d[0][0], 0.05, 1e-6);
    assert_close(d[0][1], 0.05, 1e-6);
}

#[test]
fn test_negative_momentum_rejected() {
    let mut nnet = scalar_nnet(0.0, 0.1);
    let config = NnetTrainerOptions {
        momentum: -0.1,
        ..options()
    };
    let err = NnetTrainer::new(config, &mut nnet).err().unwrap();
    assert!(matches!(err, TrainError::InvalidConfig(_)));
}

#[test]
fn test_negative_max_param_change_rejected() {
    let mut nnet = scalar_nnet(0.0, 0.1);
    let config = NnetTrainerOptions {
        max_param_change: -2.0,
        ..options()
    };
    assert!(NnetTrainer::new(config, &mut nnet).is_err());
}

#[test]
fn test_global_max_change_bounds_every_step() {
    let bound = 0.05;
    let mut nnet = classifier(11);
    let config = NnetTrainerOptions {
        max_param_change: bound,
        ..options()
    };
    let mut trainer = NnetTrainer::new(config, &mut nnet).unwrap();
    for i in 0..10 {
        let before = params(trainer.nnet());
        trainer.train(&classification_eg(16, i)).unwrap();
        let after = params(trainer.nnet());
        let change: f32 = before
            .iter()
            .flatten()
            .zip(after.iter().flatten())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt();
        assert!(change <= bound + 1e-5, "step {i}: change {change} > {bound}");
    }
    let stats = trainer.max_change_stats();
    assert_eq!(stats.num_updates, 10);
    assert!(stats.global <= 10);
    assert!(stats.global_percent() <= 100.0);
    assert_eq!(stats.per_component.len(), 2);
}

#[test]
fn test_non_finite_step_discards_carried_delta() {
    let mut nnet = scalar_nnet(0.0, 0.1);
    let config = NnetTrainerOptions {
        momentum: 0.5,
        ..options()
    };
    let mut trainer = NnetTrainer::new(config, &mut nnet).unwrap();
    trainer.train(&scalar_eg(1.0, 1.0)).unwrap();
    assert!(params(trainer.delta()).iter().flatten().any(|&d| d != 0.0));
    let before = params(trainer.nnet());

    // Gradient for w overflows to infinity: nothing is merged and the delta is zeroed
    trainer.train(&scalar_eg(1e30, 0.0)).unwrap();
    assert_eq!(params(trainer.nnet()), before);
    assert!(params(trainer.delta()).iter().flatten().all(|&d| d == 0.0));
    assert_eq!(trainer.max_change_stats().per_component, vec![0]);

    // The next minibatch trains from a clean delta
    trainer.train(&scalar_eg(1.0, 1.0)).unwrap();
    let p = params(trainer.nnet());
    assert!(p.iter().flatten().all(|v| v.is_finite()));
    assert_ne!(p, before);
}
