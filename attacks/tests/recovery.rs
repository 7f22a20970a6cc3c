//! Recovery optimizer behavior: convergence on a known problem, dryrun
//! iteration accounting, determinism across runs, and label inference.

use attacks::recovery::{Auxiliary, Distance, Init, RecoveryConfig, RecoveryOptimizer};
use machine_learning::arch::activations::ActFn;
use machine_learning::arch::loss::Loss;
use machine_learning::arch::{ArchSpec, LayerSpec, Sequential};
use ndarray::{Array2, array};
use protocol::{ModelPayload, PayloadMetadata, SharedData, param_records};
use rand::{SeedableRng, rngs::StdRng};

/// A fixed, invertible single-layer regression model.
fn linear_payload() -> ModelPayload {
    let arch = ArchSpec::new(
        "linear",
        [LayerSpec::Dense {
            inputs: 2,
            outputs: 2,
            act: ActFn::Identity,
        }],
    )
    .unwrap();
    let params = vec![1.0, 0.2, -0.3, 0.8, 0.0, 0.0];
    let records = param_records(&arch, true);
    ModelPayload::new(arch, params, records, PayloadMetadata::default()).unwrap()
}

fn classifier_payload() -> ModelPayload {
    let arch = ArchSpec::new(
        "classifier",
        [LayerSpec::Dense {
            inputs: 3,
            outputs: 4,
            act: ActFn::Identity,
        }],
    )
    .unwrap();
    let params = arch.init_params(&mut StdRng::seed_from_u64(17));
    let records = param_records(&arch, true);
    ModelPayload::new(arch, params, records, PayloadMetadata::default()).unwrap()
}

fn reveal(
    payload: &ModelPayload,
    x: &Array2<f32>,
    targets: &Array2<f32>,
    loss: &Loss,
    labels: Option<Vec<usize>>,
) -> SharedData {
    let net = Sequential::from_spec(payload.arch());
    let trace = net.trace(payload.params(), x.view()).unwrap();
    let mut grads = vec![0.0; net.size()];
    net.backward(payload.params(), &trace, targets.view(), loss, &mut grads)
        .unwrap();
    SharedData::new(grads, labels, x.nrows()).unwrap()
}

fn regression_problem() -> (ModelPayload, SharedData, Auxiliary, Array2<f32>) {
    let payload = linear_payload();
    let truth = array![[0.7_f32, -0.4]];
    let targets = array![[0.1_f32, 0.3]];
    let shared = reveal(&payload, &truth, &targets, &Loss::mse(), None);
    let aux = Auxiliary {
        labels: None,
        targets: Some(targets),
    };
    (payload, shared, aux, truth)
}

#[test]
fn gradient_matching_recovers_a_linear_regression_batch() {
    let (payload, shared, aux, truth) = regression_problem();
    let cfg = RecoveryConfig {
        max_iterations: 3000,
        learning_rate: 0.05,
        distance: Distance::Euclidean,
        loss: Loss::mse(),
        init: Init::Randn,
        seed: 3,
        ..RecoveryConfig::default()
    };
    let optimizer = RecoveryOptimizer::new(cfg);
    let (candidate, stats) = optimizer.reconstruct(&[payload], &[shared], &aux).unwrap();

    assert!(stats.final_loss() < 1e-3, "loss {}", stats.final_loss());
    for (got, want) in candidate.iter().zip(truth.iter()) {
        assert!((got - want).abs() < 0.05, "got {got}, want {want}");
    }
}

#[test]
fn repeated_observations_tighten_the_same_objective() {
    let (payload, shared, aux, _) = regression_problem();
    let cfg = RecoveryConfig {
        max_iterations: 2000,
        learning_rate: 0.05,
        distance: Distance::Euclidean,
        loss: Loss::mse(),
        seed: 3,
        ..RecoveryConfig::default()
    };
    let optimizer = RecoveryOptimizer::new(cfg);
    let (_, stats) = optimizer
        .reconstruct(
            &[payload.clone(), payload],
            &[shared.clone(), shared],
            &aux,
        )
        .unwrap();
    assert!(stats.final_loss() < 1e-2, "loss {}", stats.final_loss());
}

#[test]
fn duplicated_observations_keep_the_objective_scale() {
    let (payload, shared, aux, _) = regression_problem();
    let cfg = RecoveryConfig {
        max_iterations: 1,
        dryrun_iterations: Some(1),
        loss: Loss::mse(),
        distance: Distance::Euclidean,
        seed: 3,
        ..RecoveryConfig::default()
    };

    let single = RecoveryOptimizer::new(cfg.clone())
        .reconstruct(&[payload.clone()], &[shared.clone()], &aux)
        .unwrap()
        .1;
    let doubled = RecoveryOptimizer::new(cfg)
        .reconstruct(&[payload.clone(), payload], &[shared.clone(), shared], &aux)
        .unwrap()
        .1;

    // Same seed, same init; the averaged objective must not grow with the
    // amount of identical observations.
    assert!((single.final_loss() - doubled.final_loss()).abs() < 1e-6);
}

#[test]
fn dryrun_runs_exactly_the_configured_iterations() {
    let (payload, shared, aux, _) = regression_problem();
    let cfg = RecoveryConfig {
        max_iterations: 3000,
        dryrun_iterations: Some(7),
        // Both stops would trigger immediately if dryrun didn't disable them.
        loss_threshold: Some(f32::INFINITY),
        patience: Some(0),
        loss: Loss::mse(),
        distance: Distance::Euclidean,
        ..RecoveryConfig::default()
    };
    let optimizer = RecoveryOptimizer::new(cfg);
    let (_, stats) = optimizer.reconstruct(&[payload], &[shared], &aux).unwrap();
    assert_eq!(stats.iterations(), 7);
}

#[test]
fn loss_threshold_stops_a_converged_restart_early() {
    let (payload, shared, aux, _) = regression_problem();
    let cfg = RecoveryConfig {
        max_iterations: 3000,
        learning_rate: 0.05,
        loss_threshold: Some(1e-2),
        loss: Loss::mse(),
        distance: Distance::Euclidean,
        seed: 3,
        ..RecoveryConfig::default()
    };
    let optimizer = RecoveryOptimizer::new(cfg);
    let (_, stats) = optimizer.reconstruct(&[payload], &[shared], &aux).unwrap();
    assert!(stats.iterations() < 3000);
    assert!(stats.final_loss() <= 1e-2);
}

#[test]
fn identical_seeds_give_identical_reconstructions() {
    let (payload, shared, aux, _) = regression_problem();
    let cfg = RecoveryConfig {
        max_iterations: 50,
        restarts: 3,
        loss: Loss::mse(),
        distance: Distance::Euclidean,
        seed: 11,
        ..RecoveryConfig::default()
    };

    let run = |cfg: RecoveryConfig| {
        RecoveryOptimizer::new(cfg)
            .reconstruct(&[payload.clone()], &[shared.clone()], &aux)
            .unwrap()
    };
    let (a, stats_a) = run(cfg.clone());
    let (b, stats_b) = run(cfg.clone());
    assert_eq!(a, b);
    assert_eq!(stats_a.final_loss(), stats_b.final_loss());
    assert_eq!(stats_a.restart_losses(), stats_b.restart_losses());
    assert_eq!(stats_a.restart_losses().len(), 3);
    let best = stats_a.final_loss();
    assert!(stats_a.restart_losses().iter().all(|&l| l >= best));

    let (c, _) = run(RecoveryConfig { seed: 12, ..cfg });
    assert_ne!(a, c);
}

#[test]
fn labels_are_inferred_from_the_head_bias_gradient() {
    let payload = classifier_payload();
    let truth = array![[0.5_f32, -0.2, 0.8], [-0.7, 0.3, 0.1]];
    let mut targets = Array2::zeros((2, 4));
    targets[(0, 1)] = 1.0;
    targets[(1, 3)] = 1.0;
    let shared = reveal(&payload, &truth, &targets, &Loss::cross_entropy(), None);

    let cfg = RecoveryConfig {
        max_iterations: 1,
        dryrun_iterations: Some(1),
        ..RecoveryConfig::default()
    };
    let optimizer = RecoveryOptimizer::new(cfg);
    let (_, stats) = optimizer
        .reconstruct(&[payload], &[shared], &Auxiliary::default())
        .unwrap();
    assert_eq!(stats.inferred_labels(), Some(&[1_usize, 3][..]));
}

#[test]
fn batches_larger_than_the_class_count_still_reconstruct() {
    let arch = ArchSpec::new(
        "narrow",
        [LayerSpec::Dense {
            inputs: 3,
            outputs: 2,
            act: ActFn::Identity,
        }],
    )
    .unwrap();
    let params = arch.init_params(&mut StdRng::seed_from_u64(17));
    let records = param_records(&arch, true);
    let payload = ModelPayload::new(arch, params, records, PayloadMetadata::default()).unwrap();

    // Three samples over two classes: the withheld labels must repeat, and
    // inference has to pad rather than come up short.
    let truth = array![[0.5_f32, -0.2, 0.8], [-0.7, 0.3, 0.1], [0.2, 0.9, -0.4]];
    let mut targets = Array2::zeros((3, 2));
    targets[(0, 1)] = 1.0;
    targets[(1, 0)] = 1.0;
    targets[(2, 1)] = 1.0;
    let shared = reveal(&payload, &truth, &targets, &Loss::cross_entropy(), None);

    let cfg = RecoveryConfig {
        max_iterations: 1,
        dryrun_iterations: Some(1),
        ..RecoveryConfig::default()
    };
    let (candidate, stats) = RecoveryOptimizer::new(cfg)
        .reconstruct(&[payload], &[shared], &Auxiliary::default())
        .unwrap();

    assert_eq!(candidate.nrows(), 3);
    let inferred = stats.inferred_labels().unwrap();
    assert_eq!(inferred.len(), 3);
    assert!(inferred.iter().all(|&c| c < 2));
}

#[test]
fn supplied_labels_suppress_inference() {
    let payload = classifier_payload();
    let truth = array![[0.5_f32, -0.2, 0.8]];
    let mut targets = Array2::zeros((1, 4));
    targets[(0, 2)] = 1.0;
    let shared = reveal(
        &payload,
        &truth,
        &targets,
        &Loss::cross_entropy(),
        Some(vec![2]),
    );

    let cfg = RecoveryConfig {
        max_iterations: 1,
        dryrun_iterations: Some(1),
        ..RecoveryConfig::default()
    };
    let optimizer = RecoveryOptimizer::new(cfg);
    let (_, stats) = optimizer
        .reconstruct(&[payload], &[shared], &Auxiliary::default())
        .unwrap();
    assert!(stats.inferred_labels().is_none());
}

#[test]
fn clamped_candidates_stay_in_bounds() {
    let (payload, shared, aux, _) = regression_problem();
    let cfg = RecoveryConfig {
        max_iterations: 200,
        clamp: Some((-0.5, 0.5)),
        loss: Loss::mse(),
        distance: Distance::Euclidean,
        ..RecoveryConfig::default()
    };
    let optimizer = RecoveryOptimizer::new(cfg);
    let (candidate, _) = optimizer.reconstruct(&[payload], &[shared], &aux).unwrap();
    assert!(candidate.iter().all(|v| (-0.5..=0.5).contains(v)));
}

#[test]
fn trajectory_follows_the_callback_interval() {
    let (payload, shared, aux, _) = regression_problem();
    let cfg = RecoveryConfig {
        max_iterations: 12,
        dryrun_iterations: Some(12),
        callback: 5,
        loss: Loss::mse(),
        distance: Distance::Euclidean,
        ..RecoveryConfig::default()
    };
    let optimizer = RecoveryOptimizer::new(cfg);
    let (_, stats) = optimizer.reconstruct(&[payload], &[shared], &aux).unwrap();
    let recorded: Vec<usize> = stats.trajectory().iter().map(|(it, _)| *it).collect();
    assert_eq!(recorded, vec![0, 5, 10]);
    assert!(stats.final_loss() <= stats.trajectory()[0].1);
}
