//! Demo: one round of each attack against a small MLP.
//!
//! Run with `RUST_LOG=info` (or `debug`) to watch the protocol unfold.

use anyhow::Result;
use attacks::imprint::{BinConfig, BlockVariant};
use attacks::recovery::{Auxiliary, RecoveryConfig, RecoveryOptimizer};
use machine_learning::arch::activations::ActFn;
use machine_learning::arch::loss::Loss;
use machine_learning::arch::{ArchSpec, LayerSpec};
use ndarray::Array2;
use ndarray_rand::RandomExt;
use ndarray_rand::rand_distr::StandardNormal;
use protocol::TrueData;
use rand::{SeedableRng, rngs::StdRng};
use simulation::{ReportConfig, Server, User, evaluate};

const DIM: usize = 12;
const CLASSES: usize = 5;
const BATCH: usize = 4;
const BINS: usize = 48;

fn victim_arch() -> Result<ArchSpec> {
    Ok(ArchSpec::new(
        "victim-mlp",
        [
            LayerSpec::Dense {
                inputs: DIM,
                outputs: 16,
                act: ActFn::Tanh,
            },
            LayerSpec::Dense {
                inputs: 16,
                outputs: CLASSES,
                act: ActFn::Identity,
            },
        ],
    )?)
}

fn main() -> Result<()> {
    env_logger::init();

    let mut server = Server::new(victim_arch()?, 7);
    let mut rng = StdRng::seed_from_u64(99);
    let inputs: Array2<f32> = Array2::random_using((BATCH, DIM), StandardNormal, &mut rng);
    let labels: Vec<usize> = (0..BATCH).map(|i| i % CLASSES).collect();
    let user = User::new(
        TrueData {
            inputs: inputs.clone(),
            labels,
        },
        Loss::cross_entropy(),
    );

    // Round 1: the analytic attack. The server hides a sparse measurement
    // block, the user behaves honestly, the block's gradients give the batch
    // away in closed form.
    let block = BlockVariant::Sparse.build(BinConfig::new(DIM, BINS)?, 1)?;
    let (payload, model) = server.distribute_malicious(block.as_ref())?;
    let shared = user.compute_local_updates(&payload)?;
    let sliced = model.handle().slice_gradients(shared.gradients())?;
    let inversion = block.invert(&sliced);
    log::info!(
        "analytic attack recovered {} of {BATCH} samples",
        inversion.len()
    );
    if inversion.len() == BATCH {
        // Bins sort by projection; the report re-matches rows anyway.
        let metrics = evaluate(&inversion.inputs, &inputs, &ReportConfig::default())?;
        log::info!(
            "analytic attack: mse {:.6}, psnr {:.2} dB",
            metrics.mse(),
            metrics.psnr()
        );
    } else {
        log::warn!("bin collision or silent bin; rerun with more bins");
    }

    // Round 2: the optimization attack against the honest payload.
    let payload = server.distribute()?;
    let shared = user.compute_local_updates(&payload)?;
    let optimizer = RecoveryOptimizer::new(RecoveryConfig {
        max_iterations: 2000,
        restarts: 4,
        callback: 200,
        seed: 5,
        ..RecoveryConfig::default()
    });
    let (candidate, stats) = optimizer.reconstruct(&[payload], &[shared], &Auxiliary::default())?;
    let metrics = evaluate(&candidate, &inputs, &ReportConfig::default())?;
    log::info!(
        "optimization attack: objective {:.6} after {} iterations, mse {:.6}, psnr {:.2} dB",
        stats.final_loss(),
        stats.iterations(),
        metrics.mse(),
        metrics.psnr()
    );
    if let Some(inferred) = stats.inferred_labels() {
        log::info!("inferred labels: {inferred:?}");
    }

    Ok(())
}
