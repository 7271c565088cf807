//! Adversarial Training Steps
//!
//! Runs a few Adam steps of the hinge loss on synthetic real and fake batches.
//! With `checkpoint` set in the model configuration the steps run on Burn's
//! checkpointing autodiff backend.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --bin train_step
//! cargo run --release --bin train_step -- --config train.json --steps 20
//! cargo run --release --bin train_step -- --checkpoint
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use sed_demos::{create_device, get_backend_name, init_tracing, train, TrainStepConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Training configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the number of steps
    #[arg(long)]
    steps: Option<usize>,

    /// Recompute activations during the backward pass
    #[arg(long)]
    checkpoint: bool,
}

fn main() -> Result<()> {
    init_tracing()?;
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => TrainStepConfig::from_file(path)?,
        None => TrainStepConfig::default(),
    };
    if let Some(steps) = args.steps {
        config.steps = steps;
    }
    if args.checkpoint {
        config.model.checkpoint = true;
    }

    let device = create_device();
    tracing::info!(
        backend = get_backend_name(),
        steps = config.steps,
        checkpoint = config.model.checkpoint,
        "training"
    );

    let report = train(&config, &device)?;
    for (step, loss) in report.losses.iter().enumerate() {
        tracing::info!(step, loss, "discriminator step");
    }

    println!(
        "Finished {} steps ({} checkpointing)",
        report.losses.len(),
        report.strategy
    );
    Ok(())
}
