//! Discriminator Smoke Test
//!
//! Builds the semantic-aware discriminator, runs one forward pass on random
//! tensors and prints the size of the patch score map.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --bin smoke
//! cargo run --release --bin smoke -- --config sed.json --batch 4
//! cargo run --release --bin smoke -- --save-config sed.json
//! ```

use std::{path::PathBuf, time::Instant};

use anyhow::{Context, Result};
use burn::{config::Config, module::Module, prelude::*, tensor::Distribution};
use clap::Parser;
use sed_demos::{create_device, get_backend_name, init_tracing, load_model_config, SelectedBackend};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Discriminator configuration (JSON). Defaults to the 256x256 reference setup.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the effective configuration to this path
    #[arg(long)]
    save_config: Option<PathBuf>,

    /// Number of images in the batch
    #[arg(short, long, default_value = "1")]
    batch: usize,

    /// Seed of the backend random generator
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    init_tracing()?;
    let args = Args::parse();

    let config = load_model_config(args.config.as_deref())?;
    if let Some(path) = &args.save_config {
        config
            .save(path)
            .with_context(|| format!("Failed to save config: {}", path.display()))?;
        tracing::info!(path = %path.display(), "configuration saved");
    }

    let device = create_device();
    if let Some(seed) = args.seed {
        SelectedBackend::seed(seed);
    }
    tracing::info!(backend = get_backend_name(), "using backend");

    let model = config.init::<SelectedBackend>(&device)?;
    let plan = model.plan();
    for stage in &plan.stages {
        tracing::info!(
            stage = stage.index,
            width = stage.width,
            resolution = stage.resolution,
            upscale = stage.upscale,
            injected = stage.injected_channels,
            last = stage.is_last,
            "injection stage"
        );
    }
    tracing::info!(parameters = model.num_params(), "model built");

    let image = Tensor::<SelectedBackend, 4>::random(
        [args.batch, config.input_channels, config.image_size, config.image_size],
        Distribution::Normal(0.0, 1.0),
        &device,
    );
    let semantic = Tensor::<SelectedBackend, 4>::random(
        [args.batch, config.semantic_dim, config.semantic_size, config.semantic_size],
        Distribution::Normal(0.0, 1.0),
        &device,
    );

    let start = Instant::now();
    let output = model.forward(image, semantic)?;
    tracing::info!(elapsed_ms = start.elapsed().as_millis() as u64, "forward pass done");

    println!("PatchGAN size: {:?}", output.dims());
    Ok(())
}
