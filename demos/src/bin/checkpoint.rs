//! Gradient Checkpointing Check
//!
//! Runs one transformer block of the discriminator twice, once tracked and once
//! through a checkpoint replay, and prints how far the outputs and gradients of
//! the two runs are apart.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --bin checkpoint -- --tokens 256 --context-tokens 1024
//! ```

use anyhow::{Context, Result};
use burn::{
    optim::GradientsParams,
    prelude::*,
    tensor::{Distribution, ElementConversion},
};
use clap::Parser;
use sed_burn::BasicTransformerBlockConfig;
use sed_demos::{create_device, get_backend_name, init_tracing, SelectedAutodiffBackend};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of query tokens (semantic positions)
    #[arg(long, default_value = "256")]
    tokens: usize,

    /// Number of context tokens (backbone positions)
    #[arg(long, default_value = "1024")]
    context_tokens: usize,

    /// Attention heads
    #[arg(long, default_value = "1")]
    heads: usize,

    /// Width of every head
    #[arg(long, default_value = "64")]
    head_dim: usize,
}

fn max_abs_diff<B: Backend, const D: usize>(a: Tensor<B, D>, b: Tensor<B, D>) -> f32 {
    (a - b).abs().max().into_scalar().elem::<f32>()
}

fn main() -> Result<()> {
    init_tracing()?;
    let args = Args::parse();
    let device = create_device();
    tracing::info!(backend = get_backend_name(), "using backend");

    let dim = args.heads * args.head_dim;
    let block = BasicTransformerBlockConfig::new(dim, args.heads, args.head_dim)
        .with_checkpoint(true)
        .init::<SelectedAutodiffBackend>(&device)?;

    let x = Tensor::<SelectedAutodiffBackend, 3>::random(
        [1, args.tokens, dim],
        Distribution::Normal(0.0, 1.0),
        &device,
    );
    let context = Tensor::<SelectedAutodiffBackend, 3>::random(
        [1, args.context_tokens, dim],
        Distribution::Normal(0.0, 1.0),
        &device,
    );

    // Tracked reference.
    let x_plain = x.clone().require_grad();
    let context_plain = context.clone().require_grad();
    let plain = block.forward(x_plain.clone(), context_plain.clone());
    let grads = plain.clone().sum().backward();
    let x_grad = x_plain.grad(&grads).context("input received no gradient")?;
    let context_grad = context_plain
        .grad(&grads)
        .context("context received no gradient")?;
    let plain_params = GradientsParams::from_grads(grads, &block);

    // Checkpointed run followed by the replay.
    let result = block.forward_checkpointed(x, context);
    let output_diff = max_abs_diff(plain.inner(), result.output.clone().inner());
    let grad_output = result.output.inner().ones_like();
    let replayed = result
        .replay
        .context("checkpointing was not enabled on the block")?
        .backward(&block, grad_output);

    let input_diff = max_abs_diff(
        replayed.input.clone().context("replay produced no input gradient")?,
        x_grad,
    );
    let context_diff = max_abs_diff(
        replayed.aux[0]
            .clone()
            .context("replay produced no context gradient")?,
        context_grad,
    );
    let replay_params = replayed.into_params(&block);

    tracing::info!(
        tracked = plain_params.len(),
        replayed = replay_params.len(),
        "parameters with gradients"
    );
    println!("max |output diff|:  {output_diff:e}");
    println!("max |input grad diff|:  {input_diff:e}");
    println!("max |context grad diff|: {context_diff:e}");

    Ok(())
}
