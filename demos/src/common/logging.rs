use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Installs the global subscriber. `RUST_LOG` selects the level, `info` by default.
///
/// # Errors
///
/// Fails when a global subscriber is already installed.
pub fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);

    Registry::default()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}
