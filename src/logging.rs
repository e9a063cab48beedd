use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Map the `-v` count to a default tracing level.
pub fn level_from_verbosity(verbose: u8) -> tracing::Level {
    match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    }
}

/// Install the global subscriber. Diagnostics go to stderr so `--json` output
/// on stdout stays parseable; `RUST_LOG` directives take precedence.
pub fn init(level: tracing::Level) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(level_from_verbosity(0), tracing::Level::WARN);
        assert_eq!(level_from_verbosity(1), tracing::Level::INFO);
        assert_eq!(level_from_verbosity(4), tracing::Level::DEBUG);
    }
}
