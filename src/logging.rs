//! tracing subscriber setup.
//!
//! Diagnostics go to stderr so they interleave sanely with the stage lines
//! printed by [`crate::ui`].  `RUST_LOG` wins over `--verbose` when set.

use tracing_subscriber::EnvFilter;

pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
}
