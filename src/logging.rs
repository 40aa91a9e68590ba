//! Diagnostic logging to stderr.
//!
//! `RUST_LOG` wins when set; otherwise the level comes from the CLI
//! (`warn` by default, `debug` with `--verbose`). Command output goes to
//! stdout and is never mixed with log lines.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "pawtrack=debug,paw=debug,info" } else { "warn" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbose);

    // A second init (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}
