//! Structured logging for the long-running server.
//!
//! Filter with `RUST_LOG` (e.g. `RUST_LOG=answerbot=debug`); defaults to
//! `info`. One-shot CLI commands print to stdout instead.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A second init (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .try_init();
}
