//! Logging infrastructure for childlink
//!
//! The library only emits `tracing` events. Hosts that do not install their
//! own subscriber can call [`init_tracing`].

use std::path::Path;
use tracing::{Level, span};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize a tracing subscriber for structured logging
///
/// `RUST_LOG` wins when set. Otherwise `verbose` selects between
/// `childlink=debug` and `childlink=info,warn`.
///
/// # Errors
///
/// Fails when a global subscriber is already installed.
pub fn init_tracing(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("childlink=debug,childlink_runner=debug,info")
            } else {
                EnvFilter::try_new("childlink=info,childlink_runner=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(verbose)
                .with_thread_names(verbose)
                .with_line_number(false)
                .with_file(false)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .try_init()?;

    Ok(())
}

/// Create a span covering one launch attempt
pub fn launch_span(path: &Path, redirect_stdio: bool) -> tracing::Span {
    span!(
        Level::INFO,
        "launch",
        path = %path.display(),
        redirect_stdio = redirect_stdio,
    )
}

/// Create a span for a stdio forwarding worker
pub fn forwarder_span(name: &'static str) -> tracing::Span {
    span!(Level::DEBUG, "forwarder", name = name)
}
