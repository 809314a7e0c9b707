//! Tracing setup. The library crate stays silent; the subscriber is
//! installed here, writing to stderr so module bytes on stdout stay clean.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence when set; otherwise `-v` raises our own
/// crates to DEBUG and `-vv` to TRACE while third-party noise stays at
/// warn.
///
/// # Panics
/// Panics when a subscriber is already installed.
pub fn init(verbosity: u8, json: bool) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("warn")
            .add_directive(format!("modport={level}").parse().unwrap())
            .add_directive(format!("modport_core={level}").parse().unwrap())
    });

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}
