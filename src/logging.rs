//! Tracing subscriber set-up for engine diagnostics

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber (stderr writer)
///
/// With `debug` the TRACE directive is added on top of `RUST_LOG`.
/// Safe to call repeatedly: a subscriber installed earlier (by the host or a
/// previous engine) is left in place.
pub fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    if installed.is_err() {
        tracing::trace!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_repeatable() {
        init_tracing(false);
        init_tracing(true);
    }
}
