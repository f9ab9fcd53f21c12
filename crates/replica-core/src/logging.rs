//! Tracing subscriber setup for the `replica` binary

use tracing_subscriber::{fmt, EnvFilter};

/// Default filter for a verbosity level
#[must_use]
pub fn default_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn,replica_core=info",
        1 => "info,replica_core=debug,replica_kernel=debug",
        _ => "debug,replica_core=trace,replica_kernel=trace",
    }
}

/// Initialize logging.
///
/// `RUST_LOG` overrides the verbosity-derived filter. Calling this more than
/// once keeps the first subscriber.
pub fn init(verbosity: u8, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));

    let result = if json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init()
    };
    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_parse() {
        for verbosity in 0..4 {
            assert!(EnvFilter::try_new(default_filter(verbosity)).is_ok());
        }
    }

    #[test]
    fn init_twice_is_harmless() {
        init(0, false);
        init(2, true);
    }
}
