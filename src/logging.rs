//! Tracing subscriber setup.

use crate::config::Config;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install the global subscriber. `RUST_LOG` wins over `config.log_level`.
///
/// Returns `false` when a subscriber was already installed, so applications
/// that configure tracing themselves can still call [`crate::init`].
pub fn init_tracing(config: &Config) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let result = if config.json_logs {
        subscriber.with(fmt::layer().json()).try_init()
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .try_init()
    };
    result.is_ok()
}
