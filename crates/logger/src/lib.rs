use std::env::var;

use tracing::{level_filters::LevelFilter, warn};
use tracing_subscriber::{Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the process-wide tracing subscriber at `info` unless `RUST_LOG`
/// says otherwise.
pub fn init_tracing() {
    initialize_tracing(LevelFilter::INFO);
}

/// Same as [`init_tracing`] with `debug` as the fallback level.
pub fn init_tracing_verbose() {
    initialize_tracing(LevelFilter::DEBUG);
}

/// `RUST_LOG_FORMAT=json` selects the JSON formatter, anything else the
/// compact one.
fn initialize_tracing(level: LevelFilter) {
    let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    let log_format = var("RUST_LOG_FORMAT");
    let log_layer = match log_format.as_deref() {
        Ok("json") => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(false)
            .with_filter(env_filter)
            .boxed(),
        _ => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_filter(env_filter)
            .boxed(),
    };

    if tracing_subscriber::registry().with(log_layer).try_init().is_err() {
        warn!("tracing subscriber already installed, keeping the existing one");
    }
}
