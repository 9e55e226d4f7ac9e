//! Tracing subscriber setup
//!
//! `RUST_LOG` drives the filter; `LOG_FORMAT=json` switches to structured
//! output for log shippers.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_DIRECTIVES: &str = "info,match_scoring_service=debug";

/// Install the global subscriber; safe to call more than once
pub fn init_tracing(format: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    let json = format.eq_ignore_ascii_case("json");
    let json_layer = json.then(|| fmt::layer().json().with_current_span(true));
    let text_layer = (!json).then(|| fmt::layer().with_target(true).with_level(true));

    // A second init (tests, embedding services) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init();
}
