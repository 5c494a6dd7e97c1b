//! Tracing setup for the node binary.
//!
//! Everything goes to stderr; stdout stays clean for the `demo-approve`
//! verdict and anything else a caller might pipe. `RUST_LOG` overrides the
//! default filter, and setting `VIGIL_LOG_JSON=1` switches the output to
//! JSON lines for log aggregation.

use tracing_subscriber::{fmt, EnvFilter};

const JSON_ENV: &str = "VIGIL_LOG_JSON";

/// Install the global subscriber. Call once from `main` before anything
/// logs; a second call panics inside `tracing`.
pub fn init(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    if json_requested(std::env::var(JSON_ENV).ok().as_deref()) {
        builder.json().init();
    } else {
        builder.with_file(true).with_line_number(true).init();
    }
}

fn json_requested(value: Option<&str>) -> bool {
    matches!(
        value.map(str::trim),
        Some(v) if !v.is_empty() && !v.eq_ignore_ascii_case("0") && !v.eq_ignore_ascii_case("false")
    )
}
