use tracing_subscriber::EnvFilter;

use crate::redaction::RedactingWriter;

/// Install a global fmt subscriber that writes redacted output to stderr.
///
/// `default_filter` is used when `RUST_LOG` is unset. Returns `false` if a
/// global subscriber was already installed.
pub fn init_tracing(default_filter: &str, json: bool) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(RedactingWriter::stderr())
        .with_target(true);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.is_ok()
}
