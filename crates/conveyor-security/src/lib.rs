pub mod logging;
pub mod redaction;

pub use logging::init_tracing;
pub use redaction::{RedactingWriter, redact_parameters, redact_secrets};
