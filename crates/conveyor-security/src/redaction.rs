use serde_json::Value;
use tracing_subscriber::fmt::MakeWriter;

const REDACTED: &str = "[REDACTED]";

/// Parameter keys whose values are never written to logs.
const SENSITIVE_KEY_FRAGMENTS: &[&str] = &[
    "api_key",
    "apikey",
    "token",
    "secret",
    "password",
    "authorization",
    "credential",
];

/// A writer that redacts sensitive tokens (API keys, bearer tokens) from log output.
pub struct RedactingWriter<W> {
    inner: W,
}

impl RedactingWriter<std::io::Stderr> {
    pub fn stderr() -> Self {
        Self {
            inner: std::io::stderr(),
        }
    }
}

impl<W: std::io::Write> std::io::Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let original = String::from_utf8_lossy(buf);
        let redacted = redact_secrets(&original);
        self.inner.write_all(redacted.as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl<'a> MakeWriter<'a> for RedactingWriter<std::io::Stderr> {
    type Writer = RedactingWriter<std::io::Stderr>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            inner: std::io::stderr(),
        }
    }
}

/// Replace known API key patterns with `[REDACTED]`.
pub fn redact_secrets(input: &str) -> String {
    static PATTERNS: std::sync::LazyLock<regex::Regex> = std::sync::LazyLock::new(|| {
        regex::Regex::new(
            r"(?x)
              sk-ant-api\S{10,}          # Anthropic API keys
            | sk-\S{20,}                 # OpenAI-style keys
            | AIza[0-9A-Za-z_\-]{30,}    # Google API keys
            | Bearer\s+[A-Za-z0-9._\-]{20,}
            | xoxb-\S{10,}               # Slack bot tokens
            ",
        )
        .expect("redaction regex should compile")
    });

    PATTERNS.replace_all(input, REDACTED).into_owned()
}

/// Copy of a tool parameter map that is safe to log: values under sensitive
/// keys are replaced and secret patterns inside strings are masked.
pub fn redact_parameters(params: &Value) -> Value {
    match params {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| {
                    let lowered = key.to_ascii_lowercase();
                    let masked = if SENSITIVE_KEY_FRAGMENTS
                        .iter()
                        .any(|fragment| lowered.contains(fragment))
                        && !value.is_null()
                    {
                        Value::String(REDACTED.to_string())
                    } else {
                        redact_parameters(value)
                    };
                    (key.clone(), masked)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_parameters).collect()),
        Value::String(text) => Value::String(redact_secrets(text)),
        other => other.clone(),
    }
}
