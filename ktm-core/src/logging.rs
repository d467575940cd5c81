use tracing_subscriber::fmt::format::FmtSpan;

/// Maps the zerolog-flavored level vocabulary the `--log-level` flag accepts onto the
/// `tracing`/`EnvFilter` vocabulary. `fatal` and `panic` both collapse to `error` since tracing
/// has no equivalent severities; `disabled` becomes an empty filter.
pub fn normalize_level(level: &str) -> String {
    match level.to_ascii_lowercase().as_str() {
        "fatal" | "panic" => "error".into(),
        "disabled" => "off".into(),
        other => other.into(),
    }
}

pub fn setup(level: &str) {
    tracing_subscriber::fmt()
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW)
        .with_target(false)
        .with_env_filter(normalize_level(level))
        .compact()
        .init();
}
