use tracing::warn;
use tracing_subscriber::EnvFilter;

const CRATES: [&str; 3] = ["podctl", "kubernetes", "retry"];

/// Expand a bare level into per crate directives, so dependencies like hyper
/// stay quiet. Anything else is passed through as a filter directive.
pub fn levels(level: &str) -> String {
    match level {
        "off" => "off".to_owned(),
        level if level.contains('=') || level.contains(',') => level.to_owned(),
        level => CRATES
            .iter()
            .map(|name| format!("{name}={level}"))
            .collect::<Vec<_>>()
            .join(","),
    }
}

/// Install the global subscriber, logs go to stderr so stdout only carries
/// command output. Unparsable `levels` fall back to `info`, with a warning.
pub fn init(color: bool, levels: &str) {
    let (filter, invalid) = match EnvFilter::try_new(levels) {
        Ok(filter) => (filter, None),
        Err(err) => (EnvFilter::new(self::levels("info")), Some(err)),
    };

    let _ = tracing_subscriber::fmt()
        .with_ansi(color)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    if let Some(err) = invalid {
        warn!(message = "invalid log filter, using info", levels, %err);
    }
}
