use std::io;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Installs the global subscriber. Events from this workspace pass at `level`,
/// everything else only from WARN up. Output goes to stderr so stdout stays
/// free for printed reports.
pub(crate) fn setup_tracing(level: LevelFilter) {
    let filter_layer = tracing_subscriber::filter::filter_fn(move |metadata| {
        let effective_level = if metadata.target().starts_with("pointbench") {
            level
        } else {
            LevelFilter::WARN
        };
        metadata.level() <= &effective_level
    });
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(io::stderr);

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(filter_layer))
        .init();
}

pub(crate) fn parse_level(value: &str) -> Result<LevelFilter, String> {
    match value.to_ascii_lowercase().as_str() {
        "off" => Ok(LevelFilter::OFF),
        "error" => Ok(LevelFilter::ERROR),
        "warn" => Ok(LevelFilter::WARN),
        "info" => Ok(LevelFilter::INFO),
        "debug" => Ok(LevelFilter::DEBUG),
        "trace" => Ok(LevelFilter::TRACE),
        other => Err(format!("unknown log level {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_levels() {
        assert_eq!(parse_level("DEBUG").unwrap(), LevelFilter::DEBUG);
        assert_eq!(parse_level("warn").unwrap(), LevelFilter::WARN);
        assert!(parse_level("loud").is_err());
    }
}
