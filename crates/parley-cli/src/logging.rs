//! Subscriber setup from `logging` config and CLI flags.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use parley_core::config::LoggingConfig;

/// `RUST_LOG` wins; otherwise `--verbose`, then `logging.level`, then info.
/// Per-crate `logging.filters` are layered on top of the config level.
pub fn build_filter(config: Option<&LoggingConfig>, verbose: bool) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let level = if verbose {
        "debug"
    } else {
        config.and_then(|l| l.level.as_deref()).unwrap_or("info")
    };
    let mut filter = EnvFilter::new(level);

    for directive in config.map(|l| l.filters.as_slice()).unwrap_or_default() {
        match directive.parse::<Directive>() {
            Ok(d) => filter = filter.add_directive(d),
            Err(e) => eprintln!("Ignoring invalid log filter '{directive}': {e}"),
        }
    }
    filter
}

pub fn init(config: Option<&LoggingConfig>, verbose: bool) {
    let filter = build_filter(config, verbose);
    let json = config.is_some_and(|l| l.format == "json");
    let stdout = config.is_some_and(|l| l.output == "stdout");

    let registry = tracing_subscriber::registry().with(filter);
    match (json, stdout) {
        (true, true) => registry
            .with(fmt::layer().json().with_writer(std::io::stdout))
            .init(),
        (true, false) => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        (false, true) => registry
            .with(fmt::layer().with_writer(std::io::stdout))
            .init(),
        (false, false) => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logging(level: Option<&str>, filters: &[&str]) -> LoggingConfig {
        LoggingConfig {
            format: "plain".into(),
            level: level.map(str::to_string),
            filters: filters.iter().map(|f| f.to_string()).collect(),
            output: "stderr".into(),
        }
    }

    #[test]
    fn test_filter_from_config() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = logging(Some("warn"), &["parley_gateway=debug", "not a directive=="]);
        let filter = build_filter(Some(&config), false).to_string();
        assert!(filter.contains("warn"));
        assert!(filter.contains("parley_gateway=debug"));
    }

    #[test]
    fn test_verbose_overrides_level() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = logging(Some("error"), &[]);
        let filter = build_filter(Some(&config), true).to_string();
        assert!(filter.contains("debug"));
        assert!(!filter.contains("error"));
    }
}
