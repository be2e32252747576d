//! Command-line surface.
//!
//! Mirrors the original sink's flags one for one: a MetricQ management URL,
//! an auth token, a dry-run switch, and a verbosity syntax of
//! `[LOGGER=]LEVEL[,LOGGER=LEVEL...]`.

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "metricq-sink-nsca", version, about = "Reports metricq check states as NSCA passive checks")]
pub struct Cli {
    /// AMQP management URL of the metricq broker.
    #[arg(short = 's', long = "metricq-server", default_value = "amqp://localhost/")]
    pub metricq_server: String,

    /// Auth token to register this sink under.
    #[arg(short = 't', long = "token", default_value = "sink-nsca")]
    pub token: String,

    /// Do everything except actually invoke `send_nsca`.
    #[arg(short = 'n', long = "dry-run")]
    pub dry_run: bool,

    /// Path to a JSON configuration document, applied once at startup.
    #[arg(short = 'c', long = "config")]
    pub config: Option<std::path::PathBuf>,

    /// A list of `[LOGGER=]LEVEL` items, LEVEL one of
    /// CRITICAL, ERROR, WARNING, INFO, DEBUG.
    #[arg(short = 'v', long = "verbose", default_value = "info", value_name = "LEVEL")]
    pub verbose: String,
}

/// Translate the `[LOGGER=]LEVEL,...` syntax into a `tracing_subscriber`
/// `EnvFilter` directive string. A bare `LEVEL` becomes the default
/// directive; `logger=LEVEL` is passed through as a per-target directive.
pub fn build_env_filter(verbose: &str) -> Result<EnvFilter, tracing_subscriber::filter::ParseError> {
    let directives: Vec<String> = verbose
        .split(',')
        .map(|item| match item.split_once('=') {
            Some((logger, level)) => format!("{}={}", logger.trim(), level.trim().to_lowercase()),
            None => item.trim().to_lowercase(),
        })
        .collect();
    EnvFilter::try_new(directives.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_level_becomes_default_directive() {
        let filter = build_env_filter("debug").unwrap();
        assert_eq!(filter.to_string(), "debug");
    }

    #[test]
    fn per_logger_directives_pass_through() {
        let filter = build_env_filter("info,metricq_sink_nsca::nsca=debug").unwrap();
        let rendered = filter.to_string();
        assert!(rendered.contains("info"));
        assert!(rendered.contains("metricq_sink_nsca::nsca=debug"));
    }
}
