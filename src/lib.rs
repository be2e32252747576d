//! # metricq-sink-nsca
//!
//! A monitoring bridge that subscribes to named numeric metric time-series,
//! evaluates each value against per-check rules, aggregates per-metric state
//! into a per-check overall severity, and reports the result as an NSCA
//! passive check towards a Nagios/Centreon monitoring host.
//!
//! ## Architecture
//!
//! - [`value_check`] classifies a single value into a [`state::State`].
//! - [`history`] tracks a metric's recent state transitions and debounces
//!   flapping via prevalence over a sliding time window.
//! - [`state_cache`] aggregates many metrics' debounced states into one
//!   overall state per check.
//! - [`plugin`] lets additional, pluggable classification logic observe and
//!   override a metric's state.
//! - [`check`] ties value checking, history, the state cache and plugins
//!   together for one named check.
//! - [`timeout_check`] watches for metrics that stop reporting.
//! - [`report`] and [`nsca`] batch and transmit the resulting passive checks.
//! - [`reconciler`] owns the running set of checks, decodes inbound metric
//!   data, and reconciles configuration changes against it.
//!
//! Configuration is parsed with [`serde`] and [`humantime`]; logs are
//! structured via [`tracing`]; operational counters are exposed through the
//! [`metrics`] crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod check;
pub mod cli;
pub mod config;
pub mod history;
pub mod metrics_instrumentation;
pub mod nsca;
pub mod overrides;
pub mod plugin;
pub mod postprocess;
pub mod reconciler;
pub mod report;
pub mod source;
pub mod state;
pub mod state_cache;
pub mod time;
pub mod timeout_check;
pub mod value_check;

/// Errors surfaced by any part of the monitoring bridge.
///
/// Each variant corresponds to one failure kind named in the bridge's error
/// handling design: configuration problems are rejected eagerly, while
/// per-metric failures during check evaluation are caught and turned into a
/// `CRITICAL` report rather than propagated, so one bad metric cannot take
/// the whole check engine down.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum BridgeError {
    /// A configuration document failed validation (e.g. a `ValueCheck` with
    /// `critical_below > warning_below`, or a `Check` naming zero metrics).
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A metric pattern string could not be parsed (e.g. a `*` wildcard that
    /// is not the final, standalone path component).
    #[error("invalid metric pattern: {0}")]
    PatternParse(String),

    /// A value or state transition was reported for a metric the addressed
    /// component was never configured to track.
    #[error("unknown metric: {0}")]
    UnknownMetric(String),

    /// A state transition was inserted with a timestamp not strictly after
    /// the latest recorded transition.
    #[error("non-monotonic state transition for metric {metric}: new time {new_time} <= latest {latest_time}")]
    NonMonotonic {
        metric: String,
        new_time: i64,
        latest_time: i64,
    },

    /// A state value outside the defined `OK..UNKNOWN` range was produced.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A plugin's `check` or `on_extra_metric` call failed.
    #[error("plugin {plugin} failed: {reason}")]
    PluginFailure { plugin: String, reason: String },

    /// Sending a batch of reports to the NSCA host failed (process spawn
    /// failure, non-zero `send_nsca` exit, or I/O error on its pipes).
    #[error("NSCA transmission failed: {0}")]
    TransmissionFailure(String),

    /// A `TimeoutCheck` watchdog task could not be stopped within its
    /// shutdown grace period during reconciliation.
    #[error("timeout check for {0} did not stop in time")]
    TimeoutStopFailure(String),
}

/// Result type used throughout the monitoring bridge.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Render an error and its causal chain as `Unhandled exception: ...`
/// followed by one `caused by: ...` line per underlying cause, used to turn
/// a caught failure into a CRITICAL report message.
pub fn error_chain_message(err: &dyn std::error::Error) -> String {
    let mut message = format!("Unhandled exception: {err}");
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(&format!("\ncaused by: {cause}"));
        source = cause.source();
    }
    message
}
