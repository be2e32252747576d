//! Coordinates value checking, plugins, the state cache, and timeouts for
//! one named check.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::CheckConfig;
use crate::error_chain_message;
use crate::plugin::{compose_plugin_states, Plugin};
use crate::postprocess::TransitionPostprocessor;
use crate::report::{Report, ReportSender};
use crate::state::State;
use crate::state_cache::StateCache;
use crate::time::{Timedelta, Timestamp};
use crate::timeout_check::TimeoutCheck;
use crate::value_check::ValueCheck;
use crate::{BridgeError, Result};

/// One named group of metrics producing a single overall state.
///
/// Owns its [`StateCache`] exclusively: only this check's own tasks ever
/// mutate it, so cross-check interference is structurally impossible.
pub struct Check {
    name: String,
    primary_metrics: HashSet<String>,
    extra_metrics: HashSet<String>,
    value_check: Option<ValueCheck>,
    plugins: Vec<Box<dyn Plugin>>,
    plugin_extra_metrics: Vec<HashSet<String>>,
    state_cache: StateCache,
    timeout: Option<Timedelta>,
    timeout_checks: HashMap<String, TimeoutCheck>,
    resend_interval: Timedelta,
    last_overall: Mutex<Option<State>>,
    report_sender: ReportSender,
    cancel: CancellationToken,
    heartbeat_handle: Mutex<Option<JoinHandle<()>>>,
    ignore_update_errors: bool,
}

impl Check {
    pub fn new(
        name: String,
        config: &CheckConfig,
        global_resend_interval: Timedelta,
        plugins: Vec<Box<dyn Plugin>>,
        report_sender: ReportSender,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let primary_metrics: HashSet<String> = config.metrics.iter().cloned().collect();

        let value_check = match (
            config.warning_below,
            config.warning_above,
            config.critical_below,
            config.critical_above,
        ) {
            (Some(wb), Some(wa), Some(cb), Some(ca)) => {
                Some(ValueCheck::new(wb, wa, cb, ca, config.ignore.clone())?)
            }
            _ => None,
        };

        let postprocessor = match &config.transition_postprocessing {
            None => TransitionPostprocessor::Debounce,
            Some(crate::config::TransitionPostprocessingDoc::Debounce) => {
                TransitionPostprocessor::Debounce
            }
            Some(crate::config::TransitionPostprocessingDoc::IgnoreShortTransitions {
                min_duration,
            }) => TransitionPostprocessor::IgnoreShortTransitions {
                min_duration: *min_duration,
            },
            Some(crate::config::TransitionPostprocessingDoc::SoftFail { max_fail_count }) => {
                TransitionPostprocessor::SoftFail {
                    max_fail_count: *max_fail_count,
                }
            }
        };

        let state_cache = StateCache::new(
            primary_metrics.iter().cloned(),
            config.transition_debounce_window,
            postprocessor,
        )?;

        let plugin_extra_metrics: Vec<HashSet<String>> =
            plugins.iter().map(|p| p.extra_metrics()).collect();
        let extra_metrics: HashSet<String> = plugin_extra_metrics
            .iter()
            .flat_map(|s| s.iter().cloned())
            .collect();

        let timeout = config.timeout;
        let timeout_checks = if let Some(timeout) = timeout {
            primary_metrics
                .iter()
                .map(|m| (m.clone(), TimeoutCheck::new(timeout, Timedelta::ZERO)))
                .collect()
        } else {
            HashMap::new()
        };

        let resend_interval = config.resend_interval.unwrap_or(global_resend_interval);

        Ok(Arc::new(Check {
            name,
            primary_metrics,
            extra_metrics,
            value_check,
            plugins,
            plugin_extra_metrics,
            state_cache,
            timeout,
            timeout_checks,
            resend_interval,
            // Seeded at UNKNOWN (the state-cache's own initial overall
            // state) rather than left unset, so the first real data point
            // that leaves the check still fully UNKNOWN does not itself
            // read as a "change" and emit a synthetic startup report.
            last_overall: Mutex::new(Some(State::Unknown)),
            report_sender,
            cancel: CancellationToken::new(),
            heartbeat_handle: Mutex::new(None),
            ignore_update_errors: false,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> impl Iterator<Item = &String> {
        self.primary_metrics.iter()
    }

    pub fn extra_metrics(&self) -> &HashSet<String> {
        &self.extra_metrics
    }

    pub fn contains(&self, metric: &str) -> bool {
        self.primary_metrics.contains(metric) || self.extra_metrics.contains(metric)
    }

    /// Whether this check has a value check configured at all. Used by the
    /// reconciler to decide whether classification can be skipped entirely
    /// when no active check needs anything beyond timeout tracking.
    pub fn has_value_check(&self) -> bool {
        self.value_check.is_some()
    }

    pub fn has_plugins(&self) -> bool {
        !self.plugins.is_empty()
    }

    /// Launch the heartbeat task and, if configured, one `TimeoutCheck` per
    /// primary metric.
    pub fn start(self: &Arc<Self>) {
        for (metric, timeout_check) in &self.timeout_checks {
            let this = self.clone();
            let metric = metric.clone();
            timeout_check.start(metric.clone(), move |timeout, last_timestamp| {
                warn!(check = %this.name, metric = %metric, %timeout, "metric timed out");
                this.state_cache.set_timed_out(&metric, last_timestamp);
                this.trigger_report(false);
            });
        }

        let this = self.clone();
        let cancel = self.cancel.clone();
        let resend_interval = self.resend_interval;
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(resend_interval.as_std()) => {
                        this.trigger_report(true);
                    }
                }
            }
        });
        *self.heartbeat_handle.lock() = Some(handle);
    }

    /// Cancel the heartbeat and every owned `TimeoutCheck`, awaiting them
    /// under `grace`.
    pub async fn stop(&self, grace: Timedelta) {
        self.cancel.cancel();
        let handle = self.heartbeat_handle.lock().take();
        if let Some(h) = handle {
            let _ = tokio::time::timeout(grace.as_std(), h).await;
        }
        for timeout_check in self.timeout_checks.values() {
            if !timeout_check.stop(grace).await {
                warn!(check = %self.name, "timeout check did not stop within grace period");
            }
        }
    }

    /// Process a batch of (timestamp, value) pairs for `metric`, which must
    /// be either a primary or extra metric of this check.
    ///
    /// Any failure during processing is caught, logged, and converted into
    /// a CRITICAL report for this check alone — other checks are
    /// unaffected.
    pub async fn check(&self, metric: &str, tv_pairs: &[(Timestamp, f64)]) {
        if let Err(e) = self.check_inner(metric, tv_pairs).await {
            warn!(check = %self.name, metric = %metric, error = %e, "check processing failed");
            self.report_sender.put(Report {
                service: self.name.clone(),
                state: State::Critical,
                message: error_chain_message(&e),
            });
        }
    }

    async fn check_inner(&self, metric: &str, tv_pairs: &[(Timestamp, f64)]) -> Result<()> {
        if self.extra_metrics.contains(metric) {
            for (plugin, plugin_metrics) in self.plugins.iter().zip(self.plugin_extra_metrics.iter())
            {
                if !plugin_metrics.contains(metric) {
                    continue;
                }
                for &(t, v) in tv_pairs {
                    plugin
                        .on_extra_metric(metric, t, v)
                        .await
                        .map_err(|e| BridgeError::PluginFailure {
                            plugin: plugin.name().to_string(),
                            reason: e.to_string(),
                        })?;
                }
            }
            return Ok(());
        }

        if !self.primary_metrics.contains(metric) {
            return Err(BridgeError::UnknownMetric(format!(
                "{metric:?} not known to check {:?}",
                self.name
            )));
        }

        for &(t, v) in tv_pairs {
            let s0 = match &self.value_check {
                Some(vc) => vc.classify(v),
                None => State::Ok,
            };
            let s = compose_plugin_states(&self.plugins, metric, t, v, s0).await?;

            match self.state_cache.update_state(metric, t, s) {
                Ok(()) => {}
                Err(BridgeError::NonMonotonic { .. }) if self.ignore_update_errors => {
                    warn!(check = %self.name, metric = %metric, "ignoring non-monotonic state update");
                    continue;
                }
                Err(e) => return Err(e),
            }
            self.trigger_report(false);
        }
        Ok(())
    }

    /// Forward the check's per-metric timeout watchdog. No-op for checks
    /// with no timeout configured.
    pub fn bump_timeout_check(&self, metric: &str, timestamp: Timestamp) -> Result<()> {
        if self.timeout_checks.is_empty() {
            return Ok(());
        }
        match self.timeout_checks.get(metric) {
            Some(tc) => {
                tc.bump(timestamp);
                Ok(())
            }
            None => Err(BridgeError::UnknownMetric(metric.to_string())),
        }
    }

    /// Emit a `Report` iff `force` or the overall state changed. The stored
    /// overall state is updated unconditionally.
    pub fn trigger_report(&self, force: bool) {
        let new_state = self.state_cache.overall_state();
        let changed = {
            let mut last = self.last_overall.lock();
            let changed = force || *last != Some(new_state);
            *last = Some(new_state);
            changed
        };
        if changed {
            debug!(check = %self.name, state = %new_state, "overall state report triggered");
            self.report_sender.put(Report {
                service: self.name.clone(),
                state: new_state,
                message: self.format_report_message(new_state),
            });
        }
    }

    fn format_report_message(&self, overall_state: State) -> String {
        if overall_state == State::Ok {
            return "All metrics are OK".to_string();
        }

        let mut header_parts: Vec<String> = Vec::new();
        let mut details: Vec<String> = Vec::new();

        let timed_out = self.state_cache.timed_out();
        if !self.timeout_checks.is_empty() && !timed_out.is_empty() {
            if let Some(timeout) = self.timeout {
                header_parts.push(format!(
                    "{} metric(s) timed out after {timeout}",
                    timed_out.len()
                ));
            }
            for (metric, last_timestamp) in &timed_out {
                let detail = match last_timestamp {
                    None => "no values received".to_string(),
                    Some(ts) => format!("last value at {}", ts.to_iso_seconds()),
                };
                details.push(format!("\t{metric}: {detail}"));
            }
        }

        for state in [State::Unknown, State::Critical, State::Warning] {
            let metrics = self.state_cache.metrics_in(state);
            if metrics.is_empty() {
                continue;
            }
            let mut header_part = format!("{} metric(s) are {state}", metrics.len());
            if state != State::Unknown {
                if let Some(range) = self.value_check.as_ref().and_then(|vc| vc.range_by_state(state))
                {
                    header_part.push_str(&format!(" ({range})"));
                }
            }
            header_parts.push(header_part);
            details.push(format!("{state}:"));
            for metric in metrics {
                details.push(format!("\t{metric}"));
            }
        }

        format!("{}\n{}", header_parts.join(", "), details.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CheckConfig;
    use crate::report::ReportQueue;
    use std::collections::HashMap;

    fn config(metrics: &[&str], warning_above: Option<f64>) -> CheckConfig {
        CheckConfig {
            metrics: metrics.iter().map(|s| s.to_string()).collect(),
            warning_below: warning_above.map(|_| f64::NEG_INFINITY),
            warning_above,
            critical_below: warning_above.map(|_| f64::NEG_INFINITY),
            critical_above: warning_above.map(|_| f64::INFINITY),
            ignore: vec![],
            timeout: None,
            resend_interval: None,
            transition_debounce_window: None,
            transition_postprocessing: None,
            plugins: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn s1_one_metric_warns() {
        let queue = ReportQueue::new();
        let check = Check::new(
            "svc".to_string(),
            &config(&["a", "b"], Some(10.0)),
            Timedelta::from_s(180.0),
            vec![],
            queue.sender(),
        )
        .unwrap();

        check
            .check("a", &[(Timestamp::from_posix_ns(1), 5.0)])
            .await;
        check
            .check("b", &[(Timestamp::from_posix_ns(1), 20.0)])
            .await;

        let batch = queue.batch(Timedelta::from_ns(10_000_000)).await;
        let warning_report = batch.iter().find(|r| r.state == State::Warning).unwrap();
        assert!(warning_report
            .message
            .starts_with("1 metric(s) are WARNING (above 10.0)"));
        assert!(warning_report.message.contains('b'));
    }

    #[tokio::test]
    async fn unknown_metric_yields_critical_report() {
        let queue = ReportQueue::new();
        let check = Check::new(
            "svc".to_string(),
            &config(&["a"], None),
            Timedelta::from_s(180.0),
            vec![],
            queue.sender(),
        )
        .unwrap();
        check
            .check("never-configured", &[(Timestamp::from_posix_ns(1), 1.0)])
            .await;
        let batch = queue.batch(Timedelta::from_ns(10_000_000)).await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].state, State::Critical);
        assert!(batch[0].message.starts_with("Unhandled exception:"));
    }
}
