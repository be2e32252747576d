//! Owns the running set of checks, decodes inbound chunks, and reconciles
//! configuration changes against the checks that are currently active.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::check::Check;
use crate::config::BridgeConfig;
use crate::nsca::{encode_batch, NscaConfig, NscaReport, NscaSink, ProcessNscaSink};
use crate::overrides::Overrides;
use crate::plugin::Plugin;
use crate::report::ReportQueue;
use crate::source::DataChunk;
use crate::time::Timedelta;
use crate::{metrics_instrumentation, Result};

const STOP_TIMEOUT: Timedelta = Timedelta::from_ns(1_000_000_000);
const BATCH_TIMEOUT: Timedelta = Timedelta::from_ns(5_000_000_000);

struct ReconcilerState {
    overrides: Overrides,
    reporting_host: String,
    global_resend_interval: Timedelta,
}

/// The sink: orchestrates configuration application, metric routing, and
/// batch transmission.
pub struct Reconciler {
    checks: DashMap<String, Arc<Check>>,
    check_configs: DashMap<String, crate::config::CheckConfig>,
    state: RwLock<ReconcilerState>,
    report_queue: Arc<ReportQueue>,
    sink: RwLock<Arc<dyn NscaSink>>,
    dry_run: bool,
    fast_path: AtomicBool,
}

fn local_hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

impl Reconciler {
    pub fn new(dry_run: bool) -> Arc<Self> {
        Arc::new(Reconciler {
            checks: DashMap::new(),
            check_configs: DashMap::new(),
            state: RwLock::new(ReconcilerState {
                overrides: Overrides::empty(),
                reporting_host: local_hostname(),
                global_resend_interval: Timedelta::from_s(180.0),
            }),
            report_queue: Arc::new(ReportQueue::new()),
            sink: RwLock::new(Arc::new(ProcessNscaSink::new(NscaConfig::default(), true))),
            dry_run,
            fast_path: AtomicBool::new(true),
        })
    }

    pub fn report_queue(&self) -> Arc<ReportQueue> {
        self.report_queue.clone()
    }

    /// Apply a new desired configuration. Partitions the check set into
    /// removed / added / candidate, restarts any candidate whose effective
    /// (post-override) configuration changed, and swaps in a fresh NSCA
    /// sink built from the message's `nsca` object.
    pub async fn configure(&self, config: BridgeConfig) -> Result<()> {
        config.validate()?;

        let overrides = Overrides::from_config(&config.overrides.ignored_metrics)?;
        let reporting_host = config.reporting_host.clone().unwrap_or_else(local_hostname);
        let global_resend_interval = config.resend_interval();
        let nsca_config: NscaConfig = config.nsca.clone().into();

        {
            let mut state = self.state.write();
            state.overrides = overrides.clone();
            state.reporting_host = reporting_host;
            state.global_resend_interval = global_resend_interval;
        }
        *self.sink.write() = Arc::new(ProcessNscaSink::new(nsca_config, self.dry_run));

        let mut desired: HashMap<String, crate::config::CheckConfig> = HashMap::new();
        for (name, mut check_config) in config.checks {
            let before = check_config.metrics.len();
            check_config.metrics = overrides.filter(check_config.metrics.iter().cloned());
            let dropped = before - check_config.metrics.len();
            if dropped > 0 {
                info!(check = %name, dropped, "overrides filtered metrics out of check");
            }
            desired.insert(name, check_config);
        }

        let existing_names: HashSet<String> = self.checks.iter().map(|e| e.key().clone()).collect();
        let desired_names: HashSet<String> = desired.keys().cloned().collect();

        let to_remove: Vec<String> = existing_names.difference(&desired_names).cloned().collect();
        let to_add: Vec<String> = desired_names.difference(&existing_names).cloned().collect();
        let candidates: Vec<String> = existing_names.intersection(&desired_names).cloned().collect();

        let mut stop_handles = Vec::new();
        for name in &to_remove {
            if let Some((_, check)) = self.checks.remove(name) {
                self.check_configs.remove(name);
                let name = name.clone();
                stop_handles.push(tokio::spawn(async move {
                    check.stop(STOP_TIMEOUT).await;
                    info!(check = %name, "check removed");
                }));
            }
        }
        for h in stop_handles {
            let _ = h.await;
        }

        let mut changed: Vec<String> = to_add.clone();
        for name in &candidates {
            let new_cfg = &desired[name];
            let unchanged = self
                .check_configs
                .get(name)
                .map(|stored| &*stored == new_cfg)
                .unwrap_or(false);
            if unchanged {
                debug!(check = %name, "check configuration unchanged");
            } else {
                changed.push(name.clone());
            }
        }

        let mut restart_handles = Vec::new();
        for name in &changed {
            if let Some((_, check)) = self.checks.remove(name) {
                let name = name.clone();
                restart_handles.push(tokio::spawn(async move {
                    check.stop(STOP_TIMEOUT).await;
                    info!(check = %name, "check stopped for restart");
                }));
            }
        }
        for h in restart_handles {
            let _ = h.await;
        }

        for name in &changed {
            let cfg = desired[name].clone();
            let plugins: Vec<Box<dyn Plugin>> = Vec::new();
            if !cfg.plugins.is_empty() {
                warn!(
                    check = %name,
                    "check configures plugins by name, but dynamic plugin loading is not \
                     implemented; only plugins wired in by the embedding binary are active"
                );
            }
            let check = Check::new(
                name.clone(),
                &cfg,
                global_resend_interval,
                plugins,
                self.report_queue.sender(),
            )?;
            check.start();
            self.checks.insert(name.clone(), check);
            self.check_configs.insert(name.clone(), cfg);
            info!(check = %name, "check started");
        }

        let fast_path = self
            .checks
            .iter()
            .all(|e| !e.value().has_value_check() && !e.value().has_plugins());
        self.fast_path.store(fast_path, Ordering::Relaxed);
        metrics_instrumentation::set_active_checks(self.checks.len());

        Ok(())
    }

    /// Decode a chunk and dispatch it to every check that contains the
    /// metric, then bump that metric's timeout watchdog in each.
    pub async fn on_chunk(&self, chunk: DataChunk) {
        metrics_instrumentation::record_chunk_received(&chunk.metric);
        if chunk.time_delta.is_empty() {
            return;
        }

        let last_timestamp = chunk.last_timestamp();
        let matching: Vec<Arc<Check>> = self
            .checks
            .iter()
            .filter(|e| e.value().contains(&chunk.metric))
            .map(|e| e.value().clone())
            .collect();

        if !self.fast_path.load(Ordering::Relaxed) {
            let pairs = chunk.decode();
            for check in &matching {
                check.check(&chunk.metric, &pairs).await;
            }
        }

        if let Some(ts) = last_timestamp {
            for check in &matching {
                let _ = check.bump_timeout_check(&chunk.metric, ts);
            }
        }
    }

    /// Continuously drain the report queue and hand batches to the NSCA
    /// sink, attaching the configured reporting host to each report.
    pub async fn run_batch_sender(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                reports = self.report_queue.batch(BATCH_TIMEOUT) => {
                    if reports.is_empty() {
                        continue;
                    }
                    let host = self.state.read().reporting_host.clone();
                    let nsca_reports: Vec<NscaReport> = reports
                        .into_iter()
                        .map(|r| {
                            metrics_instrumentation::record_report_emitted(&r.service, &r.state.to_string());
                            NscaReport::from_report(host.clone(), r)
                        })
                        .collect();
                    metrics_instrumentation::record_batch_sent(nsca_reports.len());

                    let sink = self.sink.read().clone();
                    if let Err(e) = sink.send(&nsca_reports).await {
                        warn!(error = %e, "failed to deliver report batch");
                        metrics_instrumentation::record_transmission_failure();
                    }
                }
            }
        }
    }
}

/// Pre-encode a batch without sending it; exposed for testing and for
/// `--dry-run` inspection tooling.
pub fn preview_batch(reports: &[NscaReport]) -> Vec<u8> {
    encode_batch(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CheckConfig, NscaConfigDoc, OverridesDoc};
    use crate::state::State;
    use std::collections::HashMap as StdHashMap;

    fn minimal_config(checks: StdHashMap<String, CheckConfig>) -> BridgeConfig {
        BridgeConfig {
            reporting_host: Some("testhost".to_string()),
            resend_interval: None,
            nsca: NscaConfigDoc {
                host: "monhost".to_string(),
                port: 5667,
                config_file: "/etc/nsca/send_nsca.cfg".to_string(),
                executable: "/bin/true".to_string(),
            },
            overrides: OverridesDoc::default(),
            checks,
        }
    }

    fn check_config(metrics: &[&str]) -> CheckConfig {
        CheckConfig {
            metrics: metrics.iter().map(|s| s.to_string()).collect(),
            warning_below: None,
            warning_above: None,
            critical_below: None,
            critical_above: None,
            ignore: vec![],
            timeout: None,
            resend_interval: None,
            transition_debounce_window: None,
            transition_postprocessing: None,
            plugins: StdHashMap::new(),
        }
    }

    #[tokio::test]
    async fn s6_reconciler_replaces_changed_check() {
        let reconciler = Reconciler::new(true);

        let mut checks = StdHashMap::new();
        checks.insert("c".to_string(), check_config(&["a"]));
        reconciler.configure(minimal_config(checks.clone())).await.unwrap();
        assert!(reconciler.checks.contains_key("c"));

        let mut checks2 = StdHashMap::new();
        checks2.insert("c".to_string(), check_config(&["a", "b"]));
        reconciler.configure(minimal_config(checks2)).await.unwrap();
        assert!(reconciler.checks.contains_key("c"));
        assert_eq!(
            reconciler.check_configs.get("c").unwrap().metrics,
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[tokio::test]
    async fn s4_overrides_drop_ignored_metrics() {
        let reconciler = Reconciler::new(true);
        let mut checks = StdHashMap::new();
        checks.insert("svc".to_string(), check_config(&["sys.cpu", "app.rps"]));
        let mut config = minimal_config(checks);
        config.overrides = OverridesDoc {
            ignored_metrics: vec!["sys.*".to_string()],
        };
        reconciler.configure(config).await.unwrap();
        let check = reconciler.checks.get("svc").unwrap();
        let metrics: Vec<&String> = check.metrics().collect();
        assert_eq!(metrics, vec![&"app.rps".to_string()]);
    }

    #[tokio::test]
    async fn reconciling_same_config_twice_is_a_no_op() {
        let reconciler = Reconciler::new(true);
        let mut checks = StdHashMap::new();
        checks.insert("c".to_string(), check_config(&["a"]));
        reconciler.configure(minimal_config(checks.clone())).await.unwrap();
        reconciler.configure(minimal_config(checks)).await.unwrap();
        assert_eq!(reconciler.checks.len(), 1);
    }

    #[test]
    fn state_display_matches_wire_convention() {
        assert_eq!(State::Critical.to_string(), "CRITICAL");
    }
}
