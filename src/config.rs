//! Parsing and validation of the inbound configuration message.

use std::collections::HashMap;

use serde::Deserialize;

use crate::nsca::NscaConfig;
use crate::time::{deserialize_opt_timedelta, deserialize_timedelta, Timedelta};
use crate::{BridgeError, Result};

fn default_resend_interval_str() -> String {
    "3min".to_string()
}

fn default_port() -> u16 {
    5667
}

fn default_config_file() -> String {
    "/etc/nsca/send_nsca.cfg".to_string()
}

fn default_executable() -> String {
    "/usr/sbin/send_nsca".to_string()
}

/// NSCA transmitter settings, deserialized straight off the `nsca` config
/// object. Unknown keys in the source document are ignored, matching the
/// original sink's behavior of filtering the incoming dict to known fields.
#[derive(Debug, Clone, Deserialize)]
pub struct NscaConfigDoc {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_config_file")]
    pub config_file: String,
    #[serde(default = "default_executable")]
    pub executable: String,
}

impl From<NscaConfigDoc> for NscaConfig {
    fn from(doc: NscaConfigDoc) -> Self {
        NscaConfig {
            host: doc.host,
            port: doc.port,
            config_file: doc.config_file,
            executable: doc.executable,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct OverridesDoc {
    #[serde(default)]
    pub ignored_metrics: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransitionPostprocessingDoc {
    Debounce,
    IgnoreShortTransitions {
        #[serde(deserialize_with = "deserialize_timedelta")]
        min_duration: Timedelta,
    },
    SoftFail { max_fail_count: usize },
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginConfig {
    pub file: String,
    #[serde(default)]
    pub metrics: Vec<String>,
    #[serde(default)]
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckConfig {
    pub metrics: Vec<String>,
    pub warning_below: Option<f64>,
    pub warning_above: Option<f64>,
    pub critical_below: Option<f64>,
    pub critical_above: Option<f64>,
    #[serde(default)]
    pub ignore: Vec<f64>,
    #[serde(default, deserialize_with = "deserialize_opt_timedelta")]
    pub timeout: Option<Timedelta>,
    #[serde(default, deserialize_with = "deserialize_opt_timedelta")]
    pub resend_interval: Option<Timedelta>,
    #[serde(default, deserialize_with = "deserialize_opt_timedelta")]
    pub transition_debounce_window: Option<Timedelta>,
    pub transition_postprocessing: Option<TransitionPostprocessingDoc>,
    #[serde(default)]
    pub plugins: HashMap<String, PluginConfig>,
}

impl PartialEq for CheckConfig {
    fn eq(&self, other: &Self) -> bool {
        // Structural comparison used by the reconciler to decide whether a
        // candidate check needs to be restarted. `Timedelta` and `f64`
        // compare bit-for-bit here, which is fine: configs are re-parsed
        // from the same textual source each time, not computed.
        self.metrics == other.metrics
            && self.warning_below == other.warning_below
            && self.warning_above == other.warning_above
            && self.critical_below == other.critical_below
            && self.critical_above == other.critical_above
            && self.ignore == other.ignore
            && self.timeout == other.timeout
            && self.resend_interval == other.resend_interval
            && self.transition_debounce_window == other.transition_debounce_window
            && postprocessing_eq(&self.transition_postprocessing, &other.transition_postprocessing)
            && plugin_names(&self.plugins) == plugin_names(&other.plugins)
    }
}

fn plugin_names(plugins: &HashMap<String, PluginConfig>) -> Vec<&String> {
    let mut names: Vec<&String> = plugins.keys().collect();
    names.sort();
    names
}

fn postprocessing_eq(
    a: &Option<TransitionPostprocessingDoc>,
    b: &Option<TransitionPostprocessingDoc>,
) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(TransitionPostprocessingDoc::Debounce), Some(TransitionPostprocessingDoc::Debounce)) => true,
        (
            Some(TransitionPostprocessingDoc::IgnoreShortTransitions { min_duration: a }),
            Some(TransitionPostprocessingDoc::IgnoreShortTransitions { min_duration: b }),
        ) => a == b,
        (
            Some(TransitionPostprocessingDoc::SoftFail { max_fail_count: a }),
            Some(TransitionPostprocessingDoc::SoftFail { max_fail_count: b }),
        ) => a == b,
        _ => false,
    }
}

impl CheckConfig {
    pub fn validate(&self) -> Result<()> {
        if self.metrics.is_empty() {
            return Err(BridgeError::ConfigInvalid(
                "check must name at least one metric".to_string(),
            ));
        }
        let has_any_band = self.warning_below.is_some()
            || self.warning_above.is_some()
            || self.critical_below.is_some()
            || self.critical_above.is_some();
        if has_any_band
            && (self.warning_below.is_none()
                || self.warning_above.is_none()
                || self.critical_below.is_none()
                || self.critical_above.is_none())
        {
            return Err(BridgeError::ConfigInvalid(
                "value check requires all four of warning_below/above and critical_below/above".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    pub reporting_host: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_timedelta")]
    pub resend_interval: Option<Timedelta>,
    pub nsca: NscaConfigDoc,
    #[serde(default)]
    pub overrides: OverridesDoc,
    pub checks: HashMap<String, CheckConfig>,
}

impl BridgeConfig {
    /// The effective global resend interval, defaulting to `"3min"` when
    /// absent from the document.
    pub fn resend_interval(&self) -> Timedelta {
        self.resend_interval
            .unwrap_or_else(|| Timedelta::parse(&default_resend_interval_str()).unwrap())
    }

    pub fn validate(&self) -> Result<()> {
        for (name, check) in &self.checks {
            check.validate().map_err(|e| match e {
                BridgeError::ConfigInvalid(msg) => {
                    BridgeError::ConfigInvalid(format!("check {name:?}: {msg}"))
                }
                other => other,
            })?;
        }
        Ok(())
    }
}
