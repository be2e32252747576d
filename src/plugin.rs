//! External capability that observes metric values and may upgrade a
//! metric's state.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::state::State;
use crate::time::Timestamp;
use crate::Result;

/// A pluggable piece of per-metric classification logic.
///
/// Severity composition: for each primary value, the post-plugin state is
/// `max(current_state, plugin_1.check(...), ..., plugin_k.check(...))`.
/// Plugin errors are caught by the owning `Check` and turned into a
/// CRITICAL report for that check alone.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// A stable name used in error messages and logs.
    fn name(&self) -> &str;

    /// Auxiliary metrics this plugin wants to observe, called once at load.
    fn extra_metrics(&self) -> HashSet<String> {
        HashSet::new()
    }

    /// Called on every primary value; may upgrade (never downgrade) the
    /// state.
    async fn check(
        &self,
        metric: &str,
        time: Timestamp,
        value: f64,
        current_state: State,
    ) -> Result<State>;

    /// Called on every auxiliary value for a metric in `extra_metrics()`.
    async fn on_extra_metric(&self, _metric: &str, _time: Timestamp, _value: f64) -> Result<()> {
        Ok(())
    }
}

/// Built-in plugin: treats values inside `[low, high]` as OK regardless of
/// the value check's own bands, useful for masking known-benign excursions
/// (e.g. planned maintenance windows with known-bad sensor readings).
pub struct IgnoreValueRangePlugin {
    name: String,
    metrics: HashSet<String>,
    low: f64,
    high: f64,
}

impl IgnoreValueRangePlugin {
    pub fn new(name: impl Into<String>, metrics: HashSet<String>, low: f64, high: f64) -> Self {
        IgnoreValueRangePlugin {
            name: name.into(),
            metrics,
            low,
            high,
        }
    }
}

#[async_trait]
impl Plugin for IgnoreValueRangePlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(
        &self,
        metric: &str,
        _time: Timestamp,
        value: f64,
        current_state: State,
    ) -> Result<State> {
        if self.metrics.contains(metric) && value >= self.low && value <= self.high {
            Ok(State::Ok)
        } else {
            Ok(current_state)
        }
    }
}

/// Apply the severity-composition rule: `max(current_state, plugin states)`.
/// Returns the first plugin failure encountered, if any, so the caller can
/// wrap it into a `PluginFailure`.
pub async fn compose_plugin_states(
    plugins: &[Box<dyn Plugin>],
    metric: &str,
    time: Timestamp,
    value: f64,
    mut state: State,
) -> Result<State> {
    for plugin in plugins {
        let plugin_state = plugin.check(metric, time, value, state).await.map_err(|e| {
            crate::BridgeError::PluginFailure {
                plugin: plugin.name().to_string(),
                reason: e.to_string(),
            }
        })?;
        state = state.max(plugin_state);
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn composition_never_decreases_severity() {
        let plugins: Vec<Box<dyn Plugin>> = vec![Box::new(IgnoreValueRangePlugin::new(
            "ignore_range",
            ["m".to_string()].into_iter().collect(),
            0.0,
            10.0,
        ))];
        // Plugin would downgrade to OK, but composition takes the max, so a
        // pre-existing CRITICAL state is preserved.
        let result = compose_plugin_states(&plugins, "m", Timestamp::now(), 5.0, State::Critical)
            .await
            .unwrap();
        assert_eq!(result, State::Critical);
    }
}
