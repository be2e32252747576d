//! Aggregates per-metric states into one overall severity per check.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::history::StateTransitionHistory;
use crate::postprocess::TransitionPostprocessor;
use crate::state::State;
use crate::time::{Timedelta, Timestamp};
use crate::{BridgeError, Result};

struct Inner {
    histories: HashMap<String, StateTransitionHistory>,
    by_state: HashMap<State, HashSet<String>>,
    timed_out: HashMap<String, Option<Timestamp>>,
}

/// Per-check aggregation of all tracked metrics' states.
///
/// Every tracked metric belongs to exactly one severity bucket at all times
/// (UNKNOWN initially). A timed-out metric is additionally flagged but
/// remains in its last bucket; this lock is taken only for short,
/// non-suspending critical sections (never held across an `.await`).
pub struct StateCache {
    inner: RwLock<Inner>,
    postprocessor: TransitionPostprocessor,
    transition_debounce_window: Option<Timedelta>,
}

impl StateCache {
    pub fn new(
        metrics: impl IntoIterator<Item = String>,
        transition_debounce_window: Option<Timedelta>,
        postprocessor: TransitionPostprocessor,
    ) -> Result<Self> {
        let metrics: Vec<String> = metrics.into_iter().collect();
        let mut histories = HashMap::new();
        for metric in &metrics {
            histories.insert(
                metric.clone(),
                StateTransitionHistory::new(transition_debounce_window)?,
            );
        }
        let mut by_state: HashMap<State, HashSet<String>> = State::ALL
            .iter()
            .map(|&s| (s, HashSet::new()))
            .collect();
        by_state
            .get_mut(&State::Unknown)
            .unwrap()
            .extend(metrics.iter().cloned());

        Ok(StateCache {
            inner: RwLock::new(Inner {
                histories,
                by_state,
                timed_out: HashMap::new(),
            }),
            postprocessor,
            transition_debounce_window,
        })
    }

    /// Update the cached state of `metric`. Implicitly clears its timed-out
    /// flag.
    pub fn update_state(&self, metric: &str, time: Timestamp, state: State) -> Result<()> {
        let mut inner = self.inner.write();
        let history = inner
            .histories
            .get_mut(metric)
            .ok_or_else(|| BridgeError::UnknownMetric(metric.to_string()))?;

        history.insert(time, state).map_err(|e| match e {
            BridgeError::NonMonotonic {
                new_time,
                latest_time,
                ..
            } => BridgeError::NonMonotonic {
                metric: metric.to_string(),
                new_time,
                latest_time,
            },
            other => other,
        })?;

        let post_state = self.postprocessor.process(state, history);
        Self::update_bucket(&mut inner, metric, post_state)
    }

    fn update_bucket(inner: &mut Inner, metric: &str, state: State) -> Result<()> {
        inner.timed_out.remove(metric);

        let mut found = false;
        for bucket in inner.by_state.values_mut() {
            if bucket.remove(metric) {
                found = true;
                break;
            }
        }
        if !found {
            return Err(BridgeError::UnknownMetric(metric.to_string()));
        }

        inner
            .by_state
            .get_mut(&state)
            .ok_or_else(|| BridgeError::InvalidState(format!("{state:?}")))?
            .insert(metric.to_string());
        Ok(())
    }

    pub fn set_timed_out(&self, metric: &str, last_timestamp: Option<Timestamp>) {
        self.inner.write().timed_out.insert(metric.to_string(), last_timestamp);
    }

    /// `CRITICAL` if any metric is timed out; else the most severe non-empty
    /// bucket in order UNKNOWN, CRITICAL, WARNING, OK; `UNKNOWN` if the
    /// cache is entirely empty.
    pub fn overall_state(&self) -> State {
        let inner = self.inner.read();
        if !inner.timed_out.is_empty() {
            return State::Critical;
        }
        for state in [State::Unknown, State::Critical, State::Warning, State::Ok] {
            if !inner.by_state[&state].is_empty() {
                return state;
            }
        }
        State::Unknown
    }

    /// Snapshot of the metrics in a given severity bucket, sorted.
    pub fn metrics_in(&self, state: State) -> Vec<String> {
        let inner = self.inner.read();
        let mut v: Vec<String> = inner.by_state[&state].iter().cloned().collect();
        v.sort();
        v
    }

    /// Snapshot of timed-out metrics and their last observed timestamp.
    pub fn timed_out(&self) -> Vec<(String, Option<Timestamp>)> {
        let inner = self.inner.read();
        let mut v: Vec<(String, Option<Timestamp>)> = inner
            .timed_out
            .iter()
            .map(|(m, ts)| (m.clone(), *ts))
            .collect();
        v.sort_by(|a, b| a.0.cmp(&b.0));
        v
    }

    pub fn transition_debounce_window(&self) -> Option<Timedelta> {
        self.transition_debounce_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(n: i64) -> Timestamp {
        Timestamp::from_posix_ns(n)
    }

    #[test]
    fn every_metric_starts_unknown() {
        let cache = StateCache::new(
            vec!["a".to_string(), "b".to_string()],
            None,
            TransitionPostprocessor::Debounce,
        )
        .unwrap();
        assert_eq!(cache.overall_state(), State::Unknown);
        assert_eq!(cache.metrics_in(State::Unknown).len(), 2);
    }

    #[test]
    fn update_moves_metric_between_buckets() {
        let cache = StateCache::new(
            vec!["a".to_string()],
            None,
            TransitionPostprocessor::Debounce,
        )
        .unwrap();
        cache.update_state("a", ts(1), State::Ok).unwrap();
        assert_eq!(cache.overall_state(), State::Ok);
        assert!(cache.metrics_in(State::Unknown).is_empty());
    }

    #[test]
    fn unknown_metric_is_rejected() {
        let cache = StateCache::new(
            vec!["a".to_string()],
            None,
            TransitionPostprocessor::Debounce,
        )
        .unwrap();
        assert!(cache.update_state("b", ts(1), State::Ok).is_err());
    }

    #[test]
    fn timed_out_forces_critical_overall_state() {
        let cache = StateCache::new(
            vec!["a".to_string()],
            None,
            TransitionPostprocessor::Debounce,
        )
        .unwrap();
        cache.update_state("a", ts(1), State::Ok).unwrap();
        cache.set_timed_out("a", Some(ts(1)));
        assert_eq!(cache.overall_state(), State::Critical);
    }
}
