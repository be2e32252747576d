//! Bounded per-metric log of state transitions with "last semantics".

use std::collections::VecDeque;

use crate::state::State;
use crate::time::{Timedelta, Timestamp};
use crate::{BridgeError, Result};

/// A state transition: up until `time`, the metric resided in `state`.
///
/// Ordered and compared by `time` only — two transitions with equal time but
/// different state are still "equal" for binary-search purposes, mirroring
/// the original dataclass's `compare=False` state field.
#[derive(Debug, Clone, Copy)]
pub struct StateTransition {
    pub time: Timestamp,
    pub state: State,
}

/// A history of state transitions for one metric, spanning at most
/// `time_window`.
///
/// Holds an anchor point in time, `epoch`, marking when the state of the
/// first retained transition was entered. Transitions carry "last
/// semantics": the state recorded on a transition occupied the interval
/// ending at that transition's time.
#[derive(Debug, Clone)]
pub struct StateTransitionHistory {
    transitions: VecDeque<StateTransition>,
    epoch: Option<Timestamp>,
    time_window: Timedelta,
}

impl StateTransitionHistory {
    /// `time_window` defaults to 30s if `None`; must be positive.
    pub fn new(time_window: Option<Timedelta>) -> Result<Self> {
        let time_window = match time_window {
            None => Timedelta::from_s(30.0),
            Some(w) if w.ns() > 0 => w,
            Some(w) => {
                return Err(BridgeError::ConfigInvalid(format!(
                    "state transition history time window must be a positive duration, got {w}"
                )))
            }
        };
        Ok(StateTransitionHistory {
            transitions: VecDeque::new(),
            epoch: None,
            time_window,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.epoch.is_none() || self.transitions.is_empty()
    }

    /// Insert a transition away from `state` that happened at `time`.
    ///
    /// The first call only sets the epoch anchor and records nothing, since
    /// we have no way to know how long the metric was already in `state`.
    pub fn insert(&mut self, time: Timestamp, state: State) -> Result<()> {
        let epoch = match self.epoch {
            None => {
                self.epoch = Some(time);
                return Ok(());
            }
            Some(e) => e,
        };

        if let Some(latest) = self.transitions.back() {
            if time <= latest.time {
                return Err(BridgeError::NonMonotonic {
                    metric: String::new(),
                    new_time: time.posix_ns(),
                    latest_time: latest.time.posix_ns(),
                });
            }
        }
        self.transitions.push_back(StateTransition { time, state });

        let cutoff = time - self.time_window;
        if epoch > cutoff {
            return Ok(());
        }

        // Binary search for the first retained transition at/after the cutoff.
        let i = self.transitions.partition_point(|t| t.time < cutoff);
        debug_assert!(i < self.transitions.len());
        self.epoch = Some(self.transitions[i].time);
        self.transitions.drain(..=i);
        Ok(())
    }

    /// For each state, the fraction of time (in `[0.0, 1.0]`) the metric has
    /// spent in it over the retained window. `None` if no data yet.
    pub fn state_prevalences(&self) -> Option<[f64; 4]> {
        let epoch = self.epoch?;
        let latest = self.transitions.back()?;

        let oldest_time = std::cmp::max(latest.time - self.time_window, epoch);
        let total = latest.time - oldest_time;
        if total.ns() <= 0 {
            return None;
        }

        let mut cumulative = [Timedelta::ZERO; 4];
        let mut prev_time = oldest_time;
        for t in &self.transitions {
            let idx = t.state as usize;
            cumulative[idx] = cumulative[idx] + (t.time - prev_time);
            prev_time = t.time;
        }

        let mut out = [0.0; 4];
        for (i, d) in cumulative.iter().enumerate() {
            out[i] = d.ns() as f64 / total.ns() as f64;
        }
        Some(out)
    }

    /// Iterate from the most recent transition to the oldest, yielding
    /// `(transition, dwell_duration)` pairs with consecutive equal-state
    /// transitions merged into one dwell duration. The oldest block's start
    /// is anchored at `epoch`.
    pub fn squashed(&self) -> Vec<(StateTransition, Timedelta)> {
        let epoch = match self.epoch {
            Some(e) => e,
            None => return Vec::new(),
        };
        if self.transitions.is_empty() {
            return Vec::new();
        }

        // entered_time(i): the moment transitions[i].state was entered.
        let entered_time = |i: usize| -> Timestamp {
            if i == 0 {
                epoch
            } else {
                self.transitions[i - 1].time
            }
        };

        let n = self.transitions.len();
        let mut blocks: Vec<(StateTransition, Timedelta)> = Vec::new();
        let mut end_idx = n - 1; // index of the latest transition in the current block

        loop {
            let mut start_idx = end_idx;
            while start_idx > 0 && self.transitions[start_idx - 1].state == self.transitions[end_idx].state {
                start_idx -= 1;
            }
            let end_time = self.transitions[end_idx].time;
            let start_time = entered_time(start_idx);
            blocks.push((self.transitions[end_idx], end_time - start_time));

            if start_idx == 0 {
                break;
            }
            end_idx = start_idx - 1;
        }
        blocks
    }

    /// The most recent up to `n` raw, unmerged transitions, most recent
    /// first. Unlike `squashed()`, a run of consecutive same-state samples
    /// is not collapsed, so counting against this list reflects how many
    /// individual samples deep a streak actually is.
    pub fn recent_raw(&self, n: usize) -> impl Iterator<Item = &StateTransition> {
        self.transitions.iter().rev().take(n)
    }
}
