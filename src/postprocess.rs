//! Transition post-processors: dampen noisy state changes using history.
//!
//! Expressed as a tagged enum with one `process` operation rather than a
//! class hierarchy, per the design note that this polymorphism has exactly
//! one axis of variation and no out-of-tree implementations are required.

use crate::history::StateTransitionHistory;
use crate::state::State;
use crate::time::Timedelta;

#[derive(Debug, Clone)]
pub enum TransitionPostprocessor {
    /// Returns the state whose cumulative prevalence first reaches 0.5 under
    /// the canonical enumeration order (OK, WARNING, CRITICAL, UNKNOWN).
    /// Returns `current_state` when the history is empty. This is the
    /// default.
    Debounce,
    /// If the dwell in the current state is shorter than `min_duration`,
    /// return the immediately preceding different state; else return
    /// `current_state`.
    IgnoreShortTransitions { min_duration: Timedelta },
    /// Walk the most recent up to `max_fail_count + 1` raw (unmerged)
    /// transitions; if any is less severe than `current_state`, return it
    /// instead, masking a worsened run that hasn't yet outlasted its
    /// tolerance. Once the bad run is longer than `max_fail_count` samples,
    /// the lookback window no longer reaches a better state and
    /// `current_state` is returned unmasked.
    SoftFail { max_fail_count: usize },
}

impl TransitionPostprocessor {
    pub fn process(
        &self,
        current_state: State,
        history: &StateTransitionHistory,
    ) -> State {
        match self {
            TransitionPostprocessor::Debounce => {
                let Some(prevalences) = history.state_prevalences() else {
                    return current_state;
                };
                let mut cumulative = 0.0;
                for state in State::ALL {
                    cumulative += prevalences[state as usize];
                    if cumulative >= 0.5 {
                        return state;
                    }
                }
                current_state
            }
            TransitionPostprocessor::IgnoreShortTransitions { min_duration } => {
                let blocks = history.squashed();
                let Some((current_block, dwell)) = blocks.first() else {
                    return current_state;
                };
                if dwell < *min_duration {
                    // Find the first block with a different state.
                    blocks
                        .iter()
                        .find(|(t, _)| t.state != current_block.state)
                        .map(|(t, _)| t.state)
                        .unwrap_or(current_state)
                } else {
                    current_state
                }
            }
            TransitionPostprocessor::SoftFail { max_fail_count } => history
                .recent_raw(max_fail_count + 1)
                .map(|t| t.state)
                .find(|&s| s < current_state)
                .unwrap_or(current_state),
        }
    }
}

impl Default for TransitionPostprocessor {
    fn default() -> Self {
        TransitionPostprocessor::Debounce
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Timestamp;

    fn ts(n: i64) -> Timestamp {
        Timestamp::from_posix_ns(n)
    }

    #[test]
    fn debounce_returns_current_state_with_empty_history() {
        let h = StateTransitionHistory::new(None).unwrap();
        let pp = TransitionPostprocessor::Debounce;
        assert_eq!(pp.process(State::Warning, &h), State::Warning);
    }

    #[test]
    fn soft_fail_masks_a_single_blip() {
        let mut h = StateTransitionHistory::new(Some(Timedelta::from_s(100.0))).unwrap();
        h.insert(ts(0), State::Ok).unwrap();
        h.insert(Timestamp::from_posix_ns(1_000_000_000), State::Warning)
            .unwrap();
        h.insert(Timestamp::from_posix_ns(2_000_000_000), State::Ok)
            .unwrap();
        let pp = TransitionPostprocessor::SoftFail { max_fail_count: 2 };
        // Current raw state is OK; nothing less severe than OK exists, so OK stands.
        assert_eq!(pp.process(State::Ok, &h), State::Ok);
    }

    #[test]
    fn soft_fail_masks_a_warning_blip_back_to_the_prior_ok() {
        let mut h = StateTransitionHistory::new(Some(Timedelta::from_s(100.0))).unwrap();
        h.insert(ts(0), State::Ok).unwrap();
        h.insert(Timestamp::from_posix_ns(1_000_000_000), State::Ok)
            .unwrap();
        h.insert(Timestamp::from_posix_ns(2_000_000_000), State::Warning)
            .unwrap();
        let pp = TransitionPostprocessor::SoftFail { max_fail_count: 2 };
        // The most recent raw sample is WARNING, but the one before it was
        // OK and still falls inside the lookback window, so it masks.
        assert_eq!(pp.process(State::Warning, &h), State::Ok);
    }

    #[test]
    fn soft_fail_gives_up_once_tolerance_is_exhausted() {
        let mut h = StateTransitionHistory::new(Some(Timedelta::from_s(100.0))).unwrap();
        h.insert(ts(0), State::Ok).unwrap();
        h.insert(Timestamp::from_posix_ns(1_000_000_000), State::Ok)
            .unwrap();
        h.insert(Timestamp::from_posix_ns(2_000_000_000), State::Warning)
            .unwrap();
        let pp = TransitionPostprocessor::SoftFail { max_fail_count: 0 };
        // Zero tolerance: the lookback window is just the current sample.
        assert_eq!(pp.process(State::Warning, &h), State::Warning);
    }

    #[test]
    fn soft_fail_breaks_through_once_a_bad_run_outlasts_its_tolerance() {
        let mut h = StateTransitionHistory::new(Some(Timedelta::from_s(100.0))).unwrap();
        let pp = TransitionPostprocessor::SoftFail { max_fail_count: 3 };
        let mut t = 0i64;
        let mut step = |h: &mut StateTransitionHistory, state: State| -> State {
            t += 1_000_000_000;
            h.insert(Timestamp::from_posix_ns(t), state).unwrap();
            pp.process(state, h)
        };

        assert_eq!(step(&mut h, State::Ok), State::Ok); // epoch sample, no transition recorded yet
        assert_eq!(step(&mut h, State::Ok), State::Ok);
        // A sustained WARNING run: the first three samples stay masked, but
        // the fourth consecutive WARNING must break through regardless of
        // how it's grouped internally, since the lookback window no longer
        // reaches the earlier OK run.
        assert_eq!(step(&mut h, State::Warning), State::Ok);
        assert_eq!(step(&mut h, State::Warning), State::Ok);
        assert_eq!(step(&mut h, State::Warning), State::Ok);
        assert_eq!(step(&mut h, State::Warning), State::Warning);
        assert_eq!(step(&mut h, State::Ok), State::Ok);
    }
}
