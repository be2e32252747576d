//! The check-engine severity enumeration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity state of a metric or check, totally ordered from least to most
/// severe. `max` aggregation (plugin composition, overall-state computation)
/// relies on this ordering — never overload equality with severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum State {
    Ok = 0,
    Warning = 1,
    Critical = 2,
    Unknown = 3,
}

impl State {
    /// All variants in severity order, least to most severe.
    pub const ALL: [State; 4] = [State::Ok, State::Warning, State::Critical, State::Unknown];

    /// The NSCA wire-level numeric code for this state.
    pub fn wire_code(self) -> u8 {
        match self {
            State::Ok => 0,
            State::Warning => 1,
            State::Critical => 2,
            State::Unknown => 3,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Ok => "OK",
            State::Warning => "WARNING",
            State::Critical => "CRITICAL",
            State::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_order_is_total() {
        assert!(State::Ok < State::Warning);
        assert!(State::Warning < State::Critical);
        assert!(State::Critical < State::Unknown);
        assert_eq!(State::ALL.iter().copied().max(), Some(State::Unknown));
    }

    #[test]
    fn wire_codes_match_nsca_convention() {
        assert_eq!(State::Ok.wire_code(), 0);
        assert_eq!(State::Warning.wire_code(), 1);
        assert_eq!(State::Critical.wire_code(), 2);
        assert_eq!(State::Unknown.wire_code(), 3);
    }
}
