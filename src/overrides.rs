//! Metric-name patterns used to exclude metrics at subscription time.

use std::collections::HashSet;

use crate::{BridgeError, Result};

/// A parsed metric pattern: either an exact dotted name or a `prefix.*`
/// wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricPattern {
    Exact(String),
    Prefix(String),
}

impl MetricPattern {
    /// Parse `a.b.c` as exact, `a.b.*` as prefix. `*` is only valid as the
    /// entire final dot-separated component.
    pub fn parse(pattern: &str) -> Result<Self> {
        let components: Vec<&str> = pattern.split('.').collect();
        if components.iter().any(|c| c.is_empty()) {
            return Err(BridgeError::PatternParse(format!(
                "metric pattern {pattern:?} has an empty component"
            )));
        }
        for (i, component) in components.iter().enumerate() {
            let is_last = i == components.len() - 1;
            if component.contains('*') {
                if !is_last || *component != "*" {
                    return Err(BridgeError::PatternParse(format!(
                        "metric pattern {pattern:?}: '*' only allowed as the entire last component"
                    )));
                }
            }
        }
        if components.last() == Some(&"*") {
            let prefix = components[..components.len() - 1].join(".");
            Ok(MetricPattern::Prefix(format!("{prefix}.")))
        } else {
            Ok(MetricPattern::Exact(pattern.to_string()))
        }
    }

    pub fn matches(&self, metric: &str) -> bool {
        match self {
            MetricPattern::Exact(name) => name == metric,
            MetricPattern::Prefix(prefix) => metric.starts_with(prefix.as_str()),
        }
    }
}

/// A set of metric patterns.
#[derive(Debug, Clone, Default)]
pub struct MetricPatternSet {
    patterns: Vec<MetricPattern>,
}

impl MetricPatternSet {
    pub fn empty() -> Self {
        MetricPatternSet { patterns: Vec::new() }
    }

    pub fn from_config(patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| MetricPattern::parse(p))
            .collect::<Result<Vec<_>>>()?;
        Ok(MetricPatternSet { patterns })
    }

    pub fn contains(&self, metric: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(metric))
    }
}

/// Reconciler-level overrides applied before a check's metrics are
/// subscribed to or populated.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub ignored_metrics: MetricPatternSet,
}

impl Overrides {
    pub fn empty() -> Self {
        Overrides {
            ignored_metrics: MetricPatternSet::empty(),
        }
    }

    pub fn from_config(ignored_metrics: &[String]) -> Result<Self> {
        Ok(Overrides {
            ignored_metrics: MetricPatternSet::from_config(ignored_metrics)?,
        })
    }

    /// Filter `metrics`, dropping any that match `ignored_metrics`. Returns
    /// the retained metrics; callers should log how many were dropped.
    pub fn filter(&self, metrics: impl IntoIterator<Item = String>) -> Vec<String> {
        metrics
            .into_iter()
            .filter(|m| !self.ignored_metrics.contains(m))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_pattern_matches_only_itself() {
        let p = MetricPattern::parse("a.b.c").unwrap();
        assert!(p.matches("a.b.c"));
        assert!(!p.matches("a.b.cd"));
    }

    #[test]
    fn prefix_pattern_matches_any_suffix() {
        let p = MetricPattern::parse("a.b.*").unwrap();
        assert!(p.matches("a.b.c"));
        assert!(p.matches("a.b.c.d"));
        assert!(!p.matches("a.bc"));
    }

    #[test]
    fn wildcard_only_valid_as_whole_last_component() {
        assert!(MetricPattern::parse("a.*.c").is_err());
        assert!(MetricPattern::parse("a.b*").is_err());
        assert!(MetricPattern::parse("a..c").is_err());
    }

    #[test]
    fn overrides_drop_ignored_metrics() {
        let overrides = Overrides::from_config(&["sys.*".to_string()]).unwrap();
        let kept = overrides.filter(vec!["sys.cpu".to_string(), "app.rps".to_string()]);
        assert_eq!(kept, vec!["app.rps".to_string()]);
    }
}
