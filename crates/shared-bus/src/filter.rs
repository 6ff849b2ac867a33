//! # Topic Filters
//!
//! MQTT-style subscription filters: `+` matches exactly one level, a
//! trailing `#` matches any remaining levels (including none). Wildcards
//! in the first level never match a topic starting with `$`.

use std::fmt;
use thiserror::Error;

/// Why a filter string was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("Topic filter is empty")]
    Empty,

    #[error("'#' must be the last level of {0}")]
    MisplacedMultiLevel(String),

    #[error("Wildcard must occupy a whole level in {0}")]
    PartialWildcard(String),
}

/// A validated subscription filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicFilter {
    raw: String,
}

impl TopicFilter {
    /// Parse and validate a filter.
    ///
    /// # Errors
    ///
    /// See [`FilterError`].
    pub fn parse(filter: &str) -> Result<Self, FilterError> {
        if filter.is_empty() {
            return Err(FilterError::Empty);
        }

        let levels: Vec<&str> = filter.split('/').collect();
        let last = levels.len() - 1;
        for (index, level) in levels.iter().enumerate() {
            if level.contains('#') {
                if *level != "#" {
                    return Err(FilterError::PartialWildcard(filter.to_string()));
                }
                if index != last {
                    return Err(FilterError::MisplacedMultiLevel(filter.to_string()));
                }
            }
            if level.contains('+') && *level != "+" {
                return Err(FilterError::PartialWildcard(filter.to_string()));
            }
        }

        Ok(Self {
            raw: filter.to_string(),
        })
    }

    /// Filter matching a single exact topic.
    ///
    /// # Errors
    ///
    /// Fails if `topic` contains wildcard characters in a malformed way.
    pub fn exact(topic: &str) -> Result<Self, FilterError> {
        Self::parse(topic)
    }

    /// Filter matching every non-`$` topic.
    #[must_use]
    pub fn all() -> Self {
        Self {
            raw: "#".to_string(),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn has_wildcards(&self) -> bool {
        self.raw.contains(['+', '#'])
    }

    /// Whether `topic` is matched by this filter.
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        if !self.has_wildcards() {
            return self.raw == topic;
        }

        let mut filter_levels = self.raw.split('/');
        let mut topic_levels = topic.split('/');
        let mut first = true;

        loop {
            match (filter_levels.next(), topic_levels.next()) {
                (Some("#"), level) => {
                    return !(first && level.is_some_and(|l| l.starts_with('$')));
                }
                (Some("+"), Some(level)) => {
                    if first && level.starts_with('$') {
                        return false;
                    }
                }
                (Some(expected), Some(level)) => {
                    if expected != level {
                        return false;
                    }
                }
                (None, None) => return true,
                _ => return false,
            }
            first = false;
        }
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<&str> for TopicFilter {
    type Error = FilterError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        let filter = TopicFilter::parse("amr/AMR-001/status").unwrap();
        assert!(filter.matches("amr/AMR-001/status"));
        assert!(!filter.matches("amr/AMR-002/status"));
        assert!(!filter.matches("amr/AMR-001/status/x"));
    }

    #[test]
    fn test_single_level_wildcard() {
        let filter = TopicFilter::parse("amr/+/status").unwrap();
        assert!(filter.matches("amr/AMR-001/status"));
        assert!(!filter.matches("amr/status"));
        assert!(!filter.matches("amr/a/b/status"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        let filter = TopicFilter::parse("amr/#").unwrap();
        assert!(filter.matches("amr"));
        assert!(filter.matches("amr/AMR-001/cmd/call"));
        assert!(!filter.matches("other/AMR-001"));
    }

    #[test]
    fn test_dollar_topics_hidden_from_leading_wildcards() {
        assert!(!TopicFilter::all().matches("$aws/things/d/shadow/get"));
        assert!(!TopicFilter::parse("+/things/#").unwrap().matches("$aws/things/d"));
        assert!(TopicFilter::parse("$aws/#").unwrap().matches("$aws/things/d"));
    }

    #[test]
    fn test_invalid_filters() {
        assert_eq!(TopicFilter::parse(""), Err(FilterError::Empty));
        assert!(matches!(
            TopicFilter::parse("a/#/b"),
            Err(FilterError::MisplacedMultiLevel(_))
        ));
        assert!(matches!(
            TopicFilter::parse("a/b+"),
            Err(FilterError::PartialWildcard(_))
        ));
        assert!(matches!(
            TopicFilter::parse("a/b#"),
            Err(FilterError::PartialWildcard(_))
        ));
    }
}
