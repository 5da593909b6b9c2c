//! Topic filters with MQTT wildcard rules.
//!
//! | Token | Matches |
//! |---|---|
//! | `+` | exactly one level |
//! | `#` | zero or more trailing levels; must be the last level |

use gpiobridge_types::BridgeError;

/// A validated subscription filter such as `gpio/write/#`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicFilter(String);

impl TopicFilter {
    /// Validate `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidTopicFilter`] for an empty filter, a `#`
    /// that is not the whole last level, or a `+` sharing a level with other
    /// characters.
    pub fn new(filter: &str) -> Result<Self, BridgeError> {
        if filter.is_empty() {
            return Err(BridgeError::InvalidTopicFilter(filter.to_string()));
        }
        let levels: Vec<&str> = filter.split('/').collect();
        let last = levels.len() - 1;
        for (i, level) in levels.iter().enumerate() {
            let bad_hash = level.contains('#') && (*level != "#" || i != last);
            let bad_plus = level.contains('+') && *level != "+";
            if bad_hash || bad_plus {
                return Err(BridgeError::InvalidTopicFilter(filter.to_string()));
            }
        }
        Ok(Self(filter.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the concrete `topic` is selected by this filter.
    pub fn matches(&self, topic: &str) -> bool {
        let mut filter_levels = self.0.split('/');
        let mut topic_levels = topic.split('/');
        loop {
            match (filter_levels.next(), topic_levels.next()) {
                (Some("#"), _) => return true,
                (Some("+"), Some(_)) => continue,
                (Some(f), Some(t)) if f == t => continue,
                (None, None) => return true,
                _ => return false,
            }
        }
    }
}

impl std::fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_matches_every_command_topic() {
        let filter = TopicFilter::new("gpio/write/#").unwrap();
        assert!(filter.matches("gpio/write/viessmann-onoff"));
        assert!(filter.matches("gpio/write/a/b"));
        assert!(filter.matches("gpio/write"));
        assert!(!filter.matches("status/viessmann-onoff"));
        assert!(!filter.matches("gpio/read/x"));
    }

    #[test]
    fn plus_matches_one_level() {
        let filter = TopicFilter::new("status/+").unwrap();
        assert!(filter.matches("status/viessmann-do7"));
        assert!(!filter.matches("status/a/b"));
        assert!(!filter.matches("status"));
    }

    #[test]
    fn exact_filter_is_case_sensitive() {
        let filter = TopicFilter::new("status/viessmann-do3").unwrap();
        assert!(filter.matches("status/viessmann-do3"));
        assert!(!filter.matches("status/Viessmann-do3"));
    }

    #[test]
    fn invalid_filters_are_rejected() {
        for bad in ["", "gpio/#/write", "gpio/wr#", "gpio/a+/b"] {
            assert!(
                matches!(TopicFilter::new(bad), Err(BridgeError::InvalidTopicFilter(_))),
                "{bad:?} must be rejected"
            );
        }
    }
}
