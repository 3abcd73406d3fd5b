// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! MQTT topic name and topic filter validation and matching.
//!
//! Incoming publishes are dispatched to every registered message handler, so
//! applications that subscribe to multiple filters use [`TopicFilter::matches_topic_name`]
//! to route messages on their side.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Error indicating an invalid topic name or topic filter
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum TopicParseError {
    /// Topic names and filters must contain at least one character
    #[error("topic must contain at least one character")]
    Empty,
    /// The null character is forbidden anywhere in a topic
    #[error("topic must not contain the null character")]
    NullCharacter,
    /// Wildcard characters are only valid in topic filters
    #[error("topic name must not contain wildcard characters")]
    WildcardInTopicName,
    /// The multi-level wildcard must be the last level of a filter, alone in its level
    #[error("multi-level wildcard must be the final, whole level of the filter")]
    MultiLevelWildcardPosition,
    /// The single-level wildcard must occupy a whole level
    #[error("single-level wildcard must occupy a whole level of the filter")]
    SingleLevelWildcardPosition,
}

/// A validated MQTT topic name (no wildcards), as used in PUBLISH packets.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct TopicName(String);

impl TopicName {
    /// Return the topic name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Return true if this topic name matches the provided [`TopicFilter`]
    #[must_use]
    pub fn matches_topic_filter(&self, topic_filter: &TopicFilter) -> bool {
        topic_filter.matches_topic_name(self)
    }
}

impl FromStr for TopicName {
    type Err = TopicParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate_common(s)?;
        if s.contains(['+', '#']) {
            return Err(TopicParseError::WildcardInTopicName);
        }
        Ok(TopicName(s.to_string()))
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated MQTT topic filter, as used in SUBSCRIBE packets.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct TopicFilter(String);

impl TopicFilter {
    /// Return the topic filter as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Return true if the provided [`TopicName`] matches this topic filter
    #[must_use]
    pub fn matches_topic_name(&self, topic_name: &TopicName) -> bool {
        let name = topic_name.as_str();
        // Filters beginning with a wildcard do not match topics beginning with `$`
        // (MQTTv5 4.7.2)
        if name.starts_with('$') && (self.0.starts_with('+') || self.0.starts_with('#')) {
            return false;
        }

        let mut name_levels = name.split('/');
        for filter_level in self.0.split('/') {
            if filter_level == "#" {
                return true;
            }
            match name_levels.next() {
                Some(name_level) if filter_level == "+" || filter_level == name_level => {}
                _ => return false,
            }
        }
        name_levels.next().is_none()
    }
}

impl FromStr for TopicFilter {
    type Err = TopicParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate_common(s)?;
        let num_levels = s.split('/').count();
        for (pos, level) in s.split('/').enumerate() {
            if level.contains('#') && (level != "#" || pos != num_levels - 1) {
                return Err(TopicParseError::MultiLevelWildcardPosition);
            }
            if level.contains('+') && level != "+" {
                return Err(TopicParseError::SingleLevelWildcardPosition);
            }
        }
        Ok(TopicFilter(s.to_string()))
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn validate_common(s: &str) -> Result<(), TopicParseError> {
    if s.is_empty() {
        return Err(TopicParseError::Empty);
    }
    if s.contains('\0') {
        return Err(TopicParseError::NullCharacter);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("sport/tennis/player1"; "multiple levels")]
    #[test_case("sport"; "single level")]
    #[test_case("/"; "empty levels")]
    #[test_case("$SYS/broker/load"; "dollar topic")]
    fn valid_topic_name(s: &str) {
        assert!(TopicName::from_str(s).is_ok());
    }

    #[test_case("", TopicParseError::Empty; "empty")]
    #[test_case("sport/\0tennis", TopicParseError::NullCharacter; "null character")]
    #[test_case("sport/+/player1", TopicParseError::WildcardInTopicName; "single level wildcard")]
    #[test_case("sport/#", TopicParseError::WildcardInTopicName; "multi level wildcard")]
    fn invalid_topic_name(s: &str, expected: TopicParseError) {
        assert_eq!(TopicName::from_str(s).unwrap_err(), expected);
    }

    #[test_case("sport/tennis/player1"; "exact")]
    #[test_case("sport/+/player1"; "single level wildcard")]
    #[test_case("+/+/+"; "all single level wildcards")]
    #[test_case("sport/#"; "multi level wildcard")]
    #[test_case("#"; "multi level wildcard only")]
    fn valid_topic_filter(s: &str) {
        assert!(TopicFilter::from_str(s).is_ok());
    }

    #[test_case("", TopicParseError::Empty; "empty")]
    #[test_case("sport/#/tennis", TopicParseError::MultiLevelWildcardPosition; "hash not last")]
    #[test_case("sport/tennis#", TopicParseError::MultiLevelWildcardPosition; "hash not alone")]
    #[test_case("sport/tennis+/player1", TopicParseError::SingleLevelWildcardPosition; "plus not alone")]
    fn invalid_topic_filter(s: &str, expected: TopicParseError) {
        assert_eq!(TopicFilter::from_str(s).unwrap_err(), expected);
    }

    #[test_case("sport/tennis/player1", "sport/tennis/player1", true; "exact match")]
    #[test_case("sport/tennis/player1", "sport/tennis/player2", false; "exact mismatch")]
    #[test_case("sport/+/player1", "sport/tennis/player1", true; "single level match")]
    #[test_case("sport/+/player1", "sport/tennis/player2", false; "single level mismatch")]
    #[test_case("sport/+", "sport", false; "single level requires level")]
    #[test_case("sport/#", "sport/tennis/player1", true; "multi level match")]
    #[test_case("sport/#", "sport", true; "multi level includes parent")]
    #[test_case("#", "sport/tennis", true; "bare multi level matches all")]
    #[test_case("#", "$SYS/broker", false; "wildcard does not match dollar topic")]
    #[test_case("+/monitor", "$SYS/monitor", false; "plus does not match dollar topic")]
    #[test_case("$SYS/#", "$SYS/broker", true; "explicit dollar filter matches")]
    #[test_case("sport/tennis", "sport/tennis/player1", false; "filter shorter than name")]
    #[test_case("sport/tennis/player1", "sport/tennis", false; "filter longer than name")]
    fn filter_matching(filter: &str, name: &str, expected: bool) {
        let filter = TopicFilter::from_str(filter).unwrap();
        let name = TopicName::from_str(name).unwrap();
        assert_eq!(filter.matches_topic_name(&name), expected);
        assert_eq!(name.matches_topic_filter(&filter), expected);
    }
}
