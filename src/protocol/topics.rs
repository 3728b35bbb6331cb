//! Topic name and topic filter handling
//!
//! Validation of publish topic names and subscription filters, plus the MQTT
//! wildcard matching used both for the subscription set and for handler routing.

use thiserror::Error;

/// Topic validation errors
#[derive(Debug, Error, PartialEq)]
pub enum TopicError {
    #[error("Topic cannot be empty")]
    Empty,
    #[error("Topic contains a NUL character")]
    NulCharacter,
    #[error("Topic name must not contain wildcards: {0}")]
    WildcardInTopicName(String),
    #[error("Invalid use of '+' in filter: {0}")]
    InvalidSingleLevelWildcard(String),
    #[error("'#' must be the last level of the filter: {0}")]
    InvalidMultiLevelWildcard(String),
}

/// Validate a topic name used for publishing (no wildcards allowed)
pub fn validate_topic_name(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if topic.contains('\0') {
        return Err(TopicError::NulCharacter);
    }
    if topic.contains('+') || topic.contains('#') {
        return Err(TopicError::WildcardInTopicName(topic.to_string()));
    }
    Ok(())
}

/// Validate a subscription topic filter
///
/// `+` must occupy a whole level; `#` must occupy a whole level and be the last one.
pub fn validate_topic_filter(filter: &str) -> Result<(), TopicError> {
    if filter.is_empty() {
        return Err(TopicError::Empty);
    }
    if filter.contains('\0') {
        return Err(TopicError::NulCharacter);
    }

    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;

    for (index, level) in levels.iter().enumerate() {
        if level.contains('+') && *level != "+" {
            return Err(TopicError::InvalidSingleLevelWildcard(filter.to_string()));
        }
        if level.contains('#') && (*level != "#" || index != last) {
            return Err(TopicError::InvalidMultiLevelWildcard(filter.to_string()));
        }
    }

    Ok(())
}

/// Check if an MQTT topic filter matches a concrete topic name
///
/// - `+` matches exactly one level
/// - `#` matches the parent level and any number of child levels
/// - topics starting with `$` are not matched by a leading wildcard
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
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

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_exact_match() {
        assert!(topic_matches("home/kitchen/light", "home/kitchen/light"));
        assert!(!topic_matches("home/kitchen/light", "home/kitchen/lamp"));
        assert!(!topic_matches("home/kitchen", "home/kitchen/light"));
        assert!(!topic_matches("home/kitchen/light", "home/kitchen"));
    }

    #[test]
    fn test_single_level_wildcard() {
        assert!(topic_matches("home/+/light", "home/kitchen/light"));
        assert!(topic_matches("home/+/light", "home/bedroom/light"));
        assert!(!topic_matches("home/+/light", "home/kitchen/ceiling/light"));
        assert!(topic_matches("+", "home"));
        assert!(!topic_matches("+", "home/kitchen"));
        // Empty levels are still levels
        assert!(topic_matches("home/+", "home/"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        assert!(topic_matches("home/#", "home/kitchen/light"));
        assert!(topic_matches("home/#", "home/kitchen"));
        assert!(topic_matches("home/#", "home"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(!topic_matches("home/#", "garden/tap"));
    }

    #[test]
    fn test_dollar_topics_not_matched_by_leading_wildcards() {
        assert!(!topic_matches("#", "$SYS/broker/uptime"));
        assert!(!topic_matches("+/broker/uptime", "$SYS/broker/uptime"));
        assert!(topic_matches("$SYS/#", "$SYS/broker/uptime"));
    }

    #[test]
    fn test_validate_topic_name() {
        assert!(validate_topic_name("home/kitchen/light").is_ok());
        assert_eq!(validate_topic_name(""), Err(TopicError::Empty));
        assert!(matches!(
            validate_topic_name("home/+/light"),
            Err(TopicError::WildcardInTopicName(_))
        ));
        assert!(matches!(
            validate_topic_name("home/#"),
            Err(TopicError::WildcardInTopicName(_))
        ));
        assert_eq!(validate_topic_name("a\0b"), Err(TopicError::NulCharacter));
    }

    #[test]
    fn test_validate_topic_filter() {
        assert!(validate_topic_filter("home/kitchen/light").is_ok());
        assert!(validate_topic_filter("home/+/light").is_ok());
        assert!(validate_topic_filter("home/#").is_ok());
        assert!(validate_topic_filter("#").is_ok());
        assert!(validate_topic_filter("+/+").is_ok());

        assert_eq!(validate_topic_filter(""), Err(TopicError::Empty));
        assert!(matches!(
            validate_topic_filter("home/kit+chen"),
            Err(TopicError::InvalidSingleLevelWildcard(_))
        ));
        assert!(matches!(
            validate_topic_filter("home/#/light"),
            Err(TopicError::InvalidMultiLevelWildcard(_))
        ));
        assert!(matches!(
            validate_topic_filter("home/ki#"),
            Err(TopicError::InvalidMultiLevelWildcard(_))
        ));
    }

    proptest! {
        #[test]
        fn valid_topic_names_match_themselves(topic in "[a-z]{1,6}(/[a-z]{1,6}){0,4}") {
            prop_assert!(topic_matches(&topic, &topic));
        }

        #[test]
        fn hash_filter_matches_every_plain_topic(topic in "[a-z]{1,6}(/[a-z]{1,6}){0,4}") {
            prop_assert!(topic_matches("#", &topic));
        }

        #[test]
        fn plus_replaces_any_single_level(
            prefix in "[a-z]{1,6}",
            middle in "[a-z]{1,6}",
            suffix in "[a-z]{1,6}",
        ) {
            let topic = format!("{prefix}/{middle}/{suffix}");
            let filter = format!("{prefix}/+/{suffix}");
            prop_assert!(topic_matches(&filter, &topic));
        }
    }
}
