//! Topic name and topic filter rules.
//!
//! - `+` matches exactly one topic level
//! - `#` matches the parent level and any number of remaining levels (must be last)
//! - topics starting with `$` are not matched by a leading wildcard

/// Maximum encoded length of a topic name or filter.
pub const MAX_TOPIC_LEN: usize = 65535;

const SHARE_PREFIX: &str = "$share/";

/// Check a topic name used for publishing.
pub fn validate_topic(topic: &str) -> Result<(), String> {
    if topic.is_empty() {
        return Err("topic is empty".to_string());
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(format!("topic exceeds {} bytes", MAX_TOPIC_LEN));
    }
    if topic.contains('\0') {
        return Err("topic contains NUL".to_string());
    }
    if topic.contains(['+', '#']) {
        return Err(format!("wildcards are not allowed in topic names: {}", topic));
    }
    Ok(())
}

/// Check a topic filter used for subscribing.
///
/// Accepts shared subscriptions of the form `$share/<group>/<filter>`.
pub fn validate_filter(filter: &str) -> Result<(), String> {
    if filter.is_empty() {
        return Err("filter is empty".to_string());
    }
    if filter.len() > MAX_TOPIC_LEN {
        return Err(format!("filter exceeds {} bytes", MAX_TOPIC_LEN));
    }
    if filter.contains('\0') {
        return Err("filter contains NUL".to_string());
    }

    let filter = match split_shared(filter) {
        Some(Ok((_, inner))) => inner,
        Some(Err(e)) => return Err(e),
        None => filter,
    };

    let mut levels = filter.split('/').peekable();
    while let Some(level) = levels.next() {
        match level {
            "#" if levels.peek().is_some() => {
                return Err(format!("'#' must be the last level: {}", filter));
            }
            "#" | "+" => {}
            _ if level.contains(['+', '#']) => {
                return Err(format!("wildcard must occupy a whole level: {}", filter));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Split `$share/<group>/<filter>` into its group and filter.
///
/// Returns `None` for non-shared filters.
pub fn split_shared(filter: &str) -> Option<Result<(&str, &str), String>> {
    let rest = filter.strip_prefix(SHARE_PREFIX)?;
    Some(match rest.split_once('/') {
        Some((group, inner))
            if !group.is_empty() && !group.contains(['+', '#']) && !inner.is_empty() =>
        {
            Ok((group, inner))
        }
        _ => Err(format!("invalid shared subscription: {}", filter)),
    })
}

/// Report whether `topic` matches `filter`.
///
/// # Example
///
/// ```
/// use mqttpad_session::topic::matches;
///
/// assert!(matches("a/+/c", "a/b/c"));
/// assert!(!matches("a/+/c", "a/b/c/d"));
/// ```
pub fn matches(filter: &str, topic: &str) -> bool {
    let filter = match split_shared(filter) {
        Some(Ok((_, inner))) => inner,
        Some(Err(_)) => return false,
        None => filter,
    };

    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut f = filter.split('/');
    let mut t = topic.split('/');
    loop {
        match (f.next(), t.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(fl), Some(tl)) if fl == tl => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Report whether every topic matched by `specific` is also matched by
/// `general`.
///
/// Shared subscriptions only cover themselves: the broker delivers them
/// independently of ordinary filters.
///
/// # Example
///
/// ```
/// use mqttpad_session::topic::covers;
///
/// assert!(covers("a/#", "a/+"));
/// assert!(!covers("a/+", "a/#"));
/// ```
pub fn covers(general: &str, specific: &str) -> bool {
    if general.starts_with(SHARE_PREFIX) || specific.starts_with(SHARE_PREFIX) {
        return general == specific;
    }

    if specific.starts_with('$') && (general.starts_with('+') || general.starts_with('#')) {
        return false;
    }

    let mut g = general.split('/');
    let mut s = specific.split('/');
    loop {
        match (g.next(), s.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(sl)) if sl != "#" => {}
            (Some(gl), Some(sl)) if gl == sl => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_topic() {
        assert!(validate_topic("t").is_ok());
        assert!(validate_topic("a/b/c").is_ok());
        assert!(validate_topic("/leading/slash").is_ok());

        assert!(validate_topic("").is_err());
        assert!(validate_topic("a/+/c").is_err());
        assert!(validate_topic("a/#").is_err());
        assert!(validate_topic("a\0b").is_err());
        assert!(validate_topic(&"x".repeat(MAX_TOPIC_LEN + 1)).is_err());
    }

    #[test]
    fn test_validate_filter() {
        assert!(validate_filter("a/+/c").is_ok());
        assert!(validate_filter("#").is_ok());
        assert!(validate_filter("a/#").is_ok());
        assert!(validate_filter("+/+").is_ok());
        assert!(validate_filter("$share/group1/device/+/state").is_ok());

        assert!(validate_filter("").is_err());
        assert!(validate_filter("a/#/c").is_err());
        assert!(validate_filter("a/b+/c").is_err());
        assert!(validate_filter("a/#b").is_err());
        assert!(validate_filter("$share/group1").is_err());
        assert!(validate_filter("$share//a").is_err());
    }

    #[test]
    fn test_single_level_wildcard() {
        assert!(matches("a/+/c", "a/b/c"));
        assert!(!matches("a/+/c", "a/b/c/d"));
        assert!(!matches("a/+/c", "a/c"));
        assert!(matches("+", "a"));
        assert!(!matches("+", "a/b"));
        assert!(matches("a/+", "a/"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        assert!(matches("a/#", "a"));
        assert!(matches("a/#", "a/b"));
        assert!(matches("a/#", "a/b/c/d"));
        assert!(matches("#", "anything/at/all"));
        assert!(!matches("a/#", "b/c"));
    }

    #[test]
    fn test_exact() {
        assert!(matches("t", "t"));
        assert!(!matches("t", "t/u"));
        assert!(!matches("t/u", "t"));
    }

    #[test]
    fn test_dollar_topics() {
        assert!(!matches("#", "$SYS/broker/load"));
        assert!(!matches("+/broker/load", "$SYS/broker/load"));
        assert!(matches("$SYS/#", "$SYS/broker/load"));
    }

    #[test]
    fn test_shared_filter() {
        assert!(matches("$share/g/device/+/state", "device/gear-001/state"));
        assert!(!matches("$share/g/device/+/state", "device/gear-001/stats"));
        assert_eq!(
            split_shared("$share/g/a/b"),
            Some(Ok(("g", "a/b")))
        );
        assert_eq!(split_shared("a/b"), None);
    }

    #[test]
    fn test_covers() {
        assert!(covers("a/#", "a"));
        assert!(covers("a/#", "a/+"));
        assert!(covers("a/#", "a/b/#"));
        assert!(covers("#", "a/+/c"));
        assert!(covers("a/+", "a/b"));
        assert!(covers("+/+", "a/+"));
        assert!(covers("a/b", "a/b"));

        assert!(!covers("a/+", "a/#"));
        assert!(!covers("a/+", "a"));
        assert!(!covers("a/b", "a/+"));
        assert!(!covers("a/+/c", "a/b"));
    }

    #[test]
    fn test_covers_dollar_and_shared() {
        assert!(!covers("#", "$SYS/#"));
        assert!(!covers("+/broker", "$SYS/broker"));
        assert!(covers("$SYS/#", "$SYS/broker"));

        assert!(!covers("#", "$share/g/a"));
        assert!(!covers("$share/g/#", "a"));
        assert!(covers("$share/g/a", "$share/g/a"));
    }

    #[test]
    fn test_covers_agrees_with_matches() {
        let filters = ["#", "+", "a", "a/#", "a/+", "a/b", "+/b", "a/+/c", "$SYS/#"];
        let topics = ["a", "b", "a/b", "a/c", "x/b", "a/b/c", "a/x/c", "$SYS/load"];
        for general in filters {
            for specific in filters {
                if !covers(general, specific) {
                    continue;
                }
                for topic in topics {
                    if matches(specific, topic) {
                        assert!(
                            matches(general, topic),
                            "{} covers {} but misses {}",
                            general,
                            specific,
                            topic
                        );
                    }
                }
            }
        }
    }
}
