//! Destination naming on an MQTT broker
//!
//! Queues and topics both map to MQTT topic names, so the same rules apply:
//! - names are non-empty, at most 65535 bytes, no null character
//! - names never contain wildcards (+ or #)
//! - a shared subscription filter is `$share/<group>/<filter>`

/// Validate a queue or topic name before it is used on the wire
pub fn validate_destination(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("destination name cannot be empty");
    }
    if name.len() > 65535 {
        return Err("destination name exceeds maximum length");
    }
    if name.contains('\0') {
        return Err("destination name cannot contain null character");
    }
    if name.contains('+') || name.contains('#') {
        return Err("destination name cannot contain wildcards");
    }
    if name.starts_with('$') {
        return Err("destination name cannot start with $");
    }
    Ok(())
}

/// Shared subscription filter for a consumer group
pub fn shared_filter(group: &str, filter: &str) -> String {
    format!("$share/{}/{}", group, filter)
}

/// Strip a `$share/<group>/` prefix, returning the plain filter
pub fn strip_share(filter: &str) -> &str {
    filter
        .strip_prefix("$share/")
        .and_then(|rest| rest.split_once('/'))
        .map(|(_, f)| f)
        .unwrap_or(filter)
}

/// Check if a (possibly shared) filter matches a topic name
///
/// - / is the level separator
/// - + matches exactly one level
/// - # matches zero or more levels (must be last)
/// - $-topics don't match filters starting with + or #
pub fn filter_matches(filter: &str, topic: &str) -> bool {
    let filter = strip_share(filter);
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut topic_levels = topic.split('/');
    for level in filter.split('/') {
        if level == "#" {
            return true;
        }
        match topic_levels.next() {
            Some(t) if level == "+" || level == t => {}
            _ => return false,
        }
    }
    topic_levels.next().is_none()
}
