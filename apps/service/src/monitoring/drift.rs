/// Content drift: the service answered, but without the expected substring.
///
/// Unreachable services never drift, and an empty expectation never matches
/// as drift.
pub fn detect_drift(reachable: bool, content: &str, expected: Option<&str>) -> bool {
    match expected {
        Some(expected) if reachable && !expected.is_empty() => !content.contains(expected),
        _ => false,
    }
}
