//! Wildcard matching for invalidation patterns.

/// Match a key against a pattern containing at most one `*` wildcard.
///
/// Without a `*` the match is exact. With one, the pattern's prefix and
/// suffix must both match without overlapping. Additional `*`s are treated
/// as literals.
#[must_use]
pub fn key_matches(pattern: &str, key: &str) -> bool {
    match pattern.find('*') {
        None => pattern == key,
        Some(pos) => {
            let (prefix, rest) = pattern.split_at(pos);
            let suffix = &rest[1..];
            key.len() >= prefix.len() + suffix.len()
                && key.starts_with(prefix)
                && key.ends_with(suffix)
        }
    }
}
