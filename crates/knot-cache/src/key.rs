/// Compute a stable, filesystem-safe digest of a cache key.
///
/// Cache keys (package names, resolved source locators) may contain separators and other
/// characters that are not safe in file names; entries are addressed by this digest instead.
pub fn cache_digest(key: &str) -> String {
    format!("{:016x}", seahash::hash(key.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::cache_digest;

    #[test]
    fn digests_are_stable_and_distinct() {
        assert_eq!(cache_digest("left-pad"), cache_digest("left-pad"));
        assert_ne!(cache_digest("left-pad"), cache_digest("right-pad"));
        assert_eq!(cache_digest("@scope/name").len(), 16);
    }
}
