use serde::{Deserialize, Serialize};

/// Prefix marking a synthetic tarball locator.
///
/// Manifests fabricated for git/url sources have no real per-version tarball address; instead
/// the locator embeds the original request so later stages can re-derive it without
/// re-resolving.
pub const REMOTE_SPEC_MARK: &str = "knot-remote-spec:";

/// The payload embedded in a marked tarball locator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSpecMark {
    /// The remote kind tag of the original request (`git` or `url`).
    pub kind: String,
    /// The spec as originally requested, e.g. `git+https://github.com/user/repo#branch`.
    pub spec: String,
    /// The commit-pinned (or otherwise exact) source locator the spec resolved to.
    pub resolved: String,
    /// The `name@version` id of the resolved package.
    pub id: String,
}

impl RemoteSpecMark {
    pub fn encode(&self) -> String {
        let payload = serde_json::to_string(self).expect("mark payload is plain strings");
        format!("{REMOTE_SPEC_MARK}{payload}")
    }

    /// Decode a marked locator. Returns `None` for ordinary tarball URLs.
    pub fn decode(locator: &str) -> Option<Self> {
        let payload = locator.strip_prefix(REMOTE_SPEC_MARK)?;
        serde_json::from_str(payload).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::RemoteSpecMark;

    #[test]
    fn roundtrip() {
        let mark = RemoteSpecMark {
            kind: "git".to_string(),
            spec: "git+https://github.com/user/repo#main".to_string(),
            resolved: "https://github.com/user/repo#0f0f0f".to_string(),
            id: "repo@1.2.3".to_string(),
        };
        let encoded = mark.encode();
        assert!(encoded.starts_with("knot-remote-spec:"));
        assert_eq!(RemoteSpecMark::decode(&encoded), Some(mark));
    }

    #[test]
    fn ordinary_urls_are_not_marked() {
        assert_eq!(
            RemoteSpecMark::decode("https://registry.npmjs.org/left-pad/-/left-pad-1.3.0.tgz"),
            None
        );
    }
}
