use std::fmt::{Display, Formatter};

use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum GitSpecError {
    #[error("`{0}` is not a valid git URL")]
    InvalidUrl(String, #[source] url::ParseError),
    #[error("`{0}` does not use a supported git transport")]
    UnsupportedTransport(String),
}

/// The committish a git spec asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitReference {
    /// No committish: the remote's default branch.
    DefaultBranch,
    /// A branch or tag name.
    BranchOrTag(String),
    /// A full commit id: already pinned, nothing to discover.
    Commit(String),
}

impl GitReference {
    fn from_rev(rev: &str) -> Self {
        if rev.len() == 40 && rev.chars().all(|c| c.is_ascii_hexdigit()) {
            Self::Commit(rev.to_ascii_lowercase())
        } else {
            Self::BranchOrTag(rev.to_string())
        }
    }
}

/// A parsed git spec: repository URL plus requested committish.
///
/// Accepts the `git+<transport>://…#committish` forms package descriptors use, plus bare
/// `git://` URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSpec {
    repository: Url,
    reference: GitReference,
}

impl GitSpec {
    pub fn parse(spec: &str) -> Result<Self, GitSpecError> {
        let stripped = spec.strip_prefix("git+").unwrap_or(spec);
        let (repository, rev) = match stripped.split_once('#') {
            Some((repository, rev)) if !rev.is_empty() => (repository, Some(rev)),
            Some((repository, _)) => (repository, None),
            None => (stripped, None),
        };

        let repository = Url::parse(repository)
            .map_err(|err| GitSpecError::InvalidUrl(spec.to_string(), err))?;
        match repository.scheme() {
            "git" | "http" | "https" | "ssh" | "file" => {}
            _ => return Err(GitSpecError::UnsupportedTransport(spec.to_string())),
        }

        Ok(Self {
            repository,
            reference: rev.map_or(GitReference::DefaultBranch, GitReference::from_rev),
        })
    }

    pub fn repository(&self) -> &Url {
        &self.repository
    }

    pub fn reference(&self) -> &GitReference {
        &self.reference
    }

    /// The exact source locator for a resolved commit of this repository.
    pub fn resolved_locator(&self, oid: &str) -> String {
        format!("{}#{oid}", self.repository)
    }
}

impl Display for GitSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.reference {
            GitReference::DefaultBranch => write!(f, "{}", self.repository),
            GitReference::BranchOrTag(rev) | GitReference::Commit(rev) => {
                write!(f, "{}#{rev}", self.repository)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{GitReference, GitSpec};

    #[test]
    fn parses_prefixed_url_with_branch() {
        let spec = GitSpec::parse("git+https://github.com/user/repo.git#next").unwrap();
        assert_eq!(spec.repository().as_str(), "https://github.com/user/repo.git");
        assert_eq!(
            spec.reference(),
            &GitReference::BranchOrTag("next".to_string())
        );
    }

    #[test]
    fn full_hex_committish_is_pinned() {
        let spec = GitSpec::parse(
            "git+https://github.com/user/repo#0beec7b5ea3f0fdbc95d0dd47f3c5bc275da8a33",
        )
        .unwrap();
        assert_eq!(
            spec.reference(),
            &GitReference::Commit("0beec7b5ea3f0fdbc95d0dd47f3c5bc275da8a33".to_string())
        );
    }

    #[test]
    fn bare_url_uses_default_branch() {
        let spec = GitSpec::parse("git://example.com/repo.git").unwrap();
        assert_eq!(spec.reference(), &GitReference::DefaultBranch);
    }

    #[test]
    fn rejects_non_git_transports() {
        assert!(GitSpec::parse("git+ftp://example.com/repo").is_err());
        assert!(GitSpec::parse("not a url").is_err());
    }

    #[test]
    fn resolved_locator_pins_the_commit() {
        let spec = GitSpec::parse("git+https://example.com/repo.git#main").unwrap();
        assert_eq!(
            spec.resolved_locator("0f0f0f"),
            "https://example.com/repo.git#0f0f0f"
        );
    }
}
