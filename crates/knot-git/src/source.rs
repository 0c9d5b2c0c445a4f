use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use cargo_util::{ProcessBuilder, paths};
use tracing::debug;

use knot_types::{Manifest, load_descriptor};

use crate::spec::{GitReference, GitSpec};

/// A global cache of the result of `which git`.
static GIT: LazyLock<Result<PathBuf, which::Error>> = LazyLock::new(|| which::which("git"));

fn git() -> Result<ProcessBuilder> {
    match GIT.as_ref() {
        Ok(path) => Ok(ProcessBuilder::new(path)),
        Err(err) => Err(anyhow!(
            "git executable not found ({err}); ensure git is installed and available"
        )),
    }
}

/// A captured git checkout: cloned, commit-pinned, not yet installed or packed.
#[derive(Debug)]
pub struct GitCheckout {
    /// The captured directory holding the checkout (`.git` already stripped).
    pub dir: PathBuf,
    /// The precise commit id of the checkout.
    pub oid: String,
    /// The commit-pinned source locator, `<repository>#<oid>`. The cache key for the packed
    /// tarball.
    pub resolved: String,
    /// The checkout's package descriptor, with `dist.resolved` filled in.
    pub manifest: Manifest,
}

/// A single-clone git retrieval. Blocking; run it under `spawn_blocking`.
pub struct GitSource {
    spec: GitSpec,
    /// A caller-owned work directory the clone stages and captures under. The caller deletes
    /// it once the continuation is done with the captured checkout.
    work_dir: PathBuf,
}

impl GitSource {
    pub fn new(spec: GitSpec, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            spec,
            work_dir: work_dir.into(),
        }
    }

    /// Clone the repository once, pin the commit, and capture the checkout.
    pub fn fetch(self) -> Result<GitCheckout> {
        fs_err::create_dir_all(&self.work_dir)?;
        let clone_dir = self.work_dir.join("repo");
        self.clone_into(&clone_dir)?;

        let oid = rev_parse_head(&clone_dir)?;
        let resolved = self.spec.resolved_locator(&oid);
        debug!("Resolved {} to {resolved}", self.spec);

        // The checkout becomes tarball content; the repository itself must not leak into it.
        paths::remove_dir_all(clone_dir.join(".git"))?;

        let mut manifest = load_descriptor(&clone_dir)
            .with_context(|| format!("`{}` is not a package repository", self.spec))?;
        manifest.dist.resolved = Some(resolved.clone());

        // Move the checkout out of the clone pipeline's staging location before anything can
        // reuse or clean it.
        let captured = self.work_dir.join("captured");
        fs_err::rename(&clone_dir, &captured)
            .with_context(|| format!("failed to capture checkout at {}", captured.display()))?;

        Ok(GitCheckout {
            dir: captured,
            oid,
            resolved,
            manifest,
        })
    }

    fn clone_into(&self, target: &Path) -> Result<()> {
        let mut cmd = git()?;
        cmd.arg("clone").arg("--quiet");
        match self.spec.reference() {
            // Refs can be cloned shallowly; a pinned commit needs history to check out.
            GitReference::DefaultBranch => {
                cmd.arg("--depth").arg("1");
            }
            GitReference::BranchOrTag(rev) => {
                cmd.arg("--depth").arg("1").arg("--branch").arg(rev);
            }
            GitReference::Commit(_) => {}
        }
        cmd.arg(self.spec.repository().as_str()).arg(target);
        cmd.exec_with_output()
            .with_context(|| format!("failed to clone {}", self.spec.repository()))?;

        if let GitReference::Commit(oid) = self.spec.reference() {
            git()?
                .arg("checkout")
                .arg("--quiet")
                .arg(oid)
                .cwd(target)
                .exec_with_output()
                .with_context(|| format!("failed to check out {oid}"))?;
        }
        Ok(())
    }
}

fn rev_parse_head(dir: &Path) -> Result<String> {
    let output = git()?
        .arg("rev-parse")
        .arg("HEAD")
        .cwd(dir)
        .exec_with_output()
        .context("failed to resolve HEAD")?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
