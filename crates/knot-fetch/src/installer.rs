use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use async_trait::async_trait;
use tracing::debug;

/// Installs a checkout's own dependencies before it is packed into a tarball.
///
/// Git sources ship unbuilt; whatever the package needs at pack time must be installed into
/// the checkout first.
#[async_trait]
pub trait DependencyInstaller: Send + Sync {
    /// Install production dependencies into `dir`, non-interactively.
    async fn install(&self, dir: &Path) -> anyhow::Result<()>;
}

/// Runs an external command (typically the package manager itself, recursively) inside the
/// checkout.
pub struct CommandInstaller {
    program: PathBuf,
    args: Vec<OsString>,
}

impl CommandInstaller {
    pub fn new(
        program: impl Into<PathBuf>,
        args: impl IntoIterator<Item = impl Into<OsString>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl DependencyInstaller for CommandInstaller {
    async fn install(&self, dir: &Path) -> anyhow::Result<()> {
        debug!("Installing dependencies in {}", dir.display());
        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .current_dir(dir)
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.program.display()))?;
        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}
