//! Privileged helper implementations

use super::PrivilegedHelper;
use crate::error::{Result, TuneError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::process::Command;
use tracing::debug;

/// Runs a root-owned helper script through `sudo`
///
/// The script is invoked as `sudo <script> create|write|delete <path> [value]`.
#[derive(Debug, Clone)]
pub struct SudoHelper {
    script: PathBuf,
}

impl SudoHelper {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
        }
    }

    async fn invoke(&self, action: &str, path: &Path, value: Option<&str>) -> Result<()> {
        let mut cmd = Command::new("sudo");
        cmd.arg(&self.script).arg(action).arg(path);
        if let Some(value) = value {
            cmd.arg(value);
        }

        debug!(action, path = %path.display(), "Invoking privileged helper");

        let output = cmd
            .output()
            .await
            .map_err(|e| TuneError::setup(path, format!("failed to run helper: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TuneError::setup(
                path,
                format!("helper `{action}` exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl PrivilegedHelper for SudoHelper {
    async fn create(&self, path: &Path) -> Result<()> {
        self.invoke("create", path, None).await
    }

    async fn write(&self, path: &Path, value: &str) -> Result<()> {
        self.invoke("write", path, Some(value)).await
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        self.invoke("delete", path, None).await
    }
}

/// Performs the operations directly with the current credentials
///
/// Suitable for delegated cgroup subtrees and for mock hierarchies.
#[derive(Debug, Clone, Default)]
pub struct DirectHelper;

#[async_trait]
impl PrivilegedHelper for DirectHelper {
    async fn create(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
            .await
            .map_err(|e| TuneError::setup(path, e))
    }

    async fn write(&self, path: &Path, value: &str) -> Result<()> {
        fs::write(path, value)
            .await
            .map_err(|e| TuneError::setup(path, e))
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        // A real cgroup directory only accepts rmdir; plain directories
        // left by mock hierarchies still hold regular files.
        if fs::remove_dir(path).await.is_ok() {
            return Ok(());
        }
        fs::remove_dir_all(path)
            .await
            .map_err(|e| TuneError::setup(path, e))
    }
}
