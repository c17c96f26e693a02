//! cgroup v2 resource group handle

use super::PrivilegedHelper;
use crate::error::Result;
use crate::models::ResourceLimits;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Default CFS period written alongside the quota in `cpu.max`
const CPU_PERIOD_USEC: u64 = 100_000;

/// A resource group owned by exactly one benchmark run
///
/// The handle is consumed by [`ResourceGroup::delete`], so a group cannot be
/// destroyed twice. Dropping a handle that was never deleted leaves the
/// directory behind and logs a warning.
pub struct ResourceGroup {
    name: String,
    path: PathBuf,
    limits: Option<ResourceLimits>,
    helper: Arc<dyn PrivilegedHelper>,
    deleted: bool,
}

impl ResourceGroup {
    /// Create the group under `cgroup_root`; an existing group is reused
    pub async fn create(
        helper: Arc<dyn PrivilegedHelper>,
        cgroup_root: &Path,
        name: &str,
    ) -> Result<Self> {
        let path = cgroup_root.join(name);

        if tokio::fs::metadata(&path).await.is_ok() {
            info!(group = %name, "Resource group already exists, reusing it");
        } else {
            helper.create(&path).await?;
            info!(group = %name, path = %path.display(), "Created resource group");
        }

        Ok(Self {
            name: name.to_string(),
            path,
            limits: None,
            helper,
            deleted: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Limits applied through [`ResourceGroup::apply_limits`], if any
    pub fn limits(&self) -> Option<ResourceLimits> {
        self.limits
    }

    /// Cap CPU time to `cores` worth of the default period
    pub async fn set_cpu_limit(&self, cores: f64) -> Result<()> {
        let quota = (cores * CPU_PERIOD_USEC as f64).round() as u64;
        self.helper
            .write(&self.path.join("cpu.max"), &format!("{quota} {CPU_PERIOD_USEC}"))
            .await
    }

    pub async fn set_memory_limit(&self, bytes: u64) -> Result<()> {
        self.helper
            .write(&self.path.join("memory.max"), &bytes.to_string())
            .await
    }

    pub async fn set_swap_limit(&self, bytes: u64) -> Result<()> {
        self.helper
            .write(&self.path.join("memory.swap.max"), &bytes.to_string())
            .await
    }

    /// Apply all three caps in one go
    pub async fn apply_limits(&mut self, limits: &ResourceLimits) -> Result<()> {
        self.set_cpu_limit(limits.cpu_cores).await?;
        self.set_memory_limit(limits.memory_bytes).await?;
        self.set_swap_limit(limits.swap_bytes).await?;
        self.limits = Some(*limits);
        Ok(())
    }

    /// Move a process into the group
    pub async fn add_process(&self, pid: u32) -> Result<()> {
        self.helper
            .write(&self.path.join("cgroup.procs"), &pid.to_string())
            .await
    }

    /// Destroy the group
    pub async fn delete(mut self) -> Result<()> {
        self.deleted = true;
        self.helper.delete(&self.path).await?;
        info!(group = %self.name, "Deleted resource group");
        Ok(())
    }
}

impl Drop for ResourceGroup {
    fn drop(&mut self) {
        if !self.deleted {
            warn!(
                group = %self.name,
                path = %self.path.display(),
                "Resource group dropped without being deleted"
            );
        }
    }
}

impl std::fmt::Debug for ResourceGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGroup")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("limits", &self.limits)
            .finish()
    }
}
