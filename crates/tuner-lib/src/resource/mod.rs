//! Resource isolation for benchmark runs
//!
//! This module wraps a cgroup v2 domain around each benchmark launch:
//! - `PrivilegedHelper` performs the create/write/delete operations
//! - `ResourceGroup` applies CPU, memory and swap caps and attaches a pid
//! - `ResourceMonitor` samples `cpu.stat` and `memory.current` in the background

mod group;
mod helper;
mod monitor;


pub use group::ResourceGroup;
pub use helper::{DirectHelper, SudoHelper};
pub use monitor::{MonitorConfig, ResourceMonitor};

use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// Default mount point of the unified cgroup hierarchy
pub const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Privileged filesystem operations needed to manage a resource group
#[async_trait]
pub trait PrivilegedHelper: Send + Sync {
    /// Create the group directory
    async fn create(&self, path: &Path) -> Result<()>;

    /// Write a value into a control file
    async fn write(&self, path: &Path, value: &str) -> Result<()>;

    /// Remove the group directory
    async fn delete(&self, path: &Path) -> Result<()>;
}

/// Parse `cpu.stat` contents and return `usage_usec`
pub fn parse_cpu_usage_usec(content: &str) -> Option<u64> {
    content.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("usage_usec"), Some(value)) => value.parse().ok(),
            _ => None,
        }
    })
}

/// Parse a `memory.max` style value; `max` means unlimited
pub fn parse_limit(content: &str) -> Option<u64> {
    let trimmed = content.trim();
    if trimmed == "max" {
        return None;
    }
    trimmed.parse().ok()
}
