//! Tunables for the attach/detach lifecycle.

use crate::{Result, VolumeError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub device_root: PathBuf,
    pub inspect_program: String,
    pub readiness_initial_delay_ms: u64,
    pub readiness_max_delay_secs: u64,
    pub readiness_budget_secs: u64,
    pub inspect_timeout_secs: u64,
    pub mkfs_timeout_secs: u64,
    pub mount_timeout_secs: u64,
    pub mount_attempts: u32,
    pub mount_retry_delay_ms: u64,
    pub unmount_timeout_secs: u64,
    pub mountpoint_mode: u32,
    pub directory_path: PathBuf,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            device_root: PathBuf::from("/var/lib/volmount/volumes"),
            inspect_program: "/usr/bin/file".to_string(),
            readiness_initial_delay_ms: 1000,
            readiness_max_delay_secs: 45,
            readiness_budget_secs: 45,
            inspect_timeout_secs: 10,
            mkfs_timeout_secs: 120,
            mount_timeout_secs: 60,
            mount_attempts: 10,
            mount_retry_delay_ms: 250,
            unmount_timeout_secs: 60,
            mountpoint_mode: 0o700,
            directory_path: data_dir().join("volumes.json"),
        }
    }
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("/var/lib"))
        .join("volmount")
}

impl LifecycleConfig {
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("volmount")
            .join("config.json")
    }

    /// Load from the default location, falling back to defaults if absent.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            VolumeError::Configuration(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            VolumeError::Configuration(format!("failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.device_root.is_absolute() {
            return Err(VolumeError::Configuration(format!(
                "device_root must be absolute, got {}",
                self.device_root.display()
            )));
        }
        if self.mount_attempts == 0 {
            return Err(VolumeError::Configuration("mount_attempts must be at least 1".to_string()));
        }
        if self.readiness_budget_secs == 0
            || self.readiness_initial_delay_ms == 0
            || self.readiness_max_delay_secs == 0
        {
            return Err(VolumeError::Configuration(
                "readiness budget, initial delay and maximum delay must be non-zero".to_string(),
            ));
        }
        if self.readiness_max_delay() < self.readiness_initial_delay() {
            return Err(VolumeError::Configuration(format!(
                "readiness_max_delay_secs ({}s) is shorter than readiness_initial_delay_ms ({}ms)",
                self.readiness_max_delay_secs, self.readiness_initial_delay_ms
            )));
        }
        Ok(())
    }

    pub fn readiness_initial_delay(&self) -> Duration {
        Duration::from_millis(self.readiness_initial_delay_ms)
    }

    pub fn readiness_max_delay(&self) -> Duration {
        Duration::from_secs(self.readiness_max_delay_secs)
    }

    pub fn readiness_budget(&self) -> Duration {
        Duration::from_secs(self.readiness_budget_secs)
    }

    pub fn inspect_timeout(&self) -> Duration {
        Duration::from_secs(self.inspect_timeout_secs)
    }

    pub fn mkfs_timeout(&self) -> Duration {
        Duration::from_secs(self.mkfs_timeout_secs)
    }

    pub fn mount_timeout(&self) -> Duration {
        Duration::from_secs(self.mount_timeout_secs)
    }

    pub fn mount_retry_delay(&self) -> Duration {
        Duration::from_millis(self.mount_retry_delay_ms)
    }

    pub fn unmount_timeout(&self) -> Duration {
        Duration::from_secs(self.unmount_timeout_secs)
    }
}
