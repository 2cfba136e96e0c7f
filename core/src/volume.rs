use crate::{FilesystemKind, Result, VolumeError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VolumeStatus {
    Pending,
    Active,
    Unavailable,
    Failed,
    Deleting,
}

impl fmt::Display for VolumeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VolumeStatus::Pending => "pending",
            VolumeStatus::Active => "active",
            VolumeStatus::Unavailable => "unavailable",
            VolumeStatus::Failed => "failed",
            VolumeStatus::Deleting => "deleting",
        };
        f.write_str(s)
    }
}

/// A volume as recorded by the volume directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    pub id: String,
    pub namespace: String,
    pub name: String,
    pub status: VolumeStatus,
    /// Client currently holding the mount; empty when unmounted.
    #[serde(default)]
    pub mounted_by: String,
    #[serde(default)]
    pub mountpoint: String,
    #[serde(default)]
    pub fs_type: Option<FilesystemKind>,
}

impl Volume {
    pub fn is_mounted(&self) -> bool {
        !self.mounted_by.is_empty()
    }

    /// Raw device path, recomputed from the configured root on every call.
    pub fn device_path(&self, device_root: &Path) -> PathBuf {
        device_root.join(&self.id)
    }
}

/// `namespace/name` reference used to look a volume up.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VolumeRef {
    pub namespace: String,
    pub name: String,
}

impl VolumeRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for VolumeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for VolumeRef {
    type Err = VolumeError;

    fn from_str(s: &str) -> Result<Self> {
        let (namespace, name) = match s.split_once('/') {
            Some((ns, name)) => (ns, name),
            None => (DEFAULT_NAMESPACE, s),
        };
        if namespace.is_empty() || name.is_empty() || name.contains('/') {
            return Err(VolumeError::Configuration(format!(
                "invalid volume reference '{}', expected <namespace>/<name> or <name>",
                s
            )));
        }
        Ok(VolumeRef::new(namespace, name))
    }
}

/// What gets recorded in the directory before a local mount is attempted.
///
/// `fs_type` is the kind the caller asked for. The volume's own filesystem
/// kind is only recorded through [`VolumeDirectory::record_filesystem`] once
/// the device has been inspected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountIntent {
    pub volume_id: String,
    pub namespace: String,
    pub client: String,
    pub mountpoint: String,
    pub fs_type: FilesystemKind,
}

/// The system of record for which client holds a volume's mount.
#[async_trait::async_trait]
pub trait VolumeDirectory: Send + Sync {
    async fn get_volume(&self, volume: &VolumeRef) -> Result<Volume>;
    async fn notify_mount_intent(&self, intent: &MountIntent) -> Result<()>;
    async fn notify_unmounted(&self, volume_id: &str, namespace: &str) -> Result<()>;
    /// Set the volume's filesystem kind if none is recorded yet. A kind that
    /// is already recorded is never replaced.
    async fn record_filesystem(&self, volume_id: &str, namespace: &str, kind: FilesystemKind) -> Result<()>;
}
