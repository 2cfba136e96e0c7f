//! Volume directory backed by a local JSON file.
//!
//! Stands in for a control plane when the tool is used on a single host.

use crate::volume::{MountIntent, Volume, VolumeDirectory, VolumeRef, VolumeStatus};
use crate::{FilesystemKind, Result, VolumeError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Default, Serialize, Deserialize)]
struct DirectoryState {
    volumes: Vec<Volume>,
}

impl DirectoryState {
    fn find(&self, volume: &VolumeRef) -> Option<&Volume> {
        self.volumes
            .iter()
            .find(|v| v.namespace == volume.namespace && v.name == volume.name)
    }

    fn find_by_id_mut(&mut self, volume_id: &str, namespace: &str) -> Result<&mut Volume> {
        self.volumes
            .iter_mut()
            .find(|v| v.id == volume_id && v.namespace == namespace)
            .ok_or_else(|| VolumeError::Directory(format!("volume {} not found in namespace {}", volume_id, namespace)))
    }
}

pub struct JsonFileDirectory {
    path: PathBuf,
    // Serialises read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl JsonFileDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<DirectoryState> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DirectoryState::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, state: &DirectoryState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_string_pretty(state)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), volumes = state.volumes.len(), "Directory state saved");
        Ok(())
    }

    /// Add a new active volume with a fresh ID.
    pub async fn register(&self, volume: &VolumeRef) -> Result<Volume> {
        let _guard = self.lock.lock().await;
        let mut state = self.load().await?;
        if state.find(volume).is_some() {
            return Err(VolumeError::Directory(format!("volume {} already exists", volume)));
        }

        let created = Volume {
            id: Uuid::new_v4().to_string(),
            namespace: volume.namespace.clone(),
            name: volume.name.clone(),
            status: VolumeStatus::Active,
            mounted_by: String::new(),
            mountpoint: String::new(),
            fs_type: None,
        };
        state.volumes.push(created.clone());
        self.store(&state).await?;
        Ok(created)
    }

    pub async fn set_status(&self, volume: &VolumeRef, status: VolumeStatus) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut state = self.load().await?;
        let entry = state
            .volumes
            .iter_mut()
            .find(|v| v.namespace == volume.namespace && v.name == volume.name)
            .ok_or_else(|| VolumeError::Directory(format!("volume {} not found", volume)))?;
        entry.status = status;
        self.store(&state).await
    }

    pub async fn list(&self) -> Result<Vec<Volume>> {
        Ok(self.load().await?.volumes)
    }
}

#[async_trait::async_trait]
impl VolumeDirectory for JsonFileDirectory {
    async fn get_volume(&self, volume: &VolumeRef) -> Result<Volume> {
        let state = self.load().await?;
        state
            .find(volume)
            .cloned()
            .ok_or_else(|| VolumeError::Directory(format!("volume {} not found", volume)))
    }

    async fn notify_mount_intent(&self, intent: &MountIntent) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut state = self.load().await?;
        let volume = state.find_by_id_mut(&intent.volume_id, &intent.namespace)?;

        if volume.is_mounted() {
            return Err(VolumeError::Directory(format!(
                "volume {} is already held by {}",
                volume.id, volume.mounted_by
            )));
        }
        volume.mounted_by = intent.client.clone();
        volume.mountpoint = intent.mountpoint.clone();
        self.store(&state).await
    }

    async fn notify_unmounted(&self, volume_id: &str, namespace: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut state = self.load().await?;
        let volume = state.find_by_id_mut(volume_id, namespace)?;
        volume.mounted_by.clear();
        volume.mountpoint.clear();
        self.store(&state).await
    }

    async fn record_filesystem(&self, volume_id: &str, namespace: &str, kind: FilesystemKind) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut state = self.load().await?;
        let volume = state.find_by_id_mut(volume_id, namespace)?;
        match volume.fs_type {
            Some(existing) => {
                debug!(volume = %volume_id, %existing, "Filesystem kind already recorded");
                Ok(())
            }
            None => {
                volume.fs_type = Some(kind);
                self.store(&state).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(volume: &Volume, client: &str) -> MountIntent {
        MountIntent {
            volume_id: volume.id.clone(),
            namespace: volume.namespace.clone(),
            client: client.to_string(),
            mountpoint: "/mnt/db".to_string(),
            fs_type: FilesystemKind::Xfs,
        }
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = JsonFileDirectory::new(tmp.path().join("state").join("volumes.json"));
        let db = VolumeRef::new("default", "db");

        let created = dir.register(&db).await.unwrap();
        assert!(Uuid::parse_str(&created.id).is_ok());

        let fetched = dir.get_volume(&db).await.unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.status, VolumeStatus::Active);

        assert!(dir.register(&db).await.is_err());
        assert!(dir.get_volume(&VolumeRef::new("default", "other")).await.is_err());
    }

    #[tokio::test]
    async fn test_single_holder() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = JsonFileDirectory::new(tmp.path().join("volumes.json"));
        let db = VolumeRef::new("default", "db");
        let volume = dir.register(&db).await.unwrap();

        dir.notify_mount_intent(&intent(&volume, "host-A")).await.unwrap();
        assert!(dir.notify_mount_intent(&intent(&volume, "host-B")).await.is_err());

        let held = dir.get_volume(&db).await.unwrap();
        assert_eq!(held.mounted_by, "host-A");
        assert_eq!(held.fs_type, None);

        dir.notify_unmounted(&volume.id, &volume.namespace).await.unwrap();
        let released = dir.get_volume(&db).await.unwrap();
        assert!(!released.is_mounted());
        assert!(released.mountpoint.is_empty());
    }

    #[tokio::test]
    async fn test_filesystem_recorded_once() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = JsonFileDirectory::new(tmp.path().join("volumes.json"));
        let db = VolumeRef::new("default", "db");
        let volume = dir.register(&db).await.unwrap();

        dir.record_filesystem(&volume.id, &volume.namespace, FilesystemKind::Ext4)
            .await
            .unwrap();
        dir.record_filesystem(&volume.id, &volume.namespace, FilesystemKind::Xfs)
            .await
            .unwrap();

        assert_eq!(dir.get_volume(&db).await.unwrap().fs_type, Some(FilesystemKind::Ext4));
        assert!(dir
            .record_filesystem("missing", "default", FilesystemKind::Ext4)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_set_status_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("volumes.json");
        let db = VolumeRef::new("prod", "db");
        JsonFileDirectory::new(&path).register(&db).await.unwrap();
        JsonFileDirectory::new(&path)
            .set_status(&db, VolumeStatus::Unavailable)
            .await
            .unwrap();

        let reopened = JsonFileDirectory::new(&path);
        assert_eq!(reopened.get_volume(&db).await.unwrap().status, VolumeStatus::Unavailable);
        assert_eq!(reopened.list().await.unwrap().len(), 1);
    }
}
