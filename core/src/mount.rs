//! Attach and detach: the only code that changes a volume's mount holder.
//!
//! Attach records the mount intent in the volume directory before touching
//! the host, and detach clears it only after the local unmount. A crash in
//! between therefore leaves the directory claiming a mount that does not
//! exist (fixable with a forced detach) rather than a local mount the
//! directory knows nothing about.

use crate::initializer::VolumeInitializer;
use crate::readiness::DeviceProbe;
use crate::runner::{CommandRunner, Invocation};
use crate::volume::{MountIntent, Volume, VolumeDirectory, VolumeRef, VolumeStatus};
use crate::{FilesystemKind, FilesystemRegistry, LifecycleConfig, Result, VolumeError};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Per-invocation record of an attach. Never persisted.
#[derive(Debug, Clone)]
pub struct MountSession {
    pub volume_id: String,
    pub mountpoint: PathBuf,
    pub fs_type: FilesystemKind,
    pub started_at: DateTime<Utc>,
    pub attempts: u32,
}

impl MountSession {
    fn new(volume_id: &str, mountpoint: &Path, fs_type: FilesystemKind) -> Self {
        Self {
            volume_id: volume_id.to_string(),
            mountpoint: mountpoint.to_path_buf(),
            fs_type,
            started_at: Utc::now(),
            attempts: 0,
        }
    }

    pub fn elapsed(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }
}

pub struct MountManager {
    directory: Arc<dyn VolumeDirectory>,
    runner: Arc<dyn CommandRunner>,
    probe: Arc<dyn DeviceProbe>,
    registry: Arc<FilesystemRegistry>,
    config: LifecycleConfig,
    client: String,
}

impl MountManager {
    /// `client` identifies this host to the volume directory.
    pub fn new(
        directory: Arc<dyn VolumeDirectory>,
        runner: Arc<dyn CommandRunner>,
        probe: Arc<dyn DeviceProbe>,
        config: LifecycleConfig,
        client: impl Into<String>,
    ) -> Self {
        Self {
            directory,
            runner,
            probe,
            registry: Arc::new(FilesystemRegistry::with_builtin()),
            config,
            client: client.into(),
        }
    }

    pub fn with_registry(mut self, registry: Arc<FilesystemRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn client(&self) -> &str {
        &self.client
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub async fn status(&self, volume: &VolumeRef) -> Result<Volume> {
        self.directory.get_volume(volume).await
    }

    /// Mount `volume_ref` at `mountpoint`, creating a `requested` filesystem
    /// first if the volume has never been formatted.
    pub async fn attach(
        &self,
        volume_ref: &VolumeRef,
        mountpoint: &Path,
        requested: FilesystemKind,
    ) -> Result<MountSession> {
        let volume = self.directory.get_volume(volume_ref).await?;

        if volume.status != VolumeStatus::Active {
            return Err(VolumeError::precondition(format!(
                "volume {} has mount status {}, it must be active before mounting",
                volume_ref, volume.status
            )));
        }
        if volume.is_mounted() {
            return Err(VolumeError::precondition(format!(
                "volume {} is already mounted by {} at {}",
                volume_ref, volume.mounted_by, volume.mountpoint
            )));
        }
        self.registry.get(requested)?;

        // Detach may run from a different working directory.
        let mountpoint = std::path::absolute(mountpoint)?;
        let mut session = MountSession::new(&volume.id, &mountpoint, requested);
        let intent = MountIntent {
            volume_id: volume.id.clone(),
            namespace: volume.namespace.clone(),
            client: self.client.clone(),
            mountpoint: mountpoint.display().to_string(),
            fs_type: requested,
        };

        info!(volume = %volume_ref, client = %self.client, mountpoint = %mountpoint.display(), "Recording mount intent");
        self.directory.notify_mount_intent(&intent).await?;

        match self.mount_locally(&volume, &mut session).await {
            Ok(()) => {
                info!(
                    volume = %volume_ref,
                    mountpoint = %session.mountpoint.display(),
                    fs_type = %session.fs_type,
                    attempts = session.attempts,
                    elapsed_ms = session.elapsed().num_milliseconds(),
                    "Volume mounted"
                );
                Ok(session)
            }
            Err(err) => {
                warn!(volume = %volume_ref, error = %err, "Attach failed, releasing mount intent");
                self.release_intent(&volume).await;
                Err(err)
            }
        }
    }

    async fn mount_locally(&self, volume: &Volume, session: &mut MountSession) -> Result<()> {
        let device = volume.device_path(&self.config.device_root);

        let initializer = VolumeInitializer::new(
            self.runner.as_ref(),
            self.probe.as_ref(),
            &self.registry,
            &self.config,
        );
        session.fs_type = initializer
            .ensure_filesystem(&device, &volume.id, session.fs_type)
            .await?;

        match volume.fs_type {
            None => {
                self.directory
                    .record_filesystem(&volume.id, &volume.namespace, session.fs_type)
                    .await?
            }
            Some(recorded) if recorded != session.fs_type => warn!(
                volume = %volume.id,
                %recorded,
                found = %session.fs_type,
                "Device filesystem differs from the kind recorded in the directory"
            ),
            Some(_) => {}
        }

        create_mountpoint(&session.mountpoint, self.config.mountpoint_mode).await?;

        let invocation = self
            .registry
            .get(session.fs_type)?
            .mount_command(&device, &session.mountpoint);
        self.mount_with_retry(&invocation, session).await
    }

    /// Fixed-delay retry; each attempt gets the full mount timeout.
    async fn mount_with_retry(&self, invocation: &Invocation, session: &mut MountSession) -> Result<()> {
        let attempts = self.config.mount_attempts;
        let mut last_err = None;

        for attempt in 1..=attempts {
            session.attempts = attempt;
            match self.runner.run(self.config.mount_timeout(), invocation).await {
                Ok(_) => return Ok(()),
                Err(err) => {
                    warn!(command = %invocation, attempt, attempts, error = %err, "Mount attempt failed");
                    last_err = Some(err);
                    if attempt < attempts {
                        tokio::time::sleep(self.config.mount_retry_delay()).await;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            VolumeError::Configuration("mount_attempts must be at least 1".to_string())
        }))
    }

    /// Best effort: a failure here is logged and the caller's error stands.
    async fn release_intent(&self, volume: &Volume) {
        match self
            .directory
            .notify_unmounted(&volume.id, &volume.namespace)
            .await
        {
            Ok(()) => info!(volume = %volume.id, "Mount intent released"),
            Err(err) => error!(
                volume = %volume.id,
                error = %err,
                "Failed to release mount intent; the volume directory still lists this client as the holder"
            ),
        }
    }

    /// Unmount `volume_ref` and clear its holder in the directory.
    ///
    /// Without `force`, only the recorded holder may detach and a failed
    /// local unmount leaves the directory untouched. With `force`, both
    /// checks are skipped.
    pub async fn detach(&self, volume_ref: &VolumeRef, force: bool) -> Result<()> {
        let volume = self.directory.get_volume(volume_ref).await?;

        if !force {
            if !volume.is_mounted() {
                return Err(VolumeError::precondition(format!(
                    "volume {} is not mounted",
                    volume_ref
                )));
            }
            if volume.mounted_by != self.client {
                return Err(VolumeError::precondition(format!(
                    "volume {} is mounted by {}, not by this host ({}); use force to unmount anyway",
                    volume_ref, volume.mounted_by, self.client
                )));
            }
            if volume.mountpoint.is_empty() {
                return Err(VolumeError::precondition(format!(
                    "volume {} has no recorded mountpoint",
                    volume_ref
                )));
            }
        }

        if volume.mountpoint.is_empty() {
            warn!(volume = %volume_ref, "No recorded mountpoint, skipping local unmount");
        } else {
            let invocation = self
                .registry
                .get(volume.fs_type.unwrap_or_default())?
                .unmount_command(Path::new(&volume.mountpoint));

            match self.runner.run(self.config.unmount_timeout(), &invocation).await {
                Ok(_) => info!(volume = %volume_ref, mountpoint = %volume.mountpoint, "Unmounted"),
                Err(err) if force => warn!(
                    volume = %volume_ref,
                    error = %err,
                    "Unmount failed, continuing because force was requested"
                ),
                Err(err) => return Err(err),
            }
        }

        self.directory
            .notify_unmounted(&volume.id, &volume.namespace)
            .await
            .map_err(|err| VolumeError::DirectoryInconsistent {
                volume: volume_ref.to_string(),
                reason: err.to_string(),
            })?;

        info!(volume = %volume_ref, "Volume detached");
        Ok(())
    }
}

async fn create_mountpoint(path: &Path, mode: u32) -> Result<()> {
    if path.exists() {
        if !path.is_dir() {
            return Err(VolumeError::precondition(format!(
                "mountpoint {} exists and is not a directory",
                path.display()
            )));
        }
        return Ok(());
    }

    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(mode);
    #[cfg(not(unix))]
    let _ = mode;
    builder.create(path).await?;
    Ok(())
}
