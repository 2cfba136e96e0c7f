use crate::readiness::{DeviceProbe, ReadinessWaiter};
use crate::runner::{CommandRunner, Invocation};
use crate::signature::{self, DeviceContents};
use crate::{FilesystemKind, FilesystemRegistry, LifecycleConfig, Result, VolumeError};
use std::path::Path;
use tracing::{debug, info, warn};

/// Makes sure a volume's raw device carries a filesystem before mounting.
pub struct VolumeInitializer<'a> {
    runner: &'a dyn CommandRunner,
    probe: &'a dyn DeviceProbe,
    registry: &'a FilesystemRegistry,
    config: &'a LifecycleConfig,
}

impl<'a> VolumeInitializer<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        probe: &'a dyn DeviceProbe,
        registry: &'a FilesystemRegistry,
        config: &'a LifecycleConfig,
    ) -> Self {
        Self {
            runner,
            probe,
            registry,
            config,
        }
    }

    /// Run the inspection tool against `device` and classify the result.
    pub async fn inspect(&self, device: &Path) -> Result<DeviceContents> {
        let device_str = device.to_string_lossy();
        let invocation = Invocation::new(&self.config.inspect_program)
            .arg("-sL")
            .arg(device_str.to_string());

        debug!(command = %invocation, "Inspecting device");
        let output = self
            .runner
            .run(self.config.inspect_timeout(), &invocation)
            .await?;
        signature::classify(&device_str, &output)
    }

    /// Wait for the device, then create a `requested` filesystem on it if it
    /// has none. Returns the kind the device ends up carrying.
    ///
    /// An existing filesystem is never reformatted. If it differs from
    /// `requested` the existing kind wins and a warning is logged.
    pub async fn ensure_filesystem(
        &self,
        device: &Path,
        volume_id: &str,
        requested: FilesystemKind,
    ) -> Result<FilesystemKind> {
        // Resolve the template up front so a bad kind fails before any I/O.
        let fs_type = self.registry.get(requested)?;

        ReadinessWaiter::from_config(self.config)
            .wait(self.probe, device)
            .await?;

        match self.inspect(device).await? {
            DeviceContents::Filesystem(existing) => {
                if existing != requested {
                    warn!(
                        device = %device.display(),
                        %existing,
                        %requested,
                        "Volume already has a different filesystem, keeping the existing one"
                    );
                } else {
                    debug!(device = %device.display(), %existing, "Filesystem already present");
                }
                Ok(existing)
            }
            DeviceContents::Raw => {
                let invocation = fs_type.mkfs_command(device, volume_id);
                info!(device = %device.display(), fs_type = %requested, command = %invocation, "Creating filesystem");
                self.runner
                    .run(self.config.mkfs_timeout(), &invocation)
                    .await?;
                Ok(requested)
            }
            foreign @ DeviceContents::Foreign(_) => Err(VolumeError::Classification {
                device: device.display().to_string(),
                reason: format!("it holds a {} filesystem, which cannot be managed here", foreign),
            }),
        }
    }
}
