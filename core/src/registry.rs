use crate::runner::Invocation;
use crate::{FilesystemKind, Result, VolumeError};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

/// One argv slot of a command template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateArg {
    Literal(&'static str),
    Device,
    Mountpoint,
    /// Filesystem UUID derived from the volume ID.
    VolumeUuid,
}

#[derive(Debug, Clone)]
pub struct CommandTemplate {
    pub program: &'static str,
    pub args: Vec<TemplateArg>,
}

impl CommandTemplate {
    fn new(program: &'static str, args: Vec<TemplateArg>) -> Self {
        Self { program, args }
    }

    fn render(&self, device: &Path, mountpoint: &Path, volume_id: &str) -> Invocation {
        let args = self.args.iter().map(|arg| match arg {
            TemplateArg::Literal(s) => s.to_string(),
            TemplateArg::Device => device.to_string_lossy().into_owned(),
            TemplateArg::Mountpoint => mountpoint.to_string_lossy().into_owned(),
            TemplateArg::VolumeUuid => filesystem_uuid(volume_id).to_string(),
        });
        Invocation::new(self.program).args(args)
    }
}

/// Mount, unmount and mkfs templates for one filesystem kind.
#[derive(Debug, Clone)]
pub struct FilesystemType {
    pub kind: FilesystemKind,
    pub mount: CommandTemplate,
    pub unmount: CommandTemplate,
    pub mkfs: CommandTemplate,
}

impl FilesystemType {
    pub fn mount_command(&self, device: &Path, mountpoint: &Path) -> Invocation {
        self.mount.render(device, mountpoint, "")
    }

    pub fn unmount_command(&self, mountpoint: &Path) -> Invocation {
        self.unmount.render(Path::new(""), mountpoint, "")
    }

    pub fn mkfs_command(&self, device: &Path, volume_id: &str) -> Invocation {
        self.mkfs.render(device, Path::new(""), volume_id)
    }

    fn programs(&self) -> [&'static str; 3] {
        [self.mount.program, self.unmount.program, self.mkfs.program]
    }
}

/// Reuse the volume ID when it is already a UUID so the filesystem UUID
/// matches it; otherwise derive a stable v5 UUID from it.
pub fn filesystem_uuid(volume_id: &str) -> Uuid {
    Uuid::parse_str(volume_id)
        .unwrap_or_else(|_| Uuid::new_v5(&Uuid::NAMESPACE_OID, volume_id.as_bytes()))
}

pub struct FilesystemRegistry {
    types: HashMap<FilesystemKind, FilesystemType>,
}

impl FilesystemRegistry {
    pub fn new() -> Self {
        Self {
            types: HashMap::new(),
        }
    }

    /// Registry with every compiled-in filesystem kind.
    pub fn with_builtin() -> Self {
        use TemplateArg::*;

        let mut registry = Self::new();
        for kind in FilesystemKind::ALL {
            let mount = CommandTemplate::new(
                "/bin/mount",
                vec![Literal("-t"), Literal(kind.name()), Device, Mountpoint],
            );
            let unmount = CommandTemplate::new("/bin/umount", vec![Mountpoint]);
            let mkfs = match kind {
                FilesystemKind::Ext2 => CommandTemplate::new("/sbin/mkfs.ext2", vec![Literal("-F"), Device]),
                FilesystemKind::Ext3 => CommandTemplate::new("/sbin/mkfs.ext3", vec![Literal("-F"), Device]),
                FilesystemKind::Ext4 => CommandTemplate::new(
                    "/sbin/mkfs.ext4",
                    vec![Literal("-F"), Literal("-U"), VolumeUuid, Device],
                ),
                FilesystemKind::Xfs => CommandTemplate::new("/sbin/mkfs.xfs", vec![Literal("-f"), Device]),
                FilesystemKind::Btrfs => CommandTemplate::new("/sbin/mkfs.btrfs", vec![Literal("-f"), Device]),
            };
            registry.register(FilesystemType {
                kind,
                mount,
                unmount,
                mkfs,
            });
        }
        registry
    }

    pub fn register(&mut self, fs_type: FilesystemType) {
        self.types.insert(fs_type.kind, fs_type);
    }

    pub fn get(&self, kind: FilesystemKind) -> Result<&FilesystemType> {
        self.types
            .get(&kind)
            .ok_or_else(|| VolumeError::UnregisteredFilesystem(kind.to_string()))
    }

    pub fn list(&self) -> Vec<FilesystemKind> {
        let mut kinds: Vec<_> = self.types.keys().copied().collect();
        kinds.sort_by_key(|k| k.name());
        kinds
    }

    pub fn is_supported(&self, kind: FilesystemKind) -> bool {
        self.types.contains_key(&kind)
    }

    /// Programs needed by `kind` that are not executable on this host.
    pub fn missing_tools(&self, kind: FilesystemKind) -> Result<Vec<String>> {
        let fs_type = self.get(kind)?;
        Ok(fs_type
            .programs()
            .iter()
            .filter(|program| which::which(program).is_err())
            .map(|program| program.to_string())
            .collect())
    }
}

impl Default for FilesystemRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
