//! Classification of `file -s` output for a volume's raw device.
//!
//! The inspection tool must be run in superficial-scan mode (`-s`) so that
//! block devices and plain image files are described the same way. Without
//! it a block device reports as `block special` and can't be told apart from
//! an empty one.

use crate::{FilesystemKind, Result, VolumeError};
use std::fmt;

/// What the inspection tool found on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceContents {
    /// No filesystem signature. Safe to format.
    Raw,
    Filesystem(FilesystemKind),
    /// A recognised filesystem that this tool does not manage.
    Foreign(&'static str),
}

impl fmt::Display for DeviceContents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceContents::Raw => f.write_str("raw"),
            DeviceContents::Filesystem(kind) => write!(f, "{}", kind),
            DeviceContents::Foreign(name) => f.write_str(name),
        }
    }
}

const BLOCK_SPECIAL: &str = "block special";

const RAW_SIGNATURES: &[&str] = &["data", "empty"];

// Ordered; first match wins. The NTFS prefix is a refinement of the generic
// DOS/MBR boot sector and must stay ahead of it.
const SIGNATURES: &[(&str, DeviceContents)] = &[
    ("Linux rev 1.0 ext2 filesystem data", DeviceContents::Filesystem(FilesystemKind::Ext2)),
    ("Linux rev 1.0 ext3 filesystem data", DeviceContents::Filesystem(FilesystemKind::Ext3)),
    ("Linux rev 1.0 ext4 filesystem data", DeviceContents::Filesystem(FilesystemKind::Ext4)),
    ("SGI XFS filesystem data", DeviceContents::Filesystem(FilesystemKind::Xfs)),
    ("BTRFS Filesystem", DeviceContents::Filesystem(FilesystemKind::Btrfs)),
    ("DOS/MBR boot sector, code offset 0x52+2, OEM-ID \"NTFS    \"", DeviceContents::Foreign("ntfs")),
    ("DOS/MBR boot sector", DeviceContents::Foreign("vfat")),
];

/// Classify inspection output for `device_path`.
///
/// `block special` is always an error: a block device the tool could not
/// look inside must never be mistaken for an empty one and reformatted.
pub fn classify(device_path: &str, output: &str) -> Result<DeviceContents> {
    let output = output.trim();
    let prefix = format!("{}: ", device_path);

    let description = output
        .strip_prefix(&prefix)
        .ok_or_else(|| VolumeError::UnknownFilesystem {
            device: device_path.to_string(),
            signature: output.to_string(),
        })?;

    if description.starts_with(BLOCK_SPECIAL) {
        return Err(VolumeError::Classification {
            device: device_path.to_string(),
            reason: format!("inspection could not read the device contents ({})", description),
        });
    }

    if RAW_SIGNATURES.contains(&description) {
        return Ok(DeviceContents::Raw);
    }

    SIGNATURES
        .iter()
        .find(|(signature, _)| description.starts_with(signature))
        .map(|(_, contents)| *contents)
        .ok_or_else(|| VolumeError::UnknownFilesystem {
            device: device_path.to_string(),
            signature: description.to_string(),
        })
}
