use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VolumeError>;

#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("{0}")]
    Precondition(String),

    #[error("Timed out after {after:?}: {what}")]
    Timeout { what: String, after: Duration },

    #[error("Command {program} failed: {reason}{}", format_output(.output))]
    Command {
        program: String,
        output: String,
        reason: String,
    },

    #[error("Refusing to use device {device}: {reason}")]
    Classification { device: String, reason: String },

    #[error("Device {device} has an unrecognised filesystem signature: {signature}")]
    UnknownFilesystem { device: String, signature: String },

    #[error("No filesystem type registered for {0}")]
    UnregisteredFilesystem(String),

    #[error("Volume directory error: {0}")]
    Directory(String),

    #[error("Volume {volume} is still recorded as mounted in the volume directory: {reason}")]
    DirectoryInconsistent { volume: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Operation cancelled")]
    Cancelled,
}

fn format_output(output: &str) -> String {
    if output.is_empty() {
        String::new()
    } else {
        format!(" (output: {})", output)
    }
}

impl VolumeError {
    /// Deadline-type failures, which callers may suggest retrying.
    pub fn is_timeout(&self) -> bool {
        matches!(self, VolumeError::Timeout { .. })
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self, VolumeError::Precondition(_))
    }

    pub(crate) fn precondition(msg: impl Into<String>) -> Self {
        VolumeError::Precondition(msg.into())
    }
}
