pub mod config;
pub mod directory;
pub mod error;
pub mod filesystem;
pub mod initializer;
pub mod mount;
pub mod readiness;
pub mod registry;
pub mod runner;
pub mod signature;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod volume;

pub use config::LifecycleConfig;
pub use directory::JsonFileDirectory;
pub use error::{Result, VolumeError};
pub use filesystem::FilesystemKind;
pub use initializer::VolumeInitializer;
pub use mount::{MountManager, MountSession};
pub use readiness::{Backoff, DeviceProbe, ReadinessWaiter};
pub use registry::{FilesystemRegistry, FilesystemType};
pub use runner::{CommandRunner, Invocation};
pub use signature::DeviceContents;
pub use volume::{MountIntent, Volume, VolumeDirectory, VolumeRef, VolumeStatus};
