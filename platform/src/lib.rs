pub mod device;
pub mod identity;
pub mod runner;

#[cfg(target_os = "linux")]
pub mod linux;

pub use device::WritableDeviceProbe;
pub use identity::{client_identity, UNKNOWN_CLIENT};
pub use runner::SystemCommandRunner;

#[cfg(target_os = "linux")]
pub use linux::{MountEntry, MountTable};
