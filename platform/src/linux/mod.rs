pub mod mounts;

pub use mounts::{MountEntry, MountTable};
