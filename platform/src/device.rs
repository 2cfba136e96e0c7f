use std::fs::OpenOptions;
use std::path::Path;
use tracing::trace;
use volmount_core::DeviceProbe;

/// Ready once the raw device exists and can be opened for writing, which is
/// the signal that the backing store has finished provisioning.
#[derive(Debug, Default, Clone, Copy)]
pub struct WritableDeviceProbe;

impl DeviceProbe for WritableDeviceProbe {
    fn is_ready(&self, device: &Path) -> bool {
        if !device.exists() {
            trace!(device = %device.display(), "Device does not exist yet");
            return false;
        }
        // The handle is dropped, and the device closed, before returning.
        match OpenOptions::new().write(true).open(device) {
            Ok(_) => true,
            Err(e) => {
                trace!(device = %device.display(), error = %e, "Device not writable yet");
                false
            }
        }
    }
}
