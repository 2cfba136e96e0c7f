use tracing::warn;

/// Identity used when the hostname cannot be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// The name this host records in the volume directory as mount holder.
///
/// Falls back to [`UNKNOWN_CLIENT`] rather than failing.
pub fn client_identity() -> String {
    match hostname() {
        Some(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => {
            warn!("Could not determine hostname, identifying as '{}'", UNKNOWN_CLIENT);
            UNKNOWN_CLIENT.to_string()
        }
    }
}

#[cfg(unix)]
fn hostname() -> Option<String> {
    nix::unistd::gethostname()
        .ok()
        .map(|name| name.to_string_lossy().into_owned())
}

#[cfg(not(unix))]
fn hostname() -> Option<String> {
    std::env::var("COMPUTERNAME").ok()
}
