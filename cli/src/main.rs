use anyhow::Context;
use clap::{Parser, Subcommand};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use volmount_core::{
    FilesystemKind, FilesystemRegistry, JsonFileDirectory, LifecycleConfig, MountManager, VolumeError,
    VolumeRef,
};
use volmount_platform::{client_identity, SystemCommandRunner, WritableDeviceProbe};

#[derive(Parser)]
#[command(name = "volmount")]
#[command(about = "Attach and detach network block volumes as local filesystems", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the per-user config location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount a volume, creating a filesystem on first use
    Attach {
        /// Volume reference, <namespace>/<name> or <name>
        volume: VolumeRef,
        /// Local directory to mount on
        mountpoint: PathBuf,
        /// Filesystem to create if the volume has none
        #[arg(short, long, default_value = "ext4")]
        fs_type: FilesystemKind,
    },
    /// Unmount a volume and release it in the volume directory
    Detach {
        volume: VolumeRef,
        /// Unmount even if another host holds it or the local unmount fails
        #[arg(short, long)]
        force: bool,
    },
    /// Show a volume's directory record and local mount state
    Status { volume: VolumeRef },
    /// Add a new active volume to the local volume directory
    Register { volume: VolumeRef },
    /// Check that the tools for a filesystem type are installed
    Check {
        #[arg(short, long)]
        fs_type: Option<FilesystemKind>,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Run `op`, dropping it (and killing any child it is waiting on) if the
/// process receives SIGINT or SIGTERM first.
async fn until_shutdown<T>(op: impl Future<Output = volmount_core::Result<T>>) -> volmount_core::Result<T> {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = op => result,
        _ = ctrl_c => Err(VolumeError::Cancelled),
        _ = terminate => Err(VolumeError::Cancelled),
    }
}

fn hint(err: &VolumeError) -> Option<&'static str> {
    match err {
        VolumeError::Timeout { .. } => Some("the operation timed out; it is safe to try again"),
        VolumeError::DirectoryInconsistent { .. } => {
            Some("the volume is unmounted locally; run 'volmount detach --force' to clear the directory record")
        }
        VolumeError::Cancelled => Some(
            "an interrupted attach may leave this host recorded as the holder; check 'volmount status' and run 'volmount detach --force' if needed",
        ),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => LifecycleConfig::load_from(path),
        None => LifecycleConfig::load(),
    }
    .context("Failed to load configuration")?;

    let directory = Arc::new(JsonFileDirectory::new(config.directory_path.clone()));
    let registry = Arc::new(FilesystemRegistry::with_builtin());
    let manager = MountManager::new(
        directory.clone(),
        Arc::new(SystemCommandRunner),
        Arc::new(WritableDeviceProbe),
        config.clone(),
        client_identity(),
    )
    .with_registry(registry.clone());

    let result = match cli.command {
        Commands::Attach {
            volume,
            mountpoint,
            fs_type,
        } => until_shutdown(manager.attach(&volume, &mountpoint, fs_type))
            .await
            .map(|session| {
                println!(
                    "Mounted {} at {} ({}) after {} attempt(s)",
                    volume,
                    session.mountpoint.display(),
                    session.fs_type,
                    session.attempts
                );
            }),
        Commands::Detach { volume, force } => until_shutdown(manager.detach(&volume, force))
            .await
            .map(|_| println!("Unmounted {}", volume)),
        Commands::Status { volume } => manager.status(&volume).await.map(|record| {
            println!("Volume: {}", volume);
            println!("  ID: {}", record.id);
            println!("  Status: {}", record.status);
            println!("  Device: {}", record.device_path(&config.device_root).display());
            match record.fs_type {
                Some(kind) => println!("  Filesystem: {}", kind),
                None => println!("  Filesystem: (not yet created)"),
            }
            if record.is_mounted() {
                println!("  Mounted by: {}", record.mounted_by);
                println!("  Mountpoint: {}", record.mountpoint);
                #[cfg(target_os = "linux")]
                match volmount_platform::MountTable::read() {
                    Ok(table) => {
                        let local = table.is_mounted(std::path::Path::new(&record.mountpoint));
                        println!("  Mounted locally: {}", if local { "yes" } else { "no" });
                    }
                    Err(e) => tracing::warn!(error = %e, "Could not read the mount table"),
                }
            } else {
                println!("  Mounted by: (nobody)");
            }
        }),
        Commands::Register { volume } => directory.register(&volume).await.map(|record| {
            println!("Registered {} with ID {}", volume, record.id);
            println!("  Device: {}", record.device_path(&config.device_root).display());
        }),
        Commands::Check { fs_type } => {
            let kinds = match fs_type {
                Some(kind) => vec![kind],
                None => registry.list(),
            };
            let mut all_present = true;
            for kind in kinds {
                let missing = registry.missing_tools(kind)?;
                if missing.is_empty() {
                    println!("{}: ok", kind);
                } else {
                    all_present = false;
                    println!("{}: missing {}", kind, missing.join(", "));
                }
            }
            if !all_present {
                anyhow::bail!("Some filesystem tools are not installed");
            }
            Ok(())
        }
    };

    if let Err(err) = &result {
        if let Some(text) = hint(err) {
            eprintln!("hint: {}", text);
        }
    }
    result.map_err(anyhow::Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cancelled_hint_points_at_forced_detach() {
        let text = hint(&VolumeError::Cancelled).unwrap();
        assert!(text.contains("volmount detach --force"));
        assert!(hint(&VolumeError::Configuration("bad".to_string())).is_none());
    }

    #[tokio::test]
    async fn test_until_shutdown_passes_result_through() {
        let value = until_shutdown(async { Ok::<_, VolumeError>(7) }).await.unwrap();
        assert_eq!(value, 7);

        let err = until_shutdown(async {
            Err::<(), _>(VolumeError::Timeout {
                what: "mount".to_string(),
                after: Duration::from_secs(1),
            })
        })
        .await
        .unwrap_err();
        assert!(hint(&err).is_some());
    }
}
