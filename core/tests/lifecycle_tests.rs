/// End-to-end attach/detach behaviour against scripted collaborators.
/// Nothing here spawns a process or touches a real block device.

mod lifecycle_tests {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use volmount_core::signature::{classify, DeviceContents};
    use volmount_core::test_utils::{
        active_volume, DirectoryCall, RecordingDirectory, ScriptedProbe, ScriptedRunner,
    };
    use volmount_core::{
        FilesystemKind, FilesystemRegistry, JsonFileDirectory, LifecycleConfig, MountManager,
        ReadinessWaiter, VolumeDirectory, VolumeError, VolumeInitializer, VolumeRef,
    };

    const KNOWN_SIGNATURES: &[(&str, FilesystemKind)] = &[
        ("Linux rev 1.0 ext2 filesystem data, UUID=0b6c", FilesystemKind::Ext2),
        ("Linux rev 1.0 ext3 filesystem data, UUID=0b6c (needs journal recovery)", FilesystemKind::Ext3),
        ("Linux rev 1.0 ext4 filesystem data, UUID=0b6c (extents) (64bit) (large files) (huge files)", FilesystemKind::Ext4),
        ("SGI XFS filesystem data (blksz 4096, inosz 512, v2 dirs)", FilesystemKind::Xfs),
        ("BTRFS Filesystem sectorsize 4096, nodesize 16384, leafsize 16384", FilesystemKind::Btrfs),
    ];

    fn fast_config(root: &Path) -> LifecycleConfig {
        LifecycleConfig {
            device_root: root.to_path_buf(),
            readiness_initial_delay_ms: 1,
            readiness_budget_secs: 1,
            mount_retry_delay_ms: 1,
            ..LifecycleConfig::default()
        }
    }

    #[tokio::test]
    async fn test_initialization_is_idempotent() {
        let runner = ScriptedRunner::new()
            .respond("/usr/bin/file", "/dev/x: data")
            .respond("/usr/bin/file", "/dev/x: Linux rev 1.0 ext4 filesystem data, UUID=77aa (extents)");
        let probe = ScriptedProbe::ready_after(0);
        let registry = FilesystemRegistry::with_builtin();
        let config = fast_config(Path::new("/dev"));
        let init = VolumeInitializer::new(&runner, &probe, &registry, &config);

        init.ensure_filesystem(Path::new("/dev/x"), "x", FilesystemKind::Ext4)
            .await
            .unwrap();
        assert_eq!(runner.calls_to("/sbin/mkfs.ext4").len(), 1);

        init.ensure_filesystem(Path::new("/dev/x"), "x", FilesystemKind::Ext4)
            .await
            .unwrap();
        assert_eq!(runner.calls_to("/sbin/mkfs.ext4").len(), 1);
    }

    #[tokio::test]
    async fn test_known_signatures_never_formatted() {
        for (desc, kind) in KNOWN_SIGNATURES {
            let output = format!("/dev/x: {}", desc);
            assert_eq!(classify("/dev/x", &output).unwrap(), DeviceContents::Filesystem(*kind));

            for requested in FilesystemKind::ALL {
                let runner = ScriptedRunner::new().respond("/usr/bin/file", &output);
                let probe = ScriptedProbe::ready_after(0);
                let registry = FilesystemRegistry::with_builtin();
                let config = fast_config(Path::new("/dev"));
                let init = VolumeInitializer::new(&runner, &probe, &registry, &config);

                let found = init
                    .ensure_filesystem(Path::new("/dev/x"), "x", requested)
                    .await
                    .unwrap();
                assert_eq!(found, *kind);
                assert!(
                    runner.calls().iter().all(|c| !c.program.contains("mkfs")),
                    "mkfs ran on existing {} when {} was requested",
                    kind,
                    requested
                );
            }
        }
    }

    #[test]
    fn test_block_special_is_always_an_error() {
        for trailing in ["", " (8/0)", " (253/4) something unexpected", "\n"] {
            let output = format!("/dev/x: block special{}", trailing);
            assert!(matches!(
                classify("/dev/x", &output),
                Err(VolumeError::Classification { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_raw_scenario_issues_one_ext4_mkfs() {
        let runner = ScriptedRunner::new().respond("/usr/bin/file", "/dev/x: data");
        let probe = ScriptedProbe::ready_after(0);
        let registry = FilesystemRegistry::with_builtin();
        let config = fast_config(Path::new("/dev"));
        let init = VolumeInitializer::new(&runner, &probe, &registry, &config);

        assert_eq!(init.inspect(Path::new("/dev/x")).await.unwrap(), DeviceContents::Raw);
        init.ensure_filesystem(Path::new("/dev/x"), "x", FilesystemKind::Ext4)
            .await
            .unwrap();

        let mkfs: Vec<_> = runner
            .calls()
            .into_iter()
            .filter(|c| c.program.contains("mkfs"))
            .collect();
        assert_eq!(mkfs.len(), 1);
        assert_eq!(mkfs[0].program, "/sbin/mkfs.ext4");
        assert_eq!(mkfs[0].args.last().map(String::as_str), Some("/dev/x"));
    }

    #[tokio::test]
    async fn test_readiness_timeout_within_budget() {
        let tmp = tempfile::tempdir().unwrap();
        let device = tmp.path().join("never-appears");
        let waiter = ReadinessWaiter::new(Duration::from_secs(1), Duration::from_secs(3), Duration::from_secs(3));
        let probe = ScriptedProbe::never_ready();

        let started = Instant::now();
        let err = waiter.wait(&probe, &device).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_attach_failure_compensates_exactly_once() {
        let tmp = tempfile::tempdir().unwrap();
        let directory = Arc::new(RecordingDirectory::new().with_volume(active_volume("vol-9", "default", "web")));
        let runner = Arc::new(
            ScriptedRunner::new()
                .respond(
                    "/usr/bin/file",
                    &format!("{}: data", tmp.path().join("vol-9").display()),
                )
                .fail("/bin/mount", "mount: /mnt/web: can't read superblock"),
        );
        let mgr = MountManager::new(
            directory.clone(),
            runner.clone(),
            Arc::new(ScriptedProbe::ready_after(0)),
            fast_config(tmp.path()),
            "host-A",
        );

        let err = mgr
            .attach(&VolumeRef::new("default", "web"), &tmp.path().join("mnt"), FilesystemKind::Ext4)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("can't read superblock"));

        let calls = directory.calls();
        let intents = calls.iter().filter(|c| matches!(c, DirectoryCall::MountIntent(_))).count();
        let releases = calls.iter().filter(|c| matches!(c, DirectoryCall::Unmounted { .. })).count();
        assert_eq!((intents, releases), (1, 1));
        assert!(matches!(calls[0], DirectoryCall::MountIntent(_)));
    }

    #[tokio::test]
    async fn test_detach_from_other_host_makes_no_directory_changes() {
        let tmp = tempfile::tempdir().unwrap();
        let mut volume = active_volume("vol-9", "default", "web");
        volume.mounted_by = "host-A".to_string();
        volume.mountpoint = "/mnt/web".to_string();
        let directory = Arc::new(RecordingDirectory::new().with_volume(volume));
        let runner = Arc::new(ScriptedRunner::new());
        let mgr = MountManager::new(
            directory.clone(),
            runner.clone(),
            Arc::new(ScriptedProbe::ready_after(0)),
            fast_config(tmp.path()),
            "host-B",
        );

        let err = mgr.detach(&VolumeRef::new("default", "web"), false).await.unwrap_err();
        assert!(err.is_precondition());
        assert!(directory.calls().is_empty());
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_attach_then_detach_with_file_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let state: PathBuf = tmp.path().join("volumes.json");
        let directory = Arc::new(JsonFileDirectory::new(&state));
        let web = VolumeRef::new("default", "web");
        let volume = directory.register(&web).await.unwrap();

        let runner = Arc::new(ScriptedRunner::new().respond(
            "/usr/bin/file",
            &format!("{}: data", tmp.path().join(&volume.id).display()),
        ));
        let mgr = MountManager::new(
            directory.clone(),
            runner.clone(),
            Arc::new(ScriptedProbe::ready_after(0)),
            fast_config(tmp.path()),
            "host-A",
        );
        let mnt = tmp.path().join("mnt").join("web");

        mgr.attach(&web, &mnt, FilesystemKind::Ext4).await.unwrap();
        let held = directory.get_volume(&web).await.unwrap();
        assert_eq!(held.mounted_by, "host-A");
        assert_eq!(held.fs_type, Some(FilesystemKind::Ext4));

        let second = mgr.attach(&web, &mnt, FilesystemKind::Ext4).await.unwrap_err();
        assert!(second.is_precondition());

        mgr.detach(&web, false).await.unwrap();
        let released = directory.get_volume(&web).await.unwrap();
        assert!(!released.is_mounted());

        let umount = runner.calls_to("/bin/umount");
        assert_eq!(umount.len(), 1);
        assert_eq!(umount[0].args, vec![mnt.display().to_string()]);
    }

    #[tokio::test]
    async fn test_failed_attach_records_no_filesystem_kind() {
        let tmp = tempfile::tempdir().unwrap();
        let directory = Arc::new(JsonFileDirectory::new(tmp.path().join("volumes.json")));
        let web = VolumeRef::new("default", "web");
        directory.register(&web).await.unwrap();

        let mgr = MountManager::new(
            directory.clone(),
            Arc::new(ScriptedRunner::new()),
            Arc::new(ScriptedProbe::never_ready()),
            fast_config(tmp.path()),
            "host-A",
        );
        let err = mgr
            .attach(&web, &tmp.path().join("mnt"), FilesystemKind::Xfs)
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        let record = directory.get_volume(&web).await.unwrap();
        assert_eq!(record.fs_type, None);
        assert!(!record.is_mounted());
    }
}
