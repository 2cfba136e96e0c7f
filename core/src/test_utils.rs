/// Test doubles for the command runner, device probe and volume directory.
/// None of them touch real devices or spawn processes.
use crate::readiness::DeviceProbe;
use crate::runner::{CommandRunner, Invocation};
use crate::volume::{MountIntent, Volume, VolumeDirectory, VolumeRef, VolumeStatus};
use crate::{FilesystemKind, Result, VolumeError};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Reply {
    Output(String),
    Fail(String),
    Timeout,
}

/// Command runner that answers from a per-program script and records every
/// invocation. Each program's replies are consumed in order; the last one
/// repeats. Unscripted programs succeed with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    script: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, program: &str, reply: Reply) -> Self {
        self.script
            .lock()
            .unwrap()
            .entry(program.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn respond(self, program: &str, output: &str) -> Self {
        self.push(program, Reply::Output(output.to_string()))
    }

    pub fn fail(self, program: &str, output: &str) -> Self {
        self.push(program, Reply::Fail(output.to_string()))
    }

    pub fn time_out(self, program: &str) -> Self {
        self.push(program, Reply::Timeout)
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, program: &str) -> Vec<Invocation> {
        self.calls()
            .into_iter()
            .filter(|inv| inv.program == program)
            .collect()
    }
}

#[async_trait::async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, deadline: Duration, invocation: &Invocation) -> Result<String> {
        self.calls.lock().unwrap().push(invocation.clone());

        let reply = {
            let mut script = self.script.lock().unwrap();
            match script.get_mut(&invocation.program) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match reply {
            None => Ok(String::new()),
            Some(Reply::Output(out)) => Ok(out.trim().to_string()),
            Some(Reply::Fail(out)) => Err(VolumeError::Command {
                program: invocation.program.clone(),
                output: out,
                reason: "exit status: 1".to_string(),
            }),
            Some(Reply::Timeout) => Err(VolumeError::Timeout {
                what: invocation.to_string(),
                after: deadline,
            }),
        }
    }
}

/// Device probe that reports ready after a fixed number of failed probes.
pub struct ScriptedProbe {
    ready_after: Option<usize>,
    probes: AtomicUsize,
}

impl ScriptedProbe {
    pub fn ready_after(failures: usize) -> Self {
        Self {
            ready_after: Some(failures),
            probes: AtomicUsize::new(0),
        }
    }

    pub fn never_ready() -> Self {
        Self {
            ready_after: None,
            probes: AtomicUsize::new(0),
        }
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

impl DeviceProbe for ScriptedProbe {
    fn is_ready(&self, _device: &Path) -> bool {
        let seen = self.probes.fetch_add(1, Ordering::SeqCst);
        matches!(self.ready_after, Some(n) if seen >= n)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryCall {
    MountIntent(MountIntent),
    Unmounted { volume_id: String, namespace: String },
    Filesystem { volume_id: String, kind: FilesystemKind },
}

/// In-memory volume directory that records every state-changing call.
#[derive(Default)]
pub struct RecordingDirectory {
    volumes: Mutex<HashMap<VolumeRef, Volume>>,
    calls: Mutex<Vec<DirectoryCall>>,
    lookups: AtomicUsize,
    fail_mount_intent: bool,
    fail_unmounted: bool,
}

impl RecordingDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_volume(self, volume: Volume) -> Self {
        let key = VolumeRef::new(volume.namespace.clone(), volume.name.clone());
        self.volumes.lock().unwrap().insert(key, volume);
        self
    }

    pub fn failing_mount_intent(mut self) -> Self {
        self.fail_mount_intent = true;
        self
    }

    pub fn failing_unmounted(mut self) -> Self {
        self.fail_unmounted = true;
        self
    }

    pub fn calls(&self) -> Vec<DirectoryCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn volume(&self, volume: &VolumeRef) -> Option<Volume> {
        self.volumes.lock().unwrap().get(volume).cloned()
    }

    fn find_by_id(&self, volume_id: &str) -> Option<VolumeRef> {
        self.volumes
            .lock()
            .unwrap()
            .iter()
            .find(|(_, v)| v.id == volume_id)
            .map(|(k, _)| k.clone())
    }
}

#[async_trait::async_trait]
impl VolumeDirectory for RecordingDirectory {
    async fn get_volume(&self, volume: &VolumeRef) -> Result<Volume> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.volume(volume)
            .ok_or_else(|| VolumeError::Directory(format!("volume {} not found", volume)))
    }

    async fn notify_mount_intent(&self, intent: &MountIntent) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(DirectoryCall::MountIntent(intent.clone()));
        if self.fail_mount_intent {
            return Err(VolumeError::Directory("directory unavailable".to_string()));
        }
        if let Some(key) = self.find_by_id(&intent.volume_id) {
            if let Some(v) = self.volumes.lock().unwrap().get_mut(&key) {
                v.mounted_by = intent.client.clone();
                v.mountpoint = intent.mountpoint.clone();
            }
        }
        Ok(())
    }

    async fn notify_unmounted(&self, volume_id: &str, namespace: &str) -> Result<()> {
        self.calls.lock().unwrap().push(DirectoryCall::Unmounted {
            volume_id: volume_id.to_string(),
            namespace: namespace.to_string(),
        });
        if self.fail_unmounted {
            return Err(VolumeError::Directory("directory unavailable".to_string()));
        }
        if let Some(key) = self.find_by_id(volume_id) {
            if let Some(v) = self.volumes.lock().unwrap().get_mut(&key) {
                v.mounted_by.clear();
                v.mountpoint.clear();
            }
        }
        Ok(())
    }

    async fn record_filesystem(&self, volume_id: &str, _namespace: &str, kind: FilesystemKind) -> Result<()> {
        self.calls.lock().unwrap().push(DirectoryCall::Filesystem {
            volume_id: volume_id.to_string(),
            kind,
        });
        if let Some(key) = self.find_by_id(volume_id) {
            if let Some(v) = self.volumes.lock().unwrap().get_mut(&key) {
                v.fs_type.get_or_insert(kind);
            }
        }
        Ok(())
    }
}

/// An active, unmounted volume.
pub fn active_volume(id: &str, namespace: &str, name: &str) -> Volume {
    Volume {
        id: id.to_string(),
        namespace: namespace.to_string(),
        name: name.to_string(),
        status: VolumeStatus::Active,
        mounted_by: String::new(),
        mountpoint: String::new(),
        fs_type: None,
    }
}
