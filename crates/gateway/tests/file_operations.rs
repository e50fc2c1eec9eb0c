//! Integration tests for the file operation executor.
//!
//! These run the real gateway, mount store and path guard against a spy
//! machine resolver that records every remote call:
//! - Authorization happens before any remote work
//! - Command output handling (du, stat, copy, move)
//! - Hybrid removal fallback
//! - Handle lifecycle for create, write and upload
//! - Deadline and cancellation

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use gateway::files::{ChannelResolver, FileGateway};
use gateway::mounts::{JsonMountStore, MountStore};
use gateway::protocol::{
    DirectoryEntry, EntryType, GatewayError, MachineId, MachineInfo, MountKind, NewMount,
};
use gateway::remote::{CommandOutput, MachineResolver, RemoteFile, RemoteSession};
use tempfile::TempDir;

// =============================================================================
// Spy machine
// =============================================================================

#[derive(Default)]
struct SpyState {
    /// Shell commands, in execution order.
    commands: Vec<String>,
    /// Transfer-channel calls, formatted as "<call> <path>".
    transfers: Vec<String>,
    /// Machines connected to.
    connects: Vec<MachineId>,
    /// Number of file handles closed.
    closes: usize,
    /// Number of file handles released, closed or not.
    drops: usize,
    /// Number of times a session was interrupted.
    interrupts: usize,
    /// Scripted command results keyed by command prefix.
    scripted: Vec<(String, CommandOutput)>,
    /// Commands starting with one of these fail to run at all.
    exec_failures: Vec<String>,
    dir_entries: Vec<DirectoryEntry>,
    files: HashMap<String, Vec<u8>>,
    fail_writes: bool,
    write_delay: Option<Duration>,
    fail_read_dir: bool,
    fail_mkdir: bool,
    fail_rename: bool,
    fail_removes: HashSet<String>,
    fail_connect: bool,
    connect_delay: Option<Duration>,
}

type Shared = Arc<Mutex<SpyState>>;

struct SpyFile {
    path: String,
    state: Shared,
    data: Vec<u8>,
    pos: usize,
    writable: bool,
}

impl RemoteFile for SpyFile {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let (fail, delay) = {
            let state = self.state.lock().unwrap();
            (state.fail_writes, state.write_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        self.data.extend_from_slice(buf);
        Ok(())
    }

    async fn close(mut self) -> io::Result<()> {
        let path = std::mem::take(&mut self.path);
        let data = std::mem::take(&mut self.data);
        let mut state = self.state.lock().unwrap();
        state.closes += 1;
        if self.writable {
            state.files.insert(path, data);
        }
        Ok(())
    }
}

impl Drop for SpyFile {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.drops += 1;
        }
    }
}

struct SpySession {
    state: Shared,
}

impl SpySession {
    fn record(&self, call: &str, path: &str) {
        self.state
            .lock()
            .unwrap()
            .transfers
            .push(format!("{call} {path}"));
    }

    fn file(&self, path: &str, data: Vec<u8>, writable: bool) -> SpyFile {
        SpyFile {
            path: path.to_string(),
            state: self.state.clone(),
            data,
            pos: 0,
            writable,
        }
    }
}

impl RemoteSession for SpySession {
    type File = SpyFile;

    async fn execute(&self, command: &str) -> io::Result<CommandOutput> {
        let mut state = self.state.lock().unwrap();
        state.commands.push(command.to_string());
        if state.exec_failures.iter().any(|p| command.starts_with(p)) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "channel closed"));
        }
        let output = state
            .scripted
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix))
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| CommandOutput::new("", 0));
        Ok(output)
    }

    async fn read_dir(&self, path: &str) -> io::Result<Vec<DirectoryEntry>> {
        self.record("read_dir", path);
        let state = self.state.lock().unwrap();
        if state.fail_read_dir {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such file"));
        }
        Ok(state.dir_entries.clone())
    }

    async fn open(&self, path: &str) -> io::Result<SpyFile> {
        self.record("open", path);
        let data = self.state.lock().unwrap().files.get(path).cloned();
        match data {
            Some(data) => Ok(self.file(path, data, false)),
            None => Err(io::Error::new(io::ErrorKind::NotFound, "no such file")),
        }
    }

    async fn create(&self, path: &str) -> io::Result<SpyFile> {
        self.record("create", path);
        Ok(self.file(path, Vec::new(), true))
    }

    async fn open_read_write(&self, path: &str) -> io::Result<SpyFile> {
        self.record("open_read_write", path);
        Ok(self.file(path, Vec::new(), true))
    }

    async fn mkdir_all(&self, path: &str) -> io::Result<()> {
        self.record("mkdir_all", path);
        if self.state.lock().unwrap().fail_mkdir {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "permission denied"));
        }
        Ok(())
    }

    async fn remove_all(&self, path: &str) -> io::Result<()> {
        self.record("remove_all", path);
        if self.state.lock().unwrap().fail_removes.contains(path) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "permission denied"));
        }
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        self.record("rename", &format!("{from} -> {to}"));
        if self.state.lock().unwrap().fail_rename {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such file"));
        }
        Ok(())
    }

    fn interrupt(&self) {
        self.state.lock().unwrap().interrupts += 1;
    }
}

struct SpyMachines {
    state: Shared,
    machines: HashMap<MachineId, MachineInfo>,
}

impl MachineResolver for SpyMachines {
    type Session = SpySession;

    fn describe(&self, machine_id: MachineId) -> Option<MachineInfo> {
        self.machines.get(&machine_id).cloned()
    }

    async fn connect(&self, machine_id: MachineId) -> Result<SpySession, GatewayError> {
        let (delay, fail) = {
            let mut state = self.state.lock().unwrap();
            state.connects.push(machine_id);
            (state.connect_delay, state.fail_connect)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(GatewayError::Connection("authentication failed".to_string()));
        }
        Ok(SpySession {
            state: self.state.clone(),
        })
    }
}

// =============================================================================
// Fixture
// =============================================================================

/// Mount 1: `/srv/app` on machine 1. Mount 2: `/srv/orphan` on an unknown machine.
struct Fixture {
    _temp_dir: TempDir,
    store: Arc<JsonMountStore>,
    machines: Arc<SpyMachines>,
    state: Shared,
}

impl Fixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(JsonMountStore::open(temp_dir.path().join("mounts.json")).unwrap());
        store.create(new_mount(1, "/srv/app")).unwrap();
        store.create(new_mount(9, "/srv/orphan")).unwrap();

        let state: Shared = Arc::default();
        let machines = Arc::new(SpyMachines {
            state: state.clone(),
            machines: HashMap::from([(1, web_1())]),
        });

        Self {
            _temp_dir: temp_dir,
            store,
            machines,
            state,
        }
    }

    fn gateway(&self) -> FileGateway<JsonMountStore, SpyMachines> {
        FileGateway::new(self.store.clone(), self.machines.clone())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SpyState> {
        self.state.lock().unwrap()
    }

    fn script(&self, prefix: &str, output: &str, status: i32) {
        self.state()
            .scripted
            .push((prefix.to_string(), CommandOutput::new(output, status)));
    }
}

fn new_mount(machine_id: MachineId, path: &str) -> NewMount {
    NewMount {
        machine_id,
        name: "app".to_string(),
        path: path.to_string(),
        kind: Some(MountKind::Directory),
        operator: Some("admin".to_string()),
        operator_id: Some(1),
    }
}

fn web_1() -> MachineInfo {
    MachineInfo {
        id: 1,
        name: "web-1".to_string(),
        host: "10.0.0.5".to_string(),
        port: 22,
        username: "deploy".to_string(),
    }
}

fn entry(entry_type: EntryType, name: &str) -> DirectoryEntry {
    DirectoryEntry {
        name: name.to_string(),
        path: format!("/srv/app/{name}"),
        size: 4096,
        entry_type,
        mode: Some(0o755),
        modified: Some(1_700_000_000),
    }
}

// =============================================================================
// Resolution and authorization
// =============================================================================

#[tokio::test]
async fn test_nested_path_is_authorized() {
    let fx = Fixture::new();
    let outcome = fx.gateway().stat(1, "/srv/app/logs/out.log").await;

    assert!(outcome.is_ok());
    assert_eq!(outcome.machine, Some(web_1()));
    assert_eq!(fx.state().commands, vec!["stat -L '/srv/app/logs/out.log'"]);
}

#[tokio::test]
async fn test_sibling_path_is_denied_without_remote_calls() {
    let fx = Fixture::new();
    let outcome = fx.gateway().stat(1, "/srv/appX").await;

    assert_eq!(
        outcome.error(),
        Some(&GatewayError::AccessDenied {
            path: "/srv/appX".to_string()
        })
    );
    assert_eq!(outcome.machine, Some(web_1()));

    let state = fx.state();
    assert!(state.connects.is_empty());
    assert!(state.commands.is_empty());
}

#[tokio::test]
async fn test_traversal_is_denied() {
    let fx = Fixture::new();
    let outcome = fx.gateway().list_directory(1, "/srv/app/../../etc").await;

    assert!(matches!(outcome.error(), Some(GatewayError::AccessDenied { .. })));
    assert!(fx.state().connects.is_empty());
}

#[tokio::test]
async fn test_unknown_mount() {
    let fx = Fixture::new();
    let outcome = fx.gateway().list_directory(99, "/srv/app").await;

    assert_eq!(outcome.error(), Some(&GatewayError::RecordNotFound(99)));
    assert!(outcome.machine.is_none());
}

#[tokio::test]
async fn test_mount_id_zero_is_invalid() {
    let fx = Fixture::new();
    let outcome = fx.gateway().mkdir(0, "/srv/app/new").await;

    assert!(matches!(outcome.error(), Some(GatewayError::InvalidRequest(_))));
}

#[tokio::test]
async fn test_unknown_machine_is_connection_error() {
    let fx = Fixture::new();
    let outcome = fx.gateway().list_directory(2, "/srv/orphan").await;

    assert!(matches!(outcome.error(), Some(GatewayError::Connection(msg)) if msg.contains('9')));
    assert!(outcome.machine.is_none());
    assert!(fx.state().connects.is_empty());
}

#[tokio::test]
async fn test_connect_failure_keeps_machine_descriptor() {
    let fx = Fixture::new();
    fx.state().fail_connect = true;

    let outcome = fx.gateway().directory_size(1, "/srv/app").await;

    assert!(matches!(outcome.error(), Some(GatewayError::Connection(_))));
    assert_eq!(outcome.machine, Some(web_1()));
}

#[tokio::test]
async fn test_channel_resolver_resolve() {
    let fx = Fixture::new();
    let resolver = ChannelResolver::new(fx.store.clone(), fx.machines.clone());

    let bound = resolver.resolve(1).await.unwrap();
    assert_eq!(bound.mount.path, "/srv/app");
    assert_eq!(bound.machine, web_1());
    assert_eq!(fx.state().connects, vec![1]);

    assert!(matches!(
        resolver.resolve(42).await,
        Err(GatewayError::RecordNotFound(42))
    ));
    assert!(matches!(
        resolver.resolve(2).await,
        Err(GatewayError::Connection(_))
    ));
}

// =============================================================================
// Listing and inspection
// =============================================================================

#[tokio::test]
async fn test_list_directory_orders_directories_first() {
    let fx = Fixture::new();
    fx.state().dir_entries = vec![
        entry(EntryType::File, "b.txt"),
        entry(EntryType::Directory, "zeta"),
        entry(EntryType::File, "a.txt"),
        entry(EntryType::Directory, "alpha"),
    ];

    let entries = fx
        .gateway()
        .list_directory(1, "/srv/app")
        .await
        .into_result()
        .unwrap();

    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "zeta", "a.txt", "b.txt"]);
    assert_eq!(fx.state().transfers, vec!["read_dir /srv/app/"]);
}

#[tokio::test]
async fn test_list_directory_failure_is_remote_io() {
    let fx = Fixture::new();
    fx.state().fail_read_dir = true;

    let outcome = fx.gateway().list_directory(1, "/srv/app/missing").await;

    assert_eq!(
        outcome.error(),
        Some(&GatewayError::RemoteIo {
            path: "/srv/app/missing/".to_string(),
            message: "no such file".to_string(),
        })
    );
}

#[tokio::test]
async fn test_directory_size() {
    let fx = Fixture::new();
    fx.script("du -sh", "32K\t/srv/app\n", 0);

    let size = fx.gateway().directory_size(1, "/srv/app").await.into_result();

    assert_eq!(size, Ok("32K".to_string()));
    assert_eq!(fx.state().commands, vec!["du -sh '/srv/app'"]);
}

#[tokio::test]
async fn test_directory_size_recovers_summary_after_warnings() {
    let fx = Fixture::new();
    fx.script(
        "du -sh",
        "du: cannot access '/srv/app/tmp/x': No such file or directory\n18G\t/srv/app\n",
        1,
    );

    let size = fx.gateway().directory_size(1, "/srv/app").await.into_result();
    assert_eq!(size, Ok("18G".to_string()));
}

#[tokio::test]
async fn test_directory_size_reports_whole_output() {
    let fx = Fixture::new();
    let output = "du: cannot read directory '/srv/app': Permission denied\n";
    fx.script("du -sh", output, 1);

    let outcome = fx.gateway().directory_size(1, "/srv/app").await;
    assert_eq!(
        outcome.error(),
        Some(&GatewayError::RemoteCommand {
            command: "du -sh '/srv/app'".to_string(),
            output: output.to_string(),
        })
    );
}

#[tokio::test]
async fn test_stat_failure_carries_output() {
    let fx = Fixture::new();
    fx.script("stat", "stat: cannot statx '/srv/app/gone': No such file or directory\n", 1);

    let outcome = fx.gateway().stat(1, "/srv/app/gone").await;
    match outcome.error() {
        Some(GatewayError::RemoteCommand { output, .. }) => {
            assert!(output.contains("No such file or directory"))
        }
        other => panic!("Expected RemoteCommand, got {other:?}"),
    }
}

#[tokio::test]
async fn test_command_transport_failure() {
    let fx = Fixture::new();
    fx.state().exec_failures.push("stat".to_string());

    let outcome = fx.gateway().stat(1, "/srv/app").await;
    assert!(matches!(
        outcome.error(),
        Some(GatewayError::RemoteCommand { output, .. }) if output.contains("channel closed")
    ));
}

// =============================================================================
// Creating and writing
// =============================================================================

#[tokio::test]
async fn test_mkdir_uses_trailing_slash() {
    let fx = Fixture::new();
    assert!(fx.gateway().mkdir(1, "/srv/app/a/b").await.is_ok());
    assert_eq!(fx.state().transfers, vec!["mkdir_all /srv/app/a/b/"]);
}

#[tokio::test]
async fn test_mkdir_failure_is_remote_io() {
    let fx = Fixture::new();
    fx.state().fail_mkdir = true;

    let outcome = fx.gateway().mkdir(1, "/srv/app/locked").await;

    assert!(matches!(
        outcome.error(),
        Some(GatewayError::RemoteIo { path, message })
            if path == "/srv/app/locked/" && message.contains("permission denied")
    ));
}

#[tokio::test]
async fn test_create_file_closes_handle() {
    let fx = Fixture::new();
    assert!(fx.gateway().create_file(1, "/srv/app/empty.txt").await.is_ok());

    let state = fx.state();
    assert_eq!(state.closes, 1);
    assert_eq!(state.files.get("/srv/app/empty.txt"), Some(&Vec::new()));
}

#[tokio::test]
async fn test_write_file_content() {
    let fx = Fixture::new();
    let outcome = fx
        .gateway()
        .write_file_content(1, "/srv/app/conf.ini", Bytes::from_static(b"debug=true\n"))
        .await;
    assert!(outcome.is_ok());

    let state = fx.state();
    assert_eq!(state.transfers, vec!["open_read_write /srv/app/conf.ini"]);
    assert_eq!(state.files["/srv/app/conf.ini"], b"debug=true\n");
    assert_eq!(state.closes, 1);
}

#[tokio::test]
async fn test_write_failure_still_closes_handle() {
    let fx = Fixture::new();
    fx.state().fail_writes = true;

    let outcome = fx
        .gateway()
        .write_file_content(1, "/srv/app/conf.ini", Bytes::from_static(b"x"))
        .await;

    assert!(matches!(
        outcome.error(),
        Some(GatewayError::RemoteIo { path, message })
            if path == "/srv/app/conf.ini" && message.contains("disk full")
    ));
    assert_eq!(fx.state().closes, 1);
}

#[tokio::test]
async fn test_read_file_returns_open_handle() {
    let fx = Fixture::new();
    fx.state()
        .files
        .insert("/srv/app/readme".to_string(), b"hello".to_vec());

    let mut file = fx
        .gateway()
        .read_file(1, "/srv/app/readme")
        .await
        .into_result()
        .unwrap();
    assert_eq!(file.read_to_end().await.unwrap(), b"hello");
    assert_eq!(fx.state().closes, 0);

    file.close().await.unwrap();
    assert_eq!(fx.state().closes, 1);
}

#[tokio::test]
async fn test_read_missing_file() {
    let fx = Fixture::new();
    let outcome = fx.gateway().read_file(1, "/srv/app/missing").await;
    assert!(matches!(outcome.error(), Some(GatewayError::RemoteIo { path, .. }) if path == "/srv/app/missing"));
}

#[tokio::test]
async fn test_upload_streams_in_chunks() {
    let fx = Fixture::new();
    let gateway = fx.gateway().with_upload_buffer_size(4);
    let payload: &[u8] = b"id,name\n1,web\n";

    let outcome = gateway
        .upload_file(1, "/srv/app/in", "report.csv", payload)
        .await;

    assert_eq!(outcome.into_result(), Ok(payload.len() as u64));
    let state = fx.state();
    assert_eq!(state.transfers, vec!["create /srv/app/in/report.csv"]);
    assert_eq!(state.files["/srv/app/in/report.csv"], payload);
    assert_eq!(state.closes, 1);
}

#[tokio::test]
async fn test_upload_failure_still_closes_handle() {
    let fx = Fixture::new();
    fx.state().fail_writes = true;

    let outcome = fx
        .gateway()
        .upload_file(1, "/srv/app", "a.bin", &b"data"[..])
        .await;

    assert!(matches!(outcome.error(), Some(GatewayError::RemoteIo { .. })));
    assert_eq!(fx.state().closes, 1);
}

#[tokio::test]
async fn test_upload_rejects_path_in_filename() {
    let fx = Fixture::new();
    let outcome = fx
        .gateway()
        .upload_file(1, "/srv/app", "../escape.sh", &b"#!/bin/sh"[..])
        .await;

    assert!(matches!(outcome.error(), Some(GatewayError::InvalidRequest(_))));
    assert!(fx.state().connects.is_empty());
}

// =============================================================================
// Remove, copy, move, rename
// =============================================================================

#[tokio::test]
async fn test_remove_with_command() {
    let fx = Fixture::new();
    let outcome = fx
        .gateway()
        .remove_file(1, &["/srv/app/a", "/srv/app/b c"])
        .await;

    assert!(outcome.is_ok());
    let state = fx.state();
    assert_eq!(state.commands, vec!["rm -rf '/srv/app/a' '/srv/app/b c'"]);
    assert!(state.transfers.is_empty());
}

#[tokio::test]
async fn test_remove_falls_back_per_path() {
    let fx = Fixture::new();
    fx.script("rm -rf", "rm: cannot remove '/srv/app/a': Operation not permitted\n", 1);

    let outcome = fx.gateway().remove_file(1, &["/srv/app/a", "/srv/app/b"]).await;

    assert!(outcome.is_ok());
    assert_eq!(
        fx.state().transfers,
        vec!["remove_all /srv/app/a", "remove_all /srv/app/b"]
    );
}

#[tokio::test]
async fn test_remove_fallback_after_transport_failure() {
    let fx = Fixture::new();
    fx.state().exec_failures.push("rm".to_string());

    let outcome = fx.gateway().remove_file(1, &["/srv/app/a"]).await;

    assert!(outcome.is_ok());
    assert_eq!(fx.state().transfers, vec!["remove_all /srv/app/a"]);
}

#[tokio::test]
async fn test_remove_fallback_stops_at_first_failure() {
    let fx = Fixture::new();
    fx.script("rm -rf", "rm: failed\n", 1);
    fx.state().fail_removes.insert("/srv/app/b".to_string());

    let outcome = fx
        .gateway()
        .remove_file(1, &["/srv/app/a", "/srv/app/b", "/srv/app/c"])
        .await;

    assert!(matches!(
        outcome.error(),
        Some(GatewayError::RemoteIo { path, .. }) if path == "/srv/app/b"
    ));
    assert_eq!(
        fx.state().transfers,
        vec!["remove_all /srv/app/a", "remove_all /srv/app/b"]
    );
}

#[tokio::test]
async fn test_remove_denies_whole_batch() {
    let fx = Fixture::new();
    let outcome = fx.gateway().remove_file(1, &["/srv/app/a", "/etc"]).await;

    assert!(matches!(outcome.error(), Some(GatewayError::AccessDenied { path }) if path == "/etc"));
    assert!(fx.state().commands.is_empty());
}

#[tokio::test]
async fn test_remove_requires_paths() {
    let fx = Fixture::new();
    let none: [&str; 0] = [];
    let outcome = fx.gateway().remove_file(1, &none).await;
    assert!(matches!(outcome.error(), Some(GatewayError::InvalidRequest(_))));
    assert_eq!(outcome.machine, Some(web_1()));
    assert!(fx.state().connects.is_empty());
}

#[tokio::test]
async fn test_copy_and_move_require_paths() {
    let fx = Fixture::new();
    let none: [&str; 0] = [];
    let gateway = fx.gateway();

    for outcome in [
        gateway.copy(1, "/srv/app/b", &none).await,
        gateway.move_files(1, "/srv/app/b", &none).await,
    ] {
        assert!(matches!(outcome.error(), Some(GatewayError::InvalidRequest(_))));
        assert_eq!(outcome.machine, Some(web_1()));
    }
    assert!(fx.state().commands.is_empty());
}

#[tokio::test]
async fn test_copy_command_line() {
    let fx = Fixture::new();
    let outcome = fx
        .gateway()
        .copy(1, "/srv/app/backup", &["/srv/app/a", "/srv/app/b"])
        .await;

    assert!(outcome.is_ok());
    assert_eq!(
        fx.state().commands,
        vec!["cp -r '/srv/app/a' '/srv/app/b' '/srv/app/backup'"]
    );
}

#[tokio::test]
async fn test_copy_failure_carries_output() {
    let fx = Fixture::new();
    let output = "cp: cannot create directory '/srv/app/ro/a': Read-only file system\n";
    fx.script("cp -r", output, 1);

    let outcome = fx.gateway().copy(1, "/srv/app/ro", &["/srv/app/a"]).await;

    assert_eq!(
        outcome.error(),
        Some(&GatewayError::RemoteCommand {
            command: "cp -r '/srv/app/a' '/srv/app/ro'".to_string(),
            output: output.to_string(),
        })
    );
}

#[tokio::test]
async fn test_copy_destination_is_authorized() {
    let fx = Fixture::new();
    let outcome = fx.gateway().copy(1, "/tmp", &["/srv/app/a"]).await;

    assert!(matches!(outcome.error(), Some(GatewayError::AccessDenied { path }) if path == "/tmp"));
    assert!(fx.state().commands.is_empty());
}

#[tokio::test]
async fn test_move_failure_carries_output() {
    let fx = Fixture::new();
    fx.script("mv", "mv: cannot stat '/srv/app/a': No such file or directory\n", 1);

    let outcome = fx.gateway().move_files(1, "/srv/app/b", &["/srv/app/a"]).await;

    assert_eq!(
        outcome.error(),
        Some(&GatewayError::RemoteCommand {
            command: "mv '/srv/app/a' '/srv/app/b'".to_string(),
            output: "mv: cannot stat '/srv/app/a': No such file or directory\n".to_string(),
        })
    );
}

#[tokio::test]
async fn test_rename_authorizes_new_name_only() {
    let fx = Fixture::new();
    let gateway = fx.gateway();

    assert!(gateway.rename(1, "/srv/app/old", "/srv/app/new").await.is_ok());
    assert_eq!(
        fx.state().transfers,
        vec!["rename /srv/app/old -> /srv/app/new"]
    );

    let outcome = gateway.rename(1, "/srv/app/new", "/srv/other").await;
    assert!(matches!(outcome.error(), Some(GatewayError::AccessDenied { .. })));
}

#[tokio::test]
async fn test_rename_failure_is_remote_io() {
    let fx = Fixture::new();
    fx.state().fail_rename = true;

    let outcome = fx.gateway().rename(1, "/srv/app/gone", "/srv/app/new").await;

    assert!(matches!(
        outcome.error(),
        Some(GatewayError::RemoteIo { path, message })
            if path == "/srv/app/gone -> /srv/app/new" && message.contains("no such file")
    ));
    assert_eq!(outcome.machine, Some(web_1()));
}

// =============================================================================
// Deadline and cancellation
// =============================================================================

#[tokio::test]
async fn test_operation_timeout() {
    let fx = Fixture::new();
    fx.state().connect_delay = Some(Duration::from_secs(5));
    let gateway = fx.gateway().with_timeout(Some(Duration::from_millis(50)));

    let outcome = gateway.directory_size(1, "/srv/app").await;

    assert!(matches!(outcome.error(), Some(GatewayError::Timeout(_))));
    assert_eq!(outcome.machine, Some(web_1()));
    let state = fx.state();
    assert!(state.commands.is_empty());
    assert_eq!(state.interrupts, 0);
}

#[tokio::test]
async fn test_deadline_mid_write_releases_handle() {
    let fx = Fixture::new();
    fx.state().write_delay = Some(Duration::from_secs(5));
    let gateway = fx.gateway().with_timeout(Some(Duration::from_millis(50)));

    let outcome = gateway
        .write_file_content(1, "/srv/app/big.bin", Bytes::from_static(b"payload"))
        .await;

    assert!(matches!(outcome.error(), Some(GatewayError::Timeout(_))));
    let state = fx.state();
    assert_eq!(state.transfers, vec!["open_read_write /srv/app/big.bin"]);
    assert_eq!(state.drops, 1);
    assert_eq!(state.closes, 0);
    assert_eq!(state.interrupts, 1);
    assert!(!state.files.contains_key("/srv/app/big.bin"));
}

#[tokio::test]
async fn test_deadline_mid_upload_releases_handle() {
    let fx = Fixture::new();
    fx.state().write_delay = Some(Duration::from_secs(5));
    let gateway = fx
        .gateway()
        .with_timeout(Some(Duration::from_millis(50)))
        .with_upload_buffer_size(2);

    let outcome = gateway
        .upload_file(1, "/srv/app/in", "data.csv", &b"a,b\n1,2\n"[..])
        .await;

    assert!(matches!(outcome.error(), Some(GatewayError::Timeout(_))));
    let state = fx.state();
    assert_eq!(state.drops, 1);
    assert_eq!(state.closes, 0);
    assert_eq!(state.interrupts, 1);
}

#[tokio::test]
async fn test_cancelled_operation() {
    let fx = Fixture::new();
    let gateway = fx.gateway();
    gateway.cancellation_token().cancel();

    let outcome = gateway.list_directory(1, "/srv/app").await;

    assert_eq!(outcome.error(), Some(&GatewayError::Cancelled));
    assert!(fx.state().transfers.is_empty());
}

#[tokio::test]
async fn test_cancel_mid_write_interrupts_session() {
    let fx = Fixture::new();
    fx.state().write_delay = Some(Duration::from_secs(5));
    let gateway = fx.gateway();
    let token = gateway.cancellation_token();

    let cancel = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    };
    let (outcome, ()) = tokio::join!(
        gateway.write_file_content(1, "/srv/app/big.bin", Bytes::from_static(b"payload")),
        cancel
    );

    assert_eq!(outcome.error(), Some(&GatewayError::Cancelled));
    let state = fx.state();
    assert_eq!(state.drops, 1);
    assert_eq!(state.interrupts, 1);
}
