//! File operation executor.
//!
//! Every operation follows the same shape: look up the mount, authorize the
//! paths against its root, describe the owning machine, then connect and act.
//! Nothing remote happens until authorization has passed. Each result carries
//! the machine descriptor so failed actions can still be attributed.
//!
//! Remote steps are bounded by the configured deadline and the gateway's
//! cancellation token. Files opened for writing are closed before the
//! operation returns, whether or not the write succeeded.

use std::future::Future;
use std::io;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use protocol::{sort_entries, DirectoryEntry, FileMount, GatewayError, MachineInfo, MountId};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use super::commands;
use super::guard::{self, with_trailing_slash};
use super::resolver::ChannelResolver;
use crate::config::Config;
use crate::mounts::MountStore;
use crate::remote::{MachineResolver, RemoteFile, RemoteSession};

/// Default chunk size used when streaming uploads.
pub const DEFAULT_UPLOAD_BUFFER_SIZE: usize = 32 * 1024;

/// File handle type handed out by [`FileGateway::read_file`].
pub type FileOf<R> = <<R as MachineResolver>::Session as RemoteSession>::File;

/// Result of a file operation plus the machine it ran against.
#[derive(Debug)]
pub struct OpOutcome<T> {
    /// Machine descriptor, present whenever the mount's machine was known.
    pub machine: Option<MachineInfo>,
    pub result: Result<T, GatewayError>,
}

impl<T> OpOutcome<T> {
    /// Discard the descriptor.
    pub fn into_result(self) -> Result<T, GatewayError> {
        self.result
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// The error, if the operation failed.
    pub fn error(&self) -> Option<&GatewayError> {
        self.result.as_ref().err()
    }
}

/// Failure before any remote work started.
struct Rejected {
    machine: Option<MachineInfo>,
    error: GatewayError,
}

impl<T> From<Rejected> for OpOutcome<T> {
    fn from(r: Rejected) -> Self {
        OpOutcome {
            machine: r.machine,
            result: Err(r.error),
        }
    }
}

/// An authorized request, ready to connect.
struct Prepared {
    op: &'static str,
    mount: FileMount,
    machine: MachineInfo,
    /// Normalised, authorized paths in request order.
    paths: Vec<String>,
    span: tracing::Span,
}

impl Prepared {
    fn finish<T>(self, result: Result<T, GatewayError>) -> OpOutcome<T> {
        self.span.in_scope(|| match &result {
            Ok(_) => debug!(op = self.op, "File operation completed"),
            Err(e) => warn!(op = self.op, error = %e, "File operation failed"),
        });
        OpOutcome {
            machine: Some(self.machine),
            result,
        }
    }
}

/// Mount-confined file operations on managed machines.
pub struct FileGateway<S: MountStore, R: MachineResolver> {
    resolver: ChannelResolver<S, R>,
    timeout: Option<Duration>,
    upload_buffer_size: usize,
    cancel: CancellationToken,
}

impl<S: MountStore, R: MachineResolver> FileGateway<S, R> {
    /// Create a gateway with no deadline.
    pub fn new(store: Arc<S>, machines: Arc<R>) -> Self {
        Self {
            resolver: ChannelResolver::new(store, machines),
            timeout: None,
            upload_buffer_size: DEFAULT_UPLOAD_BUFFER_SIZE,
            cancel: CancellationToken::new(),
        }
    }

    /// Create a gateway using the deadline and buffer size from `config`.
    pub fn from_config(config: &Config, store: Arc<S>, machines: Arc<R>) -> Self {
        Self::new(store, machines)
            .with_timeout(config.gateway.operation_timeout())
            .with_upload_buffer_size(config.transfer.upload_buffer_size)
    }

    /// Bound each operation's remote work.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_upload_buffer_size(mut self, size: usize) -> Self {
        self.upload_buffer_size = size.max(1);
        self
    }

    /// Abort in-flight remote work when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels every in-flight operation.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The channel resolver used by this gateway.
    pub fn resolver(&self) -> &ChannelResolver<S, R> {
        &self.resolver
    }

    /// Look up, authorize and describe. No remote I/O.
    fn prepare<P: AsRef<str>>(
        &self,
        op: &'static str,
        mount_id: MountId,
        paths: &[P],
    ) -> Result<Prepared, Rejected> {
        let mount = self.resolver.lookup(mount_id).map_err(|error| Rejected {
            machine: None,
            error,
        })?;
        let machine = self.resolver.describe(&mount);

        let paths = guard::authorize(&mount, paths).map_err(|error| Rejected {
            machine: machine.clone(),
            error,
        })?;

        let machine = machine.ok_or_else(|| Rejected {
            machine: None,
            error: GatewayError::Connection(format!("unknown machine {}", mount.machine_id)),
        })?;

        let span = tracing::info_span!(
            "file_op",
            op,
            op_id = %Uuid::new_v4(),
            mount_id,
            machine = %machine.name,
        );
        Ok(Prepared {
            op,
            mount,
            machine,
            paths,
            span,
        })
    }

    /// Connect and run `work`, bounded by deadline and cancellation.
    ///
    /// When the deadline or the token fires after the session is up, the
    /// session is interrupted so blocking remote calls fail instead of
    /// running on after the operation has returned.
    async fn run<T, F, Fut>(&self, prepared: &Prepared, work: F) -> Result<T, GatewayError>
    where
        F: FnOnce(Arc<R::Session>) -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let machine_id = prepared.mount.machine_id;
        let op = prepared.op;
        let connected: OnceLock<Arc<R::Session>> = OnceLock::new();

        let remote = async {
            let session = Arc::new(self.resolver.connect(machine_id).await?);
            let _ = connected.set(Arc::clone(&session));
            work(session).await
        };
        let bounded = async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, remote).await.map_err(|_| {
                    GatewayError::Timeout(format!("{op} exceeded {limit:?}"))
                })?,
                None => remote.await,
            }
        };

        let result = async {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(GatewayError::Cancelled),
                result = bounded => result,
            }
        }
        .instrument(prepared.span.clone())
        .await;

        if let Err(GatewayError::Timeout(_) | GatewayError::Cancelled) = &result {
            if let Some(session) = connected.get() {
                prepared
                    .span
                    .in_scope(|| warn!(op, "Interrupting remote session"));
                session.interrupt();
            }
        }
        result
    }

    /// List a directory, directories first then by name.
    pub async fn list_directory(
        &self,
        mount_id: MountId,
        path: &str,
    ) -> OpOutcome<Vec<DirectoryEntry>> {
        let prepared = match self.prepare("list_directory", mount_id, &[path]) {
            Ok(p) => p,
            Err(r) => return r.into(),
        };
        let dir = with_trailing_slash(&prepared.paths[0]);

        let result = self
            .run(&prepared, |session| async move {
                let mut entries = session
                    .read_dir(&dir)
                    .await
                    .map_err(|e| GatewayError::remote_io(dir.as_str(), &e))?;
                sort_entries(&mut entries);
                debug!(path = %dir, count = entries.len(), "Listed directory");
                Ok(entries)
            })
            .await;
        prepared.finish(result)
    }

    /// Human-readable disk usage of a path (`du -sh`).
    pub async fn directory_size(&self, mount_id: MountId, path: &str) -> OpOutcome<String> {
        let prepared = match self.prepare("directory_size", mount_id, &[path]) {
            Ok(p) => p,
            Err(r) => return r.into(),
        };
        let command = commands::du(&prepared.paths[0]);

        let result = self
            .run(&prepared, |session| async move {
                let output = session
                    .execute(&command)
                    .await
                    .map_err(|e| command_error(&command, &e))?;
                commands::parse_du_output(&command, &output)
            })
            .await;
        prepared.finish(result)
    }

    /// Raw `stat -L` output for a path.
    pub async fn stat(&self, mount_id: MountId, path: &str) -> OpOutcome<String> {
        let prepared = match self.prepare("stat", mount_id, &[path]) {
            Ok(p) => p,
            Err(r) => return r.into(),
        };
        let command = commands::stat(&prepared.paths[0]);

        let result = self
            .run(&prepared, |session| async move {
                let output = session
                    .execute(&command)
                    .await
                    .map_err(|e| command_error(&command, &e))?;
                if !output.success() {
                    return Err(GatewayError::RemoteCommand {
                        command,
                        output: output.output,
                    });
                }
                Ok(output.output)
            })
            .await;
        prepared.finish(result)
    }

    /// Create a directory and any missing ancestors.
    pub async fn mkdir(&self, mount_id: MountId, path: &str) -> OpOutcome<()> {
        let prepared = match self.prepare("mkdir", mount_id, &[path]) {
            Ok(p) => p,
            Err(r) => return r.into(),
        };
        let dir = with_trailing_slash(&prepared.paths[0]);

        let result = self
            .run(&prepared, |session| async move {
                session
                    .mkdir_all(&dir)
                    .await
                    .map_err(|e| GatewayError::remote_io(dir.as_str(), &e))?;
                info!(path = %dir, "Created directory");
                Ok(())
            })
            .await;
        prepared.finish(result)
    }

    /// Create an empty file.
    pub async fn create_file(&self, mount_id: MountId, path: &str) -> OpOutcome<()> {
        let prepared = match self.prepare("create_file", mount_id, &[path]) {
            Ok(p) => p,
            Err(r) => return r.into(),
        };
        let target = prepared.paths[0].clone();

        let result = self
            .run(&prepared, |session| async move {
                let file = session
                    .create(&target)
                    .await
                    .map_err(|e| GatewayError::remote_io(target.as_str(), &e))?;
                file.close()
                    .await
                    .map_err(|e| GatewayError::remote_io(target.as_str(), &e))?;
                info!(path = %target, "Created file");
                Ok(())
            })
            .await;
        prepared.finish(result)
    }

    /// Open a file for reading. The caller owns the handle and must close it.
    pub async fn read_file(&self, mount_id: MountId, path: &str) -> OpOutcome<FileOf<R>> {
        let prepared = match self.prepare("read_file", mount_id, &[path]) {
            Ok(p) => p,
            Err(r) => return r.into(),
        };
        let target = prepared.paths[0].clone();

        let result = self
            .run(&prepared, |session| async move {
                session
                    .open(&target)
                    .await
                    .map_err(|e| GatewayError::remote_io(target.as_str(), &e))
            })
            .await;
        prepared.finish(result)
    }

    /// Replace a file's content, creating it if needed.
    pub async fn write_file_content(
        &self,
        mount_id: MountId,
        path: &str,
        content: Bytes,
    ) -> OpOutcome<()> {
        let prepared = match self.prepare("write_file_content", mount_id, &[path]) {
            Ok(p) => p,
            Err(r) => return r.into(),
        };
        let target = prepared.paths[0].clone();

        let result = self
            .run(&prepared, |session| async move {
                let mut file = session
                    .open_read_write(&target)
                    .await
                    .map_err(|e| GatewayError::remote_io(target.as_str(), &e))?;
                let written = file.write_all(&content).await;
                let closed = file.close().await;
                written
                    .and(closed)
                    .map_err(|e| GatewayError::remote_io(target.as_str(), &e))?;
                info!(path = %target, bytes = content.len(), "Wrote file content");
                Ok(())
            })
            .await;
        prepared.finish(result)
    }

    /// Stream `reader` into `<path>/<filename>`. Returns the bytes written.
    pub async fn upload_file<Rd>(
        &self,
        mount_id: MountId,
        path: &str,
        filename: &str,
        mut reader: Rd,
    ) -> OpOutcome<u64>
    where
        Rd: AsyncRead + Unpin,
    {
        let prepared = match self.prepare("upload_file", mount_id, &[path]) {
            Ok(p) => p,
            Err(r) => return r.into(),
        };
        if let Err(error) = validate_filename(filename) {
            return prepared.finish(Err(error));
        }
        let target = format!("{}{}", with_trailing_slash(&prepared.paths[0]), filename);
        let buffer_size = self.upload_buffer_size;

        let result = self
            .run(&prepared, |session| async move {
                let mut file = session
                    .create(&target)
                    .await
                    .map_err(|e| GatewayError::remote_io(target.as_str(), &e))?;
                let copied = copy_into(&mut reader, &mut file, buffer_size).await;
                let closed = file.close().await;
                let total = copied.and_then(|n| closed.map(|_| n)).map_err(|e| {
                    GatewayError::remote_io(target.as_str(), &e)
                })?;
                info!(path = %target, bytes = total, "Uploaded file");
                Ok(total)
            })
            .await;
        prepared.finish(result)
    }

    /// Remove files or directory trees.
    ///
    /// Tries a single `rm -rf` first. If that fails for any reason, falls back
    /// to removing each path through the transfer channel, stopping at the
    /// first failure; paths after it are left untouched.
    pub async fn remove_file<P: AsRef<str>>(&self, mount_id: MountId, paths: &[P]) -> OpOutcome<()> {
        let prepared = match self.prepare("remove_file", mount_id, paths) {
            Ok(p) => p,
            Err(r) => return r.into(),
        };
        if prepared.paths.is_empty() {
            let error = GatewayError::InvalidRequest("no paths to remove".to_string());
            return prepared.finish(Err(error));
        }
        let targets = prepared.paths.clone();

        let result = self
            .run(&prepared, |session| async move {
                let command = commands::remove(targets.as_slice());
                let diagnostic = match session.execute(&command).await {
                    Ok(output) if output.success() => {
                        info!(paths = ?targets, "Removed paths with rm");
                        return Ok(());
                    }
                    Ok(output) => output.output,
                    Err(e) => e.to_string(),
                };
                warn!(
                    command = %command,
                    output = %diagnostic.trim_end(),
                    "rm failed, falling back to per-path removal"
                );

                for target in &targets {
                    session
                        .remove_all(target)
                        .await
                        .map_err(|e| GatewayError::remote_io(target.as_str(), &e))?;
                    debug!(path = %target, "Removed path via transfer channel");
                }
                info!(paths = ?targets, "Removed paths via transfer channel");
                Ok(())
            })
            .await;
        prepared.finish(result)
    }

    /// Recursively copy `paths` into `to_path`.
    pub async fn copy<P: AsRef<str>>(
        &self,
        mount_id: MountId,
        to_path: &str,
        paths: &[P],
    ) -> OpOutcome<()> {
        self.transfer_with_command("copy", mount_id, to_path, paths, commands::copy::<String>)
            .await
    }

    /// Move `paths` into `to_path`.
    pub async fn move_files<P: AsRef<str>>(
        &self,
        mount_id: MountId,
        to_path: &str,
        paths: &[P],
    ) -> OpOutcome<()> {
        self.transfer_with_command("move", mount_id, to_path, paths, commands::mv::<String>)
            .await
    }

    async fn transfer_with_command<P: AsRef<str>>(
        &self,
        op: &'static str,
        mount_id: MountId,
        to_path: &str,
        paths: &[P],
        build: fn(&[String], &str) -> String,
    ) -> OpOutcome<()> {
        let mut candidates: Vec<&str> = paths.iter().map(|p| p.as_ref()).collect();
        candidates.push(to_path);

        let prepared = match self.prepare(op, mount_id, candidates.as_slice()) {
            Ok(p) => p,
            Err(r) => return r.into(),
        };
        if paths.is_empty() {
            return prepared.finish(Err(GatewayError::InvalidRequest(format!("no paths to {op}"))));
        }
        let (sources, destination) = prepared.paths.split_at(prepared.paths.len() - 1);
        let command = build(sources, &destination[0]);

        let result = self
            .run(&prepared, |session| async move {
                let output = session
                    .execute(&command)
                    .await
                    .map_err(|e| command_error(&command, &e))?;
                if !output.success() {
                    return Err(GatewayError::RemoteCommand {
                        command,
                        output: output.output,
                    });
                }
                info!(command = %command, "Transfer command completed");
                Ok(())
            })
            .await;
        prepared.finish(result)
    }

    /// Rename `old_name` to `new_name`. Only the destination is authorized.
    pub async fn rename(&self, mount_id: MountId, old_name: &str, new_name: &str) -> OpOutcome<()> {
        let prepared = match self.prepare("rename", mount_id, &[new_name]) {
            Ok(p) => p,
            Err(r) => return r.into(),
        };
        let from = old_name.to_string();
        let to = prepared.paths[0].clone();

        let result = self
            .run(&prepared, |session| async move {
                session.rename(&from, &to).await.map_err(|e| GatewayError::RemoteIo {
                    path: format!("{from} -> {to}"),
                    message: e.to_string(),
                })?;
                info!(from = %from, to = %to, "Renamed");
                Ok(())
            })
            .await;
        prepared.finish(result)
    }
}

fn command_error(command: &str, err: &io::Error) -> GatewayError {
    GatewayError::RemoteCommand {
        command: command.to_string(),
        output: err.to_string(),
    }
}

/// An upload filename must name a single entry inside the target directory.
fn validate_filename(filename: &str) -> Result<(), GatewayError> {
    if filename.is_empty() || filename == "." || filename == ".." || filename.contains('/') {
        return Err(GatewayError::InvalidRequest(format!(
            "invalid upload filename: {filename:?}"
        )));
    }
    Ok(())
}

async fn copy_into<Rd, F>(reader: &mut Rd, file: &mut F, buffer_size: usize) -> io::Result<u64>
where
    Rd: AsyncRead + Unpin,
    F: RemoteFile,
{
    let mut buf = vec![0u8; buffer_size];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }
        file.write_all(&buf[..n]).await?;
        total += n as u64;
    }
}
