//! Remote machine capabilities.
//!
//! A [`RemoteSession`] is the per-call handle to one machine: it can run a
//! shell command and perform file-transfer operations. A [`MachineResolver`]
//! turns a machine id into a connected session. The gateway only ever talks to
//! these traits; [`ssh`] provides the production implementation.

use std::io;

use protocol::{DirectoryEntry, GatewayError, MachineId, MachineInfo};

pub mod registry;
pub mod ssh;

pub use registry::SshMachineRegistry;
pub use ssh::{SshFile, SshSession};

/// Result of running a shell command remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Combined stdout and stderr, in the order the remote produced them.
    pub output: String,
    /// Exit status reported by the remote shell.
    pub exit_status: i32,
}

impl CommandOutput {
    /// Create an output record.
    pub fn new(output: impl Into<String>, exit_status: i32) -> Self {
        Self {
            output: output.into(),
            exit_status,
        }
    }

    /// Whether the command exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// An open remote file.
///
/// Handles must be released with [`RemoteFile::close`]; dropping one without
/// closing still releases the remote descriptor, but close errors are lost.
#[allow(async_fn_in_trait)]
pub trait RemoteFile: Send {
    /// Read up to `buf.len()` bytes. Returns 0 at end of file.
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write the whole buffer.
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Flush and release the handle.
    async fn close(self) -> io::Result<()>;

    /// Read the remainder of the file.
    async fn read_to_end(&mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; 32 * 1024];
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        Ok(out)
    }
}

/// Command execution plus file-transfer operations against one machine.
///
/// Transport and remote failures are reported as [`io::Error`]s; the gateway
/// attaches the path and maps them into its own taxonomy.
#[allow(async_fn_in_trait)]
pub trait RemoteSession: Send + Sync {
    /// File handle type produced by this session.
    type File: RemoteFile;

    /// Run a shell command. A non-zero exit is not an `Err`; only failures to
    /// run the command at all are.
    async fn execute(&self, command: &str) -> io::Result<CommandOutput>;

    /// List a directory.
    async fn read_dir(&self, path: &str) -> io::Result<Vec<DirectoryEntry>>;

    /// Open an existing file for reading.
    async fn open(&self, path: &str) -> io::Result<Self::File>;

    /// Create (or truncate) a file for writing.
    async fn create(&self, path: &str) -> io::Result<Self::File>;

    /// Open for read-write, creating or truncating as needed.
    async fn open_read_write(&self, path: &str) -> io::Result<Self::File>;

    /// Create a directory and any missing ancestors.
    async fn mkdir_all(&self, path: &str) -> io::Result<()>;

    /// Remove a file or directory tree.
    async fn remove_all(&self, path: &str) -> io::Result<()>;

    /// Rename `from` to `to`.
    async fn rename(&self, from: &str, to: &str) -> io::Result<()>;

    /// Abort the session: calls in flight and any later calls fail promptly.
    ///
    /// Called when an operation's deadline or cancellation fires while
    /// remote work may still be running.
    fn interrupt(&self) {}
}

/// Machine registry: describes machines and hands out connected sessions.
#[allow(async_fn_in_trait)]
pub trait MachineResolver: Send + Sync {
    /// Session type produced by this resolver.
    type Session: RemoteSession;

    /// Descriptor of a known machine, without connecting.
    fn describe(&self, machine_id: MachineId) -> Option<MachineInfo>;

    /// Connect to a machine. Failures are [`GatewayError::Connection`].
    async fn connect(&self, machine_id: MachineId) -> Result<Self::Session, GatewayError>;
}
