//! SSH-backed remote session.
//!
//! Commands run over an exec channel with stderr merged into stdout; file
//! operations go through the SFTP subsystem. `ssh2` is blocking, so every call
//! is moved onto tokio's blocking pool.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use base64::Engine;
use protocol::{DirectoryEntry, EntryType, GatewayError};
use ssh2::{ExtendedData, FileStat, HashType, OpenFlags, OpenType, Session, Sftp};

use super::{CommandOutput, RemoteFile, RemoteSession};
use crate::config::MachineConfig;

/// Permission bits for files created through the gateway.
const FILE_MODE: i32 = 0o644;

/// Permission bits for directories created through the gateway.
const DIR_MODE: i32 = 0o755;

/// A connected SSH session with an open SFTP channel.
pub struct SshSession {
    session: Session,
    sftp: Arc<Mutex<Sftp>>,
    /// Second handle on the session's socket. Shutting it down makes blocking
    /// libssh2 calls fail without taking the session lock they hold.
    socket: TcpStream,
}

impl SshSession {
    /// Connect and authenticate. Blocking; call from the blocking pool.
    pub fn connect(machine: &MachineConfig) -> Result<Self, GatewayError> {
        let addr = (machine.host.as_str(), machine.port)
            .to_socket_addrs()
            .map_err(|e| connection_error(machine, e))?
            .next()
            .ok_or_else(|| {
                GatewayError::Connection(format!("{}: host did not resolve", machine.host))
            })?;

        let timeout = machine.connect_timeout();
        let tcp = TcpStream::connect_timeout(&addr, timeout)
            .map_err(|e| connection_error(machine, e))?;
        tcp.set_read_timeout(Some(timeout)).ok();
        tcp.set_write_timeout(Some(timeout)).ok();
        let socket = tcp.try_clone().map_err(|e| connection_error(machine, e))?;

        let mut session = Session::new().map_err(|e| connection_error(machine, e))?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| connection_error(machine, e))?;

        if let Some(expected) = machine.host_key_fingerprint.as_deref() {
            let observed = host_key_fingerprint(&session);
            if observed.as_deref() != Some(expected) {
                return Err(GatewayError::Connection(format!(
                    "{}: host key mismatch (expected {}, got {})",
                    machine.host,
                    expected,
                    observed.unwrap_or_else(|| "unknown".to_string())
                )));
            }
        }

        if let Some(key) = machine.private_key_path.as_deref() {
            session
                .userauth_pubkey_file(&machine.username, None, key, machine.passphrase.as_deref())
                .map_err(|e| connection_error(machine, e))?;
        } else if let Some(password) = machine.password.as_deref() {
            session
                .userauth_password(&machine.username, password)
                .map_err(|e| connection_error(machine, e))?;
        }

        if !session.authenticated() {
            return Err(GatewayError::Connection(format!(
                "{}: authentication failed for {}",
                machine.host, machine.username
            )));
        }

        let sftp = session.sftp().map_err(|e| connection_error(machine, e))?;
        tracing::debug!(machine = %machine.name, host = %machine.host, "SSH session established");

        Ok(Self {
            session,
            sftp: Arc::new(Mutex::new(sftp)),
            socket,
        })
    }

    /// Run `f` against the SFTP channel on the blocking pool.
    async fn with_sftp<T, F>(&self, f: F) -> io::Result<T>
    where
        F: FnOnce(&Sftp) -> Result<T, ssh2::Error> + Send + 'static,
        T: Send + 'static,
    {
        let sftp = Arc::clone(&self.sftp);
        blocking(move || {
            let guard = sftp
                .lock()
                .map_err(|_| io::Error::other("SFTP channel lock poisoned"))?;
            f(&guard).map_err(io::Error::from)
        })
        .await
    }

    async fn open_with(&self, path: &str, flags: OpenFlags) -> io::Result<SshFile> {
        let path = PathBuf::from(path);
        let file = self
            .with_sftp(move |sftp| sftp.open_mode(&path, flags, FILE_MODE, OpenType::File))
            .await?;
        Ok(SshFile { inner: Some(file) })
    }
}

impl RemoteSession for SshSession {
    type File = SshFile;

    async fn execute(&self, command: &str) -> io::Result<CommandOutput> {
        let session = self.session.clone();
        let command = command.to_string();
        blocking(move || {
            let mut channel = session.channel_session()?;
            channel.handle_extended_data(ExtendedData::Merge)?;
            channel.exec(&command)?;

            let mut raw = Vec::new();
            channel.read_to_end(&mut raw)?;
            channel.wait_close()?;
            let exit_status = channel.exit_status()?;

            Ok(CommandOutput::new(
                String::from_utf8_lossy(&raw).into_owned(),
                exit_status,
            ))
        })
        .await
    }

    async fn read_dir(&self, path: &str) -> io::Result<Vec<DirectoryEntry>> {
        let dir = PathBuf::from(path);
        let listing = self.with_sftp(move |sftp| sftp.readdir(&dir)).await?;
        Ok(listing
            .into_iter()
            .filter_map(|(path, stat)| to_entry(&path, &stat))
            .collect())
    }

    async fn open(&self, path: &str) -> io::Result<SshFile> {
        self.open_with(path, OpenFlags::READ).await
    }

    async fn create(&self, path: &str) -> io::Result<SshFile> {
        self.open_with(path, OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE)
            .await
    }

    async fn open_read_write(&self, path: &str) -> io::Result<SshFile> {
        self.open_with(
            path,
            OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
        )
        .await
    }

    async fn mkdir_all(&self, path: &str) -> io::Result<()> {
        let path = PathBuf::from(path);
        self.with_sftp(move |sftp| mkdir_all(sftp, &path)).await
    }

    async fn remove_all(&self, path: &str) -> io::Result<()> {
        let path = PathBuf::from(path);
        self.with_sftp(move |sftp| remove_tree(sftp, &path)).await
    }

    async fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        let from = PathBuf::from(from);
        let to = PathBuf::from(to);
        self.with_sftp(move |sftp| sftp.rename(&from, &to, None))
            .await
    }

    fn interrupt(&self) {
        if let Err(e) = self.socket.shutdown(Shutdown::Both) {
            tracing::debug!(error = %e, "SSH socket already closed");
        }
    }
}

/// An open SFTP file.
///
/// The inner handle moves onto the blocking pool for each call and comes back
/// afterwards; it is `None` only while a call is in flight or after close.
pub struct SshFile {
    inner: Option<ssh2::File>,
}

impl SshFile {
    fn take(&mut self) -> io::Result<ssh2::File> {
        self.inner
            .take()
            .ok_or_else(|| io::Error::other("remote file handle already closed"))
    }
}

impl RemoteFile for SshFile {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut file = self.take()?;
        let len = buf.len();
        let (file, result) = tokio::task::spawn_blocking(move || {
            let mut chunk = vec![0u8; len];
            let result = file.read(&mut chunk).map(|n| {
                chunk.truncate(n);
                chunk
            });
            (file, result)
        })
        .await
        .map_err(join_error)?;
        self.inner = Some(file);

        let chunk = result?;
        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let mut file = self.take()?;
        let data = bytes::Bytes::copy_from_slice(buf);
        let (file, result) = tokio::task::spawn_blocking(move || {
            let result = file.write_all(&data);
            (file, result)
        })
        .await
        .map_err(join_error)?;
        self.inner = Some(file);
        result
    }

    async fn close(mut self) -> io::Result<()> {
        let mut file = self.take()?;
        blocking(move || {
            file.flush()?;
            file.close().map_err(io::Error::from)
        })
        .await
    }
}

async fn blocking<T, F>(f: F) -> io::Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(join_error)?
}

impl Drop for SshFile {
    fn drop(&mut self) {
        // ssh2 closes the remote handle on drop, which is a blocking round trip
        let Some(file) = self.inner.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || drop(file));
            }
            Err(_) => drop(file),
        }
    }
}

fn join_error(err: tokio::task::JoinError) -> io::Error {
    io::Error::other(format!("SSH task failed: {err}"))
}

fn connection_error(machine: &MachineConfig, err: impl std::fmt::Display) -> GatewayError {
    GatewayError::Connection(format!("{}:{}: {}", machine.host, machine.port, err))
}

/// OpenSSH-style `SHA256:<base64>` fingerprint of the server host key.
fn host_key_fingerprint(session: &Session) -> Option<String> {
    session.host_key_hash(HashType::Sha256).map(|hash| {
        format!(
            "SHA256:{}",
            base64::engine::general_purpose::STANDARD_NO_PAD.encode(hash)
        )
    })
}

fn to_entry(path: &Path, stat: &FileStat) -> Option<DirectoryEntry> {
    let name = path.file_name()?.to_string_lossy().into_owned();
    if name == "." || name == ".." {
        return None;
    }
    Some(DirectoryEntry {
        name,
        path: path.to_string_lossy().into_owned(),
        size: stat.size.unwrap_or(0),
        entry_type: stat
            .perm
            .map(EntryType::from_mode)
            .unwrap_or(EntryType::Other),
        mode: stat.perm.map(|p| p & 0o7777),
        modified: stat.mtime,
    })
}

fn mkdir_all(sftp: &Sftp, path: &Path) -> Result<(), ssh2::Error> {
    let mut current = PathBuf::new();
    for part in path.components() {
        current.push(part);
        if current.parent().is_none() {
            // filesystem root
            continue;
        }
        match sftp.stat(&current) {
            Ok(stat) if stat.is_dir() => continue,
            _ => {
                if let Err(err) = sftp.mkdir(&current, DIR_MODE) {
                    // lost a race with a concurrent mkdir
                    let exists = sftp.stat(&current).map(|s| s.is_dir()).unwrap_or(false);
                    if !exists {
                        return Err(err);
                    }
                }
            }
        }
    }
    Ok(())
}

fn remove_tree(sftp: &Sftp, path: &Path) -> Result<(), ssh2::Error> {
    let stat = sftp.lstat(path)?;
    if stat.is_dir() {
        for (child, _) in sftp.readdir(path)? {
            let is_self_or_parent = child
                .file_name()
                .map(|n| n == "." || n == "..")
                .unwrap_or(true);
            if !is_self_or_parent {
                remove_tree(sftp, &child)?;
            }
        }
        sftp.rmdir(path)
    } else {
        sftp.unlink(path)
    }
}
