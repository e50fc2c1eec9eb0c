//! Directory listing entries and machine descriptors.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::mount::MachineId;

/// Type of a directory entry.
///
/// Variant order is the listing order: directories, then files, then anything
/// else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    /// Directory.
    Directory,
    /// Regular file.
    File,
    /// Symlink, device, socket, ...
    Other,
}

impl EntryType {
    /// Classify a unix `st_mode` value.
    pub fn from_mode(mode: u32) -> Self {
        match mode & 0o170000 {
            0o040000 => EntryType::Directory,
            0o100000 => EntryType::File,
            _ => EntryType::Other,
        }
    }
}

/// A single entry in a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Full remote path.
    pub path: String,
    /// Size in bytes as reported by the remote.
    pub size: u64,
    /// Entry type.
    pub entry_type: EntryType,
    /// Unix permission bits, when the remote reports them.
    pub mode: Option<u32>,
    /// Last modified timestamp (Unix epoch seconds).
    pub modified: Option<u64>,
}

impl DirectoryEntry {
    /// Listing order: directories before files, then ascending by name.
    pub fn listing_order(&self, other: &Self) -> Ordering {
        self.entry_type
            .cmp(&other.entry_type)
            .then_with(|| self.name.cmp(&other.name))
    }
}

/// Sort entries into listing order in place.
pub fn sort_entries(entries: &mut [DirectoryEntry]) {
    entries.sort_by(DirectoryEntry::listing_order);
}

/// Descriptor of the machine an operation ran against, kept for audit logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineInfo {
    pub id: MachineId,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
}

impl std::fmt::Display for MachineInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}@{}:{})",
            self.name, self.username, self.host, self.port
        )
    }
}
