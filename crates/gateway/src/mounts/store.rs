//! Persistent file mount storage.
//!
//! [`MountStore`] is the record-store contract the gateway depends on.
//! [`JsonMountStore`] implements it with a `RwLock<BTreeMap>` persisted to a
//! JSON file, written atomically after every mutation.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{Context, Result};
use protocol::{FileMount, MountFilter, MountId, NewMount, Page, PageParam};
use serde::{Deserialize, Serialize};

/// CRUD contract for file mount records.
pub trait MountStore: Send + Sync {
    /// Query a page of mounts matching `filter`, ordered by id.
    fn page_list(&self, filter: &MountFilter, page: &PageParam) -> Result<Page<FileMount>>;

    /// Fetch a mount by id.
    fn get_by_id(&self, id: MountId) -> Result<Option<FileMount>>;

    /// Insert a new mount and return it with its assigned id.
    fn create(&self, mount: NewMount) -> Result<FileMount>;

    /// Update an existing mount. Returns the updated record, or `None` if the
    /// id is unknown.
    fn update_by_id(&self, id: MountId, update: NewMount) -> Result<Option<FileMount>>;

    /// Delete a mount, returning the removed record if it existed.
    fn delete_by_id(&self, id: MountId) -> Result<Option<FileMount>>;
}

/// On-disk layout of the mount store.
#[derive(Debug, Serialize, Deserialize)]
struct MountStoreData {
    /// Version of the store format.
    version: u32,
    /// Next id to hand out.
    next_id: MountId,
    mounts: Vec<FileMount>,
}

impl Default for MountStoreData {
    fn default() -> Self {
        Self {
            version: 1,
            next_id: 1,
            mounts: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    next_id: MountId,
    mounts: BTreeMap<MountId, FileMount>,
}

/// Thread-safe JSON-backed mount store.
pub struct JsonMountStore {
    path: PathBuf,
    inner: RwLock<Inner>,
}

impl JsonMountStore {
    /// Open the store at `path`, loading existing records if the file exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
            inner: RwLock::new(Inner {
                next_id: 1,
                mounts: BTreeMap::new(),
            }),
        };
        store.load()?;
        Ok(store)
    }

    /// Returns the path to the store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<()> {
        if !self.path.exists() {
            tracing::debug!("Mount store not found at {:?}, starting empty", self.path);
            return Ok(());
        }

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read mount store: {}", self.path.display()))?;
        let data: MountStoreData = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse mount store: {}", self.path.display()))?;

        let mut inner = self
            .inner
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on mount store"))?;

        inner.mounts = data.mounts.into_iter().map(|m| (m.id, m)).collect();
        let max_id = inner.mounts.keys().next_back().copied().unwrap_or(0);
        inner.next_id = data.next_id.max(max_id + 1);

        tracing::info!("Loaded {} file mounts from {:?}", inner.mounts.len(), self.path);
        Ok(())
    }

    /// Write the current state atomically (temp file, then rename).
    fn persist(&self, inner: &Inner) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create mount store directory: {}", parent.display())
            })?;
        }

        let data = MountStoreData {
            version: 1,
            next_id: inner.next_id,
            mounts: inner.mounts.values().cloned().collect(),
        };
        let contents =
            serde_json::to_string_pretty(&data).context("Failed to serialize mount store")?;

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &contents).with_context(|| {
            format!("Failed to write temp mount store: {}", temp_path.display())
        })?;
        fs::rename(&temp_path, &self.path).with_context(|| {
            format!(
                "Failed to rename temp mount store {} to {}",
                temp_path.display(),
                self.path.display()
            )
        })?;

        tracing::debug!("Saved {} file mounts to {:?}", inner.mounts.len(), self.path);
        Ok(())
    }
}

impl MountStore for JsonMountStore {
    fn page_list(&self, filter: &MountFilter, page: &PageParam) -> Result<Page<FileMount>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire read lock on mount store"))?;

        let matching: Vec<FileMount> = inner
            .mounts
            .values()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect();
        Ok(Page::from_sorted(matching, page))
    }

    fn get_by_id(&self, id: MountId) -> Result<Option<FileMount>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire read lock on mount store"))?;
        Ok(inner.mounts.get(&id).cloned())
    }

    fn create(&self, mount: NewMount) -> Result<FileMount> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on mount store"))?;

        let id = inner.next_id;
        let record = FileMount::from_new(id, mount);
        inner.next_id += 1;
        inner.mounts.insert(id, record.clone());

        if let Err(e) = self.persist(&inner) {
            inner.mounts.remove(&id);
            inner.next_id -= 1;
            return Err(e);
        }

        tracing::info!(mount_id = id, name = %record.name, path = %record.path, "Created file mount");
        Ok(record)
    }

    fn update_by_id(&self, id: MountId, update: NewMount) -> Result<Option<FileMount>> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on mount store"))?;

        let Some(existing) = inner.mounts.get_mut(&id) else {
            return Ok(None);
        };
        let previous = existing.clone();
        existing.apply_update(update);
        let updated = existing.clone();

        if let Err(e) = self.persist(&inner) {
            inner.mounts.insert(id, previous);
            return Err(e);
        }

        tracing::info!(mount_id = id, path = %updated.path, "Updated file mount");
        Ok(Some(updated))
    }

    fn delete_by_id(&self, id: MountId) -> Result<Option<FileMount>> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on mount store"))?;

        let Some(removed) = inner.mounts.remove(&id) else {
            return Ok(None);
        };

        if let Err(e) = self.persist(&inner) {
            inner.mounts.insert(id, removed);
            return Err(e);
        }

        tracing::info!(mount_id = id, name = %removed.name, "Deleted file mount");
        Ok(Some(removed))
    }
}
