//! File mount records.
//!
//! The store is plain CRUD; [`MountService`] adds the checks that need to know
//! about machines (a mount may only be saved against a registered machine).

pub mod store;

use std::sync::Arc;

use anyhow::Result;
use protocol::{FileMount, MountFilter, MountId, NewMount, Page, PageParam};

use crate::remote::MachineResolver;
pub use store::{JsonMountStore, MountStore};

/// Mount record operations exposed to callers.
pub struct MountService<S: MountStore, R: MachineResolver> {
    store: Arc<S>,
    machines: Arc<R>,
}

impl<S: MountStore, R: MachineResolver> MountService<S, R> {
    pub fn new(store: Arc<S>, machines: Arc<R>) -> Self {
        Self { store, machines }
    }

    /// Paged query.
    pub fn page_list(&self, filter: &MountFilter, page: &PageParam) -> Result<Page<FileMount>> {
        self.store.page_list(filter, page)
    }

    /// Fetch a single mount.
    pub fn get(&self, id: MountId) -> Result<Option<FileMount>> {
        self.store.get_by_id(id)
    }

    /// Create (`id == None`) or update a mount.
    ///
    /// The owning machine must exist and the root path must be non-empty.
    pub fn save(&self, id: Option<MountId>, mount: NewMount) -> Result<FileMount> {
        if self.machines.describe(mount.machine_id).is_none() {
            anyhow::bail!("machine {} does not exist", mount.machine_id);
        }
        if mount.path.trim().is_empty() {
            anyhow::bail!("mount path must not be empty");
        }

        match id {
            Some(id) => self
                .store
                .update_by_id(id, mount)?
                .ok_or_else(|| anyhow::anyhow!("file mount {} not found", id)),
            None => self.store.create(mount),
        }
    }

    /// Delete a mount.
    pub fn delete(&self, id: MountId) -> Result<Option<FileMount>> {
        self.store.delete_by_id(id)
    }
}
