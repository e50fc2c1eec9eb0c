//! Remote channel resolution: mount id -> mount record -> connected machine.

use std::sync::Arc;

use protocol::{FileMount, GatewayError, MachineId, MachineInfo, MountId};

use crate::mounts::MountStore;
use crate::remote::MachineResolver;

/// A mount together with a connected session to its machine.
pub struct BoundChannel<T> {
    pub mount: FileMount,
    pub machine: MachineInfo,
    pub session: T,
}

/// Resolves mount ids to machine sessions.
///
/// Holds no per-request state; every call looks the mount up again and asks
/// the machine resolver for a fresh session.
pub struct ChannelResolver<S: MountStore, R: MachineResolver> {
    store: Arc<S>,
    machines: Arc<R>,
}

impl<S: MountStore, R: MachineResolver> ChannelResolver<S, R> {
    pub fn new(store: Arc<S>, machines: Arc<R>) -> Self {
        Self { store, machines }
    }

    /// Fetch the mount record.
    pub fn lookup(&self, mount_id: MountId) -> Result<FileMount, GatewayError> {
        if mount_id == 0 {
            return Err(GatewayError::InvalidRequest(
                "file mount id must not be empty".to_string(),
            ));
        }
        self.store
            .get_by_id(mount_id)
            .map_err(|e| GatewayError::Storage(format!("{e:#}")))?
            .ok_or(GatewayError::RecordNotFound(mount_id))
    }

    /// Descriptor of the mount's machine, if the registry knows it.
    pub fn describe(&self, mount: &FileMount) -> Option<MachineInfo> {
        self.machines.describe(mount.machine_id)
    }

    /// Open a session to a machine.
    pub async fn connect(&self, machine_id: MachineId) -> Result<R::Session, GatewayError> {
        self.machines.connect(machine_id).await
    }

    /// Look up a mount and connect to its machine.
    pub async fn resolve(&self, mount_id: MountId) -> Result<BoundChannel<R::Session>, GatewayError> {
        let mount = self.lookup(mount_id)?;
        let machine = self.describe(&mount).ok_or_else(|| {
            GatewayError::Connection(format!("unknown machine {}", mount.machine_id))
        })?;
        let session = self.connect(mount.machine_id).await?;
        Ok(BoundChannel {
            mount,
            machine,
            session,
        })
    }
}
