//! Machine registry backed by the configured machine list.

use dashmap::DashMap;
use protocol::{GatewayError, MachineId, MachineInfo};

use super::ssh::SshSession;
use super::MachineResolver;
use crate::config::MachineConfig;

/// Registry of SSH-reachable machines.
///
/// Every `connect` opens a fresh session; the gateway never shares one
/// between operations.
pub struct SshMachineRegistry {
    machines: DashMap<MachineId, MachineConfig>,
}

impl SshMachineRegistry {
    /// Build a registry from configured machines.
    pub fn new(machines: impl IntoIterator<Item = MachineConfig>) -> Self {
        let registry = Self {
            machines: DashMap::new(),
        };
        for machine in machines {
            registry.insert(machine);
        }
        registry
    }

    /// Add or replace a machine.
    pub fn insert(&self, machine: MachineConfig) {
        tracing::debug!(machine_id = machine.id, name = %machine.name, "Registering machine");
        self.machines.insert(machine.id, machine);
    }

    /// Remove a machine, returning its configuration.
    pub fn remove(&self, machine_id: MachineId) -> Option<MachineConfig> {
        self.machines.remove(&machine_id).map(|(_, m)| m)
    }

    /// Descriptors of every registered machine, ordered by id.
    pub fn list(&self) -> Vec<MachineInfo> {
        let mut infos: Vec<MachineInfo> = self.machines.iter().map(|e| e.value().info()).collect();
        infos.sort_by_key(|m| m.id);
        infos
    }

    /// Whether a machine id is registered.
    pub fn contains(&self, machine_id: MachineId) -> bool {
        self.machines.contains_key(&machine_id)
    }
}

impl MachineResolver for SshMachineRegistry {
    type Session = SshSession;

    fn describe(&self, machine_id: MachineId) -> Option<MachineInfo> {
        self.machines.get(&machine_id).map(|m| m.info())
    }

    async fn connect(&self, machine_id: MachineId) -> Result<SshSession, GatewayError> {
        let machine = self
            .machines
            .get(&machine_id)
            .map(|m| m.value().clone())
            .ok_or_else(|| GatewayError::Connection(format!("unknown machine {machine_id}")))?;

        tokio::task::spawn_blocking(move || SshSession::connect(&machine))
            .await
            .map_err(|e| GatewayError::Connection(format!("SSH connect task failed: {e}")))?
    }
}
