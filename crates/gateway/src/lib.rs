//! # fsgate Gateway Library
//!
//! Remote file operations on managed machines, confined to configured mounts.
//!
//! ## Overview
//!
//! A *file mount* names a root path on a machine. Callers address operations
//! by mount id; the gateway:
//!
//! - **Authorizes** every path against the mount root
//! - **Resolves** the mount's machine to a connected session
//! - **Executes** the operation over shell commands or SFTP, falling back from
//!   one to the other where that is safe (`rm -rf` first, per-path SFTP
//!   removal when it fails)
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      FileGateway                          │
//! │  list · du · stat · mkdir · create · read · write ·       │
//! │  upload · remove · copy · move · rename                   │
//! ├──────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌─────────────────┐  ┌─────────────┐  │
//! │  │  Path Guard  │  │ ChannelResolver │  │ MountStore  │  │
//! │  └──────────────┘  └─────────────────┘  └─────────────┘  │
//! ├──────────────────────────────────────────────────────────┤
//! │       MachineResolver  →  RemoteSession (exec + SFTP)     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gateway::{Config, FileGateway, JsonMountStore, SshMachineRegistry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     let store = Arc::new(JsonMountStore::open(config.gateway.mount_store_path())?);
//!     let machines = Arc::new(SshMachineRegistry::new(config.machines.clone()));
//!     let gateway = FileGateway::from_config(&config, store, machines);
//!
//!     let outcome = gateway.list_directory(1, "/srv/app").await;
//!     for entry in outcome.into_result()? {
//!         println!("{}", entry.name);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`mounts`]: Mount record store
//! - [`remote`]: Remote session capabilities and the SSH implementation
//! - [`files`]: Path guard, channel resolver and the operation executor

pub mod config;
pub mod files;
pub mod mounts;
pub mod remote;

// Re-export protocol for convenience
pub use protocol;

pub use config::Config;

pub use files::{BoundChannel, ChannelResolver, FileGateway, FileOf, OpOutcome};

pub use mounts::{JsonMountStore, MountService, MountStore};

pub use remote::{
    CommandOutput, MachineResolver, RemoteFile, RemoteSession, SshFile, SshMachineRegistry,
    SshSession,
};
