//! # fsgate Protocol Library
//!
//! Shared data model for the fsgate file-operations gateway.
//!
//! ## Overview
//!
//! - **Mount records**: [`FileMount`] and the filter/paging types used to
//!   query them
//! - **Listings**: [`DirectoryEntry`] with the directories-first ordering
//!   callers expect
//! - **Machine descriptors**: [`MachineInfo`], returned with every operation
//!   result for audit attribution
//! - **Errors**: the [`GatewayError`] taxonomy
//!
//! ## Modules
//!
//! - [`mount`]: Mount records, filters and pages
//! - [`entry`]: Directory entries and machine descriptors
//! - [`error`]: Error types

pub mod entry;
pub mod error;
pub mod mount;

pub use entry::{sort_entries, DirectoryEntry, EntryType, MachineInfo};
pub use error::{ErrorCode, GatewayError, Result};
pub use mount::{
    FileMount, MachineId, MountField, MountFilter, MountId, MountKind, NewMount, Page, PageParam,
    DEFAULT_PAGE_SIZE,
};
