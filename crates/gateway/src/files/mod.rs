//! Mount-confined file operations.
//!
//! This module provides:
//! - Path authorization against a mount's root ([`guard`])
//! - Resolution of a mount id to a connected machine session ([`resolver`])
//! - Command lines and `du` output parsing ([`commands`])
//! - The operation executor itself ([`gateway`])
//!
//! # Security
//!
//! Every path an operation touches is normalised and checked against the
//! mount root before any connection is made. Paths placed on a remote command
//! line are shell-quoted.

pub mod commands;
pub mod gateway;
pub mod guard;
pub mod resolver;

pub use gateway::{FileGateway, FileOf, OpOutcome, DEFAULT_UPLOAD_BUFFER_SIZE};
pub use guard::authorize;
pub use resolver::{BoundChannel, ChannelResolver};
