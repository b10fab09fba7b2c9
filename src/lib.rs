//! # ringwarden
//!
//! Self-healing maintenance for the nodes of a replicated object-storage ring:
//! - A fleet registry of node liveness, disk health and service mode
//! - A repair backlog with at most one task per node
//! - Disk fingerprints that let a node remount its disks in the right slots
//! - Gossip of ring and cluster metadata between peers
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!  heartbeats ──HTTP──▶ ┌──────────────────────────┐
//!                       │  ringwarden-registry     │
//!                       │  NodeRegistry (RocksDB)  │
//!                       └───────┬──────────┬───────┘
//!                               │          │
//!                 ┌─────────────▼──┐   ┌───▼────────────────┐
//!                 │ switcher       │   │ agent              │
//!                 │ service⇄waiting│   │ MaintenanceBacklog │
//!                 └────────────────┘   └────────────────────┘
//!
//!  every storage node:
//!  ┌──────────────────────────────┐   push + update-metadata
//!  │ ringwarden-sync              │ ─────────────────────────▶ random peer
//!  │  fingerprints on /srv/node/* │
//!  └──────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Run the fleet services
//! ```bash
//! ringwarden-registry --config /etc/ringwarden/ringwarden.toml
//! ringwarden-switcher
//! ringwarden-agent
//! ```
//!
//! ### Run on every storage node
//! ```bash
//! ringwarden devices reconcile     # at boot
//! ringwarden-sync                  # metadata gossip + disk fencing
//! ```
//!
//! ### Operator commands
//! ```bash
//! ringwarden node add storage-07
//! ringwarden backlog list --target disk_broken
//! ringwarden devices init --count 12 --version 1
//! ringwarden update-metadata /tmp/ringwarden-sync/10.0.0.4
//! ```

pub mod common;
pub mod devices;
pub mod maintenance;
pub mod ops;
pub mod registry;
pub mod sync;

// Re-export commonly used types
pub use common::{Config, Error, Result};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
