//! rfs Daemon - remote file store server and client
//!
//! This crate provides:
//! - The host server: accept loop, request dispatch and the WRITE/GET/RM
//!   handlers operating on the storage root
//! - A lock manager serializing operations per file (or globally)
//! - A pluggable connection spawner (unbounded or bounded)
//! - The client side of the protocol
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   one task per connection   ┌───────────────────────┐
//! │  TcpListener │ ──────────────────────────▶ │  handle_connection    │
//! │  (RfsHost)   │     ConnectionSpawner       │  recv_line + dispatch │
//! └──────────────┘                             └───────────┬───────────┘
//!                                                          │ LockManager guard
//!                                                          ▼
//!                                              ┌───────────────────────┐
//!                                              │  StorageEngine        │
//!                                              │  resolve, permission, │
//!                                              │  obfuscate, stream    │
//!                                              └───────────────────────┘
//! ```

pub mod client;
pub mod host;
pub mod lock_manager;
pub mod spawner;

pub use client::{ClientError, GetOutcome, RfsClient};
pub use host::{handle_connection, HostConfig, HostError, RfsHost, StorageEngine};
pub use lock_manager::{FileGuard, LockManager};
pub use spawner::{spawner_for, BoundedSpawner, ConnectionSpawner, UnboundedSpawner};
