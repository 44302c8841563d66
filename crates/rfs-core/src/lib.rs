//! rfs Core - Wire protocol, storage primitives and configuration
//!
//! This crate contains everything the rfs server and client agree on:
//! line framing, command parsing, the permission sidecar format, path
//! resolution under the storage root and the at-rest payload obfuscation.
//! It has no dependencies on listening sockets or task scheduling.

pub mod config;
pub mod error;
pub mod line;
pub mod obfuscate;
pub mod path;
pub mod permission;
pub mod protocol;

pub use config::{ClientConfig, Config, ConfigError, LockScope, ServerConfig};
pub use error::*;
pub use line::recv_line;
pub use obfuscate::Obfuscator;
pub use path::PathResolver;
pub use permission::{Permission, PermissionStore};
pub use protocol::*;

/// Default TCP port for the server
pub const DEFAULT_PORT: u16 = 2024;

/// Default storage root directory (relative to the server's working directory)
pub const DEFAULT_ROOT: &str = "server_root";

/// Largest slice of payload moved per read/write (1 KB)
pub const TRANSFER_UNIT: usize = 1024;

/// Buffer capacity for command and status lines
pub const MAX_LINE_LEN: usize = 1024;

/// Buffer capacity for size lines
pub const MAX_SIZE_LINE_LEN: usize = 64;

/// Suffix appended to a stored file's path to name its permission sidecar
pub const META_SUFFIX: &str = ".meta";

/// Default obfuscation key
pub const DEFAULT_OBFUSCATION_KEY: u8 = 0xAA;

/// Maximum path length in bytes (confined mode)
pub const MAX_PATH_LEN: usize = 4096;

/// Maximum filename length in bytes (confined mode)
pub const MAX_FILENAME_LEN: usize = 255;
