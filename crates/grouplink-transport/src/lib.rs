//! Local IPC transport for grouplink.
//!
//! Provides the byte-stream layer everything else builds on:
//! - Unix domain socket listen/accept/connect with hardened socket files
//! - Peer credential lookup on connected streams
//! - Namespace addressing: `(namespace, connection id)` → socket path
//!
//! This is the lowest layer of grouplink. Higher layers only see the
//! [`IpcStream`] type provided here. Unix only.

pub mod error;
pub mod namespace;
pub mod stream;
pub mod uds;

pub use error::{Result, TransportError};
pub use namespace::{resolve_runtime_dir, socket_path, validate_namespace, RUNTIME_DIR_ENV};
pub use stream::{IpcStream, PeerCredentials};

pub use namespace::ensure_parent_dir;
pub use uds::UnixDomainSocket;
