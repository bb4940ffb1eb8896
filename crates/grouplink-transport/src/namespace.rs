//! Namespace addressing.
//!
//! Processes that share a namespace (an application-group style identifier)
//! rendezvous on a socket file derived from the namespace and a small
//! connection identifier:
//!
//! ```text
//! <runtime_dir>/<namespace>/<connection_id>.sock
//! ```

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, TransportError};

/// Environment variable overriding the runtime directory.
pub const RUNTIME_DIR_ENV: &str = "GROUPLINK_RUNTIME_DIR";

const MAX_NAMESPACE_LEN: usize = 64;

/// Check that `namespace` is usable as a single path component.
pub fn validate_namespace(namespace: &str) -> Result<()> {
    let invalid = |reason| {
        Err(TransportError::InvalidNamespace {
            namespace: namespace.to_string(),
            reason,
        })
    };

    if namespace.is_empty() {
        return invalid("must not be empty");
    }
    if namespace.len() > MAX_NAMESPACE_LEN {
        return invalid("longer than 64 bytes");
    }
    if namespace == "." || namespace == ".." {
        return invalid("reserved path component");
    }
    if !namespace
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
    {
        return invalid("only [A-Za-z0-9._-] are allowed");
    }
    Ok(())
}

/// Resolve the base directory that holds namespace directories.
///
/// Order: `GROUPLINK_RUNTIME_DIR`, `XDG_RUNTIME_DIR`, system temp dir.
pub fn resolve_runtime_dir() -> PathBuf {
    [RUNTIME_DIR_ENV, "XDG_RUNTIME_DIR"]
        .iter()
        .filter_map(|key| std::env::var_os(key))
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .next()
        .unwrap_or_else(std::env::temp_dir)
}

/// Socket path for `(namespace, connection_id)` under `runtime_dir`.
pub fn socket_path(runtime_dir: &Path, namespace: &str, connection_id: u8) -> Result<PathBuf> {
    validate_namespace(namespace)?;
    Ok(runtime_dir
        .join(namespace)
        .join(format!("{connection_id}.sock")))
}

/// Create the namespace directory for `socket_path` if it does not exist.
///
/// Newly created directories are owner-only (`0700`).
pub fn ensure_parent_dir(socket_path: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    let Some(parent) = socket_path.parent() else {
        return Ok(());
    };
    if parent.is_dir() {
        return Ok(());
    }

    debug!(dir = ?parent, "creating namespace directory");
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(parent)
        .map_err(|source| TransportError::Bind {
            path: socket_path.to_path_buf(),
            source,
        })
}
