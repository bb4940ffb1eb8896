use std::io;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::namespace::{ensure_parent_dir, socket_path};
use crate::stream::IpcStream;

/// `sockaddr_un.sun_path` capacity: 108 bytes on Linux, 104 on the BSDs and macOS.
#[cfg(target_os = "linux")]
const MAX_PATH_LEN: usize = 108;
#[cfg(not(target_os = "linux"))]
const MAX_PATH_LEN: usize = 104;

/// Socket files are readable and writable by the owner only.
const SOCKET_MODE: u32 = 0o600;

/// Listening Unix domain socket.
///
/// Socket files are created owner-only and removed again on `Drop`, but only
/// while the path still refers to the inode this listener created. A
/// restarted server may therefore rebind the same path while an older
/// listener is still being torn down.
pub struct UnixDomainSocket {
    listener: UnixListener,
    path: PathBuf,
    /// `(dev, ino)` of the socket file this listener created.
    inode: (u64, u64),
}

impl UnixDomainSocket {
    /// Bind and listen on `path`.
    ///
    /// A stale socket file at `path` is replaced. Any other kind of file is
    /// left alone and the bind fails.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let len = path.as_os_str().len();
        if len >= MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len,
                max: MAX_PATH_LEN,
            });
        }

        let bind_err = |source: io::Error| TransportError::Bind {
            path: path.clone(),
            source,
        };

        match std::fs::symlink_metadata(&path) {
            Ok(existing) if existing.file_type().is_socket() => {
                debug!(?path, "replacing stale socket");
                std::fs::remove_file(&path).map_err(bind_err)?;
            }
            Ok(_) => {
                return Err(bind_err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(bind_err(err)),
        }

        let listener = UnixListener::bind(&path).map_err(bind_err)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(SOCKET_MODE))
            .map_err(bind_err)?;
        let created = std::fs::symlink_metadata(&path).map_err(bind_err)?;

        info!(?path, "bound unix domain socket");
        Ok(Self {
            listener,
            inode: (created.dev(), created.ino()),
            path,
        })
    }

    /// Bind the socket for `(namespace, connection_id)` under `runtime_dir`.
    ///
    /// Creates the namespace directory (`0700`) when missing.
    pub fn bind_namespace(runtime_dir: &Path, namespace: &str, connection_id: u8) -> Result<Self> {
        let path = socket_path(runtime_dir, namespace, connection_id)?;
        ensure_parent_dir(&path)?;
        Self::bind(path)
    }

    /// Accept an incoming connection.
    ///
    /// Blocks unless the listener was switched to non-blocking mode, in which
    /// case a pending-free listener yields `WouldBlock` inside
    /// [`TransportError::Accept`]. Prefer [`try_accept`](Self::try_accept) then.
    pub fn accept(&self) -> Result<IpcStream> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!("accepted connection");
        Ok(IpcStream::from_unix(stream))
    }

    /// Accept a pending connection without blocking.
    ///
    /// Returns `Ok(None)` when no connection is waiting. The accepted stream
    /// is always in blocking mode, whatever the listener's mode is.
    pub fn try_accept(&self) -> Result<Option<IpcStream>> {
        match self.listener.accept() {
            Ok((stream, _addr)) => {
                stream.set_nonblocking(false).map_err(TransportError::Accept)?;
                debug!("accepted connection");
                Ok(Some(IpcStream::from_unix(stream)))
            }
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::Interrupted =>
            {
                Ok(None)
            }
            Err(err) => Err(TransportError::Accept(err)),
        }
    }

    /// Switch the listener between blocking and non-blocking accept.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.listener
            .set_nonblocking(nonblocking)
            .map_err(TransportError::Io)
    }

    /// Connect to the socket for `(namespace, connection_id)` under `runtime_dir`.
    pub fn connect_namespace(
        runtime_dir: &Path,
        namespace: &str,
        connection_id: u8,
    ) -> Result<IpcStream> {
        let path = socket_path(runtime_dir, namespace, connection_id)?;
        Self::connect(path)
    }

    /// Connect to a listening Unix domain socket (blocking).
    pub fn connect(path: impl AsRef<Path>) -> Result<IpcStream> {
        let path = path.as_ref();
        let stream =
            std::os::unix::net::UnixStream::connect(path).map_err(|e| TransportError::Connect {
                path: path.to_path_buf(),
                source: e,
            })?;
        debug!(?path, "connected to unix domain socket");
        Ok(IpcStream::from_unix(stream))
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UnixDomainSocket {
    fn drop(&mut self) {
        let Ok(current) = std::fs::symlink_metadata(&self.path) else {
            return;
        };
        if current.file_type().is_socket() && (current.dev(), current.ino()) == self.inode {
            debug!(path = ?self.path, "removing socket file");
            let _ = std::fs::remove_file(&self.path);
        } else {
            debug!(path = ?self.path, "socket path was replaced; leaving it");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::time::Duration;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("grouplink-uds-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn accepted_stream_carries_bytes_and_drop_removes_socket() {
        let dir = scratch_dir("accept");
        let sock_path = dir.join("test.sock");
        let listener = UnixDomainSocket::bind(&sock_path).unwrap();

        let client_path = sock_path.clone();
        let client = std::thread::spawn(move || {
            UnixDomainSocket::connect(&client_path)
                .unwrap()
                .write_all(b"hello")
                .unwrap();
        });

        let mut server = listener.accept().unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        client.join().unwrap();

        drop(listener);
        assert!(!sock_path.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn overlong_path_is_refused() {
        let long_path = format!("/tmp/{}.sock", "a".repeat(200));
        assert!(matches!(
            UnixDomainSocket::bind(&long_path),
            Err(TransportError::PathTooLong { .. })
        ));
    }

    #[test]
    fn socket_is_owner_only() {
        let dir = scratch_dir("perms");
        let listener = UnixDomainSocket::bind(dir.join("perm.sock")).unwrap();
        let mode = std::fs::metadata(listener.path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, SOCKET_MODE);

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn stale_socket_is_replaced_but_regular_file_is_not() {
        let dir = scratch_dir("stale");
        let sock_path = dir.join("stale.sock");
        // A listener that vanished without cleanup leaves its socket file.
        std::mem::forget(UnixListener::bind(&sock_path).unwrap());
        let listener = UnixDomainSocket::bind(&sock_path).unwrap();
        assert!(UnixDomainSocket::connect(&sock_path).is_ok());
        drop(listener);

        let file_path = dir.join("not-a-socket.sock");
        std::fs::write(&file_path, b"regular-file").unwrap();
        assert!(matches!(
            UnixDomainSocket::bind(&file_path),
            Err(TransportError::Bind { .. })
        ));
        assert_eq!(std::fs::read(&file_path).unwrap(), b"regular-file");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn drop_leaves_replaced_path_alone() {
        let dir = scratch_dir("replaced");
        let sock_path = dir.join("drop.sock");
        let listener = UnixDomainSocket::bind(&sock_path).unwrap();

        std::fs::remove_file(&sock_path).unwrap();
        std::fs::write(&sock_path, b"replacement-file").unwrap();

        drop(listener);
        assert!(sock_path.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn try_accept_polls_without_blocking() {
        let dir = scratch_dir("poll");
        let sock_path = dir.join("poll.sock");
        let listener = UnixDomainSocket::bind(&sock_path).unwrap();
        listener.set_nonblocking(true).unwrap();
        assert!(listener.try_accept().unwrap().is_none());

        let mut client = UnixDomainSocket::connect(&sock_path).unwrap();
        client.write_all(b"x").unwrap();

        let mut server = (0..100)
            .find_map(|_| {
                let accepted = listener.try_accept().unwrap();
                if accepted.is_none() {
                    std::thread::sleep(Duration::from_millis(5));
                }
                accepted
            })
            .expect("pending connection should be accepted");
        let mut buf = [0u8; 1];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"x");

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn namespace_bind_and_connect_meet() {
        let base = std::env::temp_dir().join(format!("grouplink-nsbind-{}", std::process::id()));
        let listener = UnixDomainSocket::bind_namespace(&base, "group.bind", 3).unwrap();
        assert_eq!(listener.path(), base.join("group.bind").join("3.sock"));
        assert!(UnixDomainSocket::connect_namespace(&base, "group.bind", 3).is_ok());

        drop(listener);
        let _ = std::fs::remove_dir_all(&base);
    }

    #[test]
    fn connect_rejects_bad_namespace() {
        assert!(matches!(
            UnixDomainSocket::connect_namespace(Path::new("/tmp"), "../x", 0),
            Err(TransportError::InvalidNamespace { .. })
        ));
    }
}
