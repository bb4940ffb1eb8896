use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use crate::error::Result;

/// Credentials of the process on the other end of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCredentials {
    pub uid: u32,
    pub gid: u32,
    pub pid: u32,
}

/// A connected byte stream between two grouplink endpoints.
///
/// Every clone made with [`IpcStream::try_clone`] shares the same socket, so
/// a reader thread and a writer thread can each own one half.
#[derive(Debug)]
pub struct IpcStream(UnixStream);

impl IpcStream {
    pub(crate) fn from_unix(stream: UnixStream) -> Self {
        Self(stream)
    }

    /// A connected pair of anonymous streams.
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = UnixStream::pair()?;
        Ok((Self(left), Self(right)))
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        Ok(self.0.set_read_timeout(timeout)?)
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        Ok(self.0.set_write_timeout(timeout)?)
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        Ok(self.0.set_nonblocking(nonblocking)?)
    }

    /// Shut down both directions.
    ///
    /// Wakes any thread blocked on a clone of this stream. Calling it on a
    /// stream the peer already closed succeeds.
    pub fn shutdown(&self) -> Result<()> {
        match self.0.shutdown(Shutdown::Both) {
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => Ok(other?),
        }
    }

    /// A second handle on the same socket (new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self(self.0.try_clone()?))
    }

    /// Credentials of the connected peer via `SO_PEERCRED`.
    #[cfg(target_os = "linux")]
    pub fn peer_credentials(&self) -> Option<PeerCredentials> {
        use std::os::fd::AsRawFd;

        let mut cred = libc::ucred {
            pid: 0,
            uid: 0,
            gid: 0,
        };
        let expected = std::mem::size_of::<libc::ucred>() as libc::socklen_t;
        let mut len = expected;

        // SAFETY: `cred` and `len` point to writable storage of the sizes passed,
        // and the descriptor stays open for the lifetime of `self`.
        let rc = unsafe {
            libc::getsockopt(
                self.0.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                (&mut cred as *mut libc::ucred).cast::<libc::c_void>(),
                &mut len,
            )
        };

        (rc == 0 && len == expected).then(|| PeerCredentials {
            uid: cred.uid,
            gid: cred.gid,
            pid: cred.pid as u32,
        })
    }

    /// Peer credentials are not available on this platform.
    #[cfg(not(target_os = "linux"))]
    pub fn peer_credentials(&self) -> Option<PeerCredentials> {
        None
    }
}

impl Read for IpcStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for IpcStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::thread;

    use super::*;

    #[test]
    fn pair_carries_bytes_both_ways() {
        let (mut left, mut right) = IpcStream::pair().unwrap();
        left.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        right.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        right.write_all(b"pong").unwrap();
        left.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[test]
    fn shutdown_wakes_blocked_clone() {
        let (left, _right) = IpcStream::pair().unwrap();
        let mut reader = left.try_clone().unwrap();

        let handle = thread::spawn(move || {
            let mut buf = [0u8; 1];
            reader.read(&mut buf).unwrap()
        });

        thread::sleep(Duration::from_millis(20));
        left.shutdown().unwrap();
        assert_eq!(handle.join().unwrap(), 0);

        left.shutdown().unwrap();
    }

    #[test]
    fn nonblocking_read_reports_would_block() {
        let (left, _right) = IpcStream::pair().unwrap();
        left.set_nonblocking(true).unwrap();
        let mut reader = left;
        let err = reader.read(&mut [0u8; 1]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn peer_credentials_report_own_pid() {
        let (left, _right) = IpcStream::pair().unwrap();
        let creds = left.peer_credentials().expect("linux exposes SO_PEERCRED");
        assert_eq!(creds.pid, std::process::id());
        assert_eq!(creds.uid, unsafe { libc::getuid() });
    }
}
