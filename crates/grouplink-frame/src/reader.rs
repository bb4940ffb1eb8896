use std::io::{ErrorKind, Read};
use std::time::Duration;

use bytes::BytesMut;
use grouplink_transport::{IpcStream, TransportError};

use crate::codec::{decode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete frames.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
            config,
        }
    }

    /// Block until the next complete frame arrives.
    ///
    /// EOF between frames and EOF inside a frame both yield
    /// [`FrameError::ConnectionClosed`].
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = decode_frame(&mut self.buf, self.config.max_payload_size)? {
                return Ok(frame);
            }

            // Read straight into the buffer tail, then drop what was not filled.
            let filled = self.buf.len();
            self.buf.resize(filled + READ_CHUNK_SIZE, 0);
            let outcome = self.inner.read(&mut self.buf[filled..]);
            let read = *outcome.as_ref().unwrap_or(&0);
            self.buf.truncate(filled + read);

            match outcome {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(_) => {}
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Limit applied to frames decoded from now on.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<IpcStream> {
    /// Wrap `inner`, applying `config.read_timeout` to the socket.
    pub fn with_config_ipc(inner: IpcStream, config: FrameConfig) -> Result<Self> {
        let mut reader = Self::with_config(inner, FrameConfig::default());
        reader.reconfigure(config)?;
        Ok(reader)
    }

    /// Switch to `config`: payload limit and socket read timeout.
    ///
    /// Buffered bytes are kept, so this is safe between frames, e.g. when a
    /// handshake finishes and the peer moves to message traffic.
    pub fn reconfigure(&mut self, config: FrameConfig) -> Result<()> {
        self.set_read_timeout(config.read_timeout)?;
        self.config = config;
        Ok(())
    }

    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.inner
            .set_read_timeout(timeout)
            .map_err(transport_to_frame_error)?;
        self.config.read_timeout = timeout;
        Ok(())
    }
}

/// Socket option failures are plain I/O failures at this layer.
pub(crate) fn transport_to_frame_error(err: TransportError) -> FrameError {
    match err {
        TransportError::Io(io)
        | TransportError::Accept(io)
        | TransportError::Bind { source: io, .. }
        | TransportError::Connect { source: io, .. } => FrameError::Io(io),
        other => FrameError::Io(std::io::Error::other(other)),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io::{self, Cursor};

    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::codec::{encode_frame, MAGIC};
    use crate::kind::{CONTROL, MESSAGE};
    use crate::writer::FrameWriter;

    /// Hands out one scripted step per `read` call, then EOF.
    struct Scripted(VecDeque<io::Result<Vec<u8>>>);

    impl Scripted {
        fn trickle(bytes: &[u8]) -> Self {
            Self(bytes.iter().map(|b| Ok(vec![*b])).collect())
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                None => Ok(0),
                Some(Err(err)) => Err(err),
                Some(Ok(chunk)) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
            }
        }
    }

    fn wire(frames: &[(u16, &[u8])]) -> Vec<u8> {
        let mut out = BytesMut::new();
        for (kind, payload) in frames {
            encode_frame(*kind, payload, &mut out).unwrap();
        }
        out.to_vec()
    }

    #[test]
    fn handshake_then_messages_in_order() {
        let bytes = wire(&[
            (CONTROL, &b"{}"[..]),
            (MESSAGE, &b"one"[..]),
            (MESSAGE, &b"two"[..]),
        ]);
        let mut reader = FrameReader::new(Cursor::new(bytes));

        assert_eq!(reader.read_frame().unwrap(), Frame::control(&b"{}"[..]));
        assert_eq!(reader.read_frame().unwrap(), Frame::message(&b"one"[..]));
        assert_eq!(reader.read_frame().unwrap(), Frame::message(&b"two"[..]));
        assert!(matches!(reader.read_frame(), Err(FrameError::ConnectionClosed)));
    }

    #[test]
    fn payload_larger_than_one_read() {
        let payload = vec![0x5A; 3 * READ_CHUNK_SIZE + 17];
        let mut reader = FrameReader::new(Cursor::new(wire(&[(MESSAGE, payload.as_slice())])));

        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.payload.len(), payload.len());
        assert!(frame.payload.iter().all(|b| *b == 0x5A));
    }

    #[test]
    fn one_byte_at_a_time() {
        let bytes = wire(&[(MESSAGE, &b"slow"[..]), (CONTROL, &b""[..])]);
        let mut reader = FrameReader::new(Scripted::trickle(&bytes));

        assert_eq!(reader.read_frame().unwrap(), Frame::message(&b"slow"[..]));
        assert_eq!(reader.read_frame().unwrap(), Frame::control(&b""[..]));
    }

    #[test]
    fn interrupted_reads_are_retried() {
        let bytes = wire(&[(MESSAGE, &b"ok"[..])]);
        let (head, tail) = bytes.split_at(3);
        let mut reader = FrameReader::new(Scripted(VecDeque::from([
            Err(io::Error::from(ErrorKind::Interrupted)),
            Ok(head.to_vec()),
            Err(io::Error::from(ErrorKind::Interrupted)),
            Ok(tail.to_vec()),
        ])));

        assert_eq!(reader.read_frame().unwrap(), Frame::message(&b"ok"[..]));
    }

    #[test]
    fn other_read_errors_surface() {
        let mut reader = FrameReader::new(Scripted(VecDeque::from([Err(io::Error::from(
            ErrorKind::ConnectionReset,
        ))])));
        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::Io(e)) if e.kind() == ErrorKind::ConnectionReset
        ));
    }

    #[test]
    fn eof_inside_payload() {
        let mut partial = BytesMut::new();
        partial.put_slice(&MAGIC);
        partial.put_u32_le(16);
        partial.put_u16_le(MESSAGE);
        partial.put_slice(b"only-part");

        let mut reader = FrameReader::new(Cursor::new(partial.to_vec()));
        assert!(matches!(reader.read_frame(), Err(FrameError::ConnectionClosed)));
    }

    #[test]
    fn non_grouplink_peer_rejected() {
        let mut reader = FrameReader::new(Cursor::new(b"GET / HTTP/1.1\r\n".to_vec()));
        assert!(matches!(reader.read_frame(), Err(FrameError::InvalidMagic)));
    }

    #[test]
    fn limit_checked_from_header_alone() {
        let mut header = BytesMut::new();
        header.put_slice(&MAGIC);
        header.put_u32_le(1024);
        header.put_u16_le(CONTROL);

        let cfg = FrameConfig::handshake(16, Duration::from_secs(1));
        let mut reader = FrameReader::with_config(Cursor::new(header.to_vec()), cfg);
        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::PayloadTooLarge { size: 1024, max: 16 })
        ));
    }

    #[test]
    fn raised_limit_applies_to_next_frame() {
        let bytes = wire(&[(CONTROL, &b"hi"[..]), (MESSAGE, &[7u8; 64][..])]);
        let cfg = FrameConfig::handshake(8, Duration::from_secs(1));
        let mut reader = FrameReader::with_config(Cursor::new(bytes), cfg);

        reader.read_frame().unwrap();
        reader.set_max_payload_size(64);
        assert_eq!(reader.read_frame().unwrap().payload.len(), 64);
    }

    #[test]
    fn frames_cross_a_socket_pair() {
        let (left, right) = IpcStream::pair().unwrap();
        let mut writer = FrameWriter::new(left);
        let mut reader = FrameReader::with_config_ipc(right, FrameConfig::default()).unwrap();

        writer.send(MESSAGE, b"ping").unwrap();
        assert_eq!(reader.read_frame().unwrap(), Frame::message(&b"ping"[..]));
    }

    #[test]
    fn handshake_timeout_then_reconfigure() {
        let (_left, right) = IpcStream::pair().unwrap();
        let cfg = FrameConfig::handshake(64, Duration::from_millis(10));
        let mut reader = FrameReader::with_config_ipc(right, cfg).unwrap();

        let err = reader.read_frame().unwrap_err();
        assert!(matches!(
            err,
            FrameError::Io(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut
        ));

        reader.reconfigure(FrameConfig::default()).unwrap();
        assert_eq!(reader.config().read_timeout, None);
        assert_eq!(reader.config().max_payload_size, crate::DEFAULT_MAX_PAYLOAD);
    }
}
