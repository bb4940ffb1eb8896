use std::io::{ErrorKind, Write};
use std::time::Duration;

use bytes::BytesMut;
use grouplink_transport::IpcStream;

use crate::codec::{encode_frame, Frame, FrameConfig, HEADER_SIZE};
use crate::error::{FrameError, Result};
use crate::reader::transport_to_frame_error;

/// Writes complete frames to any `Write` stream.
///
/// Header and payload go out through one reused buffer so a frame is never
/// split across two `write_all` calls.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
            config,
        }
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.send(frame.kind, frame.payload.as_ref())
    }

    /// Frame `payload` as `kind`, write it out and flush.
    ///
    /// An oversized payload is refused before anything touches the stream.
    pub fn send(&mut self, kind: u16, payload: &[u8]) -> Result<()> {
        let max = self.config.max_payload_size;
        if payload.len() > max {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }

        self.buf.clear();
        self.buf.reserve(HEADER_SIZE + payload.len());
        encode_frame(kind, payload, &mut self.buf)?;

        self.inner.write_all(&self.buf).map_err(io_to_frame_error)?;
        self.flush()
    }

    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                other => return other.map_err(io_to_frame_error),
            }
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameWriter<IpcStream> {
    /// Wrap `inner`, applying `config.write_timeout` to the socket.
    pub fn with_config_ipc(inner: IpcStream, config: FrameConfig) -> Result<Self> {
        let mut writer = Self::with_config(inner, FrameConfig::default());
        writer.reconfigure(config)?;
        Ok(writer)
    }

    /// Switch to `config`: payload limit and socket write timeout.
    pub fn reconfigure(&mut self, config: FrameConfig) -> Result<()> {
        self.set_write_timeout(config.write_timeout)?;
        self.config = config;
        Ok(())
    }

    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.inner
            .set_write_timeout(timeout)
            .map_err(transport_to_frame_error)?;
        self.config.write_timeout = timeout;
        Ok(())
    }
}

/// A stream that stops accepting bytes counts as a closed peer.
fn io_to_frame_error(err: std::io::Error) -> FrameError {
    match err.kind() {
        ErrorKind::WriteZero | ErrorKind::BrokenPipe => FrameError::ConnectionClosed,
        _ => FrameError::Io(err),
    }
}
